//! Декораторы: выбор по предикату, decoratee как factory, lifestyle слоя

use injector::{
    Constructor, Container, Decorator, Descriptor, DiError, Factory, Implementation, Lifestyle,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

trait Handler: Send + Sync {
    fn handle(&self) -> String;
}

struct EmailHandler;
struct SmsHandler;
struct PushHandler;

impl Handler for EmailHandler {
    fn handle(&self) -> String {
        "email".into()
    }
}

impl Handler for SmsHandler {
    fn handle(&self) -> String {
        "sms".into()
    }
}

impl Handler for PushHandler {
    fn handle(&self) -> String {
        "push".into()
    }
}

fn handler<I>(build: fn() -> I) -> Descriptor<dyn Handler>
where
    I: Handler + 'static,
{
    Descriptor::implementation(
        Implementation::<dyn Handler>::new::<I>().constructor(
            Constructor::<dyn Handler>::new(std::any::type_name::<I>()).build(move |_| Ok(Arc::new(build()))),
        ),
    )
}

struct Retrying {
    inner: Arc<dyn Handler>,
}

impl Handler for Retrying {
    fn handle(&self) -> String {
        format!("retrying({})", self.inner.handle())
    }
}

fn retrying() -> Implementation<dyn Handler> {
    Implementation::<dyn Handler>::new::<Retrying>().constructor(
        Constructor::<dyn Handler>::new("Retrying(handler)")
            .param::<dyn Handler>()
            .build(|args| {
                Ok(Arc::new(Retrying {
                    inner: args.service::<dyn Handler>()?,
                }))
            }),
    )
}

#[test]
fn test_decorator_applies_to_one_of_three_implementations() {
    let container = Container::new();
    container
        .register_collection::<dyn Handler>(vec![
            (handler(|| EmailHandler), Lifestyle::Transient),
            (handler(|| SmsHandler), Lifestyle::Transient),
            (handler(|| PushHandler), Lifestyle::Transient),
        ])
        .unwrap();
    container
        .register_decorator(
            Decorator::new(retrying()).when(|context| context.implementation_is::<SmsHandler>()),
        )
        .unwrap();

    container.verify().unwrap();

    let handlers = container.collection::<dyn Handler>().unwrap();
    let results: Vec<String> = handlers.iter().map(|h| h.unwrap().handle()).collect();
    assert_eq!(results, vec!["email", "retrying(sms)", "push"]);
}

#[test]
fn test_decorators_applied_in_registration_order() {
    struct Logging {
        inner: Arc<dyn Handler>,
    }

    impl Handler for Logging {
        fn handle(&self) -> String {
            format!("logging({})", self.inner.handle())
        }
    }

    let seen = Arc::new(support::Seen::default());
    let observed = Arc::clone(&seen);

    let container = Container::new();
    container
        .register::<dyn Handler>(handler(|| EmailHandler), Lifestyle::Transient)
        .unwrap();
    container
        .register_decorator(Decorator::new(retrying()))
        .unwrap();
    container
        .register_decorator(
            Decorator::new(
                Implementation::<dyn Handler>::new::<Logging>().constructor(
                    Constructor::<dyn Handler>::new("Logging(handler)")
                        .param::<dyn Handler>()
                        .build(|args| {
                            Ok(Arc::new(Logging {
                                inner: args.service::<dyn Handler>()?,
                            }))
                        }),
                ),
            )
            .when(move |context| {
                observed.record(context.applied_decorators().len());
                true
            }),
        )
        .unwrap();

    let handler = container.resolve::<dyn Handler>().unwrap();
    assert_eq!(handler.handle(), "logging(retrying(email))");
    // Ко второму декоратору первый уже применен
    assert_eq!(seen.last(), Some(1));
}

struct Lazy {
    factory: Factory<dyn Handler>,
}

impl Handler for Lazy {
    fn handle(&self) -> String {
        match self.factory.create() {
            Ok(inner) => format!("lazy({})", inner.handle()),
            Err(error) => error.to_string(),
        }
    }
}

#[test]
fn test_singleton_decorator_over_transient_factory_decoratee() {
    let created = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&created);

    let container = Container::new();
    container
        .register_factory::<dyn Handler>(Lifestyle::Transient, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(PushHandler))
        })
        .unwrap();
    container
        .register_decorator(
            Decorator::new(
                Implementation::<dyn Handler>::new::<Lazy>().constructor(
                    Constructor::<dyn Handler>::new("Lazy(Factory<handler>)")
                        .factory_param::<dyn Handler>()
                        .build(|args| {
                            Ok(Arc::new(Lazy {
                                factory: args.factory::<dyn Handler>()?,
                            }))
                        }),
                ),
            )
            .lifestyle(Lifestyle::Singleton),
        )
        .unwrap();

    let first = container.resolve::<dyn Handler>().unwrap();
    let second = container.resolve::<dyn Handler>().unwrap();
    // Один экземпляр декоратора
    assert!(Arc::ptr_eq(&first, &second));
    // Decoratee еще не создавался
    assert_eq!(created.load(Ordering::SeqCst), 0);

    assert_eq!(first.handle(), "lazy(push)");
    assert_eq!(first.handle(), "lazy(push)");
    // Каждый вызов factory создает новый transient decoratee
    assert_eq!(created.load(Ordering::SeqCst), 2);
}

#[test]
fn test_ineligible_decorator_is_skipped() {
    // Два decoratee параметра - декоратор неприменим
    let double = Implementation::<dyn Handler>::new::<Retrying>().constructor(
        Constructor::<dyn Handler>::new("Retrying(handler, handler)")
            .param::<dyn Handler>()
            .param::<dyn Handler>()
            .build(|args| {
                Ok(Arc::new(Retrying {
                    inner: args.service::<dyn Handler>()?,
                }))
            }),
    );

    let container = Container::new();
    container
        .register::<dyn Handler>(handler(|| SmsHandler), Lifestyle::Transient)
        .unwrap();
    container.register_decorator(Decorator::new(double)).unwrap();

    assert_eq!(container.resolve::<dyn Handler>().unwrap().handle(), "sms");
}

#[test]
fn test_required_decorator_with_missing_dependency() {
    let container = Container::new();
    container
        .register::<dyn Handler>(handler(|| SmsHandler), Lifestyle::Transient)
        .unwrap();
    container
        .register_decorator(
            Decorator::new(
                Implementation::<dyn Handler>::new::<Retrying>().constructor(
                    Constructor::<dyn Handler>::new("Retrying(handler, u32)")
                        .param::<dyn Handler>()
                        .param::<u32>()
                        .build(|args| {
                            Ok(Arc::new(Retrying {
                                inner: args.service::<dyn Handler>()?,
                            }))
                        }),
                ),
            )
            .required(),
        )
        .unwrap();

    let error = container.resolve::<dyn Handler>().err().unwrap();
    assert!(matches!(error, DiError::InvalidDecorator { .. }));
    assert!(error.is_configuration_error());
}

#[test]
fn test_decorator_with_extra_dependency() {
    struct Prefixed {
        prefix: Arc<String>,
        inner: Arc<dyn Handler>,
    }

    impl Handler for Prefixed {
        fn handle(&self) -> String {
            format!("{}:{}", self.prefix, self.inner.handle())
        }
    }

    let container = Container::new();
    container.register_instance(Arc::new(String::from("v2"))).unwrap();
    container
        .register::<dyn Handler>(handler(|| EmailHandler), Lifestyle::Singleton)
        .unwrap();
    container
        .register_decorator(Decorator::new(
            Implementation::<dyn Handler>::new::<Prefixed>().constructor(
                Constructor::<dyn Handler>::new("Prefixed(prefix, handler)")
                    .param::<String>()
                    .param::<dyn Handler>()
                    .build(|args| {
                        let prefix = args.service::<String>()?;
                        let inner = args.service::<dyn Handler>()?;
                        Ok(Arc::new(Prefixed { prefix, inner }))
                    }),
            ),
        ))
        .unwrap();

    let first = container.resolve::<dyn Handler>().unwrap();
    let second = container.resolve::<dyn Handler>().unwrap();
    assert_eq!(first.handle(), "v2:email");
    // Transient декоратор над singleton decoratee
    assert!(!Arc::ptr_eq(&first, &second));

    let graph = container.dependency_graph();
    assert_eq!(graph.stats().total_edges, 1);
}

#[test]
fn test_decorator_creates_decoratee_in_constructor() {
    struct Eager {
        inner: Arc<dyn Handler>,
    }

    impl Handler for Eager {
        fn handle(&self) -> String {
            format!("eager({})", self.inner.handle())
        }
    }

    let container = Container::new();
    container
        .register::<dyn Handler>(handler(|| EmailHandler), Lifestyle::Transient)
        .unwrap();
    container
        .register_decorator(Decorator::new(
            Implementation::<dyn Handler>::new::<Eager>().constructor(
                Constructor::<dyn Handler>::new("Eager(Factory<handler>)")
                    .factory_param::<dyn Handler>()
                    .build(|args| {
                        // Decoratee - внутренний слой того же ключа, а не цикл
                        let inner = args.factory::<dyn Handler>()?.create()?;
                        Ok(Arc::new(Eager { inner }))
                    }),
            ),
        ))
        .unwrap();

    container.verify().unwrap();
    assert_eq!(container.resolve::<dyn Handler>().unwrap().handle(), "eager(email)");
}

mod support {
    use std::sync::Mutex;

    /// Значения, увиденные предикатом декоратора
    #[derive(Default)]
    pub struct Seen(Mutex<Vec<usize>>);

    impl Seen {
        pub fn record(&self, value: usize) {
            self.0.lock().unwrap().push(value);
        }

        pub fn last(&self) -> Option<usize> {
            self.0.lock().unwrap().last().copied()
        }
    }
}
