//! Явное описание конструкторов реализаций.
//!
//! Контейнер не умеет интроспекцию типов, поэтому реализация сама объявляет
//! свои конструкторы: сигнатуру (для диагностики), список зависимостей и
//! функцию сборки, получающую уже разрешенные аргументы в том же порядке.
//!
//! ```ignore
//! impl Component<dyn Repository> for SqlRepository {
//!     fn constructors() -> Vec<Constructor<dyn Repository>> {
//!         vec![Constructor::new("SqlRepository(logger)")
//!             .param::<dyn Logger>()
//!             .build(|args| Ok(Arc::new(SqlRepository { logger: args.service()? })))]
//!     }
//! }
//! ```

use std::{marker::PhantomData, sync::Arc};

use crate::{
    collections::{Collection, Keyed},
    errors::{DiError, DiResult},
    resolver::{expect_instance, Factory, FactoryHandle},
    service_key::{erase, Instance, ServiceKey, ServiceType},
};

/// Способ передачи зависимости в конструктор
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    /// Готовый экземпляр
    Direct,
    /// `Factory<T>`, создающий экземпляр по требованию
    Factory,
}

/// Объявленная зависимость конструктора
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    key: ServiceKey,
    kind: DependencyKind,
}

impl Dependency {
    pub fn new(key: ServiceKey, kind: DependencyKind) -> Self {
        Self { key, kind }
    }

    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    pub fn kind(&self) -> DependencyKind {
        self.kind
    }
}

type BuildFn<T> = Arc<dyn Fn(&mut Arguments) -> anyhow::Result<Arc<T>> + Send + Sync>;

/// Конструктор реализации контракта `T`
pub struct Constructor<T: ?Sized> {
    signature: String,
    dependencies: Vec<Dependency>,
    build: BuildFn<T>,
}

impl<T> Constructor<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    #[allow(clippy::new_ret_no_self)]
    pub fn new(signature: impl Into<String>) -> ConstructorBuilder<T> {
        ConstructorBuilder {
            signature: signature.into(),
            dependencies: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub(crate) fn erase(self) -> ErasedConstructor {
        let build = self.build;
        ErasedConstructor {
            signature: self.signature,
            dependencies: self.dependencies,
            build: Arc::new(move |args: &mut Arguments| build(args).map(erase)),
        }
    }
}

/// Builder конструктора: параметры объявляются в порядке передачи
pub struct ConstructorBuilder<T: ?Sized> {
    signature: String,
    dependencies: Vec<Dependency>,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<T> ConstructorBuilder<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    /// Зависимость на plain регистрацию `D`
    pub fn param<D: ?Sized + 'static>(self) -> Self {
        self.dependency(ServiceKey::of::<D>(), DependencyKind::Direct)
    }

    /// Зависимость на keyed регистрацию `D`
    pub fn keyed_param<D: ?Sized + 'static>(self, key: &str) -> Self {
        self.dependency(ServiceKey::keyed::<D>(key), DependencyKind::Direct)
    }

    /// `Factory<D>` вместо готового экземпляра
    pub fn factory_param<D: ?Sized + 'static>(self) -> Self {
        self.dependency(ServiceKey::of::<D>(), DependencyKind::Factory)
    }

    /// Все элементы коллекции `D`
    pub fn collection_param<D: ?Sized + Send + Sync + 'static>(self) -> Self {
        self.dependency(ServiceKey::of::<Collection<D>>(), DependencyKind::Direct)
    }

    /// Все keyed регистрации `D` (коллекция + lookup по ключу)
    pub fn keyed_group_param<D: ?Sized + Send + Sync + 'static>(self) -> Self {
        self.dependency(ServiceKey::of::<Keyed<D>>(), DependencyKind::Direct)
    }

    pub fn dependency(mut self, key: ServiceKey, kind: DependencyKind) -> Self {
        self.dependencies.push(Dependency::new(key, kind));
        self
    }

    pub fn build<F>(self, build: F) -> Constructor<T>
    where
        F: Fn(&mut Arguments) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        Constructor {
            signature: self.signature,
            dependencies: self.dependencies,
            build: Arc::new(build),
        }
    }
}

/// Реализация контракта `T`: тип реализации + его конструкторы
pub struct Implementation<T: ?Sized> {
    implementation: ServiceType,
    constructors: Vec<Constructor<T>>,
}

impl<T> Implementation<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    pub fn new<I: ?Sized + 'static>() -> Self {
        Self {
            implementation: ServiceType::of::<I>(),
            constructors: Vec::new(),
        }
    }

    /// Реализация, конструкторы которой объявлены через `Component`
    pub fn component<C: Component<T>>() -> Self {
        Self {
            implementation: ServiceType::of::<C>(),
            constructors: C::constructors(),
        }
    }

    pub fn constructor(mut self, constructor: Constructor<T>) -> Self {
        self.constructors.push(constructor);
        self
    }

    pub fn implementation_type(&self) -> ServiceType {
        self.implementation
    }

    pub fn constructors(&self) -> &[Constructor<T>] {
        &self.constructors
    }

    pub(crate) fn erase(self) -> ErasedImplementation {
        ErasedImplementation {
            implementation: self.implementation,
            constructors: self.constructors.into_iter().map(Constructor::erase).collect(),
        }
    }
}

/// Тип, который умеет описать свои конструкторы для контракта `T`
pub trait Component<T: ?Sized>: 'static {
    fn constructors() -> Vec<Constructor<T>>;
}

pub(crate) type ErasedBuildFn = Arc<dyn Fn(&mut Arguments) -> anyhow::Result<Instance> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct ErasedConstructor {
    pub(crate) signature: String,
    pub(crate) dependencies: Vec<Dependency>,
    pub(crate) build: ErasedBuildFn,
}

#[derive(Clone)]
pub(crate) struct ErasedImplementation {
    pub(crate) implementation: ServiceType,
    pub(crate) constructors: Vec<ErasedConstructor>,
}

/// Разрешенный аргумент конструктора
pub(crate) enum Argument {
    Instance(Option<Instance>),
    Factory(FactoryHandle),
}

/// Позиционные аргументы, передаваемые в функцию сборки
pub struct Arguments {
    signature: String,
    values: std::vec::IntoIter<Argument>,
    position: usize,
}

impl Arguments {
    pub(crate) fn new(signature: impl Into<String>, values: Vec<Argument>) -> Self {
        Self {
            signature: signature.into(),
            values: values.into_iter(),
            position: 0,
        }
    }

    fn next(&mut self) -> DiResult<Argument> {
        let position = self.position;
        self.position += 1;
        self.values.next().ok_or_else(|| DiError::InvalidRegistration {
            service: self.signature.clone(),
            reason: format!("argument #{position} was requested, but it isn't declared"),
        })
    }

    /// Следующий аргумент как экземпляр `D`
    pub fn service<D>(&mut self) -> DiResult<Arc<D>>
    where
        D: ?Sized + Send + Sync + 'static,
    {
        match self.next()? {
            Argument::Instance(instance) => {
                expect_instance::<D>(&ServiceKey::of::<D>(), instance)
            }
            Argument::Factory(handle) => Err(DiError::TypeMismatch {
                service: handle.key().to_string(),
                requested: std::any::type_name::<D>().to_string(),
            }),
        }
    }

    /// Следующий аргумент как `Factory<D>`
    pub fn factory<D>(&mut self) -> DiResult<Factory<D>>
    where
        D: ?Sized + Send + Sync + 'static,
    {
        match self.next()? {
            Argument::Factory(handle) if handle.key().service().is::<D>() => Ok(Factory::new(handle)),
            Argument::Factory(handle) => Err(DiError::TypeMismatch {
                service: handle.key().to_string(),
                requested: std::any::type_name::<Factory<D>>().to_string(),
            }),
            Argument::Instance(_) => Err(DiError::TypeMismatch {
                service: self.signature.clone(),
                requested: std::any::type_name::<Factory<D>>().to_string(),
            }),
        }
    }

    pub fn collection<D>(&mut self) -> DiResult<Collection<D>>
    where
        D: ?Sized + Send + Sync + 'static,
    {
        self.service::<Collection<D>>().map(|c| (*c).clone())
    }

    pub fn keyed<D>(&mut self) -> DiResult<Keyed<D>>
    where
        D: ?Sized + Send + Sync + 'static,
    {
        self.service::<Keyed<D>>().map(|k| (*k).clone())
    }

    /// Сколько аргументов еще не прочитано
    pub fn remaining(&self) -> usize {
        self.values.len()
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct Plain(String);

    impl Greeter for Plain {
        fn greet(&self) -> String {
            self.0.clone()
        }
    }

    impl Component<dyn Greeter> for Plain {
        fn constructors() -> Vec<Constructor<dyn Greeter>> {
            vec![Constructor::<dyn Greeter>::new("Plain(String)")
                .param::<String>()
                .build(|args| {
                    let name = args.service::<String>()?;
                    Ok(Arc::new(Plain(name.to_string())))
                })]
        }
    }

    #[test]
    fn test_builder_keeps_parameter_order() {
        let constructor = Constructor::<dyn Greeter>::new("X(a, b, c)")
            .param::<u32>()
            .keyed_param::<u32>("b")
            .factory_param::<String>()
            .build(|_| Ok(Arc::new(Plain("x".into()))));

        let kinds: Vec<_> = constructor.dependencies().iter().map(Dependency::kind).collect();
        assert_eq!(
            kinds,
            vec![DependencyKind::Direct, DependencyKind::Direct, DependencyKind::Factory]
        );
        assert_eq!(constructor.dependencies()[1].key(), &ServiceKey::keyed::<u32>("b"));
        assert_eq!(constructor.signature(), "X(a, b, c)");
    }

    #[test]
    fn test_component_implementation() {
        let implementation = Implementation::<dyn Greeter>::component::<Plain>();
        assert!(implementation.implementation_type().is::<Plain>());
        assert_eq!(implementation.constructors().len(), 1);

        let erased = implementation.erase();
        let mut args = Arguments::new(
            "Plain(String)",
            vec![Argument::Instance(Some(erase(Arc::new(String::from("hi")))))],
        );
        let instance = (erased.constructors[0].build)(&mut args).unwrap();
        let greeter = crate::service_key::downcast::<dyn Greeter>(&instance).unwrap();
        assert_eq!(greeter.greet(), "hi");
    }

    #[test]
    fn test_arguments_errors() {
        let mut args = Arguments::new("X(u32)", vec![Argument::Instance(None)]);
        assert!(matches!(args.service::<u32>(), Err(DiError::NullInstance { .. })));

        // Аргументы закончились
        let error = args.service::<u32>().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Configuration);
        assert_eq!(args.remaining(), 0);

        let mut args = Arguments::new("X(u32)", vec![Argument::Instance(Some(erase(Arc::new(1u64))))]);
        assert!(matches!(args.service::<u32>(), Err(DiError::TypeMismatch { .. })));
    }
}
