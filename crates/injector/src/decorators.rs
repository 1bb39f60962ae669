//! Декораторы: перехват producers контракта на этапе компиляции.
//!
//! Правила применяются в порядке регистрации к каждой записи декорируемого
//! контракта (plain, keyed, элементы коллекций), для которой выполняется
//! предикат. Каждый слой кэшируется по своему lifestyle независимо от
//! декорируемого producer.

use std::sync::Arc;

use crate::{
    constructor::{ErasedConstructor, ErasedImplementation, Implementation},
    errors::{DiError, DiResult},
    lifetime_manager::Lifestyle,
    service_key::{ServiceKey, ServiceType},
};

type Predicate = Arc<dyn Fn(&DecoratorContext) -> bool + Send + Sync>;

/// Что известно о декорируемой записи в момент применения правила
#[derive(Debug, Clone)]
pub struct DecoratorContext {
    key: ServiceKey,
    implementation: ServiceType,
    lifestyle: Lifestyle,
    applied: Vec<ServiceType>,
}

impl DecoratorContext {
    pub(crate) fn new(key: ServiceKey, implementation: ServiceType, lifestyle: Lifestyle) -> Self {
        Self {
            key,
            implementation,
            lifestyle,
            applied: Vec::new(),
        }
    }

    pub fn service_type(&self) -> ServiceType {
        self.key.service()
    }

    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    /// Тип исходной (не декорированной) реализации
    pub fn implementation_type(&self) -> ServiceType {
        self.implementation
    }

    pub fn implementation_is<I: ?Sized + 'static>(&self) -> bool {
        self.implementation.is::<I>()
    }

    pub fn lifestyle(&self) -> Lifestyle {
        self.lifestyle
    }

    /// Декораторы, уже примененные к записи (от внутреннего к внешнему)
    pub fn applied_decorators(&self) -> &[ServiceType] {
        &self.applied
    }

    pub(crate) fn push_applied(&mut self, decorator: ServiceType) {
        self.applied.push(decorator);
    }
}

/// Описание декоратора контракта `T`
pub struct Decorator<T: ?Sized> {
    implementation: Implementation<T>,
    lifestyle: Lifestyle,
    predicate: Option<Predicate>,
    required: bool,
}

impl<T> Decorator<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    pub fn new(implementation: Implementation<T>) -> Self {
        Self {
            implementation,
            lifestyle: Lifestyle::Transient,
            predicate: None,
            required: false,
        }
    }

    pub fn lifestyle(mut self, lifestyle: Lifestyle) -> Self {
        self.lifestyle = lifestyle;
        self
    }

    /// Применять только к записям, для которых предикат вернул true
    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&DecoratorContext) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Неприменимый декоратор - ошибка, а не тихий пропуск
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub(crate) fn into_rule(self) -> DiResult<DecoratorRule> {
        let implementation = self.implementation.erase();
        if implementation.constructors.is_empty() {
            return Err(DiError::InvalidRegistration {
                service: implementation.implementation.to_string(),
                reason: "decorator declares no constructors".into(),
            });
        }

        Ok(DecoratorRule {
            service: ServiceType::of::<T>(),
            implementation,
            lifestyle: self.lifestyle,
            predicate: self.predicate,
            required: self.required,
        })
    }
}

/// Type-erased правило декорирования
pub(crate) struct DecoratorRule {
    service: ServiceType,
    implementation: ErasedImplementation,
    lifestyle: Lifestyle,
    predicate: Option<Predicate>,
    required: bool,
}

impl DecoratorRule {
    pub(crate) fn service(&self) -> ServiceType {
        self.service
    }

    pub(crate) fn implementation_type(&self) -> ServiceType {
        self.implementation.implementation
    }

    pub(crate) fn lifestyle(&self) -> Lifestyle {
        self.lifestyle
    }

    pub(crate) fn is_required(&self) -> bool {
        self.required
    }

    pub(crate) fn applies_to(&self, context: &DecoratorContext) -> bool {
        context.service_type() == self.service
            && self.predicate.as_ref().map_or(true, |predicate| predicate(context))
    }

    /// Выбрать конструктор декоратора.
    ///
    /// Подходит конструктор с ровно одним decoratee параметром (сам контракт
    /// или `Factory` контракта), все остальные параметры которого
    /// зарегистрированы. Ошибка - текстовая причина неприменимости.
    pub(crate) fn select_constructor<F>(&self, is_registered: F) -> Result<&ErasedConstructor, String>
    where
        F: Fn(&ServiceKey) -> bool,
    {
        let mut reasons = Vec::new();
        let mut candidates = Vec::new();

        for constructor in &self.implementation.constructors {
            let decoratees = constructor
                .dependencies
                .iter()
                .filter(|dependency| self.is_decoratee(dependency.key()))
                .count();
            if decoratees != 1 {
                reasons.push(format!(
                    "{} has {} decoratee parameters, exactly one is required",
                    constructor.signature, decoratees
                ));
                continue;
            }

            let missing: Vec<String> = constructor
                .dependencies
                .iter()
                .filter(|dependency| !self.is_decoratee(dependency.key()))
                .filter(|dependency| !is_registered(dependency.key()))
                .map(|dependency| dependency.key().to_string())
                .collect();
            if !missing.is_empty() {
                reasons.push(format!(
                    "{} depends on unregistered {}",
                    constructor.signature,
                    missing.join(", ")
                ));
                continue;
            }

            candidates.push(constructor);
        }

        match candidates.as_slice() {
            [single] => Ok(*single),
            [] => Err(reasons.join("; ")),
            many => Err(format!(
                "{} constructors are applicable: {}",
                many.len(),
                many.iter()
                    .map(|c| c.signature.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }

    pub(crate) fn is_decoratee(&self, key: &ServiceKey) -> bool {
        key.is_plain() && key.service() == self.service
    }

    pub(crate) fn invalid(&self, key: &ServiceKey, reason: String) -> DiError {
        DiError::InvalidDecorator {
            decorator: self.implementation_type().to_string(),
            service: key.to_string(),
            reason,
        }
    }
}

impl std::fmt::Debug for DecoratorRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoratorRule")
            .field("service", &self.service)
            .field("implementation", &self.implementation.implementation)
            .field("lifestyle", &self.lifestyle)
            .field("required", &self.required)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constructor::Constructor;

    trait Handler: Send + Sync {
        fn handle(&self) -> String;
    }

    struct Logging {
        inner: Arc<dyn Handler>,
    }

    impl Handler for Logging {
        fn handle(&self) -> String {
            format!("log({})", self.inner.handle())
        }
    }

    fn logging(constructor: Constructor<dyn Handler>) -> Decorator<dyn Handler> {
        Decorator::new(Implementation::<dyn Handler>::new::<Logging>().constructor(constructor))
    }

    #[test]
    fn test_exactly_one_decoratee_required() {
        let rule = logging(
            Constructor::<dyn Handler>::new("Logging(a, b)")
                .param::<dyn Handler>()
                .param::<dyn Handler>()
                .build(|args| {
                    Ok(Arc::new(Logging {
                        inner: args.service::<dyn Handler>()?,
                    }))
                }),
        )
        .into_rule()
        .unwrap();

        let reason = rule.select_constructor(|_| true).err().unwrap();
        assert!(reason.contains("2 decoratee parameters"));
    }

    #[test]
    fn test_unregistered_dependency_makes_decorator_inapplicable() {
        let rule = logging(
            Constructor::<dyn Handler>::new("Logging(inner, u32)")
                .param::<dyn Handler>()
                .param::<u32>()
                .build(|args| {
                    Ok(Arc::new(Logging {
                        inner: args.service::<dyn Handler>()?,
                    }))
                }),
        )
        .into_rule()
        .unwrap();

        assert!(rule.select_constructor(|_| false).is_err());
        let constructor = rule.select_constructor(|_| true).unwrap();
        assert_eq!(constructor.dependencies.len(), 2);
        assert!(rule.is_decoratee(constructor.dependencies[0].key()));
        assert!(!rule.is_decoratee(constructor.dependencies[1].key()));
    }

    #[test]
    fn test_predicate_and_context() {
        let rule = logging(
            Constructor::<dyn Handler>::new("Logging(Factory<inner>)")
                .factory_param::<dyn Handler>()
                .build(|args| {
                    let factory = args.factory::<dyn Handler>()?;
                    Ok(Arc::new(Logging {
                        inner: factory.create()?,
                    }))
                }),
        )
        .when(|context| context.key().key_name() == Some("2"))
        .into_rule()
        .unwrap();

        let first = DecoratorContext::new(
            ServiceKey::keyed::<dyn Handler>("1"),
            ServiceType::of::<u8>(),
            Lifestyle::Singleton,
        );
        let second = DecoratorContext::new(
            ServiceKey::keyed::<dyn Handler>("2"),
            ServiceType::of::<u8>(),
            Lifestyle::Singleton,
        );
        let other = DecoratorContext::new(ServiceKey::keyed::<u8>("2"), ServiceType::of::<u8>(), Lifestyle::Singleton);

        assert!(!rule.applies_to(&first));
        assert!(rule.applies_to(&second));
        assert!(!rule.applies_to(&other));
        assert!(second.implementation_is::<u8>());
    }

    #[test]
    fn test_decorator_without_constructors_rejected() {
        let decorator = Decorator::new(Implementation::<dyn Handler>::new::<Logging>());
        assert!(matches!(
            decorator.into_rule(),
            Err(DiError::InvalidRegistration { .. })
        ));
    }
}
