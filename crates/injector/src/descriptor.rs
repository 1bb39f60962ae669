//! Typed описание того, как получить экземпляр контракта `T`.

use std::sync::Arc;

use crate::{
    constructor::{Component, Implementation},
    registration::Activation,
    resolver::Resolver,
    service_key::{erase, ServiceType},
};

pub type FactoryFn<T> = Arc<dyn Fn(&Resolver<'_>) -> anyhow::Result<Arc<T>> + Send + Sync>;

pub type OptionalFactoryFn<T> =
    Arc<dyn Fn(&Resolver<'_>) -> anyhow::Result<Option<Arc<T>>> + Send + Sync>;

/// Descriptor регистрации
pub enum Descriptor<T: ?Sized> {
    /// Готовый экземпляр (всегда Singleton)
    Instance(Arc<T>),
    /// Пользовательская factory
    Factory(FactoryFn<T>),
    /// Factory, которая может вернуть null (`None`)
    OptionalFactory(OptionalFactoryFn<T>),
    /// Реализация с объявленными конструкторами
    Implementation(Implementation<T>),
    /// Null reference
    Null,
}

impl<T> Descriptor<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    pub fn instance(instance: Arc<T>) -> Self {
        Descriptor::Instance(instance)
    }

    pub fn factory<F>(factory: F) -> Self
    where
        F: Fn(&Resolver<'_>) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    {
        Descriptor::Factory(Arc::new(factory))
    }

    pub fn optional<F>(factory: F) -> Self
    where
        F: Fn(&Resolver<'_>) -> anyhow::Result<Option<Arc<T>>> + Send + Sync + 'static,
    {
        Descriptor::OptionalFactory(Arc::new(factory))
    }

    pub fn component<C: Component<T>>() -> Self {
        Descriptor::Implementation(Implementation::component::<C>())
    }

    pub fn implementation(implementation: Implementation<T>) -> Self {
        Descriptor::Implementation(implementation)
    }

    pub fn null() -> Self {
        Descriptor::Null
    }

    pub fn is_instance(&self) -> bool {
        matches!(self, Descriptor::Instance(_))
    }

    /// Тип реализации, известный на момент регистрации
    pub fn implementation_type(&self) -> ServiceType {
        match self {
            Descriptor::Implementation(implementation) => implementation.implementation_type(),
            _ => ServiceType::of::<T>(),
        }
    }

    pub(crate) fn into_activation(self) -> Activation {
        match self {
            Descriptor::Instance(instance) => Activation::Instance(erase(instance)),
            Descriptor::Factory(factory) => Activation::Factory(Arc::new(move |resolver: &Resolver<'_>| {
                factory(resolver).map(|instance| Some(erase(instance)))
            })),
            Descriptor::OptionalFactory(factory) => Activation::Factory(Arc::new(move |resolver: &Resolver<'_>| {
                factory(resolver).map(|instance| instance.map(erase))
            })),
            Descriptor::Implementation(implementation) => {
                Activation::Constructed(implementation.erase())
            }
            Descriptor::Null => Activation::Null,
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for Descriptor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            Descriptor::Instance(_) => "Instance",
            Descriptor::Factory(_) => "Factory",
            Descriptor::OptionalFactory(_) => "OptionalFactory",
            Descriptor::Implementation(_) => "Implementation",
            Descriptor::Null => "Null",
        };
        f.write_str(variant)
    }
}
