//! Идентичность сервисов: `ServiceType` + опциональный `Discriminator`.
//!
//! Экземпляры хранятся type-erased как `Arc<dyn Any + Send + Sync>`, внутри
//! которого лежит `Arc<T>`. Так `T` может быть `dyn Trait`, а identity
//! экземпляра (`Arc::ptr_eq`) сохраняется при каждом downcast.

use std::{
    any::{Any, TypeId},
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

/// Type-erased экземпляр сервиса
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Идентичность абстрактного контракта (обычно `dyn Trait`)
#[derive(Clone, Copy)]
pub struct ServiceType {
    id: TypeId,
    name: &'static str,
}

impl ServiceType {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for ServiceType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ServiceType {}

impl Hash for ServiceType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Различитель вариантов одного контракта
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Discriminator {
    /// Keyed регистрация
    Keyed(Arc<str>),
    /// Элемент коллекции по позиции
    Element(usize),
}

/// Ключ регистрации: (контракт, опциональный различитель)
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    service: ServiceType,
    discriminator: Option<Discriminator>,
}

impl ServiceKey {
    pub fn new(service: ServiceType, discriminator: Option<Discriminator>) -> Self {
        Self {
            service,
            discriminator,
        }
    }

    /// Plain ключ для контракта `T`
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::new(ServiceType::of::<T>(), None)
    }

    pub fn keyed<T: ?Sized + 'static>(key: impl Into<Arc<str>>) -> Self {
        Self::new(
            ServiceType::of::<T>(),
            Some(Discriminator::Keyed(key.into())),
        )
    }

    pub(crate) fn element(service: ServiceType, index: usize) -> Self {
        Self::new(service, Some(Discriminator::Element(index)))
    }

    pub fn service(&self) -> ServiceType {
        self.service
    }

    pub fn discriminator(&self) -> Option<&Discriminator> {
        self.discriminator.as_ref()
    }

    pub fn is_plain(&self) -> bool {
        self.discriminator.is_none()
    }

    pub fn key_name(&self) -> Option<&str> {
        match &self.discriminator {
            Some(Discriminator::Keyed(key)) => Some(&**key),
            _ => None,
        }
    }

    pub fn element_index(&self) -> Option<usize> {
        match self.discriminator {
            Some(Discriminator::Element(index)) => Some(index),
            _ => None,
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.discriminator {
            None => write!(f, "{}", self.service),
            Some(Discriminator::Keyed(key)) => write!(f, "{}[\"{}\"]", self.service, key),
            Some(Discriminator::Element(index)) => write!(f, "{}[#{}]", self.service, index),
        }
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

pub(crate) fn erase<T>(value: Arc<T>) -> Instance
where
    T: ?Sized + Send + Sync + 'static,
{
    Arc::new(value)
}

pub(crate) fn downcast<T>(instance: &Instance) -> Option<Arc<T>>
where
    T: ?Sized + Send + Sync + 'static,
{
    instance.downcast_ref::<Arc<T>>().cloned()
}
