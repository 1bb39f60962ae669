//! Registration entry: ключ + lifestyle + способ активации + скомпилированный producer.

use once_cell::sync::OnceCell;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use crate::{
    collections::GroupMembers,
    constructor::ErasedImplementation,
    lifetime_manager::Lifestyle,
    resolver::{Producer, Resolver},
    service_key::{Instance, ServiceKey, ServiceType},
};

pub(crate) type ErasedFactory =
    Arc<dyn Fn(&Resolver<'_>) -> anyhow::Result<Option<Instance>> + Send + Sync>;

pub(crate) type Assemble = Arc<dyn Fn(GroupMembers) -> Instance + Send + Sync>;

/// Вид группового pseudo-entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GroupKind {
    /// `Collection<T>` - элементы `register_collection`
    Collection,
    /// `Keyed<T>` - все keyed регистрации `T`
    Keyed,
}

/// Как собрать групповой сервис из producers его элементов
#[derive(Clone)]
pub(crate) struct GroupPlan {
    pub(crate) kind: GroupKind,
    pub(crate) element: ServiceType,
    pub(crate) assemble: Assemble,
}

/// Type-erased способ активации
#[derive(Clone)]
pub(crate) enum Activation {
    Instance(Instance),
    Factory(ErasedFactory),
    Constructed(ErasedImplementation),
    Null,
    Group(GroupPlan),
}

impl Activation {
    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Activation::Instance(_) => "instance",
            Activation::Factory(_) => "factory",
            Activation::Constructed(_) => "constructor",
            Activation::Null => "null",
            Activation::Group(plan) => match plan.kind {
                GroupKind::Collection => "collection",
                GroupKind::Keyed => "keyed collection",
            },
        }
    }
}

/// Запись в registry. Неизменяема, кроме ячейки скомпилированного producer
/// (заполняется один раз) и счетчика разрешений.
pub(crate) struct Registration {
    key: ServiceKey,
    implementation: ServiceType,
    lifestyle: Lifestyle,
    activation: Activation,
    compiled: OnceCell<Producer>,
    registered_at: Instant,
    resolution_count: AtomicU64,
}

impl Registration {
    pub(crate) fn new(
        key: ServiceKey,
        implementation: ServiceType,
        lifestyle: Lifestyle,
        activation: Activation,
    ) -> Self {
        // Готовый экземпляр не может быть transient
        let lifestyle = match activation {
            Activation::Instance(_) => Lifestyle::Singleton,
            _ => lifestyle,
        };

        Self {
            key,
            implementation,
            lifestyle,
            activation,
            compiled: OnceCell::new(),
            registered_at: Instant::now(),
            resolution_count: AtomicU64::new(0),
        }
    }

    pub(crate) fn key(&self) -> &ServiceKey {
        &self.key
    }

    pub(crate) fn implementation(&self) -> ServiceType {
        self.implementation
    }

    pub(crate) fn lifestyle(&self) -> Lifestyle {
        self.lifestyle
    }

    pub(crate) fn activation(&self) -> &Activation {
        &self.activation
    }

    pub(crate) fn is_group(&self) -> bool {
        matches!(self.activation, Activation::Group(_))
    }

    pub(crate) fn compiled(&self) -> Option<&Producer> {
        self.compiled.get()
    }

    /// Зафиксировать producer. Если другой поток успел раньше, возвращается
    /// уже сохраненный, так что все callers получают один и тот же `Arc`.
    pub(crate) fn freeze(&self, producer: Producer) -> Producer {
        Arc::clone(self.compiled.get_or_init(|| producer))
    }

    pub(crate) fn record_resolution(&self) {
        self.resolution_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn resolution_count(&self) -> u64 {
        self.resolution_count.load(Ordering::Relaxed)
    }

    pub(crate) fn age(&self) -> std::time::Duration {
        self.registered_at.elapsed()
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("key", &self.key)
            .field("implementation", &self.implementation)
            .field("lifestyle", &self.lifestyle)
            .field("activation", &self.activation.describe())
            .field("compiled", &self.compiled.get().is_some())
            .field("age", &self.age())
            .finish()
    }
}
