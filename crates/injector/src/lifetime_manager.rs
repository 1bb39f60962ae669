use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tracing::{debug, trace};

use crate::{
    errors::DiError,
    resolver::{producer, Producer},
    service_key::{Instance, ServiceKey},
};

/// Жизненный цикл компонента
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Lifestyle {
    /// Transient - новый экземпляр каждый раз
    #[default]
    Transient,
    /// Singleton - один экземпляр на весь контейнер
    Singleton,
    /// Scoped - один экземпляр на активный scope
    Scoped,
}

/// Слот кэша: ключ сервиса + слой (0 - базовый producer, 1.. - декораторы)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CacheSlot {
    key: ServiceKey,
    layer: usize,
}

impl CacheSlot {
    pub(crate) fn base(key: ServiceKey) -> Self {
        Self { key, layer: 0 }
    }

    pub(crate) fn decorator(key: ServiceKey, rule_index: usize) -> Self {
        Self {
            key,
            layer: rule_index + 1,
        }
    }

    pub(crate) fn key(&self) -> &ServiceKey {
        &self.key
    }
}

type InstanceCell = Arc<OnceCell<Option<Instance>>>;

/// Ячейки экземпляров по слотам.
///
/// Map защищен `RwLock` только на время получения ячейки; создание экземпляра
/// идет внутри `OnceCell` конкретного слота, поэтому несвязанные ключи не
/// конкурируют, а для одного ключа получается ровно одна материализация.
#[derive(Default)]
pub(crate) struct InstanceCells {
    cells: RwLock<HashMap<CacheSlot, InstanceCell>>,
}

impl InstanceCells {
    pub(crate) fn cell(&self, slot: &CacheSlot) -> InstanceCell {
        if let Some(cell) = self.cells.read().get(slot) {
            return Arc::clone(cell);
        }
        Arc::clone(self.cells.write().entry(slot.clone()).or_default())
    }

    /// Количество уже материализованных экземпляров
    pub(crate) fn materialized(&self) -> usize {
        self.cells
            .read()
            .values()
            .filter(|cell| cell.get().is_some())
            .count()
    }

    pub(crate) fn clear(&self) {
        self.cells.write().clear();
    }
}

/// Статистика использования кэшей
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub singleton_hits: u64,
    pub singleton_misses: u64,
    pub scoped_hits: u64,
    pub scoped_misses: u64,
    pub transient_creations: u64,
}

#[derive(Default)]
struct CacheCounters {
    singleton_hits: AtomicU64,
    singleton_misses: AtomicU64,
    scoped_hits: AtomicU64,
    scoped_misses: AtomicU64,
    transient_creations: AtomicU64,
}

/// Менеджер жизненного цикла: оборачивает producer политикой переиспользования
pub struct LifetimeManager {
    singletons: InstanceCells,
    counters: CacheCounters,
}

impl LifetimeManager {
    pub fn new() -> Self {
        Self {
            singletons: InstanceCells::default(),
            counters: CacheCounters::default(),
        }
    }

    /// Обернуть producer согласно lifestyle
    pub(crate) fn wrap(self: &Arc<Self>, slot: CacheSlot, lifestyle: Lifestyle, inner: Producer) -> Producer {
        let manager = Arc::clone(self);

        match lifestyle {
            Lifestyle::Transient => producer(move |resolver| {
                manager
                    .counters
                    .transient_creations
                    .fetch_add(1, Ordering::Relaxed);
                inner(resolver)
            }),
            Lifestyle::Singleton => producer(move |resolver| {
                let cell = manager.singletons.cell(&slot);
                manager.materialize(
                    &cell,
                    || inner(resolver),
                    &manager.counters.singleton_hits,
                    &manager.counters.singleton_misses,
                )
            }),
            Lifestyle::Scoped => producer(move |resolver| {
                let scope = resolver.scope_state().ok_or_else(|| DiError::NoScope {
                    service: slot.key().to_string(),
                })?;
                let cell = scope.cells().cell(&slot);
                manager.materialize(
                    &cell,
                    || inner(resolver),
                    &manager.counters.scoped_hits,
                    &manager.counters.scoped_misses,
                )
            }),
        }
    }

    fn materialize<F>(
        &self,
        cell: &OnceCell<Option<Instance>>,
        create: F,
        hits: &AtomicU64,
        misses: &AtomicU64,
    ) -> Result<Option<Instance>, DiError>
    where
        F: FnOnce() -> Result<Option<Instance>, DiError>,
    {
        if let Some(cached) = cell.get() {
            hits.fetch_add(1, Ordering::Relaxed);
            trace!("Lifestyle cache hit");
            return Ok(cached.clone());
        }

        let mut created = false;
        let value = cell.get_or_try_init(|| {
            created = true;
            create()
        })?;

        if created {
            misses.fetch_add(1, Ordering::Relaxed);
            debug!("Materialized new cached instance");
        } else {
            // Другой поток успел создать экземпляр, пока мы ждали ячейку
            hits.fetch_add(1, Ordering::Relaxed);
        }

        Ok(value.clone())
    }

    /// Получить статистику использования кэшей
    pub fn get_cache_stats(&self) -> CacheStats {
        CacheStats {
            singleton_hits: self.counters.singleton_hits.load(Ordering::Relaxed),
            singleton_misses: self.counters.singleton_misses.load(Ordering::Relaxed),
            scoped_hits: self.counters.scoped_hits.load(Ordering::Relaxed),
            scoped_misses: self.counters.scoped_misses.load(Ordering::Relaxed),
            transient_creations: self.counters.transient_creations.load(Ordering::Relaxed),
        }
    }

    pub fn cached_singletons(&self) -> usize {
        self.singletons.materialized()
    }
}

impl Default for LifetimeManager {
    fn default() -> Self {
        Self::new()
    }
}
