//! Scope - граница жизни Scoped экземпляров.

use std::{sync::Arc, time::Instant};
use tracing::debug;

use crate::{
    collections::{Collection, Keyed},
    container::ContainerInner,
    errors::DiResult,
    lifetime_manager::InstanceCells,
    service_key::ServiceKey,
};

/// Состояние scope: ячейки Scoped экземпляров
pub(crate) struct ScopeState {
    id: u64,
    cells: InstanceCells,
    created_at: Instant,
}

impl ScopeState {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            cells: InstanceCells::default(),
            created_at: Instant::now(),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn cells(&self) -> &InstanceCells {
        &self.cells
    }
}

/// Активный scope. Scoped сервисы, разрешенные через него, живут до drop.
pub struct Scope {
    container: Arc<ContainerInner>,
    state: Arc<ScopeState>,
}

impl Scope {
    pub(crate) fn new(container: Arc<ContainerInner>, id: u64) -> Self {
        debug!("Scope {} открыт", id);
        Self {
            container,
            state: Arc::new(ScopeState::new(id)),
        }
    }

    pub fn id(&self) -> u64 {
        self.state.id()
    }

    pub fn resolve<T>(&self) -> DiResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.container
            .resolve_root::<T>(Some(&self.state), &ServiceKey::of::<T>())
    }

    pub fn try_resolve<T>(&self) -> DiResult<Option<Arc<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.container
            .try_resolve_root::<T>(Some(&self.state), &ServiceKey::of::<T>())
    }

    pub fn resolve_keyed<T>(&self, key: &str) -> DiResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.container
            .resolve_root::<T>(Some(&self.state), &ServiceKey::keyed::<T>(key))
    }

    pub fn collection<T>(&self) -> DiResult<Collection<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.resolve::<Collection<T>>().map(|c| (*c).clone())
    }

    pub fn keyed<T>(&self) -> DiResult<Keyed<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.resolve::<Keyed<T>>().map(|k| (*k).clone())
    }

    /// Количество Scoped экземпляров, созданных в этом scope
    pub fn instance_count(&self) -> usize {
        self.state.cells().materialized()
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        debug!(
            "Scope {} закрыт через {:?}, освобождено {} экземпляров",
            self.state.id(),
            self.state.created_at.elapsed(),
            self.state.cells().materialized()
        );
        self.state.cells().clear();
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.state.id())
            .field("instances", &self.state.cells().materialized())
            .finish()
    }
}
