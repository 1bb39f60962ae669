//! Container - публичный фасад: регистрация, разрешение, scopes, verification.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tracing::{debug, info};

use crate::{
    collections::{collection_group, keyed_group, Collection, Keyed},
    compiler::Compiler,
    config::ContainerConfig,
    constructor::{Component, Implementation},
    decorators::Decorator,
    dependency_graph::DependencyGraph,
    descriptor::Descriptor,
    errors::{DiError, DiResult},
    lifetime_manager::{CacheStats, Lifestyle, LifetimeManager},
    registration::Registration,
    resolver::{expect_instance, Resolver},
    scope::{Scope, ScopeState},
    service_key::{Instance, ServiceKey, ServiceType},
    service_registry::{RegistryStats, ServiceRegistry},
    verifier::{self, VerificationSummary},
};

/// Разделяемое состояние контейнера
pub(crate) struct ContainerInner {
    config: ContainerConfig,
    registry: ServiceRegistry,
    lifetime: Arc<LifetimeManager>,
    scope_ids: AtomicU64,
    created_at: Instant,
}

impl ContainerInner {
    fn new(config: ContainerConfig) -> Self {
        Self {
            registry: ServiceRegistry::new(&config),
            lifetime: Arc::new(LifetimeManager::new()),
            scope_ids: AtomicU64::new(0),
            created_at: Instant::now(),
            config,
        }
    }

    pub(crate) fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub(crate) fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub(crate) fn lifetime(&self) -> &Arc<LifetimeManager> {
        &self.lifetime
    }

    pub(crate) fn next_scope_id(&self) -> u64 {
        self.scope_ids.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Скомпилировать ключ и вызвать его producer в контексте `resolver`
    pub(crate) fn produce(&self, resolver: &Resolver<'_>, key: &ServiceKey) -> DiResult<Option<Instance>> {
        let entry = self.registry.get_entry(key)?;
        let compiled = match entry.compiled() {
            Some(compiled) => Arc::clone(compiled),
            None => Compiler::new(self).compile(key)?,
        };

        let produced = resolver.invoke(key, &compiled)?;
        entry.record_resolution();
        Ok(produced)
    }

    /// Top-level разрешение. Первое успешное разрешение блокирует контейнер.
    pub(crate) fn resolve_root<T>(self: &Arc<Self>, scope: Option<&Arc<ScopeState>>, key: &ServiceKey) -> DiResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let resolver = Resolver::new(self, scope);
        let result = self
            .produce(&resolver, key)
            .and_then(|instance| expect_instance::<T>(key, instance));

        match &result {
            Ok(_) => {
                self.registry.lock("first resolution");
            }
            Err(error) => debug!(service = %key, "Разрешение не удалось: {}", error),
        }
        result
    }

    pub(crate) fn try_resolve_root<T>(
        self: &Arc<Self>,
        scope: Option<&Arc<ScopeState>>,
        key: &ServiceKey,
    ) -> DiResult<Option<Arc<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if !self.registry.contains(key) {
            return Ok(None);
        }
        self.resolve_root::<T>(scope, key).map(Some)
    }
}

/// Статистика контейнера
#[derive(Debug, Clone)]
pub struct ContainerStats {
    pub name: String,
    pub registry: RegistryStats,
    pub cache: CacheStats,
    pub cached_singletons: usize,
    pub scopes_created: u64,
    pub uptime: Duration,
}

/// IoC контейнер
///
/// Клонирование дешевое: клоны разделяют registry, кэши и состояние блокировки.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Container {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContainerInner::new(ContainerConfig::default())),
        }
    }

    pub fn with_config(config: ContainerConfig) -> anyhow::Result<Self> {
        config.validate()?;
        info!(
            "Создание контейнера '{}' (max_registrations={}, max_resolution_depth={})",
            config.name, config.max_registrations, config.max_resolution_depth
        );
        Ok(Self {
            inner: Arc::new(ContainerInner::new(config)),
        })
    }

    /// Контейнер с конфигурацией из файла + переопределения из окружения
    pub fn from_config_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let mut config = ContainerConfig::load_from_file(path)?;
        config.apply_env_overrides()?;
        Self::with_config(config)
    }

    pub fn name(&self) -> &str {
        &self.inner.config().name
    }

    pub fn config(&self) -> &ContainerConfig {
        self.inner.config()
    }

    pub(crate) fn inner(&self) -> &Arc<ContainerInner> {
        &self.inner
    }

    fn registration<T>(key: ServiceKey, descriptor: Descriptor<T>, lifestyle: Lifestyle) -> DiResult<Registration>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if let Descriptor::Implementation(implementation) = &descriptor {
            if implementation.constructors().is_empty() {
                return Err(DiError::InvalidRegistration {
                    service: key.to_string(),
                    reason: format!(
                        "{} declares no constructors",
                        implementation.implementation_type()
                    ),
                });
            }
        }

        let implementation = descriptor.implementation_type();
        Ok(Registration::new(
            key,
            implementation,
            lifestyle,
            descriptor.into_activation(),
        ))
    }

    // === Регистрация ===

    pub fn register<T>(&self, descriptor: Descriptor<T>, lifestyle: Lifestyle) -> DiResult<()>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let registration = Self::registration(ServiceKey::of::<T>(), descriptor, lifestyle)?;
        self.inner.registry().register(registration)
    }

    /// Готовый экземпляр (Singleton)
    pub fn register_instance<T>(&self, instance: Arc<T>) -> DiResult<()>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.register(Descriptor::instance(instance), Lifestyle::Singleton)
    }

    pub fn register_factory<T>(
        &self,
        lifestyle: Lifestyle,
        factory: impl Fn(&Resolver<'_>) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
    ) -> DiResult<()>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.register(Descriptor::factory(factory), lifestyle)
    }

    /// Реализация `C`, описывающая свои конструкторы через `Component<T>`
    pub fn register_component<T, C>(&self, lifestyle: Lifestyle) -> DiResult<()>
    where
        T: ?Sized + Send + Sync + 'static,
        C: Component<T>,
    {
        self.register(Descriptor::component::<C>(), lifestyle)
    }

    pub fn register_implementation<T>(&self, implementation: Implementation<T>, lifestyle: Lifestyle) -> DiResult<()>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.register(Descriptor::implementation(implementation), lifestyle)
    }

    /// Keyed вариант контракта. Все keyed регистрации `T` доступны как `Keyed<T>`.
    pub fn register_keyed<T>(&self, key: &str, descriptor: Descriptor<T>, lifestyle: Lifestyle) -> DiResult<()>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let registration = Self::registration(ServiceKey::keyed::<T>(key), descriptor, lifestyle)?;
        self.inner
            .registry()
            .register_keyed(registration, keyed_group::<T>())
    }

    /// Коллекция контракта `T`, доступная как `Collection<T>`
    pub fn register_collection<T>(&self, elements: Vec<(Descriptor<T>, Lifestyle)>) -> DiResult<()>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let element = ServiceType::of::<T>();
        let registrations = elements
            .into_iter()
            .enumerate()
            .map(|(index, (descriptor, lifestyle))| {
                Self::registration(ServiceKey::element(element, index), descriptor, lifestyle)
            })
            .collect::<DiResult<Vec<_>>>()?;

        self.inner
            .registry()
            .register_collection(element, registrations, collection_group::<T>())
    }

    /// Коллекция из готовых экземпляров; `None` - null элемент
    pub fn register_collection_instances<T>(&self, instances: Vec<Option<Arc<T>>>) -> DiResult<()>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let elements = instances
            .into_iter()
            .map(|instance| {
                let descriptor = match instance {
                    Some(instance) => Descriptor::instance(instance),
                    None => Descriptor::null(),
                };
                (descriptor, Lifestyle::Singleton)
            })
            .collect();
        self.register_collection(elements)
    }

    pub fn register_decorator<T>(&self, decorator: Decorator<T>) -> DiResult<()>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let rule = decorator.into_rule()?;
        self.inner.registry().register_decorator(rule)
    }

    // === Разрешение ===

    pub fn resolve<T>(&self) -> DiResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.inner.resolve_root::<T>(None, &ServiceKey::of::<T>())
    }

    /// None, если для `T` нет регистрации; остальные ошибки возвращаются как есть
    pub fn try_resolve<T>(&self) -> DiResult<Option<Arc<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.inner.try_resolve_root::<T>(None, &ServiceKey::of::<T>())
    }

    pub fn resolve_keyed<T>(&self, key: &str) -> DiResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.inner.resolve_root::<T>(None, &ServiceKey::keyed::<T>(key))
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

    pub fn begin_scope(&self) -> Scope {
        Scope::new(Arc::clone(&self.inner), self.inner.next_scope_id())
    }

    // === Verification и диагностика ===

    /// Заблокировать контейнер, скомпилировать и разрешить каждую регистрацию
    pub fn verify(&self) -> DiResult<VerificationSummary> {
        verifier::verify(&self.inner)
    }

    pub fn is_locked(&self) -> bool {
        self.inner.registry().is_locked()
    }

    pub fn is_registered<T: ?Sized + 'static>(&self) -> bool {
        self.inner.registry().contains(&ServiceKey::of::<T>())
    }

    pub fn is_registered_key(&self, key: &ServiceKey) -> bool {
        self.inner.registry().contains(key)
    }

    pub fn stats(&self) -> ContainerStats {
        ContainerStats {
            name: self.inner.config().name.clone(),
            registry: self.inner.registry().stats(),
            cache: self.inner.lifetime().get_cache_stats(),
            cached_singletons: self.inner.lifetime().cached_singletons(),
            scopes_created: self.inner.scope_ids.load(Ordering::Relaxed),
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Граф зависимостей по объявленным конструкторам и группам
    pub fn dependency_graph(&self) -> DependencyGraph {
        DependencyGraph::from_registry(self.inner.registry())
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.inner.config().name)
            .field("locked", &self.is_locked())
            .finish()
    }
}
