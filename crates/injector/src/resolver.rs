//! Resolution context - явная передача контекста вместо ambient "current container".
//!
//! `Resolver` создается на каждый top-level запрос и передается во все
//! producers и пользовательские factory. Он несет:
//! - ссылку на контейнер (для callback-разрешений из factory)
//! - активный scope (для Scoped lifestyle)
//!
//! Стек ключей, которые сейчас материализуются, живет в thread-local и общий
//! для всех `Resolver` потока. Повторный вход через `Collection<T>` или
//! `Factory<T>::create` видит путь вызывающего разрешения.

use std::{cell::RefCell, marker::PhantomData, sync::Arc};

use crate::{
    collections::{Collection, Keyed},
    container::ContainerInner,
    errors::{DiError, DiResult},
    scope::ScopeState,
    service_key::{downcast, Instance, ServiceKey},
};

/// Скомпилированный producer: вызываемый объект, возвращающий один экземпляр.
/// `None` означает null reference.
pub(crate) type Producer = Arc<dyn Fn(&Resolver<'_>) -> DiResult<Option<Instance>> + Send + Sync>;

pub(crate) fn producer<F>(f: F) -> Producer
where
    F: Fn(&Resolver<'_>) -> DiResult<Option<Instance>> + Send + Sync + 'static,
{
    Arc::new(f)
}

thread_local! {
    /// (контейнер, ключ) в порядке входа
    static RESOLUTION_PATH: RefCell<Vec<(usize, ServiceKey)>> = RefCell::new(Vec::new());
}

/// Снимает ключ со стека и при ошибке, и при unwind из producer
struct PathGuard;

impl Drop for PathGuard {
    fn drop(&mut self) {
        RESOLUTION_PATH.with(|path| {
            path.borrow_mut().pop();
        });
    }
}

/// Owned вариант контекста для отложенных вызовов (`Factory<T>`, `Collection<T>`)
#[derive(Clone)]
pub(crate) struct ResolutionHandle {
    container: Arc<ContainerInner>,
    scope: Option<Arc<ScopeState>>,
}

impl ResolutionHandle {
    pub(crate) fn new(container: Arc<ContainerInner>, scope: Option<Arc<ScopeState>>) -> Self {
        Self { container, scope }
    }

    pub(crate) fn resolver(&self) -> Resolver<'_> {
        Resolver::new(&self.container, self.scope.as_ref())
    }
}

/// Контекст разрешения, передаваемый в factory и producers
pub struct Resolver<'a> {
    container: &'a Arc<ContainerInner>,
    scope: Option<&'a Arc<ScopeState>>,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(container: &'a Arc<ContainerInner>, scope: Option<&'a Arc<ScopeState>>) -> Self {
        Self { container, scope }
    }

    fn owner(&self) -> usize {
        Arc::as_ptr(self.container) as usize
    }

    /// Ключи этого контейнера, которые сейчас материализуются на потоке
    fn active_path(&self) -> Vec<ServiceKey> {
        let owner = self.owner();
        RESOLUTION_PATH.with(|path| {
            path.borrow()
                .iter()
                .filter(|(container, _)| *container == owner)
                .map(|(_, key)| key.clone())
                .collect()
        })
    }

    pub(crate) fn container(&self) -> &Arc<ContainerInner> {
        self.container
    }

    pub(crate) fn scope_state(&self) -> Option<&Arc<ScopeState>> {
        self.scope
    }

    pub(crate) fn handle(&self) -> ResolutionHandle {
        ResolutionHandle::new(Arc::clone(self.container), self.scope.cloned())
    }

    /// Вызвать producer ключа, отслеживая путь разрешения.
    ///
    /// Повторное появление ключа в пути - цикл, который нельзя увидеть при
    /// компиляции (callback из factory обратно в контейнер).
    pub(crate) fn invoke(&self, key: &ServiceKey, producer: &Producer) -> DiResult<Option<Instance>> {
        let path = self.active_path();
        if let Some(start) = path.iter().position(|k| k == key) {
            let mut cycle: Vec<String> = path[start..].iter().map(ToString::to_string).collect();
            cycle.push(key.to_string());
            return Err(DiError::CyclicDependency { path: cycle });
        }

        let limit = self.container.config().max_resolution_depth;
        if path.len() >= limit {
            let mut trail: Vec<String> = path.iter().map(ToString::to_string).collect();
            trail.push(key.to_string());
            return Err(DiError::ResolutionDepthExceeded { limit, path: trail });
        }

        RESOLUTION_PATH.with(|stack| stack.borrow_mut().push((self.owner(), key.clone())));
        let _guard = PathGuard;
        producer(self)
    }

    /// Разрешить ключ через контейнер (compile + invoke)
    pub(crate) fn resolve_key(&self, key: &ServiceKey) -> DiResult<Option<Instance>> {
        self.container.produce(self, key)
    }

    /// Разрешить зависимость изнутри factory
    pub fn resolve<T>(&self) -> DiResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = ServiceKey::of::<T>();
        let instance = self.resolve_key(&key)?;
        expect_instance::<T>(&key, instance)
    }

    /// Попытаться разрешить зависимость (None если не зарегистрирована)
    pub fn try_resolve<T>(&self) -> DiResult<Option<Arc<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if !self.container.registry().contains(&ServiceKey::of::<T>()) {
            return Ok(None);
        }
        self.resolve::<T>().map(Some)
    }

    pub fn resolve_keyed<T>(&self, key: &str) -> DiResult<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = ServiceKey::keyed::<T>(key);
        let instance = self.resolve_key(&key)?;
        expect_instance::<T>(&key, instance)
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

    /// Есть ли активный scope
    pub fn in_scope(&self) -> bool {
        self.scope.is_some()
    }

    /// Текущая глубина разрешения
    pub fn depth(&self) -> usize {
        self.active_path().len()
    }

    /// Текущий путь разрешения (для диагностики)
    pub fn path(&self) -> Vec<String> {
        self.active_path().iter().map(ToString::to_string).collect()
    }
}

/// Проверить, что producer вернул экземпляр нужного типа
pub(crate) fn expect_instance<T>(key: &ServiceKey, instance: Option<Instance>) -> DiResult<Arc<T>>
where
    T: ?Sized + Send + Sync + 'static,
{
    let instance = instance.ok_or_else(|| DiError::NullInstance {
        service: key.to_string(),
    })?;
    downcast::<T>(&instance).ok_or_else(|| DiError::TypeMismatch {
        service: key.to_string(),
        requested: std::any::type_name::<T>().to_string(),
    })
}

/// Type-erased отложенный producer
#[derive(Clone)]
pub(crate) struct FactoryHandle {
    key: ServiceKey,
    /// Внутренний слой декорируемого ключа. `None` - producer берется из
    /// контейнера при каждом `create`.
    producer: Option<Producer>,
    handle: ResolutionHandle,
}

impl FactoryHandle {
    /// Decoratee: ключ уже в пути разрешения, слой вызывается напрямую
    pub(crate) fn decoratee(key: ServiceKey, producer: Producer, handle: ResolutionHandle) -> Self {
        Self {
            key,
            producer: Some(producer),
            handle,
        }
    }

    /// Factory зарегистрированного ключа, компилируется при первом вызове
    pub(crate) fn deferred(key: ServiceKey, handle: ResolutionHandle) -> Self {
        Self {
            key,
            producer: None,
            handle,
        }
    }

    pub(crate) fn key(&self) -> &ServiceKey {
        &self.key
    }

    pub(crate) fn create(&self) -> DiResult<Option<Instance>> {
        let resolver = self.handle.resolver();
        match &self.producer {
            Some(producer) => producer(&resolver),
            None => resolver.resolve_key(&self.key),
        }
    }
}

/// Фабрика экземпляров `T`: каждый вызов `create` заново вызывает producer
/// (с учетом его lifestyle). Используется декораторами, которым нужен
/// decoratee "по требованию", и constructor-параметрами `factory_param`.
pub struct Factory<T: ?Sized> {
    inner: FactoryHandle,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<T> Factory<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    pub(crate) fn new(inner: FactoryHandle) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn create(&self) -> DiResult<Arc<T>> {
        let instance = self.inner.create()?;
        expect_instance::<T>(self.inner.key(), instance)
    }

    pub fn service_key(&self) -> &ServiceKey {
        self.inner.key()
    }
}

impl<T: ?Sized> Clone for Factory<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for Factory<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Factory").field("key", &self.inner.key).finish()
    }
}
