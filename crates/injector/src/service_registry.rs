//! Service Registry - хранилище регистраций и состояние блокировки контейнера.
//!
//! Plain регистрации и групповые pseudo-entries (`Collection<T>`, `Keyed<T>`)
//! лежат в общем map, keyed варианты - в отдельном map по контракту, элементы
//! коллекций - в упорядоченном списке по контракту.
//!
//! Блокировка монотонна: `Unlocked -> Locked` при первом успешном разрешении
//! или при `verify()`. После нее любая мутация отклоняется с `ContainerLocked`.

use parking_lot::RwLock;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::{debug, info, warn};

use crate::{
    config::ContainerConfig,
    decorators::DecoratorRule,
    errors::{DiError, DiResult},
    lifetime_manager::Lifestyle,
    registration::{GroupKind, GroupPlan, Registration},
    service_key::{Discriminator, ServiceKey, ServiceType},
};

#[derive(Default)]
struct KeyedGroup {
    order: Vec<Arc<str>>,
    entries: HashMap<Arc<str>, Arc<Registration>>,
}

#[derive(Default)]
struct RegistryState {
    /// Plain регистрации + pseudo-entries групп
    entries: HashMap<ServiceKey, Arc<Registration>>,
    keyed: HashMap<ServiceType, KeyedGroup>,
    collections: HashMap<ServiceType, Vec<Arc<Registration>>>,
    decorators: Vec<Arc<DecoratorRule>>,
    /// Порядок регистрации всех ключей (для детерминированной verification)
    order: Vec<ServiceKey>,
}

impl RegistryState {
    fn total(&self) -> usize {
        self.order.len()
    }

    fn lookup(&self, key: &ServiceKey) -> Option<&Arc<Registration>> {
        match key.discriminator() {
            None => self.entries.get(key),
            Some(Discriminator::Keyed(name)) => self
                .keyed
                .get(&key.service())
                .and_then(|group| group.entries.get(name)),
            Some(Discriminator::Element(index)) => self
                .collections
                .get(&key.service())
                .and_then(|elements| elements.get(*index)),
        }
    }
}

/// Статистика registry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryStats {
    pub total_registrations: usize,
    pub plain_registrations: usize,
    pub keyed_registrations: usize,
    pub collection_elements: usize,
    pub decorators: usize,
    pub singleton_count: usize,
    pub transient_count: usize,
    pub scoped_count: usize,
    pub compiled_count: usize,
    pub total_resolutions: u64,
    pub max_registrations: usize,
    /// Заполненность registry в процентах
    pub utilization: f64,
    pub locked: bool,
}

pub(crate) struct ServiceRegistry {
    state: RwLock<RegistryState>,
    locked: AtomicBool,
    max_registrations: usize,
    verbose_logging: bool,
}

impl ServiceRegistry {
    pub(crate) fn new(config: &ContainerConfig) -> Self {
        debug!(
            "Создание ServiceRegistry '{}' с лимитом {} регистраций",
            config.name, config.max_registrations
        );

        Self {
            state: RwLock::new(RegistryState::default()),
            locked: AtomicBool::new(false),
            max_registrations: config.max_registrations,
            verbose_logging: config.verbose_logging,
        }
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Заблокировать registry. Возвращает true, если блокировка произошла сейчас.
    pub(crate) fn lock(&self, reason: &str) -> bool {
        let transitioned = self
            .locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if transitioned {
            info!(
                registrations = self.state.read().total(),
                "Container locked by {}", reason
            );
        }
        transitioned
    }

    fn ensure_unlocked(&self, operation: &str) -> DiResult<()> {
        if self.is_locked() {
            warn!("Операция {} отклонена: контейнер заблокирован", operation);
            return Err(DiError::ContainerLocked {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    fn ensure_capacity(&self, state: &RegistryState, additional: usize) -> DiResult<()> {
        let current = state.total();
        if current + additional > self.max_registrations {
            let error = DiError::RegistrationLimitExceeded {
                limit: self.max_registrations,
                current,
            };
            warn!("Превышен лимит регистраций: {}", error);
            return Err(error);
        }
        Ok(())
    }

    fn log_registration(&self, registration: &Registration) {
        if self.verbose_logging {
            debug!(
                service = %registration.key(),
                implementation = %registration.implementation(),
                lifestyle = ?registration.lifestyle(),
                activation = registration.activation().describe(),
                "Регистрация сервиса"
            );
        }
    }

    /// Plain регистрация
    pub(crate) fn register(&self, registration: Registration) -> DiResult<()> {
        let mut state = self.state.write();
        self.ensure_unlocked("register")?;
        self.ensure_capacity(&state, 1)?;

        let key = registration.key().clone();
        if state.entries.contains_key(&key) {
            warn!("Попытка повторной регистрации {}", key);
            return Err(DiError::DuplicateRegistration {
                service: key.to_string(),
            });
        }

        self.log_registration(&registration);
        state.entries.insert(key.clone(), Arc::new(registration));
        state.order.push(key);
        Ok(())
    }

    /// Keyed регистрация. `group` - pseudo-entry `Keyed<T>`, добавляется при
    /// первой keyed регистрации контракта.
    pub(crate) fn register_keyed(&self, registration: Registration, group: Registration) -> DiResult<()> {
        let mut state = self.state.write();
        self.ensure_unlocked("register_keyed")?;

        let key = registration.key().clone();
        let name: Arc<str> = match key.discriminator() {
            Some(Discriminator::Keyed(name)) => Arc::clone(name),
            _ => {
                return Err(DiError::InvalidRegistration {
                    service: key.to_string(),
                    reason: "keyed registration requires a key".into(),
                })
            }
        };

        let group_key = group.key().clone();
        let needs_group = !state.entries.contains_key(&group_key);
        self.ensure_capacity(&state, if needs_group { 2 } else { 1 })?;

        if state.lookup(&key).is_some() {
            warn!("Попытка повторной keyed регистрации {}", key);
            return Err(DiError::DuplicateRegistration {
                service: key.to_string(),
            });
        }

        self.log_registration(&registration);
        let keyed = state.keyed.entry(key.service()).or_default();
        keyed.order.push(Arc::clone(&name));
        keyed.entries.insert(name, Arc::new(registration));
        state.order.push(key);

        if needs_group {
            state.entries.insert(group_key.clone(), Arc::new(group));
            state.order.push(group_key);
        }
        Ok(())
    }

    /// Регистрация коллекции: элементы + pseudo-entry `Collection<T>`
    pub(crate) fn register_collection(
        &self,
        element: ServiceType,
        elements: Vec<Registration>,
        group: Registration,
    ) -> DiResult<()> {
        let mut state = self.state.write();
        self.ensure_unlocked("register_collection")?;
        self.ensure_capacity(&state, elements.len() + 1)?;

        let group_key = group.key().clone();
        if state.collections.contains_key(&element) || state.entries.contains_key(&group_key) {
            warn!("Коллекция {} уже зарегистрирована", element);
            return Err(DiError::DuplicateRegistration {
                service: group_key.to_string(),
            });
        }

        let elements: Vec<Arc<Registration>> = elements.into_iter().map(Arc::new).collect();
        for registration in &elements {
            self.log_registration(registration);
            state.order.push(registration.key().clone());
        }

        if self.verbose_logging {
            debug!("Коллекция {} из {} элементов", element, elements.len());
        }

        state.collections.insert(element, elements);
        state.entries.insert(group_key.clone(), Arc::new(group));
        state.order.push(group_key);
        Ok(())
    }

    pub(crate) fn register_decorator(&self, rule: DecoratorRule) -> DiResult<()> {
        let mut state = self.state.write();
        self.ensure_unlocked("register_decorator")?;

        if self.verbose_logging {
            debug!(
                "Декоратор {} для {} (позиция {})",
                rule.implementation_type(),
                rule.service(),
                state.decorators.len()
            );
        }
        state.decorators.push(Arc::new(rule));
        Ok(())
    }

    pub(crate) fn get_entry(&self, key: &ServiceKey) -> DiResult<Arc<Registration>> {
        self.state
            .read()
            .lookup(key)
            .cloned()
            .ok_or_else(|| DiError::UnresolvedService {
                service: key.to_string(),
            })
    }

    pub(crate) fn contains(&self, key: &ServiceKey) -> bool {
        self.state.read().lookup(key).is_some()
    }

    /// Все ключи в порядке регистрации
    pub(crate) fn keys(&self) -> Vec<ServiceKey> {
        self.state.read().order.clone()
    }

    /// Все записи в порядке регистрации
    pub(crate) fn entries(&self) -> Vec<Arc<Registration>> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|key| state.lookup(key).cloned())
            .collect()
    }

    /// Элементы группы в порядке регистрации
    pub(crate) fn group_members(&self, plan: &GroupPlan) -> Vec<Arc<Registration>> {
        let state = self.state.read();
        match plan.kind {
            GroupKind::Collection => state
                .collections
                .get(&plan.element)
                .cloned()
                .unwrap_or_default(),
            GroupKind::Keyed => state
                .keyed
                .get(&plan.element)
                .map(|group| {
                    group
                        .order
                        .iter()
                        .filter_map(|name| group.entries.get(name).cloned())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    pub(crate) fn decorators(&self) -> Vec<Arc<DecoratorRule>> {
        self.state.read().decorators.clone()
    }

    pub(crate) fn stats(&self) -> RegistryStats {
        let state = self.state.read();

        let mut stats = RegistryStats {
            total_registrations: state.total(),
            plain_registrations: state.entries.values().filter(|r| !r.is_group()).count(),
            keyed_registrations: state.keyed.values().map(|g| g.entries.len()).sum(),
            collection_elements: state.collections.values().map(Vec::len).sum(),
            decorators: state.decorators.len(),
            max_registrations: self.max_registrations,
            locked: self.is_locked(),
            ..RegistryStats::default()
        };

        for registration in state.order.iter().filter_map(|key| state.lookup(key)) {
            match registration.lifestyle() {
                Lifestyle::Singleton => stats.singleton_count += 1,
                Lifestyle::Transient => stats.transient_count += 1,
                Lifestyle::Scoped => stats.scoped_count += 1,
            }
            if registration.compiled().is_some() {
                stats.compiled_count += 1;
            }
            stats.total_resolutions += registration.resolution_count();
        }

        stats.utilization = if self.max_registrations > 0 {
            stats.total_registrations as f64 / self.max_registrations as f64 * 100.0
        } else {
            0.0
        };
        stats
    }
}
