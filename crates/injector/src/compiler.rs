//! Resolution Compiler - превращает registration в готовый producer.
//!
//! Producer - замыкание, которое уже держит producers своих зависимостей,
//! поэтому разрешение графа не обращается к registry. Циклы в графе
//! конструкторов находятся здесь, по стеку посещения текущей сессии
//! компиляции; циклы через callback из пользовательских factory ловит
//! `Resolver` во время вызова. Зависимости `Factory<T>` компилируются только
//! при `create`, цикл через них тоже ловит `Resolver`.
//!
//! Скомпилированный producer фиксируется в записи только когда контейнер
//! уже заблокирован, ошибки компиляции никогда не кэшируются.

use std::{collections::HashMap, sync::Arc};
use tracing::{debug, trace};

use crate::{
    collections::{GroupMembers, Member},
    constructor::{Argument, Arguments, Dependency, DependencyKind, ErasedConstructor, ErasedImplementation},
    container::ContainerInner,
    decorators::{DecoratorContext, DecoratorRule},
    errors::{DiError, DiResult},
    lifetime_manager::CacheSlot,
    registration::{Activation, GroupPlan, Registration},
    resolver::{producer, FactoryHandle, Producer, Resolver},
    service_key::{Instance, ServiceKey},
};

/// Сессия компиляции одного top-level запроса
pub(crate) struct Compiler<'c> {
    container: &'c ContainerInner,
    visiting: Vec<ServiceKey>,
    session: HashMap<ServiceKey, Producer>,
}

impl<'c> Compiler<'c> {
    pub(crate) fn new(container: &'c ContainerInner) -> Self {
        Self {
            container,
            visiting: Vec::new(),
            session: HashMap::new(),
        }
    }

    pub(crate) fn compile(&mut self, key: &ServiceKey) -> DiResult<Producer> {
        let container = self.container;
        let registry = container.registry();
        let entry = registry.get_entry(key)?;

        if let Some(compiled) = entry.compiled() {
            return Ok(Arc::clone(compiled));
        }
        if let Some(compiled) = self.session.get(key) {
            return Ok(Arc::clone(compiled));
        }

        if let Some(start) = self.visiting.iter().position(|k| k == key) {
            let mut path: Vec<String> = self.visiting[start..].iter().map(ToString::to_string).collect();
            path.push(key.to_string());
            debug!("Цикл зависимостей: {}", path.join(" -> "));
            return Err(DiError::CyclicDependency { path });
        }

        self.visiting.push(key.clone());
        let built = self.build(&entry);
        self.visiting.pop();
        let compiled = built?;

        let compiled = if registry.is_locked() {
            entry.freeze(compiled)
        } else {
            compiled
        };
        trace!(service = %key, lifestyle = ?entry.lifestyle(), "Producer скомпилирован");

        self.session.insert(key.clone(), Arc::clone(&compiled));
        Ok(compiled)
    }

    fn build(&mut self, entry: &Registration) -> DiResult<Producer> {
        let key = entry.key().clone();

        let base = match entry.activation() {
            Activation::Instance(instance) => {
                let instance = Arc::clone(instance);
                producer(move |_| Ok(Some(Arc::clone(&instance))))
            }
            Activation::Factory(factory) => {
                let factory = Arc::clone(factory);
                let service = key.clone();
                producer(move |resolver| {
                    factory(resolver).map_err(|error| DiError::activation(&service, error))
                })
            }
            Activation::Null => producer(|_| Ok(None)),
            Activation::Constructed(implementation) => self.build_constructed(&key, implementation)?,
            // Группы не декорируются: декораторы применяются к их элементам
            Activation::Group(plan) => return self.build_group(entry, plan),
        };

        let wrapped = self
            .container
            .lifetime()
            .wrap(CacheSlot::base(key), entry.lifestyle(), base);
        self.apply_decorators(entry, wrapped)
    }

    fn build_constructed(&mut self, key: &ServiceKey, implementation: &ErasedImplementation) -> DiResult<Producer> {
        let container = self.container;
        let registry = container.registry();
        let constructor = select_constructor(implementation, key, |dependency| registry.contains(dependency))?.clone();

        let mut dependencies = Vec::with_capacity(constructor.dependencies.len());
        for dependency in &constructor.dependencies {
            let compiled = self.compile_dependency(dependency)?;
            dependencies.push((dependency.clone(), compiled));
        }

        let service = key.clone();
        Ok(producer(move |resolver| {
            let mut values = Vec::with_capacity(dependencies.len());
            for (dependency, compiled) in &dependencies {
                values.push(resolve_argument(resolver, dependency, compiled.as_ref())?);
            }
            construct(&constructor, &service, values)
        }))
    }

    /// `Factory<T>` ничего не разрешает до `create`, поэтому компилируется
    /// лениво и не участвует в поиске циклов при компиляции.
    fn compile_dependency(&mut self, dependency: &Dependency) -> DiResult<Option<Producer>> {
        match dependency.kind() {
            DependencyKind::Direct => self.compile(dependency.key()).map(Some),
            DependencyKind::Factory => Ok(None),
        }
    }

    fn build_group(&mut self, entry: &Registration, plan: &GroupPlan) -> DiResult<Producer> {
        let container = self.container;
        let registrations = container.registry().group_members(plan);

        let mut members = Vec::with_capacity(registrations.len());
        for registration in &registrations {
            members.push(Member {
                key: registration.key().clone(),
                producer: self.compile(registration.key())?,
            });
        }
        let members: Arc<[Member]> = members.into();
        let assemble = Arc::clone(&plan.assemble);

        let base = producer(move |resolver| {
            Ok(Some(assemble(GroupMembers::new(
                Arc::clone(&members),
                resolver.handle(),
            ))))
        });
        Ok(container
            .lifetime()
            .wrap(CacheSlot::base(entry.key().clone()), entry.lifestyle(), base))
    }

    fn apply_decorators(&mut self, entry: &Registration, base: Producer) -> DiResult<Producer> {
        let container = self.container;
        let rules = container.registry().decorators();
        if rules.is_empty() {
            return Ok(base);
        }

        let key = entry.key().clone();
        let mut context = DecoratorContext::new(key.clone(), entry.implementation(), entry.lifestyle());
        let mut current = base;

        for (index, rule) in rules.iter().enumerate() {
            if !rule.applies_to(&context) {
                continue;
            }

            let constructor = match rule.select_constructor(|dependency| container.registry().contains(dependency)) {
                Ok(constructor) => constructor.clone(),
                Err(reason) if rule.is_required() => return Err(rule.invalid(&key, reason)),
                Err(reason) => {
                    debug!(
                        decorator = %rule.implementation_type(),
                        service = %key,
                        "Декоратор пропущен: {}",
                        reason
                    );
                    continue;
                }
            };

            let layer = self.build_decorator_layer(&key, rule, constructor, current)?;
            current = container
                .lifetime()
                .wrap(CacheSlot::decorator(key.clone(), index), rule.lifestyle(), layer);
            context.push_applied(rule.implementation_type());
            trace!(decorator = %rule.implementation_type(), service = %key, "Декоратор применен");
        }

        Ok(current)
    }

    fn build_decorator_layer(
        &mut self,
        key: &ServiceKey,
        rule: &DecoratorRule,
        constructor: ErasedConstructor,
        decoratee: Producer,
    ) -> DiResult<Producer> {
        enum Slot {
            Decoratee(DependencyKind),
            Dependency(Dependency, Option<Producer>),
        }

        let mut slots = Vec::with_capacity(constructor.dependencies.len());
        for dependency in &constructor.dependencies {
            if rule.is_decoratee(dependency.key()) {
                slots.push(Slot::Decoratee(dependency.kind()));
            } else {
                slots.push(Slot::Dependency(dependency.clone(), self.compile_dependency(dependency)?));
            }
        }

        let service = key.clone();
        Ok(producer(move |resolver| {
            let mut values = Vec::with_capacity(slots.len());
            for slot in &slots {
                let value = match slot {
                    Slot::Decoratee(DependencyKind::Direct) => Argument::Instance(decoratee(resolver)?),
                    Slot::Decoratee(DependencyKind::Factory) => Argument::Factory(FactoryHandle::decoratee(
                        service.clone(),
                        Arc::clone(&decoratee),
                        resolver.handle(),
                    )),
                    Slot::Dependency(dependency, compiled) => {
                        resolve_argument(resolver, dependency, compiled.as_ref())?
                    }
                };
                values.push(value);
            }
            construct(&constructor, &service, values)
        }))
    }
}

fn resolve_argument(
    resolver: &Resolver<'_>,
    dependency: &Dependency,
    compiled: Option<&Producer>,
) -> DiResult<Argument> {
    match (dependency.kind(), compiled) {
        (DependencyKind::Direct, Some(compiled)) => resolver.invoke(dependency.key(), compiled).map(Argument::Instance),
        (DependencyKind::Direct, None) => resolver.resolve_key(dependency.key()).map(Argument::Instance),
        (DependencyKind::Factory, _) => Ok(Argument::Factory(FactoryHandle::deferred(
            dependency.key().clone(),
            resolver.handle(),
        ))),
    }
}

fn construct(
    constructor: &ErasedConstructor,
    service: &ServiceKey,
    values: Vec<Argument>,
) -> DiResult<Option<Instance>> {
    let mut arguments = Arguments::new(constructor.signature.clone(), values);
    (constructor.build)(&mut arguments)
        .map(Some)
        .map_err(|error| DiError::activation(service, error))
}

/// Выбрать конструктор, все зависимости которого зарегистрированы.
///
/// Несколько подходящих - `AmbiguousConstructor`. Ни одного - `MissingDependency`
/// для конструктора с наименьшим числом отсутствующих зависимостей.
pub(crate) fn select_constructor<'i, F>(
    implementation: &'i ErasedImplementation,
    key: &ServiceKey,
    is_registered: F,
) -> DiResult<&'i ErasedConstructor>
where
    F: Fn(&ServiceKey) -> bool,
{
    let mut candidates = Vec::new();
    let mut closest: Option<(usize, &ErasedConstructor, &Dependency)> = None;

    for constructor in &implementation.constructors {
        let missing: Vec<&Dependency> = constructor
            .dependencies
            .iter()
            .filter(|dependency| !is_registered(dependency.key()))
            .collect();

        match missing.first() {
            None => candidates.push(constructor),
            Some(first) => {
                if closest.map_or(true, |(count, _, _)| missing.len() < count) {
                    closest = Some((missing.len(), constructor, first));
                }
            }
        }
    }

    match candidates.as_slice() {
        [single] => Ok(*single),
        [] => match closest {
            Some((_, constructor, dependency)) => Err(DiError::MissingDependency {
                service: key.to_string(),
                dependency: dependency.key().to_string(),
                constructor: constructor.signature.clone(),
            }),
            None => Err(DiError::InvalidRegistration {
                service: key.to_string(),
                reason: format!("{} declares no constructors", implementation.implementation),
            }),
        },
        many => Err(DiError::AmbiguousConstructor {
            implementation: implementation.implementation.to_string(),
            candidates: many.iter().map(|c| c.signature.clone()).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constructor::{Constructor, Implementation},
        service_key::ServiceType,
    };

    struct Target;

    fn implementation(constructors: Vec<Constructor<Target>>) -> ErasedImplementation {
        constructors
            .into_iter()
            .fold(Implementation::<Target>::new::<Target>(), Implementation::constructor)
            .erase()
    }

    fn target_constructor(signature: &str) -> crate::constructor::ConstructorBuilder<Target> {
        Constructor::<Target>::new(signature)
    }

    #[test]
    fn test_select_single_resolvable_constructor() {
        let implementation = implementation(vec![
            target_constructor("Target(u32, u64)")
                .param::<u32>()
                .param::<u64>()
                .build(|_| Ok(Arc::new(Target))),
            target_constructor("Target(u32)")
                .param::<u32>()
                .build(|_| Ok(Arc::new(Target))),
        ]);

        let key = ServiceKey::of::<Target>();
        let selected = select_constructor(&implementation, &key, |k| k.service().is::<u32>()).unwrap();
        assert_eq!(selected.signature, "Target(u32)");
    }

    #[test]
    fn test_ambiguous_constructors() {
        let implementation = implementation(vec![
            target_constructor("Target()").build(|_| Ok(Arc::new(Target))),
            target_constructor("Target(u32)")
                .param::<u32>()
                .build(|_| Ok(Arc::new(Target))),
        ]);

        let error = select_constructor(&implementation, &ServiceKey::of::<Target>(), |_| true).err().unwrap();
        match error {
            DiError::AmbiguousConstructor { candidates, .. } => assert_eq!(candidates.len(), 2),
            other => panic!("AmbiguousConstructor expected, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_dependency_reports_closest_constructor() {
        let implementation = implementation(vec![
            target_constructor("Target(u8, u16)")
                .param::<u8>()
                .param::<u16>()
                .build(|_| Ok(Arc::new(Target))),
            target_constructor("Target(u32)")
                .param::<u32>()
                .build(|_| Ok(Arc::new(Target))),
        ]);

        let error = select_constructor(&implementation, &ServiceKey::of::<Target>(), |_| false).err().unwrap();
        match error {
            DiError::MissingDependency {
                dependency,
                constructor,
                ..
            } => {
                assert_eq!(dependency, ServiceType::of::<u32>().to_string());
                assert_eq!(constructor, "Target(u32)");
            }
            other => panic!("MissingDependency expected, got {other:?}"),
        }
    }
}
