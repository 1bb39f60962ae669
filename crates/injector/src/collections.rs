//! Коллекции и keyed группы.
//!
//! `Collection<T>` - ленивая, перезапускаемая и конечная последовательность:
//! каждый проход заново вызывает producers элементов (с учетом их lifestyle),
//! порядок всегда совпадает с порядком регистрации. Null элемент дает
//! `NullElement` при итерации, а не тихий пропуск.
//!
//! `Keyed<T>` - та же последовательность плюс lookup по ключу.

use std::{marker::PhantomData, sync::Arc};

use crate::{
    errors::{DiError, DiResult},
    lifetime_manager::Lifestyle,
    registration::{Activation, GroupKind, GroupPlan, Registration},
    resolver::{Producer, ResolutionHandle},
    service_key::{downcast, erase, Instance, ServiceKey, ServiceType},
};

#[derive(Clone)]
pub(crate) struct Member {
    pub(crate) key: ServiceKey,
    pub(crate) producer: Producer,
}

/// Скомпилированные элементы группы + контекст, в котором их вызывать
#[derive(Clone)]
pub(crate) struct GroupMembers {
    members: Arc<[Member]>,
    handle: ResolutionHandle,
}

impl GroupMembers {
    pub(crate) fn new(members: Arc<[Member]>, handle: ResolutionHandle) -> Self {
        Self { members, handle }
    }

    fn len(&self) -> usize {
        self.members.len()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.members
            .iter()
            .position(|member| member.key.key_name() == Some(name))
    }

    fn produce(&self, index: usize) -> Option<DiResult<Option<Instance>>> {
        let member = self.members.get(index)?;
        let resolver = self.handle.resolver();
        Some(resolver.invoke(&member.key, &member.producer))
    }

    fn element<T>(&self, index: usize) -> Option<DiResult<Arc<T>>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let produced = self.produce(index)?;
        let member = &self.members[index];
        Some(produced.and_then(|instance| {
            let instance = instance.ok_or_else(|| DiError::NullElement {
                service: member.key.service().to_string(),
                index,
            })?;
            downcast::<T>(&instance).ok_or_else(|| DiError::TypeMismatch {
                service: member.key.to_string(),
                requested: std::any::type_name::<T>().to_string(),
            })
        }))
    }
}

/// Итератор по элементам группы
pub struct Iter<'a, T: ?Sized> {
    members: &'a GroupMembers,
    position: usize,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<'a, T> Iterator for Iter<'a, T>
where
    T: ?Sized + Send + Sync + 'static,
{
    type Item = DiResult<Arc<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.members.element::<T>(self.position)?;
        self.position += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.members.len().saturating_sub(self.position);
        (remaining, Some(remaining))
    }
}

impl<'a, T> ExactSizeIterator for Iter<'a, T> where T: ?Sized + Send + Sync + 'static {}

/// Все элементы, зарегистрированные через `register_collection::<T>`
pub struct Collection<T: ?Sized> {
    members: GroupMembers,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<T> Collection<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    pub(crate) fn new(members: GroupMembers) -> Self {
        Self {
            members,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.len() == 0
    }

    /// Элемент по позиции (None за пределами коллекции)
    pub fn get(&self, index: usize) -> Option<DiResult<Arc<T>>> {
        self.members.element::<T>(index)
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            members: &self.members,
            position: 0,
            _marker: PhantomData,
        }
    }

    /// Разрешить все элементы, остановившись на первой ошибке
    pub fn to_vec(&self) -> DiResult<Vec<Arc<T>>> {
        self.iter().collect()
    }
}

impl<T: ?Sized> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            members: self.members.clone(),
            _marker: PhantomData,
        }
    }
}

impl<'a, T> IntoIterator for &'a Collection<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    type Item = DiResult<Arc<T>>;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: ?Sized> std::fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("service", &std::any::type_name::<T>())
            .field("len", &self.members.members.len())
            .finish()
    }
}

/// Все keyed регистрации `T`: упорядоченная коллекция и lookup по ключу
pub struct Keyed<T: ?Sized> {
    members: GroupMembers,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<T> Keyed<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    pub(crate) fn new(members: GroupMembers) -> Self {
        Self {
            members,
            _marker: PhantomData,
        }
    }

    /// Экземпляр по ключу
    pub fn get(&self, key: &str) -> DiResult<Arc<T>> {
        let index = self
            .members
            .position(key)
            .ok_or_else(|| DiError::UnresolvedService {
                service: ServiceKey::keyed::<T>(key).to_string(),
            })?;
        self.members
            .element::<T>(index)
            .unwrap_or_else(|| {
                Err(DiError::UnresolvedService {
                    service: ServiceKey::keyed::<T>(key).to_string(),
                })
            })
            .map_err(|error| match error {
                // Для lookup по ключу позиция не важна
                DiError::NullElement { .. } => DiError::NullInstance {
                    service: ServiceKey::keyed::<T>(key).to_string(),
                },
                other => other,
            })
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.members.position(key).is_some()
    }

    /// Ключи в порядке регистрации
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.members
            .members
            .iter()
            .filter_map(|member| member.key.key_name())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.len() == 0
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            members: &self.members,
            position: 0,
            _marker: PhantomData,
        }
    }

    /// Пары (ключ, экземпляр) в порядке регистрации
    pub fn entries(&self) -> impl Iterator<Item = (&str, DiResult<Arc<T>>)> + '_ {
        self.keys().zip(self.iter())
    }
}

impl<T: ?Sized> Clone for Keyed<T> {
    fn clone(&self) -> Self {
        Self {
            members: self.members.clone(),
            _marker: PhantomData,
        }
    }
}

impl<'a, T> IntoIterator for &'a Keyed<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    type Item = DiResult<Arc<T>>;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: ?Sized> std::fmt::Debug for Keyed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<&str> = self
            .members
            .members
            .iter()
            .filter_map(|member| member.key.key_name())
            .collect();
        f.debug_struct("Keyed")
            .field("service", &std::any::type_name::<T>())
            .field("keys", &keys)
            .finish()
    }
}

/// Pseudo-entry `Collection<T>` для элементов контракта `T`
pub(crate) fn collection_group<T>() -> Registration
where
    T: ?Sized + Send + Sync + 'static,
{
    group_registration::<Collection<T>>(GroupPlan {
        kind: GroupKind::Collection,
        element: ServiceType::of::<T>(),
        assemble: Arc::new(|members| erase(Arc::new(Collection::<T>::new(members)))),
    })
}

/// Pseudo-entry `Keyed<T>` для keyed регистраций контракта `T`
pub(crate) fn keyed_group<T>() -> Registration
where
    T: ?Sized + Send + Sync + 'static,
{
    group_registration::<Keyed<T>>(GroupPlan {
        kind: GroupKind::Keyed,
        element: ServiceType::of::<T>(),
        assemble: Arc::new(|members| erase(Arc::new(Keyed::<T>::new(members)))),
    })
}

fn group_registration<G: 'static>(plan: GroupPlan) -> Registration {
    Registration::new(
        ServiceKey::of::<G>(),
        ServiceType::of::<G>(),
        Lifestyle::Transient,
        Activation::Group(plan),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{container::Container, resolver::producer};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn member(key: ServiceKey, value: Option<u32>) -> Member {
        Member {
            key,
            producer: producer(move |_| Ok(value.map(|v| erase(Arc::new(v))))),
        }
    }

    fn handle(container: &Container) -> ResolutionHandle {
        ResolutionHandle::new(Arc::clone(container.inner()), None)
    }

    #[test]
    fn test_collection_is_restartable() {
        let container = Container::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = calls.clone();
        let counting = Member {
            key: ServiceKey::element(ServiceType::of::<u32>(), 1),
            producer: producer(move |_| {
                calls_in.fetch_add(1, Ordering::SeqCst);
                Ok(Some(erase(Arc::new(2u32))))
            }),
        };

        let collection = Collection::<u32>::new(GroupMembers::new(
            vec![member(ServiceKey::element(ServiceType::of::<u32>(), 0), Some(1)), counting].into(),
            handle(&container),
        ));

        let first: Vec<u32> = collection.iter().map(|r| *r.unwrap()).collect();
        let second: Vec<u32> = collection.iter().map(|r| *r.unwrap()).collect();

        assert_eq!(first, vec![1, 2]);
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(collection.iter().len(), 2);
    }

    #[test]
    fn test_null_element_surfaces_with_index() {
        let container = Container::new();
        let collection = Collection::<u32>::new(GroupMembers::new(
            vec![
                member(ServiceKey::element(ServiceType::of::<u32>(), 0), Some(1)),
                member(ServiceKey::element(ServiceType::of::<u32>(), 1), None),
            ]
            .into(),
            handle(&container),
        ));

        let results: Vec<_> = collection.iter().collect();
        assert!(results[0].is_ok());
        match &results[1] {
            Err(DiError::NullElement { service, index }) => {
                assert_eq!(service, "u32");
                assert_eq!(*index, 1);
            }
            other => panic!("NullElement expected, got {other:?}"),
        }
        assert!(collection.to_vec().is_err());
        assert!(collection.get(5).is_none());
    }

    #[test]
    fn test_keyed_lookup() {
        let container = Container::new();
        let keyed = Keyed::<u32>::new(GroupMembers::new(
            vec![
                member(ServiceKey::keyed::<u32>("one"), Some(1)),
                member(ServiceKey::keyed::<u32>("two"), Some(2)),
            ]
            .into(),
            handle(&container),
        ));

        assert_eq!(*keyed.get("two").unwrap(), 2);
        assert!(keyed.contains_key("one"));
        assert!(matches!(
            keyed.get("three"),
            Err(DiError::UnresolvedService { .. })
        ));
        assert_eq!(keyed.keys().collect::<Vec<_>>(), vec!["one", "two"]);

        let entries: Vec<(String, u32)> = keyed
            .entries()
            .map(|(key, value)| (key.to_string(), *value.unwrap()))
            .collect();
        assert_eq!(entries, vec![("one".into(), 1), ("two".into(), 2)]);
    }
}
