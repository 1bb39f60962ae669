//! Граф зависимостей для диагностики: ребра, циклы, топологический порядок.
//!
//! Строится по объявленным конструкторам (включая декораторы) и составу
//! групп. Зависимости пользовательских factory непрозрачны и в граф не попадают,
//! как и ленивые `Factory<T>` параметры.

use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

use crate::{
    compiler::select_constructor,
    constructor::DependencyKind,
    decorators::DecoratorContext,
    errors::{DiError, DiResult},
    registration::Activation,
    service_key::ServiceKey,
    service_registry::ServiceRegistry,
};

/// Граф зависимостей между ключами сервисов
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// Узлы в порядке добавления
    nodes: Vec<ServiceKey>,
    /// Отношения зависимостей: ключ -> ключи, от которых он зависит
    dependencies: HashMap<ServiceKey, Vec<ServiceKey>>,
    /// Обратные зависимости: ключ -> ключи, которые от него зависят
    dependents: HashMap<ServiceKey, Vec<ServiceKey>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_registry(registry: &ServiceRegistry) -> Self {
        let mut graph = Self::new();
        let decorators = registry.decorators();
        let is_registered = |key: &ServiceKey| registry.contains(key);

        for entry in registry.entries() {
            let key = entry.key();
            graph.add_node(key.clone());

            match entry.activation() {
                Activation::Constructed(implementation) => {
                    // Невыбираемый конструктор - это ошибка verification, не графа
                    if let Ok(constructor) = select_constructor(implementation, key, is_registered) {
                        // Factory<T> разрешается только при create
                        for dependency in constructor.dependencies.iter().filter(|d| d.kind() == DependencyKind::Direct) {
                            graph.add_dependency(key.clone(), dependency.key().clone());
                        }
                    }
                }
                Activation::Group(plan) => {
                    for member in registry.group_members(plan) {
                        graph.add_dependency(key.clone(), member.key().clone());
                    }
                    continue;
                }
                _ => {}
            }

            let context = DecoratorContext::new(key.clone(), entry.implementation(), entry.lifestyle());
            for rule in decorators.iter().filter(|rule| rule.applies_to(&context)) {
                if let Ok(constructor) = rule.select_constructor(is_registered) {
                    for dependency in &constructor.dependencies {
                        if !rule.is_decoratee(dependency.key()) && dependency.kind() == DependencyKind::Direct {
                            graph.add_dependency(key.clone(), dependency.key().clone());
                        }
                    }
                }
            }
        }

        debug!(
            "Граф зависимостей построен: {} узлов, {} ребер",
            graph.nodes.len(),
            graph.edge_count()
        );
        graph
    }

    pub fn add_node(&mut self, key: ServiceKey) {
        if !self.dependencies.contains_key(&key) {
            self.dependencies.insert(key.clone(), Vec::new());
            self.nodes.push(key);
        }
    }

    /// Добавить зависимость: dependent зависит от dependency
    pub fn add_dependency(&mut self, dependent: ServiceKey, dependency: ServiceKey) {
        self.add_node(dependent.clone());
        self.add_node(dependency.clone());

        let forward = self.dependencies.entry(dependent.clone()).or_default();
        if forward.contains(&dependency) {
            return;
        }
        forward.push(dependency.clone());
        self.dependents.entry(dependency).or_default().push(dependent);
    }

    pub fn nodes(&self) -> &[ServiceKey] {
        &self.nodes
    }

    pub fn dependencies_of(&self, key: &ServiceKey) -> &[ServiceKey] {
        self.dependencies.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn dependents_of(&self, key: &ServiceKey) -> &[ServiceKey] {
        self.dependents.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn has_dependency(&self, dependent: &ServiceKey, dependency: &ServiceKey) -> bool {
        self.dependencies_of(dependent).contains(dependency)
    }

    pub fn edge_count(&self) -> usize {
        self.dependencies.values().map(Vec::len).sum()
    }

    /// Найти все циклы в графе
    pub fn find_cycles(&self) -> Vec<Vec<ServiceKey>> {
        let mut cycles = Vec::new();
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for node in &self.nodes {
            if !visited.contains(node) {
                self.dfs_find_cycles(node, &mut visited, &mut rec_stack, &mut path, &mut cycles);
            }
        }

        cycles
    }

    fn dfs_find_cycles<'g>(
        &'g self,
        node: &'g ServiceKey,
        visited: &mut HashSet<&'g ServiceKey>,
        rec_stack: &mut HashSet<&'g ServiceKey>,
        path: &mut Vec<&'g ServiceKey>,
        cycles: &mut Vec<Vec<ServiceKey>>,
    ) {
        visited.insert(node);
        rec_stack.insert(node);
        path.push(node);

        for neighbor in self.dependencies_of(node) {
            if !visited.contains(neighbor) {
                self.dfs_find_cycles(neighbor, visited, rec_stack, path, cycles);
            } else if rec_stack.contains(neighbor) {
                // Цикл: путь от neighbor до текущего узла и обратно в neighbor
                if let Some(start) = path.iter().position(|k| *k == neighbor) {
                    let mut cycle: Vec<ServiceKey> = path[start..].iter().map(|k| (*k).clone()).collect();
                    cycle.push(neighbor.clone());
                    cycles.push(cycle);
                }
            }
        }

        rec_stack.remove(node);
        path.pop();
    }

    /// Топологический порядок: зависимости раньше зависящих от них
    pub fn topological_sort(&self) -> DiResult<Vec<ServiceKey>> {
        let mut in_degree: HashMap<&ServiceKey, usize> = self
            .nodes
            .iter()
            .map(|node| (node, self.dependencies_of(node).len()))
            .collect();

        let mut queue: VecDeque<&ServiceKey> = self
            .nodes
            .iter()
            .filter(|node| in_degree.get(node).copied() == Some(0))
            .collect();
        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(node) = queue.pop_front() {
            result.push(node.clone());

            for dependent in self.dependents_of(node) {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if result.len() != self.nodes.len() {
            let path = self
                .find_cycles()
                .into_iter()
                .next()
                .map(|cycle| cycle.iter().map(ToString::to_string).collect())
                .unwrap_or_default();
            return Err(DiError::CyclicDependency { path });
        }
        Ok(result)
    }

    pub fn stats(&self) -> DependencyGraphStats {
        DependencyGraphStats {
            total_nodes: self.nodes.len(),
            total_edges: self.edge_count(),
            max_dependencies: self.dependencies.values().map(Vec::len).max().unwrap_or(0),
            max_dependents: self.dependents.values().map(Vec::len).max().unwrap_or(0),
            cycles: self.find_cycles().len(),
        }
    }
}

/// Статистика графа зависимостей
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraphStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub max_dependencies: usize,
    pub max_dependents: usize,
    pub cycles: usize,
}
