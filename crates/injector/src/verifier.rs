//! Verification: блокирует контейнер, компилирует и разрешает каждую запись
//! один раз и собирает все найденные ошибки в один отчет.

use common::OperationTimer;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{info, warn};

use crate::{
    container::ContainerInner,
    dependency_graph::DependencyGraph,
    errors::{DiError, DiResult, VerificationReport},
    resolver::Resolver,
    scope::ScopeState,
};

/// Итог успешной verification
#[derive(Debug, Clone)]
pub struct VerificationSummary {
    /// Проверенные записи (plain, keyed, группы и элементы)
    pub entries_verified: usize,
    /// Из них элементов коллекций
    pub elements_checked: usize,
    pub duration: Duration,
    /// Порядок разрешения по графу зависимостей (зависимости первыми)
    pub resolution_order: Vec<String>,
}

pub(crate) fn verify(container: &Arc<ContainerInner>) -> DiResult<VerificationSummary> {
    let started = Instant::now();
    let mut timer = OperationTimer::new("container_verification");
    timer.add_field("container", &container.config().name);

    container.registry().lock("verification");

    // Scoped сервисы проверяются в отдельном scope, который живет только здесь
    let scope = Arc::new(ScopeState::new(container.next_scope_id()));
    let mut report = VerificationReport::default();
    let mut entries_verified = 0;
    let mut elements_checked = 0;

    for key in container.registry().keys() {
        entries_verified += 1;
        if key.element_index().is_some() {
            elements_checked += 1;
        }

        let resolver = Resolver::new(container, Some(&scope));
        match container.produce(&resolver, &key) {
            Ok(Some(_)) => {}
            Ok(None) => {
                let error = match key.element_index() {
                    Some(index) => DiError::NullElement {
                        service: key.service().to_string(),
                        index,
                    },
                    None => DiError::NullInstance {
                        service: key.to_string(),
                    },
                };
                report.push(&key, error);
            }
            Err(error) => report.push(&key, error),
        }
    }
    scope.cells().clear();

    timer.add_field("entries", entries_verified);
    timer.add_field("failures", report.len());

    if !report.is_empty() {
        warn!(
            failures = report.len(),
            entries = entries_verified,
            "Verification контейнера '{}' не пройдена",
            container.config().name
        );
        let error = DiError::Verification(report);
        timer.finish_with_result(Err::<(), _>(&error));
        return Err(error);
    }

    let resolution_order = DependencyGraph::from_registry(container.registry())
        .topological_sort()
        .map(|order| order.iter().map(ToString::to_string).collect())
        .unwrap_or_default();

    timer.finish_with_result(Ok::<(), &DiError>(()));
    info!(
        entries = entries_verified,
        elements = elements_checked,
        "Контейнер '{}' успешно проверен",
        container.config().name
    );

    Ok(VerificationSummary {
        entries_verified,
        elements_checked,
        duration: started.elapsed(),
        resolution_order,
    })
}
