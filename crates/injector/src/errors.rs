//! 🚫 DI ERROR HANDLING SYSTEM
//!
//! Единый error type для всех операций контейнера.
//!
//! # ТАКСОНОМИЯ
//!
//! - **Configuration**: duplicate registration, мутация после lock, лимиты,
//!   невалидные декораторы
//! - **Unresolved**: для ключа нет регистрации
//! - **MissingDependency / AmbiguousConstructor**: структурные ошибки компиляции
//! - **CyclicDependency**: полный путь цикла
//! - **Activation**: factory/constructor вернул ошибку (cause сохраняется)
//! - **NullElement**: элемент коллекции - null reference
//! - **NoScope**: scoped сервис вне активного scope
//! - **Verification**: агрегированный отчет `Container::verify`
//!
//! Пользовательские factory возвращают `anyhow::Result`. Если внутри factory
//! всплывает `DiError` (например вложенный `resolver.resolve()`), он
//! восстанавливается через downcast и не оборачивается повторно.

use std::{fmt, sync::Arc};
use thiserror::Error;

/// Result type alias для DI операций
pub type DiResult<T> = Result<T, DiError>;

/// Исходная ошибка пользовательского кода (Clone-совместимая)
pub type ErrorSource = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Основной error type контейнера
#[derive(Debug, Error, Clone)]
pub enum DiError {
    #[error("Service {service} is already registered")]
    DuplicateRegistration { service: String },

    #[error("Container can't be changed after the first resolution or verification: {operation} rejected")]
    ContainerLocked { operation: String },

    #[error("Registration limit exceeded: {current}/{limit}")]
    RegistrationLimitExceeded { limit: usize, current: usize },

    #[error("Invalid registration for {service}: {reason}")]
    InvalidRegistration { service: String, reason: String },

    #[error("Decorator {decorator} can't be applied to {service}: {reason}")]
    InvalidDecorator {
        decorator: String,
        service: String,
        reason: String,
    },

    #[error("No registration for type {service} could be found")]
    UnresolvedService { service: String },

    #[error("{service} depends on {dependency} ({constructor}), but no registration for it could be found")]
    MissingDependency {
        service: String,
        dependency: String,
        constructor: String,
    },

    #[error("{implementation} has more than one resolvable constructor: {}", candidates.join(", "))]
    AmbiguousConstructor {
        implementation: String,
        candidates: Vec<String>,
    },

    #[error("Cyclic dependency detected: {}", path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("Failed to activate {service}: {source}")]
    Activation {
        service: String,
        #[source]
        source: ErrorSource,
    },

    #[error("Producer for {service} returned a null reference")]
    NullInstance { service: String },

    #[error("One of the items in the collection for type {service} is a null reference (index {index})")]
    NullElement { service: String, index: usize },

    #[error("{service} is registered as Scoped, but it was requested outside of an active scope")]
    NoScope { service: String },

    #[error("Resolved instance of {service} is not a {requested}")]
    TypeMismatch { service: String, requested: String },

    #[error("Resolution depth exceeded the limit of {limit}: {}", path.join(" -> "))]
    ResolutionDepthExceeded { limit: usize, path: Vec<String> },

    #[error(transparent)]
    Verification(VerificationReport),
}

/// Категория ошибки (для assertions и обработки на стороне caller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Unresolved,
    MissingDependency,
    AmbiguousConstructor,
    CyclicDependency,
    Activation,
    NullElement,
    NoScope,
    Verification,
}

impl DiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DiError::DuplicateRegistration { .. }
            | DiError::ContainerLocked { .. }
            | DiError::RegistrationLimitExceeded { .. }
            | DiError::InvalidRegistration { .. }
            | DiError::InvalidDecorator { .. } => ErrorKind::Configuration,
            DiError::UnresolvedService { .. } => ErrorKind::Unresolved,
            DiError::MissingDependency { .. } => ErrorKind::MissingDependency,
            DiError::AmbiguousConstructor { .. } => ErrorKind::AmbiguousConstructor,
            DiError::CyclicDependency { .. } => ErrorKind::CyclicDependency,
            DiError::Activation { .. }
            | DiError::NullInstance { .. }
            | DiError::TypeMismatch { .. }
            | DiError::ResolutionDepthExceeded { .. } => ErrorKind::Activation,
            DiError::NullElement { .. } => ErrorKind::NullElement,
            DiError::NoScope { .. } => ErrorKind::NoScope,
            DiError::Verification(_) => ErrorKind::Verification,
        }
    }

    pub fn is_configuration_error(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }

    /// Обернуть ошибку пользовательского кода в `Activation`.
    /// `DiError`, прошедший через пользовательский код, возвращается как есть.
    pub fn activation(service: impl fmt::Display, error: anyhow::Error) -> DiError {
        match error.downcast::<DiError>() {
            Ok(inner) => inner,
            Err(error) => {
                let source: Box<dyn std::error::Error + Send + Sync + 'static> = error.into();
                DiError::Activation {
                    service: service.to_string(),
                    source: Arc::from(source),
                }
            }
        }
    }

    pub fn verification_report(&self) -> Option<&VerificationReport> {
        match self {
            DiError::Verification(report) => Some(report),
            _ => None,
        }
    }
}

/// Одна ошибка, найденная при verification
#[derive(Debug, Clone)]
pub struct VerificationFailure {
    /// Ключ entry, на котором ошибка была обнаружена
    pub service: String,
    pub error: DiError,
}

/// Агрегированный отчет `Container::verify`
#[derive(Debug, Clone, Default)]
pub struct VerificationReport {
    failures: Vec<VerificationFailure>,
}

impl VerificationReport {
    pub(crate) fn push(&mut self, service: impl fmt::Display, error: DiError) {
        self.failures.push(VerificationFailure {
            service: service.to_string(),
            error,
        });
    }

    pub fn failures(&self) -> &[VerificationFailure] {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn contains_kind(&self, kind: ErrorKind) -> bool {
        self.failures.iter().any(|f| f.error.kind() == kind)
    }

    /// Ошибки для конкретного сервиса (по строковому ключу)
    pub fn for_service<'a>(&'a self, service: &'a str) -> impl Iterator<Item = &'a DiError> + 'a {
        self.failures
            .iter()
            .filter(move |f| f.service == service)
            .map(|f| &f.error)
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "The configuration is invalid: {} error(s) found",
            self.failures.len()
        )?;
        for failure in &self.failures {
            write!(f, "\n  - {}: {}", failure.service, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for VerificationReport {}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_activation_wraps_foreign_errors() {
        let error = DiError::activation("dyn Repo", anyhow!("database is down"));

        assert_eq!(error.kind(), ErrorKind::Activation);
        assert!(error.to_string().contains("dyn Repo"));
        assert!(error.to_string().contains("database is down"));

        let source = std::error::Error::source(&error).expect("cause must be chained");
        assert_eq!(source.to_string(), "database is down");
    }

    #[test]
    fn test_activation_keeps_container_errors_intact() {
        let inner = DiError::CyclicDependency {
            path: vec!["A".into(), "B".into(), "A".into()],
        };
        let error = DiError::activation("A", anyhow::Error::new(inner));

        assert_eq!(error.kind(), ErrorKind::CyclicDependency);
        assert_eq!(error.to_string(), "Cyclic dependency detected: A -> B -> A");
    }

    #[test]
    fn test_configuration_kinds() {
        let duplicate = DiError::DuplicateRegistration {
            service: "u32".into(),
        };
        let locked = DiError::ContainerLocked {
            operation: "register".into(),
        };

        assert!(duplicate.is_configuration_error());
        assert!(locked.is_configuration_error());
        assert!(locked.to_string().contains("Container can't be changed"));
    }

    #[test]
    fn test_report_display_lists_every_failure() {
        let mut report = VerificationReport::default();
        report.push(
            "dyn Repo",
            DiError::NullElement {
                service: "dyn Repo".into(),
                index: 0,
            },
        );
        report.push(
            "u32",
            DiError::UnresolvedService {
                service: "u64".into(),
            },
        );

        let text = DiError::Verification(report.clone()).to_string();
        assert!(text.contains("2 error(s)"));
        assert!(text.contains("is a null reference"));
        assert!(report.contains_kind(ErrorKind::NullElement));
        assert_eq!(report.for_service("u32").count(), 1);
    }
}
