//! Injector - IoC контейнер с явной регистрацией и compile-on-first-use.
//!
//! Жизненный цикл контейнера:
//! - регистрация сервисов, коллекций, keyed вариантов и декораторов
//! - первое успешное разрешение (или `verify`) блокирует контейнер
//! - каждая запись компилируется один раз в producer; дальше разрешение
//!   идет без поиска конструкторов и анализа графа
//!
//! Lifestyle: Transient, Singleton, Scoped (в пределах `Scope`).

mod collections;
mod compiler;
mod config;
mod constructor;
mod container;
mod decorators;
mod dependency_graph;
mod descriptor;
mod errors;
mod lifetime_manager;
mod registration;
mod resolver;
mod scope;
mod service_key;
mod service_registry;
mod verifier;

// Фасад контейнера
pub use container::{Container, ContainerStats};
pub use config::{ContainerConfig, ENV_PREFIX};
pub use scope::Scope;

// Регистрация
pub use constructor::{Arguments, Component, Constructor, ConstructorBuilder, Dependency, DependencyKind, Implementation};
pub use decorators::{Decorator, DecoratorContext};
pub use descriptor::{Descriptor, FactoryFn, OptionalFactoryFn};
pub use lifetime_manager::{CacheStats, Lifestyle};

// Разрешение
pub use collections::{Collection, Iter, Keyed};
pub use resolver::{Factory, Resolver};
pub use service_key::{Discriminator, Instance, ServiceKey, ServiceType};

// Ошибки и диагностика
pub use dependency_graph::{DependencyGraph, DependencyGraphStats};
pub use errors::{DiError, DiResult, ErrorKind, ErrorSource, VerificationFailure, VerificationReport};
pub use service_registry::RegistryStats;
pub use verifier::VerificationSummary;
