//! Конфигурация контейнера из файлов и лимиты

use anyhow::Result;
use injector::{Container, ContainerConfig, DiError, Lifestyle};
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_container_from_toml_file() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("container.toml");
    std::fs::write(
        &path,
        r#"
name = "orders"
max_registrations = 2
max_resolution_depth = 16
"#,
    )?;

    let container = Container::from_config_file(&path)?;
    assert_eq!(container.name(), "orders");
    assert_eq!(container.config().max_resolution_depth, 16);

    container.register_instance(Arc::new(1u8))?;
    container.register_instance(Arc::new(2u16))?;
    let error = container.register_instance(Arc::new(3u32)).unwrap_err();
    assert!(matches!(
        error,
        DiError::RegistrationLimitExceeded { limit: 2, .. }
    ));
    Ok(())
}

#[test]
fn test_saved_config_roundtrip() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = ContainerConfig::production().with_name("billing");

    for file in ["nested/config.json", "config.toml"] {
        let path = temp_dir.path().join(file);
        config.save_to_file(&path)?;
        assert_eq!(ContainerConfig::load_from_file(&path)?, config);
    }
    Ok(())
}

#[test]
fn test_invalid_config_file_rejected() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("broken.json");
    std::fs::write(&path, r#"{"name": "x", "max_registrations": 0}"#)?;

    assert!(Container::from_config_file(&path).is_err());
    assert!(Container::from_config_file(temp_dir.path().join("missing.toml")).is_err());
    Ok(())
}

#[test]
fn test_verbose_container_behaves_the_same() -> Result<()> {
    common::init_test_logging();

    let container = Container::with_config(ContainerConfig::development())?;
    container.register_factory::<String>(Lifestyle::Singleton, |_| Ok(Arc::new("dev".to_string())))?;
    let summary = container.verify()?;
    assert_eq!(summary.entries_verified, 1);
    assert_eq!(container.resolve::<String>()?.as_str(), "dev");
    Ok(())
}
