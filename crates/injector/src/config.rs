//! Конфигурация контейнера: presets, файлы (TOML, JSON) и переменные окружения.

use anyhow::{anyhow, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};
use tracing::debug;

/// Префикс переменных окружения (`INJECTOR_MAX_REGISTRATIONS=...`)
pub const ENV_PREFIX: &str = "INJECTOR";

/// Конфигурация контейнера
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Имя контейнера (для логов)
    pub name: String,
    /// Максимальное количество регистраций
    pub max_registrations: usize,
    /// Максимальная глубина графа при разрешении
    pub max_resolution_depth: usize,
    /// Подробное логирование регистраций
    pub verbose_logging: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_registrations: 10_000,
            max_resolution_depth: 64,
            verbose_logging: cfg!(debug_assertions),
        }
    }
}

impl ContainerConfig {
    /// Production конфигурация
    pub fn production() -> Self {
        Self {
            name: "production".to_string(),
            max_registrations: 50_000,
            max_resolution_depth: 128,
            verbose_logging: false,
        }
    }

    /// Development конфигурация с расширенным логированием
    pub fn development() -> Self {
        Self {
            name: "development".to_string(),
            max_registrations: 5_000,
            max_resolution_depth: 64,
            verbose_logging: true,
        }
    }

    /// Minimal конфигурация для тестов
    pub fn minimal() -> Self {
        Self {
            name: "minimal".to_string(),
            max_registrations: 1_000,
            max_resolution_depth: 32,
            verbose_logging: false,
        }
    }

    pub fn from_preset_name(preset: &str) -> Result<Self> {
        match preset.to_lowercase().as_str() {
            "production" | "prod" => Ok(Self::production()),
            "development" | "dev" => Ok(Self::development()),
            "minimal" | "test" => Ok(Self::minimal()),
            "default" => Ok(Self::default()),
            other => Err(anyhow!("Unknown configuration preset: {}", other)),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.name.trim().is_empty(), "Container name must not be empty");
        ensure!(
            self.max_registrations > 0,
            "max_registrations must be greater than zero"
        );
        ensure!(
            self.max_resolution_depth > 0,
            "max_resolution_depth must be greater than zero"
        );
        Ok(())
    }

    /// Загрузить конфигурацию из файла (формат по расширению)
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

        let config = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => Self::load_from_toml(&content)?,
            Some("json") => Self::load_from_json(&content)?,
            _ => {
                return Err(anyhow!(
                    "Unsupported configuration file format: {:?}",
                    path.extension()
                ))
            }
        };

        debug!("Конфигурация '{}' загружена из {}", config.name, path.display());
        Ok(config)
    }

    pub fn load_from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::to_string_pretty(self)?,
            Some("json") => serde_json::to_string_pretty(self)?,
            _ => {
                return Err(anyhow!(
                    "Unsupported file format: {:?}",
                    path.extension()
                ))
            }
        };

        fs::write(path, content)?;
        Ok(())
    }

    /// Применить переменные окружения процесса с префиксом `INJECTOR_`
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(env::vars())
    }

    /// Применить переопределения из произвольного набора пар (ключ, значение)
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let prefix = format!("{}_", ENV_PREFIX);

        for (key, value) in vars {
            let Some(config_key) = key.as_ref().strip_prefix(&prefix) else {
                continue;
            };
            let value = value.as_ref();

            match config_key.to_uppercase().as_str() {
                "NAME" => self.name = value.to_string(),
                "MAX_REGISTRATIONS" => {
                    self.max_registrations = value
                        .parse()
                        .with_context(|| format!("Invalid {}{}: {}", prefix, config_key, value))?;
                }
                "MAX_RESOLUTION_DEPTH" => {
                    self.max_resolution_depth = value
                        .parse()
                        .with_context(|| format!("Invalid {}{}: {}", prefix, config_key, value))?;
                }
                "VERBOSE_LOGGING" => {
                    self.verbose_logging = value.parse().unwrap_or(false);
                }
                "PRESET" => {
                    let name = self.name.clone();
                    *self = Self::from_preset_name(value)?.with_name(name);
                }
                unknown => debug!("Неизвестная переменная окружения {}{}", prefix, unknown),
            }
        }

        self.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_presets_are_valid() -> Result<()> {
        for preset in ["production", "development", "minimal", "default"] {
            ContainerConfig::from_preset_name(preset)?.validate()?;
        }
        assert!(ContainerConfig::from_preset_name("turbo").is_err());
        Ok(())
    }

    #[test]
    fn test_load_from_toml() -> Result<()> {
        let config = ContainerConfig::load_from_toml(
            r#"
            name = "app"
            max_registrations = 42
            "#,
        )?;

        assert_eq!(config.name, "app");
        assert_eq!(config.max_registrations, 42);
        // Незаданные поля берутся из Default
        assert_eq!(
            config.max_resolution_depth,
            ContainerConfig::default().max_resolution_depth
        );
        Ok(())
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = ContainerConfig::load_from_json(r#"{ "max_registrations": 0 }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_save_and_load_file() -> Result<()> {
        let dir = TempDir::new()?;
        let config = ContainerConfig::development().with_name("roundtrip");

        for file in ["injector.toml", "nested/injector.json"] {
            let path = dir.path().join(file);
            config.save_to_file(&path)?;
            assert_eq!(ContainerConfig::load_from_file(&path)?, config);
        }

        let unsupported = dir.path().join("injector.yaml");
        assert!(config.save_to_file(&unsupported).is_err());
        Ok(())
    }

    #[test]
    fn test_overrides() -> Result<()> {
        let mut config = ContainerConfig::minimal();
        config.apply_overrides([
            ("INJECTOR_MAX_REGISTRATIONS", "7"),
            ("INJECTOR_VERBOSE_LOGGING", "true"),
            ("OTHER_MAX_REGISTRATIONS", "1"),
        ])?;

        assert_eq!(config.max_registrations, 7);
        assert!(config.verbose_logging);

        let mut broken = ContainerConfig::minimal();
        assert!(broken
            .apply_overrides([("INJECTOR_MAX_RESOLUTION_DEPTH", "deep")])
            .is_err());
        Ok(())
    }
}
