//! Structured logging для контейнера и приложений поверх него.
//!
//! Два режима вывода: человекочитаемый `fmt` для разработки и JSON строки
//! (`StructuredLogEntry`) для production. Фильтр берется из `RUST_LOG`,
//! иначе из `LoggingConfig::level`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::HashMap,
    io::{self, Write},
    str::FromStr,
    time::Instant,
};
use tracing::{
    field::{Field, Visit},
    Event, Level, Subscriber,
};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};

/// Одна JSON запись лога
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredLogEntry {
    /// ISO 8601
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    #[serde(flatten)]
    pub fields: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ExecutionContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<OperationMetrics>,
}

/// Где было записано событие
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub app_version: String,
    pub hostname: String,
    pub pid: u32,
    pub thread_id: String,
}

impl ExecutionContext {
    pub fn current() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            thread_id: format!("{:?}", std::thread::current().id()),
        }
    }
}

/// Метрики, которые `OperationTimer` прикладывает к событию
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

impl OperationMetrics {
    fn from_fields(fields: &mut HashMap<String, Value>) -> Option<Self> {
        let metrics = Self {
            operation: fields
                .remove("operation")
                .and_then(|v| v.as_str().map(str::to_string)),
            duration_ms: fields.remove("duration_ms").and_then(|v| v.as_u64()),
            success: fields.remove("success").and_then(|v| v.as_bool()),
        };
        (metrics != Self::default()).then_some(metrics)
    }
}

/// Layer, печатающий каждое событие одной JSON строкой в stdout
pub struct JsonFormatter {
    include_context: bool,
}

impl JsonFormatter {
    pub fn new(include_context: bool) -> Self {
        Self { include_context }
    }

    pub fn format_event(&self, event: &Event<'_>) -> StructuredLogEntry {
        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        let metadata = event.metadata();
        let operation = OperationMetrics::from_fields(&mut visitor.fields);
        StructuredLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            level: metadata.level().to_string(),
            target: metadata.target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields: visitor.fields,
            context: self.include_context.then(ExecutionContext::current),
            operation,
        }
    }
}

impl<S> Layer<S> for JsonFormatter
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let entry = self.format_event(event);
        if let Ok(json) = serde_json::to_string(&entry) {
            let _ = writeln!(io::stdout().lock(), "{}", json);
        }
    }
}

#[derive(Default)]
struct JsonVisitor {
    message: Option<String>,
    fields: HashMap<String, Value>,
}

impl JsonVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{:?}", value);
        if field.name() == "message" {
            self.message = Some(rendered);
        } else {
            self.insert(field, Value::String(rendered));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.insert(field, Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::Number(value.into()));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.insert(field, Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }
}

/// Конфигурация logging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace / debug / info / warn / error
    pub level: String,
    pub json_output: bool,
    /// Только для не-JSON вывода
    pub color_output: bool,
    pub include_context: bool,
    pub include_line_numbers: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_output: false,
            color_output: true,
            include_context: true,
            include_line_numbers: cfg!(debug_assertions),
        }
    }
}

impl LoggingConfig {
    pub fn production() -> Self {
        Self {
            json_output: true,
            color_output: false,
            include_line_numbers: false,
            ..Self::default()
        }
    }

    pub fn level(&self) -> anyhow::Result<Level> {
        Level::from_str(&self.level)
            .map_err(|_| anyhow::anyhow!("Неизвестный уровень логирования: '{}'", self.level))
    }
}

/// Установить глобальный subscriber. Повторный вызов возвращает ошибку.
pub fn init_structured_logging(config: LoggingConfig) -> anyhow::Result<()> {
    let level = config.level()?;
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    if config.json_output {
        let subscriber = Registry::default()
            .with(env_filter)
            .with(JsonFormatter::new(config.include_context));
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(config.include_line_numbers)
            .with_ansi(config.color_output);
        let subscriber = Registry::default().with(env_filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}

/// Logging для тестов: вывод через test writer, повторные вызовы игнорируются
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

/// Замер длительности операции с итоговым событием в лог
pub struct OperationTimer {
    start: Instant,
    operation_name: String,
    fields: HashMap<String, Value>,
}

impl OperationTimer {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            operation_name: operation_name.into(),
            fields: HashMap::new(),
        }
    }

    pub fn add_field(&mut self, key: impl Into<String>, value: impl Serialize) {
        if let Ok(v) = serde_json::to_value(value) {
            self.fields.insert(key.into(), v);
        }
    }

    pub fn fields(&self) -> &HashMap<String, Value> {
        &self.fields
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn finish(self) {
        self.finish_with_result(Ok::<(), &str>(()));
    }

    pub fn finish_with_result<T>(self, result: Result<T, impl std::fmt::Display>) {
        let duration_ms = self.elapsed_ms();

        match result {
            Ok(_) => tracing::info!(
                operation = %self.operation_name,
                duration_ms = duration_ms,
                success = true,
                fields = ?self.fields,
                "Operation completed"
            ),
            Err(e) => tracing::error!(
                operation = %self.operation_name,
                duration_ms = duration_ms,
                success = false,
                error = %e,
                fields = ?self.fields,
                "Operation failed"
            ),
        }
    }
}
