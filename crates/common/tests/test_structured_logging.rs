use common::{
    init_structured_logging, ExecutionContext, LoggingConfig, OperationMetrics, OperationTimer,
    StructuredLogEntry,
};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

fn entry(level: &str, message: &str) -> StructuredLogEntry {
    StructuredLogEntry {
        timestamp: "2024-01-01T00:00:00Z".to_string(),
        level: level.to_string(),
        target: "injector::container".to_string(),
        message: message.to_string(),
        fields: HashMap::new(),
        context: None,
        operation: None,
    }
}

#[test]
fn test_structured_log_entry_serialization() {
    let mut entry = entry("ERROR", "Verification failed");
    entry.fields.insert("failures".to_string(), Value::Number(2.into()));

    let json = serde_json::to_value(&entry).unwrap();
    assert_eq!(json["level"], "ERROR");
    assert_eq!(json["message"], "Verification failed");
    // Поля выкладываются на верхний уровень
    assert_eq!(json["failures"], 2);
    // Пустые context/operation не сериализуются
    assert!(json.get("context").is_none());
    assert!(json.get("operation").is_none());
}

#[test]
fn test_structured_log_entry_with_context() {
    let mut entry = entry("WARN", "Decorator skipped");
    entry.context = Some(ExecutionContext {
        app_version: "2.0.0".to_string(),
        hostname: "server1".to_string(),
        pid: 1234,
        thread_id: "ThreadId(1)".to_string(),
    });
    entry.operation = Some(OperationMetrics {
        operation: Some("container_verification".into()),
        duration_ms: Some(5),
        success: Some(false),
    });

    let json = serde_json::to_string(&entry).unwrap();
    let parsed: StructuredLogEntry = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.context.unwrap().hostname, "server1");
    assert_eq!(parsed.operation.unwrap().success, Some(false));
}

#[test]
fn test_execution_context_current() {
    let context = ExecutionContext::current();
    assert_eq!(context.pid, std::process::id());
    assert!(!context.hostname.is_empty());
}

#[test]
fn test_operation_timer_elapsed() {
    let timer = OperationTimer::new("test_operation");
    std::thread::sleep(Duration::from_millis(10));
    assert!(timer.elapsed_ms() >= 10);
    timer.finish();
}

#[test]
fn test_init_structured_logging_twice() {
    let config = LoggingConfig::production();
    assert!(config.json_output);

    // Второй глобальный subscriber установить нельзя
    let first = init_structured_logging(config.clone());
    let second = init_structured_logging(config);
    assert!(first.is_ok());
    assert!(second.is_err());
}

#[test]
fn test_init_rejects_unknown_level() {
    let config = LoggingConfig {
        level: "verbose".into(),
        ..LoggingConfig::default()
    };
    assert!(init_structured_logging(config).is_err());
}
