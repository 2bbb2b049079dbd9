use std::path::Path;

use chrono::Utc;

use crate::config::AuditConfig;
use crate::result::CommandResult;

/// Append-only audit trail for executions and policy violations.
///
/// Best-effort: write failures are logged and never abort the command
/// execution that triggered them.
#[derive(Debug)]
pub struct AuditLogger {
    destination: AuditDestination,
}

#[derive(Debug)]
enum AuditDestination {
    Disabled,
    Stdout,
    File(tokio::sync::Mutex<tokio::fs::File>),
}

#[derive(Debug, serde::Serialize)]
#[serde(tag = "event")]
pub enum AuditRecord {
    #[serde(rename = "execution")]
    Execution {
        timestamp: String,
        user: String,
        command: String,
        safety_level: String,
        exit_code: i32,
        success: bool,
        duration_ms: u64,
        validation_passed: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        validation_message: Option<String>,
    },
    #[serde(rename = "security_violation")]
    Violation {
        timestamp: String,
        user: String,
        command: String,
        violation_reason: String,
        blocked: bool,
    },
}

impl AuditLogger {
    /// Create a logger from config, auto-creating the parent directory of a
    /// file destination.
    ///
    /// # Errors
    ///
    /// Returns an error if a file destination cannot be created or opened.
    pub async fn from_config(config: &AuditConfig) -> Result<Self, std::io::Error> {
        if !config.enabled {
            return Ok(Self {
                destination: AuditDestination::Disabled,
            });
        }

        let destination = if config.destination == "stdout" {
            AuditDestination::Stdout
        } else {
            let path = Path::new(&config.destination);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await?;
            }
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            AuditDestination::File(tokio::sync::Mutex::new(file))
        };

        Ok(Self { destination })
    }

    pub async fn log_execution(
        &self,
        result: &CommandResult,
        user: &str,
        validation_message: Option<&str>,
    ) {
        let record = AuditRecord::Execution {
            timestamp: Utc::now().to_rfc3339(),
            user: user.to_owned(),
            command: result.command.clone(),
            safety_level: result.safety_level.as_str().to_owned(),
            exit_code: result.exit_code,
            success: result.success(),
            duration_ms: result.duration_ms,
            validation_passed: validation_message.is_none(),
            validation_message: validation_message.map(str::to_owned),
        };
        self.write(&record).await;
    }

    pub async fn log_violation(&self, command: &str, reason: &str, user: &str) {
        let record = AuditRecord::Violation {
            timestamp: Utc::now().to_rfc3339(),
            user: user.to_owned(),
            command: command.to_owned(),
            violation_reason: reason.to_owned(),
            blocked: true,
        };
        self.write(&record).await;
    }

    async fn write(&self, record: &AuditRecord) {
        let Ok(json) = serde_json::to_string(record) else {
            return;
        };

        match &self.destination {
            AuditDestination::Disabled => {}
            AuditDestination::Stdout => {
                tracing::info!(target: "audit", "{json}");
            }
            AuditDestination::File(file) => {
                use tokio::io::AsyncWriteExt;
                let mut f = file.lock().await;
                let line = format!("{json}\n");
                if let Err(e) = f.write_all(line.as_bytes()).await {
                    tracing::error!("failed to write audit record: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::result::SafetyLevel;

    fn sample_result() -> CommandResult {
        CommandResult::new(
            "echo hello",
            0,
            "hello\n".into(),
            String::new(),
            Duration::from_millis(12),
            SafetyLevel::Safe,
        )
    }

    #[test]
    fn execution_record_serialization() {
        let record = AuditRecord::Execution {
            timestamp: "2026-01-01T00:00:00Z".into(),
            user: "system".into(),
            command: "echo hello".into(),
            safety_level: "safe".into(),
            exit_code: 0,
            success: true,
            duration_ms: 12,
            validation_passed: true,
            validation_message: None,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"event\":\"execution\""));
        assert!(json.contains("\"success\":true"));
        assert!(!json.contains("validation_message"));
    }

    #[test]
    fn violation_record_serialization() {
        let record = AuditRecord::Violation {
            timestamp: "2026-01-01T00:00:00Z".into(),
            user: "ops".into(),
            command: "sudo rm -rf /".into(),
            violation_reason: "command 'sudo' is explicitly blocked".into(),
            blocked: true,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"event\":\"security_violation\""));
        assert!(json.contains("\"blocked\":true"));
    }

    #[tokio::test]
    async fn disabled_logger_is_noop() {
        let config = AuditConfig {
            enabled: false,
            destination: "stdout".into(),
        };
        let logger = AuditLogger::from_config(&config).await.unwrap();
        logger.log_execution(&sample_result(), "system", None).await;
    }

    #[tokio::test]
    async fn file_destination_appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let config = AuditConfig {
            enabled: true,
            destination: path.display().to_string(),
        };
        let logger = AuditLogger::from_config(&config).await.unwrap();

        logger.log_execution(&sample_result(), "system", None).await;
        logger
            .log_violation("sudo rm", "command 'sudo' is explicitly blocked", "ops")
            .await;

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("\"event\":\"execution\""));
        assert!(content.contains("\"event\":\"security_violation\""));
    }

    #[tokio::test]
    async fn parent_directory_auto_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/audit.log");
        let config = AuditConfig {
            enabled: true,
            destination: path.display().to_string(),
        };
        let logger = AuditLogger::from_config(&config).await.unwrap();
        logger.log_violation("x", "y", "system").await;
        assert!(path.exists());
    }

    #[tokio::test]
    async fn concurrent_writers_never_interleave_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let config = AuditConfig {
            enabled: true,
            destination: path.display().to_string(),
        };
        let logger = std::sync::Arc::new(AuditLogger::from_config(&config).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..20 {
            let logger = logger.clone();
            handles.push(tokio::spawn(async move {
                logger
                    .log_violation(&format!("cmd{i}"), "blocked", "system")
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content.lines().count(), 20);
        for line in content.lines() {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(parsed["event"], "security_violation");
        }
    }

    #[tokio::test]
    async fn validation_message_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let config = AuditConfig {
            enabled: true,
            destination: path.display().to_string(),
        };
        let logger = AuditLogger::from_config(&config).await.unwrap();
        logger
            .log_execution(&sample_result(), "system", Some("suspicious but allowed"))
            .await;

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.contains("\"validation_passed\":false"));
        assert!(content.contains("suspicious but allowed"));
    }
}
