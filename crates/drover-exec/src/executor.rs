use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::Command;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

use crate::audit::AuditLogger;
use crate::command::OpsCommand;
use crate::config::{AuditConfig, ExecutorConfig, SecurityConfig};
use crate::error::ExecError;
use crate::result::{CommandResult, SafetyLevel};
use crate::validator::SecurityValidator;

/// One command execution request.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub command: String,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub dry_run: bool,
    pub user: String,
}

impl ExecRequest {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: Duration::from_secs(300),
            working_dir: None,
            env: HashMap::new(),
            dry_run: false,
            user: "system".into(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    #[must_use]
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }
}

/// Validation and risk assessment of a command without executing it.
#[derive(Debug, Clone, Serialize)]
pub struct SafetyReport {
    pub command: String,
    pub generated_at: DateTime<Utc>,
    pub validation_passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_message: Option<String>,
    pub safety_level: SafetyLevel,
    pub risk_factors: Vec<String>,
    pub safe_to_execute: bool,
}

/// Snapshot of the active policy surface.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorStats {
    pub audit_enabled: bool,
    pub validation_enabled: bool,
    pub whitelist_enabled: bool,
    pub allowed_commands: usize,
    pub blocked_commands: usize,
    pub dangerous_patterns: usize,
}

/// Policy-checked command executor: validate, assess, run under timeout,
/// audit. Top-level `execute` calls are serialized by a single lock scoped
/// to that entry point; batch execution bypasses the lock and bounds
/// parallelism with its own semaphore.
#[derive(Debug)]
pub struct SecureCommandExecutor {
    validator: SecurityValidator,
    audit: AuditLogger,
    audit_enabled: bool,
    exec_lock: Mutex<()>,
    config: ExecutorConfig,
}

impl SecureCommandExecutor {
    /// Build an executor from policy, limits, and audit config.
    ///
    /// # Errors
    ///
    /// Returns an error when a dangerous-pattern regex does not compile or
    /// the audit sink cannot be opened.
    pub async fn new(
        security: SecurityConfig,
        config: ExecutorConfig,
        audit: &AuditConfig,
    ) -> Result<Self, ExecError> {
        let validator = SecurityValidator::new(security)?;
        let audit_enabled = audit.enabled;
        let audit = AuditLogger::from_config(audit).await?;
        Ok(Self {
            validator,
            audit,
            audit_enabled,
            exec_lock: Mutex::new(()),
            config,
        })
    }

    /// Execute a single command with full security validation.
    ///
    /// Timeouts and runtime failures come back as `CommandResult` values
    /// (exit 124 / -1); only policy rejections are errors.
    ///
    /// # Errors
    ///
    /// Returns `ExecError::SecurityViolation` when validation rejects the
    /// command. The violation is audited before returning.
    pub async fn execute(&self, req: &ExecRequest) -> Result<CommandResult, ExecError> {
        self.execute_gated(req, true).await
    }

    async fn execute_gated(
        &self,
        req: &ExecRequest,
        serialize: bool,
    ) -> Result<CommandResult, ExecError> {
        if let Err(rejection) = self.validator.validate(&req.command) {
            let reason = rejection.to_string();
            self.audit
                .log_violation(&req.command, &reason, &req.user)
                .await;
            return Err(ExecError::SecurityViolation {
                command: req.command.clone(),
                reason,
            });
        }

        let safety = self.validator.assess_safety(&req.command);

        if req.dry_run {
            return Ok(CommandResult::new(
                req.command.clone(),
                0,
                format!(
                    "dry run: would execute '{}' at safety level {safety}",
                    req.command
                ),
                String::new(),
                Duration::ZERO,
                safety,
            ));
        }

        tracing::debug!(command = %req.command, safety = %safety, "executing command");

        let result = if serialize {
            let _guard = self.exec_lock.lock().await;
            run_process(req, safety).await
        } else {
            run_process(req, safety).await
        };

        self.audit.log_execution(&result, &req.user, None).await;
        Ok(result)
    }

    /// Execute a structured command, honoring its confirmation flag and
    /// running its verification commands afterwards.
    ///
    /// Verification runs are advisory: they get a short fixed timeout and
    /// their failures are logged, never propagated.
    ///
    /// # Errors
    ///
    /// Returns `ExecError::Validation` for malformed structures,
    /// `ExecError::ConfirmationRequired` when confirmation is withheld, and
    /// `ExecError::SecurityViolation` for policy rejections.
    pub async fn execute_structured(
        &self,
        cmd: &OpsCommand,
        user: &str,
        force_execute: bool,
    ) -> Result<CommandResult, ExecError> {
        cmd.validate_structure(&self.validator)?;

        if cmd.requires_confirmation && !force_execute {
            self.audit
                .log_violation(&cmd.command, "confirmation required but not granted", user)
                .await;
            return Err(ExecError::ConfirmationRequired {
                command: cmd.command.clone(),
            });
        }

        let req = ExecRequest::new(&cmd.command)
            .with_timeout(Duration::from_secs(cmd.timeout_secs))
            .with_user(user);
        let result = self.execute(&req).await?;

        if result.success() {
            for vcmd in &cmd.verification_commands {
                let vreq = ExecRequest::new(vcmd)
                    .with_timeout(Duration::from_secs(self.config.verification_timeout_secs))
                    .with_user(user);
                match self.execute(&vreq).await {
                    Ok(vres) if !vres.success() => {
                        tracing::warn!(
                            command = %vcmd,
                            exit_code = vres.exit_code,
                            "verification command failed"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(command = %vcmd, "verification command rejected: {e}");
                    }
                    Ok(_) => {}
                }
            }
        }

        Ok(result)
    }

    /// Execute a batch of commands with bounded parallelism.
    ///
    /// Non-fail-fast: every command runs; the i-th result always corresponds
    /// to the i-th input, and errors become synthetic failed results. In
    /// fail-fast mode results arrive in completion order, the first failure
    /// aborts all unfinished work (awaiting termination), and only results
    /// collected up to and including the failure are returned.
    pub async fn execute_batch(
        self: &Arc<Self>,
        commands: &[String],
        fail_fast: bool,
        max_parallel: usize,
        user: &str,
    ) -> Vec<CommandResult> {
        if commands.is_empty() {
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(max_parallel.max(1)));
        let mut join_set = JoinSet::new();

        for (idx, command) in commands.iter().enumerate() {
            let executor = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let req = ExecRequest::new(command)
                .with_timeout(Duration::from_secs(self.config.timeout_secs))
                .with_user(user);
            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (idx, Ok(CommandResult::failed(&req.command, "batch aborted")));
                };
                (idx, executor.execute_gated(&req, false).await)
            });
        }

        if fail_fast {
            self.collect_fail_fast(&mut join_set, commands).await
        } else {
            Self::collect_all(&mut join_set, commands).await
        }
    }

    async fn collect_fail_fast(
        &self,
        join_set: &mut JoinSet<(usize, Result<CommandResult, ExecError>)>,
        commands: &[String],
    ) -> Vec<CommandResult> {
        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, Ok(result))) => {
                    let failed = !result.success();
                    results.push(result);
                    if failed {
                        join_set.shutdown().await;
                        break;
                    }
                }
                Ok((idx, Err(e))) => {
                    results.push(CommandResult::failed(&commands[idx], e.to_string()));
                    join_set.shutdown().await;
                    break;
                }
                Err(e) => {
                    tracing::error!("batch task failed to complete: {e}");
                    join_set.shutdown().await;
                    break;
                }
            }
        }
        results
    }

    async fn collect_all(
        join_set: &mut JoinSet<(usize, Result<CommandResult, ExecError>)>,
        commands: &[String],
    ) -> Vec<CommandResult> {
        let mut slots: Vec<Option<CommandResult>> = commands.iter().map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, Ok(result))) => slots[idx] = Some(result),
                Ok((idx, Err(e))) => {
                    slots[idx] = Some(CommandResult::failed(&commands[idx], e.to_string()));
                }
                Err(e) => tracing::error!("batch task failed to complete: {e}"),
            }
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.unwrap_or_else(|| {
                    CommandResult::failed(&commands[idx], "batch task did not complete")
                })
            })
            .collect()
    }

    /// Validate and assess a command without executing anything.
    #[must_use]
    pub fn test_safety(&self, command: &str) -> SafetyReport {
        let validation = self.validator.validate(command);
        let safety_level = self.validator.assess_safety(command);

        let mut risk_factors = Vec::new();
        if safety_level >= SafetyLevel::Moderate {
            risk_factors.push(format!("command classified as {safety_level}"));
        }
        if let Err(rejection) = &validation {
            risk_factors.push(format!("security validation failed: {rejection}"));
        }

        let validation_passed = validation.is_ok();
        SafetyReport {
            command: command.to_owned(),
            generated_at: Utc::now(),
            validation_passed,
            validation_message: validation.err().map(|r| r.to_string()),
            safety_level,
            risk_factors,
            safe_to_execute: validation_passed && safety_level != SafetyLevel::Dangerous,
        }
    }

    #[must_use]
    pub fn stats(&self) -> ExecutorStats {
        let config = self.validator.config();
        ExecutorStats {
            audit_enabled: self.audit_enabled,
            validation_enabled: config.validation_enabled,
            whitelist_enabled: config.whitelist_enabled,
            allowed_commands: config.allowed_commands.len(),
            blocked_commands: config.blocked_commands.len(),
            dangerous_patterns: self.validator.pattern_count(),
        }
    }

    #[must_use]
    pub fn validator(&self) -> &SecurityValidator {
        &self.validator
    }

    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }
}

/// Spawn `bash -c <command>` with merged environment and optional working
/// directory, drain stdout/stderr concurrently, and enforce the wall-clock
/// timeout. On expiry the child is killed and reaped before the timeout
/// result is built, so no zombie survives the call.
async fn run_process(req: &ExecRequest, safety: SafetyLevel) -> CommandResult {
    let started = Instant::now();

    let mut cmd = Command::new("bash");
    cmd.arg("-c")
        .arg(&req.command)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .envs(&req.env)
        .kill_on_drop(true);
    if let Some(dir) = &req.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return CommandResult::failed(&req.command, format!("failed to spawn command: {e}"));
        }
    };

    let stdout_task = tokio::spawn(drain(child.stdout.take()));
    let stderr_task = tokio::spawn(drain(child.stderr.take()));

    let status = match tokio::time::timeout(req.timeout, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            if let Err(e) = child.kill().await {
                tracing::error!(command = %req.command, "failed to kill timed-out process: {e}");
            }
            stdout_task.abort();
            stderr_task.abort();
            return CommandResult::timed_out(&req.command, started.elapsed(), req.timeout, safety);
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    match status {
        Ok(status) => CommandResult::new(
            req.command.clone(),
            status.code().unwrap_or(-1),
            stdout,
            stderr,
            started.elapsed(),
            safety,
        ),
        Err(e) => {
            CommandResult::failed(&req.command, format!("failed to wait for command: {e}"))
        }
    }
}

async fn drain<R>(stream: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;

    let Some(mut stream) = stream else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ActionKind;

    async fn executor() -> Arc<SecureCommandExecutor> {
        let audit = AuditConfig {
            enabled: false,
            destination: "stdout".into(),
        };
        Arc::new(
            SecureCommandExecutor::new(SecurityConfig::default(), ExecutorConfig::default(), &audit)
                .await
                .unwrap(),
        )
    }

    async fn executor_with_audit_file(path: &std::path::Path) -> Arc<SecureCommandExecutor> {
        let audit = AuditConfig {
            enabled: true,
            destination: path.display().to_string(),
        };
        Arc::new(
            SecureCommandExecutor::new(SecurityConfig::default(), ExecutorConfig::default(), &audit)
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn simple_command_succeeds() {
        let exec = executor().await;
        let result = exec.execute(&ExecRequest::new("echo hello")).await.unwrap();
        assert!(result.success());
        assert!(result.stdout.contains("hello"));
        assert_eq!(result.safety_level, SafetyLevel::Safe);
    }

    #[tokio::test]
    async fn stderr_captured_separately() {
        let exec = executor().await;
        let result = exec
            .execute(&ExecRequest::new("ls /path-that-does-not-exist-xyz"))
            .await
            .unwrap();
        assert!(!result.success());
        assert!(result.stdout.is_empty());
        assert!(!result.stderr.is_empty());
    }

    #[tokio::test]
    async fn blocked_command_raises_security_violation() {
        let exec = executor().await;
        let err = exec
            .execute(&ExecRequest::new("sudo apt install nginx"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::SecurityViolation { .. }));
    }

    #[tokio::test]
    async fn violation_is_audited_before_returning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let exec = executor_with_audit_file(&path).await;

        let _ = exec.execute(&ExecRequest::new("sudo ls")).await;

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.contains("\"event\":\"security_violation\""));
        assert!(content.contains("explicitly blocked"));
    }

    #[tokio::test]
    async fn execution_is_audited() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let exec = executor_with_audit_file(&path).await;

        exec.execute(&ExecRequest::new("echo audited"))
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.contains("\"event\":\"execution\""));
        assert!(content.contains("echo audited"));
    }

    #[tokio::test]
    async fn dry_run_never_spawns_a_process() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let exec = executor().await;

        let req = ExecRequest::new(format!("touch {}", marker.display())).dry_run();
        let result = exec.execute(&req).await.unwrap();

        assert!(result.success());
        assert!(result.stdout.contains("would execute"));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn timeout_kills_process_and_returns_124() {
        let exec = executor().await;
        let started = Instant::now();

        let req = ExecRequest::new("sleep 10").with_timeout(Duration::from_secs(1));
        let result = exec.execute(&req).await.unwrap();

        assert_eq!(result.exit_code, 124);
        assert!(result.timed_out_result());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(result.stderr.contains("timed out"));
        assert!(result.stderr.contains("limit 1s"));
    }

    #[tokio::test]
    async fn env_overrides_are_merged() {
        let exec = executor().await;
        let mut env = HashMap::new();
        env.insert("DROVER_TEST_VAR".to_owned(), "zig".to_owned());

        let req = ExecRequest::new("echo value=$DROVER_TEST_VAR").with_env(env);
        let result = exec.execute(&req).await.unwrap();
        assert!(result.stdout.contains("value=zig"));
    }

    #[tokio::test]
    async fn working_dir_is_honored() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor().await;

        let req = ExecRequest::new("pwd").with_working_dir(dir.path());
        let result = exec.execute(&req).await.unwrap();
        let name = dir.path().file_name().unwrap().to_string_lossy();
        assert!(result.stdout.contains(name.as_ref()));
    }

    #[tokio::test]
    async fn spawn_failure_becomes_failed_result() {
        let exec = executor().await;
        let req = ExecRequest::new("pwd").with_working_dir("/no/such/dir/anywhere");
        let result = exec.execute(&req).await.unwrap();
        assert_eq!(result.exit_code, -1);
        assert!(result.stderr.contains("failed to spawn"));
    }

    // --- structured commands ---

    #[tokio::test]
    async fn structured_confirmation_required() {
        let exec = executor().await;
        let mut cmd = OpsCommand::new(ActionKind::Restart, "ls -la", "list files");
        cmd.requires_confirmation = true;

        let err = exec.execute_structured(&cmd, "ops", false).await.unwrap_err();
        assert!(matches!(err, ExecError::ConfirmationRequired { .. }));

        let result = exec.execute_structured(&cmd, "ops", true).await.unwrap();
        assert!(result.success());
    }

    #[tokio::test]
    async fn structured_verification_failure_is_advisory() {
        let exec = executor().await;
        let mut cmd = OpsCommand::new(ActionKind::Diagnose, "echo primary", "primary step");
        cmd.verification_commands = vec!["ls /missing-verification-path".into()];

        let result = exec.execute_structured(&cmd, "system", false).await.unwrap();
        assert!(result.success());
        assert!(result.stdout.contains("primary"));
    }

    #[tokio::test]
    async fn structured_malformed_rejected_before_execution() {
        let exec = executor().await;
        let cmd = OpsCommand::new(ActionKind::Deploy, "", "deploy something");
        let err = exec.execute_structured(&cmd, "system", true).await.unwrap_err();
        assert!(matches!(err, ExecError::Validation { .. }));
    }

    // --- batch execution ---

    #[tokio::test]
    async fn batch_results_match_input_order() {
        let exec = executor().await;
        let commands = vec![
            "sleep 0.3".to_owned(),
            "echo fast".to_owned(),
            "sleep 0.1".to_owned(),
        ];
        let results = exec.execute_batch(&commands, false, 3, "system").await;

        assert_eq!(results.len(), 3);
        for (result, command) in results.iter().zip(&commands) {
            assert_eq!(&result.command, command);
            assert!(result.success());
        }
    }

    #[tokio::test]
    async fn batch_rejected_command_becomes_synthetic_failure() {
        let exec = executor().await;
        let commands = vec![
            "echo ok".to_owned(),
            "sudo ls".to_owned(),
            "echo also-ok".to_owned(),
        ];
        let results = exec.execute_batch(&commands, false, 2, "system").await;

        assert_eq!(results.len(), 3);
        assert!(results[0].success());
        assert_eq!(results[1].exit_code, -1);
        assert!(results[1].stderr.contains("blocked"));
        assert!(results[2].success());
    }

    #[tokio::test]
    async fn batch_runs_in_parallel() {
        let exec = executor().await;
        let commands = vec![
            "sleep 0.4".to_owned(),
            "sleep 0.4".to_owned(),
            "sleep 0.4".to_owned(),
        ];
        let started = Instant::now();
        let results = exec.execute_batch(&commands, false, 3, "system").await;
        assert_eq!(results.len(), 3);
        // Serial execution would take 1.2s; the semaphore admits all three.
        assert!(started.elapsed() < Duration::from_millis(1100));
    }

    #[tokio::test]
    async fn fail_fast_cancels_remaining_work() {
        let exec = executor().await;
        let commands = vec![
            "false".to_owned(),
            "sleep 5".to_owned(),
            "sleep 5".to_owned(),
        ];
        let started = Instant::now();
        let results = exec.execute_batch(&commands, true, 3, "system").await;

        assert!(results.iter().any(|r| !r.success()));
        assert!(results.len() <= 3);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn fail_fast_all_success_returns_everything() {
        let exec = executor().await;
        let commands = vec!["echo a".to_owned(), "echo b".to_owned()];
        let results = exec.execute_batch(&commands, true, 2, "system").await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(CommandResult::success));
    }

    #[tokio::test]
    async fn empty_batch_returns_empty() {
        let exec = executor().await;
        let results = exec.execute_batch(&[], true, 3, "system").await;
        assert!(results.is_empty());
    }

    // --- safety reports ---

    #[tokio::test]
    async fn test_safety_flags_dangerous_commands() {
        let exec = executor().await;
        let report = exec.test_safety("rm -rf /tmp/x");
        assert!(!report.safe_to_execute);
        assert_eq!(report.safety_level, SafetyLevel::Dangerous);
        assert!(!report.validation_passed);
        assert!(!report.risk_factors.is_empty());
    }

    #[tokio::test]
    async fn test_safety_accepts_read_only_commands() {
        let exec = executor().await;
        let report = exec.test_safety("ls -la");
        assert!(report.safe_to_execute);
        assert!(report.validation_passed);
        assert_eq!(report.safety_level, SafetyLevel::Safe);
        assert!(report.risk_factors.is_empty());
    }

    #[tokio::test]
    async fn test_safety_is_idempotent() {
        let exec = executor().await;
        let first = exec.test_safety("docker ps");
        let second = exec.test_safety("docker ps");
        assert_eq!(first.validation_passed, second.validation_passed);
        assert_eq!(first.safety_level, second.safety_level);
        assert_eq!(first.risk_factors, second.risk_factors);
        assert_eq!(first.safe_to_execute, second.safe_to_execute);
    }

    #[tokio::test]
    async fn stats_reflect_policy() {
        let exec = executor().await;
        let stats = exec.stats();
        assert!(stats.validation_enabled);
        assert!(!stats.whitelist_enabled);
        assert_eq!(stats.blocked_commands, 4);
        assert_eq!(stats.dangerous_patterns, 3);
    }
}
