use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use drover_exec::{ExecRequest, SecureCommandExecutor, TIMEOUT_EXIT_CODE};
use drover_llm::TextGenerator;

use crate::capability::{AgentCapabilities, authorize};
use crate::classify::{CommandClassifier, ExecutionLocation, SupportedCommands};
use crate::config::RouterConfig;
use crate::error::RouterError;
use crate::format::format_agent_output;
use crate::kv::{KvStore, MemoryKv};
use crate::protocol::AgentEnvelope;
use crate::registry::{AgentTx, ConnectionRegistry};
use crate::status::{CommandStatus, ExecutionStatus, StatusBoard};

const ENRICH_SYSTEM_PROMPT: &str =
    "You are a DevOps analysis assistant. Summarize findings and flag anomalies concisely.";

/// Result envelope returned for every routed command. The router is a
/// boundary: it never lets an error cross to the caller as anything but
/// one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub success: bool,
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub command: String,
    pub target: String,
    /// "agent", "core", "hybrid", "core-fallback", or "error".
    pub execution_location: String,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_note: Option<String>,
}

impl CommandOutcome {
    pub(crate) fn failure(
        command: &str,
        target: &str,
        request_id: &str,
        location: &str,
        return_code: i32,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            return_code,
            stdout: String::new(),
            stderr: stderr.into(),
            command: command.to_owned(),
            target: target.to_owned(),
            execution_location: location.to_owned(),
            request_id: request_id.to_owned(),
            timestamp: Utc::now(),
            fallback_reason: None,
            processing_note: None,
        }
    }
}

/// Stateful coordinator for agent/core/hybrid command dispatch.
///
/// Owns the connection registry, the execution-status board, and the
/// tracked cleanup tasks that evict finished statuses after a retention
/// window.
pub struct CommandRouter<G, K = MemoryKv> {
    executor: Arc<SecureCommandExecutor>,
    classifier: CommandClassifier,
    generator: Option<G>,
    registry: ConnectionRegistry,
    status: Arc<StatusBoard>,
    cleanup: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    shutdown_token: CancellationToken,
    cache: Option<Arc<K>>,
    config: RouterConfig,
}

impl<G: TextGenerator> CommandRouter<G, MemoryKv> {
    #[must_use]
    pub fn new(executor: Arc<SecureCommandExecutor>, config: RouterConfig) -> Self {
        Self {
            executor,
            classifier: CommandClassifier::new(),
            generator: None,
            registry: ConnectionRegistry::new(),
            status: Arc::new(StatusBoard::new()),
            cleanup: Arc::new(Mutex::new(HashMap::new())),
            shutdown_token: CancellationToken::new(),
            cache: None,
            config,
        }
    }
}

impl<G, K> CommandRouter<G, K>
where
    G: TextGenerator,
    K: KvStore,
{
    #[must_use]
    pub fn with_generator(mut self, generator: G) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Attach an external key-value store for best-effort outcome caching.
    #[must_use]
    pub fn with_cache<K2: KvStore>(self, cache: Arc<K2>) -> CommandRouter<G, K2> {
        CommandRouter {
            executor: self.executor,
            classifier: self.classifier,
            generator: self.generator,
            registry: self.registry,
            status: self.status,
            cleanup: self.cleanup,
            shutdown_token: self.shutdown_token,
            cache: Some(cache),
            config: self.config,
        }
    }

    /// Route and execute one command, returning a result envelope.
    ///
    /// `timeout` bounds the agent-reply wait; the core path runs under its
    /// own fixed timeout from the router config.
    pub async fn execute(
        &self,
        command: &str,
        args: &[String],
        target: &str,
        timeout: Duration,
    ) -> CommandOutcome {
        let request_id = Uuid::new_v4().to_string();
        let classification = self.classifier.classify(command, args);
        tracing::info!(
            command,
            ?args,
            target,
            location = %classification.location,
            %request_id,
            "routing command"
        );

        self.status
            .insert_pending(&request_id, command, target, classification.location)
            .await;

        let dispatched = AssertUnwindSafe(self.dispatch(
            classification.location,
            command,
            args,
            target,
            &request_id,
            timeout,
        ))
        .catch_unwind()
        .await;

        let outcome = dispatched.unwrap_or_else(|_| {
            tracing::error!(%request_id, "command dispatch panicked");
            CommandOutcome::failure(
                command,
                target,
                &request_id,
                "error",
                1,
                "internal routing failure",
            )
        });

        let final_status = if outcome.return_code == TIMEOUT_EXIT_CODE {
            CommandStatus::Timeout
        } else if outcome.success {
            CommandStatus::Completed
        } else {
            CommandStatus::Failed
        };
        self.status.finish(&request_id, final_status).await;

        self.cache_outcome(&outcome).await;
        self.schedule_cleanup(&request_id).await;

        outcome
    }

    async fn dispatch(
        &self,
        location: ExecutionLocation,
        command: &str,
        args: &[String],
        target: &str,
        request_id: &str,
        timeout: Duration,
    ) -> CommandOutcome {
        match location {
            ExecutionLocation::Agent => {
                self.execute_on_agent(command, args, target, request_id, timeout)
                    .await
            }
            ExecutionLocation::Hybrid => {
                self.execute_hybrid(command, args, target, request_id, timeout)
                    .await
            }
            ExecutionLocation::Core => {
                let mut outcome = self.execute_on_core(command, args, target, request_id).await;
                // The plain core path is always stamped "core", even when the
                // inner runner reported an error.
                outcome.execution_location = "core".into();
                outcome
            }
        }
    }

    async fn execute_on_agent(
        &self,
        command: &str,
        args: &[String],
        target: &str,
        request_id: &str,
        timeout: Duration,
    ) -> CommandOutcome {
        self.status
            .set_status(request_id, CommandStatus::Executing)
            .await;
        self.status
            .set_step(request_id, "sending command to agent")
            .await;

        if !self.registry.is_connected(target).await {
            return self
                .fallback_to_core(
                    command,
                    args,
                    target,
                    request_id,
                    format!("agent '{target}' is not connected"),
                )
                .await;
        }

        if let Some(caps) = self.registry.capabilities(target).await
            && !authorize(command, &caps)
        {
            return self
                .fallback_to_core(
                    command,
                    args,
                    target,
                    request_id,
                    format!("agent '{target}' does not support module '{command}'"),
                )
                .await;
        }

        let envelope = AgentEnvelope::CommandRequest {
            request_id: request_id.to_owned(),
            command: command.to_owned(),
            args: args.to_vec(),
            timeout_secs: timeout.as_secs(),
        };

        let receiver = match self.registry.send_request(target, envelope).await {
            Ok(rx) => rx,
            Err(RouterError::NotConnected(_)) => {
                return self
                    .fallback_to_core(
                        command,
                        args,
                        target,
                        request_id,
                        format!("agent '{target}' is not connected"),
                    )
                    .await;
            }
            Err(e) => {
                return CommandOutcome::failure(
                    command,
                    target,
                    request_id,
                    "agent",
                    1,
                    format!("agent dispatch failed: {e}"),
                );
            }
        };

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(AgentEnvelope::CommandResult {
                success,
                return_code,
                stdout,
                stderr,
                agent_data,
                ..
            })) => {
                let rendered = if success {
                    agent_data.as_ref().map_or(stdout, |data| {
                        format_agent_output(command, args.first().map(String::as_str), data)
                    })
                } else {
                    stdout
                };
                CommandOutcome {
                    success,
                    return_code,
                    stdout: rendered,
                    stderr,
                    command: command.to_owned(),
                    target: target.to_owned(),
                    execution_location: "agent".into(),
                    request_id: request_id.to_owned(),
                    timestamp: Utc::now(),
                    fallback_reason: None,
                    processing_note: None,
                }
            }
            Ok(Ok(other)) => CommandOutcome::failure(
                command,
                target,
                request_id,
                "agent",
                1,
                format!("unexpected reply from agent: {}", other.request_id()),
            ),
            Ok(Err(_)) => CommandOutcome::failure(
                command,
                target,
                request_id,
                "agent",
                1,
                format!("agent '{target}' disconnected before replying"),
            ),
            Err(_) => {
                self.registry.cancel_pending(request_id).await;
                CommandOutcome::failure(
                    command,
                    target,
                    request_id,
                    "agent",
                    TIMEOUT_EXIT_CODE,
                    format!(
                        "command timed out after {}s waiting for agent '{target}'",
                        timeout.as_secs()
                    ),
                )
            }
        }
    }

    async fn fallback_to_core(
        &self,
        command: &str,
        args: &[String],
        target: &str,
        request_id: &str,
        reason: String,
    ) -> CommandOutcome {
        tracing::info!(agent = target, %reason, "falling back to core execution");
        self.status
            .set_step(request_id, "falling back to core execution")
            .await;

        let mut outcome = self.execute_on_core(command, args, target, request_id).await;
        outcome.execution_location = "core-fallback".into();
        outcome.fallback_reason = Some(reason);
        outcome
    }

    async fn execute_on_core(
        &self,
        command: &str,
        args: &[String],
        target: &str,
        request_id: &str,
    ) -> CommandOutcome {
        self.status
            .set_status(request_id, CommandStatus::Executing)
            .await;
        self.status.set_step(request_id, "executing on core").await;

        if command == "ai" {
            return self.answer_with_generator(command, args, target, request_id).await;
        }

        let Some(local) = core_command_for(command, args) else {
            return CommandOutcome::failure(
                command,
                target,
                request_id,
                "core",
                1,
                format!(
                    "no core execution available for '{command} {}'",
                    args.join(" ")
                ),
            );
        };

        let req = ExecRequest::new(&local)
            .with_timeout(Duration::from_secs(self.config.core_timeout_secs))
            .with_user("router");

        match self.executor.execute(&req).await {
            Ok(result) => CommandOutcome {
                success: result.success(),
                return_code: result.exit_code,
                stdout: result.stdout,
                stderr: result.stderr,
                command: command.to_owned(),
                target: target.to_owned(),
                execution_location: "core".into(),
                request_id: request_id.to_owned(),
                timestamp: Utc::now(),
                fallback_reason: None,
                processing_note: None,
            },
            Err(e) => CommandOutcome::failure(
                command,
                target,
                request_id,
                "core",
                1,
                format!("core execution blocked: {e}"),
            ),
        }
    }

    async fn answer_with_generator(
        &self,
        command: &str,
        args: &[String],
        target: &str,
        request_id: &str,
    ) -> CommandOutcome {
        let Some(generator) = &self.generator else {
            return CommandOutcome::failure(
                command,
                target,
                request_id,
                "core",
                1,
                "no text generator configured",
            );
        };

        let question = args.iter().skip(1).cloned().collect::<Vec<_>>().join(" ");
        if question.is_empty() {
            return CommandOutcome::failure(
                command,
                target,
                request_id,
                "core",
                1,
                "usage: ai ask <question>",
            );
        }

        match generator
            .generate(
                &question,
                Some(ENRICH_SYSTEM_PROMPT),
                self.config.enrichment_max_tokens,
            )
            .await
        {
            Ok(answer) => CommandOutcome {
                success: true,
                return_code: 0,
                stdout: answer,
                stderr: String::new(),
                command: command.to_owned(),
                target: target.to_owned(),
                execution_location: "core".into(),
                request_id: request_id.to_owned(),
                timestamp: Utc::now(),
                fallback_reason: None,
                processing_note: None,
            },
            Err(e) => CommandOutcome::failure(
                command,
                target,
                request_id,
                "core",
                1,
                format!("text generation unavailable: {e}"),
            ),
        }
    }

    async fn execute_hybrid(
        &self,
        command: &str,
        args: &[String],
        target: &str,
        request_id: &str,
        timeout: Duration,
    ) -> CommandOutcome {
        self.status
            .set_step(request_id, "collecting data from agent")
            .await;

        let (collect_command, collect_args) = hybrid_collection_plan(command, args);
        let collected = self
            .execute_on_agent(&collect_command, &collect_args, target, request_id, timeout)
            .await;

        if !collected.success {
            return collected;
        }

        self.status
            .set_step(request_id, "enriching collected data")
            .await;

        let mut outcome = collected;
        outcome.execution_location = "hybrid".into();

        let Some(generator) = &self.generator else {
            outcome.processing_note =
                Some("data collected from agent; enrichment unavailable".into());
            return outcome;
        };

        let prompt = format!(
            "Analyze this output of '{command} {}' collected from agent '{target}' and summarize findings:\n\n{}",
            args.join(" "),
            outcome.stdout
        );

        match generator
            .generate(
                &prompt,
                Some(ENRICH_SYSTEM_PROMPT),
                self.config.enrichment_max_tokens,
            )
            .await
        {
            Ok(analysis) => {
                outcome.stdout = format!("{}\n\nAnalysis:\n{analysis}", outcome.stdout);
            }
            Err(e) => {
                // Never lose already-collected data because enrichment failed.
                tracing::warn!("enrichment failed, returning raw collected data: {e}");
                outcome.processing_note =
                    Some("data collected from agent; enrichment unavailable".into());
            }
        }

        outcome
    }

    async fn cache_outcome(&self, outcome: &CommandOutcome) {
        let Some(cache) = &self.cache else { return };
        if let Ok(value) = serde_json::to_value(outcome) {
            cache
                .set(
                    &format!("outcome:{}", outcome.request_id),
                    value,
                    Some(Duration::from_secs(self.config.status_retention_secs)),
                )
                .await;
        }
    }

    /// Last known outcome for a request id, when a cache is attached.
    pub async fn cached_outcome(&self, request_id: &str) -> Option<serde_json::Value> {
        let cache = self.cache.as_ref()?;
        cache.get(&format!("outcome:{request_id}")).await
    }

    async fn schedule_cleanup(&self, request_id: &str) {
        let retention = Duration::from_secs(self.config.status_retention_secs);
        let token = self.shutdown_token.child_token();
        let status = Arc::clone(&self.status);
        let cleanup = Arc::clone(&self.cleanup);
        let id = request_id.to_owned();

        let mut map = self.cleanup.lock().await;
        let handle = tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(retention) => {
                    status.remove(&id).await;
                }
            }
            cleanup.lock().await.remove(&id);
        });
        map.insert(request_id.to_owned(), handle);
    }

    /// Cancel all outstanding cleanup timers and wait for them to stop.
    /// Retained status entries are left in place.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        let handles: Vec<(String, JoinHandle<()>)> = {
            let mut map = self.cleanup.lock().await;
            map.drain().collect()
        };
        for (_, handle) in handles {
            let _ = handle.await;
        }
        tracing::debug!("router shutdown complete");
    }

    pub async fn register_agent(
        &self,
        name: &str,
        outbound: AgentTx,
        capabilities: Option<AgentCapabilities>,
    ) {
        self.registry.register(name, outbound, capabilities).await;
    }

    pub async fn unregister_agent(&self, name: &str) {
        self.registry.unregister(name).await;
    }

    pub async fn connected_agents(&self) -> Vec<String> {
        self.registry.connected_agents().await
    }

    /// Feed an inbound agent message back into the router: command results
    /// resolve pending requests, status updates refresh the status board.
    pub async fn handle_agent_reply(&self, envelope: AgentEnvelope) -> bool {
        match envelope {
            AgentEnvelope::StatusUpdate {
                request_id,
                progress_percent,
                current_step,
            } => {
                self.status
                    .set_progress(&request_id, progress_percent, current_step)
                    .await;
                true
            }
            reply @ AgentEnvelope::CommandResult { .. } => self.registry.resolve(reply).await,
            other => {
                tracing::debug!(
                    request_id = other.request_id(),
                    "ignoring unexpected agent message"
                );
                false
            }
        }
    }

    pub async fn execution_status(&self, request_id: &str) -> Option<ExecutionStatus> {
        self.status.get(request_id).await
    }

    #[must_use]
    pub fn supported_commands(&self) -> SupportedCommands {
        self.classifier.supported_commands()
    }

    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }
}

/// Local shell equivalents for core-executed commands. Modules with no
/// local rendition (infrastructure, incidents, workflows, agents) are
/// reported as unavailable rather than guessed at.
fn core_command_for(command: &str, args: &[String]) -> Option<String> {
    let sub = args.first().map(String::as_str);
    let mapped = match (command, sub) {
        ("health", Some("disk" | "check-disk-usage" | "check-disk-status")) => "df -h",
        ("health", Some("cpu-memory" | "check-cpu-memory")) => "free -m",
        ("health", Some("network" | "check-network")) => "ss -s",
        ("health", Some("processes" | "list-processes")) => "ps aux",
        ("health", Some("monitor")) => "top -bn1",
        ("health", Some("system-health") | None) => "uptime",
        ("system", Some("info" | "system-info" | "get-system-info")) => "uname -a",
        ("system", Some("environment" | "show-environment")) => "env",
        ("logs", Some("read-local")) => "tail -n 100 /var/log/syslog",
        _ => return None,
    };
    Some(mapped.to_owned())
}

/// Map a hybrid command to the agent-side collection it needs first.
fn hybrid_collection_plan(command: &str, args: &[String]) -> (String, Vec<String>) {
    match (command, args.first().map(String::as_str)) {
        ("logs", Some("analyze")) => {
            let mut collect = vec!["read-local".to_owned()];
            collect.extend(args.iter().skip(1).cloned());
            ("logs".to_owned(), collect)
        }
        ("health", Some("analyze")) => ("health".to_owned(), vec!["system-health".to_owned()]),
        _ => ("system".to_owned(), vec!["info".to_owned()]),
    }
}
