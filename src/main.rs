use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use drover_core::Config;
use drover_exec::{ExecError, ExecRequest, SecureCommandExecutor};
use drover_llm::OllamaGenerator;
use drover_router::{CommandOutcome, CommandRouter, RouterConfig};

#[derive(Parser)]
#[command(name = "drover", version, about = "DevOps command orchestration")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "drover.toml")]
    config: PathBuf,

    /// Emit raw JSON instead of formatted text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Route a command to agent, core, or hybrid execution.
    Run {
        command: String,
        args: Vec<String>,
        /// Target agent name.
        #[arg(long, default_value = "local")]
        target: String,
        /// Agent-reply timeout in seconds (core execution uses its own).
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Execute a shell command directly through the secure executor.
    Exec {
        command: String,
        /// Validate and report without spawning a process.
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        timeout_secs: Option<u64>,
        #[arg(long, default_value = "system")]
        user: String,
    },
    /// Validate and assess a command without executing it.
    Check { command: String },
    /// Execute a batch of commands from a file, one per line.
    Batch {
        file: PathBuf,
        /// Abort remaining commands on the first failure.
        #[arg(long)]
        fail_fast: bool,
        #[arg(long)]
        max_parallel: Option<usize>,
    },
    /// List supported commands grouped by execution location.
    Supported,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    tracing::debug!(config = %cli.config.display(), "configuration loaded");

    let executor = Arc::new(
        SecureCommandExecutor::new(
            config.security.clone(),
            config.executor.clone(),
            &config.audit,
        )
        .await
        .context("failed to build command executor")?,
    );

    let code = match cli.command {
        CliCommand::Run {
            command,
            args,
            target,
            timeout_secs,
        } => {
            run_routed(
                &config,
                Arc::clone(&executor),
                &command,
                &args,
                &target,
                timeout_secs,
                cli.json,
            )
            .await
        }
        CliCommand::Exec {
            command,
            dry_run,
            timeout_secs,
            user,
        } => run_direct(&config, &executor, &command, dry_run, timeout_secs, &user, cli.json).await,
        CliCommand::Check { command } => {
            let report = executor.test_safety(&command);
            println!("{}", serde_json::to_string_pretty(&report)?);
            i32::from(!report.safe_to_execute)
        }
        CliCommand::Batch {
            file,
            fail_fast,
            max_parallel,
        } => run_batch(&config, &executor, &file, fail_fast, max_parallel, cli.json).await?,
        CliCommand::Supported => {
            let router: CommandRouter<OllamaGenerator> =
                CommandRouter::new(Arc::clone(&executor), config.router.clone());
            println!(
                "{}",
                serde_json::to_string_pretty(&router.supported_commands())?
            );
            0
        }
    };

    std::process::exit(code);
}

#[allow(clippy::too_many_arguments)]
async fn run_routed(
    config: &Config,
    executor: Arc<SecureCommandExecutor>,
    command: &str,
    args: &[String],
    target: &str,
    timeout_secs: Option<u64>,
    json: bool,
) -> i32 {
    let router_config: RouterConfig = config.router.clone();
    let mut router: CommandRouter<OllamaGenerator> =
        CommandRouter::new(executor, router_config.clone());
    if config.llm.enabled {
        router = router
            .with_generator(OllamaGenerator::new(&config.llm.base_url, config.llm.model.clone()));
    }

    let timeout = Duration::from_secs(timeout_secs.unwrap_or(router_config.agent_timeout_secs));
    let outcome = router.execute(command, args, target, timeout).await;
    router.shutdown().await;

    print_outcome(&outcome, json);
    exit_code_for(outcome.return_code)
}

async fn run_direct(
    config: &Config,
    executor: &SecureCommandExecutor,
    command: &str,
    dry_run: bool,
    timeout_secs: Option<u64>,
    user: &str,
    json: bool,
) -> i32 {
    let mut req = ExecRequest::new(command)
        .with_timeout(Duration::from_secs(
            timeout_secs.unwrap_or(config.executor.timeout_secs),
        ))
        .with_user(user);
    if dry_run {
        req = req.dry_run();
    }

    match executor.execute(&req).await {
        Ok(result) => {
            if json {
                match serde_json::to_string_pretty(&result) {
                    Ok(rendered) => println!("{rendered}"),
                    Err(e) => eprintln!("failed to render result: {e}"),
                }
            } else {
                if !result.stdout.is_empty() {
                    print!("{}", result.stdout);
                    if !result.stdout.ends_with('\n') {
                        println!();
                    }
                }
                if !result.stderr.is_empty() {
                    eprintln!("{}", result.stderr);
                }
            }
            exit_code_for(result.exit_code)
        }
        Err(e @ (ExecError::SecurityViolation { .. } | ExecError::ConfirmationRequired { .. })) => {
            eprintln!("{e}");
            2
        }
        Err(e) => {
            eprintln!("{e}");
            1
        }
    }
}

async fn run_batch(
    config: &Config,
    executor: &Arc<SecureCommandExecutor>,
    file: &PathBuf,
    fail_fast: bool,
    max_parallel: Option<usize>,
    json: bool,
) -> anyhow::Result<i32> {
    let content = std::fs::read_to_string(file).context("failed to read batch file")?;
    let commands: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect();

    let results = executor
        .execute_batch(
            &commands,
            fail_fast,
            max_parallel.unwrap_or(config.executor.max_parallel),
            "batch",
        )
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for result in &results {
            let marker = if result.success() { "ok " } else { "FAIL" };
            println!("[{marker}] ({:>4}) {}", result.exit_code, result.command);
        }
        println!(
            "{}/{} succeeded",
            results.iter().filter(|r| r.success()).count(),
            results.len()
        );
    }

    Ok(i32::from(!results.iter().all(drover_exec::CommandResult::success)))
}

fn print_outcome(outcome: &CommandOutcome, json: bool) {
    if json {
        match serde_json::to_string_pretty(outcome) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => eprintln!("failed to render outcome: {e}"),
        }
        return;
    }

    if let Some(reason) = &outcome.fallback_reason {
        eprintln!("note: fell back to core execution ({reason})");
    }
    if let Some(note) = &outcome.processing_note {
        eprintln!("note: {note}");
    }
    if !outcome.stdout.is_empty() {
        print!("{}", outcome.stdout);
        if !outcome.stdout.ends_with('\n') {
            println!();
        }
    }
    if !outcome.stderr.is_empty() {
        eprintln!("{}", outcome.stderr);
    }
}

/// Clamp an execution return code into the valid process exit range,
/// preserving the conventional 124 timeout code.
fn exit_code_for(return_code: i32) -> i32 {
    match return_code {
        0 => 0,
        code @ 1..=255 => code,
        _ => 1,
    }
}
