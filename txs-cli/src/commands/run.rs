use crate::commands::ExecutorArgs;
use crate::config::CliConfig;
use crate::output::{self, Tone};

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use color_eyre::Result;
use uuid::Uuid;

use txs_engine::execution::LogLevel;
use txs_engine::{
    memory_registry, progress_channel, ExecutionEvent, MemoryPersistence, RequestContext,
    ResponseStatus, TransactionExecutor, TransactionsRequest,
};

/// Execute a request file against a fresh in-memory store
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the request file (JSON or YAML)
    pub request: PathBuf,

    /// Acting user (default: a fresh id)
    #[arg(long, short = 'u', value_name = "UUID")]
    pub user: Option<Uuid>,

    /// Create this organization with the acting user as its only member
    #[arg(long, value_name = "UUID")]
    pub org: Option<Uuid>,

    #[command(flatten)]
    pub executor: ExecutorArgs,

    /// Print only the JSON response
    #[arg(long, short = 'q')]
    pub quiet: bool,
}

pub async fn execute(args: RunArgs, config: CliConfig) -> Result<()> {
    let request_path = &args.request;

    if !request_path.exists() {
        color_eyre::eyre::bail!("Request file not found: {}", request_path.display());
    }

    if !args.quiet {
        output::action("Loading", &format!("{}", request_path.display()));
    }
    let request = TransactionsRequest::from_file(request_path)?;

    let user = args.user.unwrap_or_else(Uuid::new_v4);
    let store = MemoryPersistence::new();
    config.seed(&store);
    if let Some(org) = args.org {
        store.add_organization(org, [user]);
    }

    if !args.quiet {
        output::note(&format!(
            "{} groups, {} operations, acting user {}",
            request.transactions.len(),
            request.operation_count(),
            user
        ));
    }

    let mut executor = TransactionExecutor::new(Arc::new(store), memory_registry())
        .with_config(args.executor.apply(config.executor));

    let (tx, mut rx) = progress_channel();
    if !args.quiet {
        executor = executor.with_progress(tx);
    } else {
        drop(tx);
    }

    // Spawn execution in background
    let context = RequestContext::new(user);
    let exec_handle =
        tokio::spawn(async move { executor.execute_transactions(request, context).await });

    // Process events in the foreground
    while let Some(event) = rx.recv().await {
        print_event(&event);
    }

    let response = exec_handle.await?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if response.status != ResponseStatus::Success {
        std::process::exit(1);
    }

    Ok(())
}

fn print_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::RequestStarted {
            execution_mode,
            total_groups,
            total_operations,
        } => {
            eprintln!();
            output::request_header(&format!(
                "Request ({}, {} groups, {} operations)",
                execution_mode, total_groups, total_operations
            ));
        }

        ExecutionEvent::RequestRejected { kind, message } => {
            output::error(&format!("request rejected [{}]: {}", kind, message));
        }

        ExecutionEvent::RequestCompleted { status, duration } => {
            eprintln!();
            output::request_summary(*status, *duration);
        }

        ExecutionEvent::GroupStarted {
            tx_id,
            execution_mode,
            total_operations,
        } => {
            output::group_header(tx_id, &execution_mode.to_string(), *total_operations);
        }

        ExecutionEvent::GroupCommitted { tx_id, duration } => {
            output::tinted(Tone::Good, &format!(
                "  Group '{}' committed ({:.2}s)",
                tx_id,
                duration.as_secs_f64()
            ));
        }

        ExecutionEvent::GroupRolledBack {
            tx_id,
            reason,
            duration,
        } => {
            output::tinted(Tone::Bad, &format!(
                "  Group '{}' rolled back ({:.2}s): {}",
                tx_id,
                duration.as_secs_f64(),
                reason
            ));
        }

        ExecutionEvent::GroupSkipped { tx_id, reason } => {
            output::warn(&format!("  Group '{}' skipped: {}", tx_id, reason));
        }

        ExecutionEvent::OperationStarted {
            op_id,
            verb,
            domain_object,
            ..
        } => {
            output::tinted(Tone::Plain, &format!("    [{}] {} {}", op_id, verb, domain_object));
        }

        ExecutionEvent::OperationCompleted {
            op_id,
            status,
            error,
            duration,
            ..
        } => {
            output::operation_result(op_id, *status, *duration, error.as_deref());
        }

        ExecutionEvent::Log { level, message, .. } => match level {
            LogLevel::Error => output::error(message),
            LogLevel::Warning => output::warn(message),
        },
    }
}
