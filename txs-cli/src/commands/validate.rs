use crate::output::{self, Tone};

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use txs_engine::{plan, EngineError, TransactionsRequest};

/// Check a request file and print its execution plan without running it
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the request file (JSON or YAML)
    pub request: PathBuf,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let request_path = &args.request;

    if !request_path.exists() {
        color_eyre::eyre::bail!("Request file not found: {}", request_path.display());
    }

    output::action("Validating", &format!("{}", request_path.display()));

    let request = match TransactionsRequest::from_file(request_path) {
        Ok(request) => request,
        Err(e) => {
            output::error(&format!("Parse error: {}", e));
            std::process::exit(1);
        }
    };
    output::passed("Request syntax valid");
    output::passed(&format!(
        "Structure: {} groups, {} operations",
        request.transactions.len(),
        request.operation_count()
    ));

    let graph = match plan(&request) {
        Ok(graph) => graph,
        Err(EngineError::Request(e)) if !e.issues().is_empty() => {
            output::error(&format!("{} validation error(s):", e.issues().len()));
            for issue in e.issues() {
                output::error(&format!("  - [{}] {}", issue.path, issue.message));
            }
            std::process::exit(1);
        }
        Err(e) => {
            output::error(&format!("[{}] {}", e.kind(), e));
            std::process::exit(1);
        }
    };
    output::passed("Dependency graph is acyclic");

    eprintln!();
    output::request_header(&format!("Execution plan ({})", request.execution_mode));
    for group in graph.group_order() {
        output::group_header(
            &group.id,
            &group.execution_mode.to_string(),
            group.operations.len(),
        );
        if !group.dependencies.is_empty() {
            output::tinted(Tone::Muted, &format!("    after: {}", group.dependencies.join(", ")));
        }
        for (level, ops) in graph.parallel_operations(group).iter().enumerate() {
            let ids: Vec<&str> = ops.iter().map(|op| op.key.op_id.as_str()).collect();
            output::tinted(Tone::Plain, &format!("    level {}: {}", level, ids.join(", ")));
        }
    }

    eprintln!();
    output::verdict(true, "Request is valid");

    Ok(())
}
