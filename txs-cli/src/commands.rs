pub mod run;
pub mod serve;
pub mod validate;

use clap::Args;
use txs_engine::ExecutorConfig;

/// Executor limits that override the configuration file
#[derive(Args, Debug, Default)]
pub struct ExecutorArgs {
    /// Maximum transaction groups running at once (0 = unlimited)
    #[arg(long, value_name = "N")]
    pub max_parallel_groups: Option<usize>,

    /// Maximum operations running at once per request (0 = unlimited)
    #[arg(long, value_name = "N")]
    pub max_parallel_operations: Option<usize>,

    /// Per-operation handler timeout
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// In serial mode, skip every group after the first rollback
    #[arg(long)]
    pub skip_after_failure: bool,
}

impl ExecutorArgs {
    pub fn apply(&self, mut config: ExecutorConfig) -> ExecutorConfig {
        if let Some(n) = self.max_parallel_groups {
            config.max_parallel_groups = n;
        }
        if let Some(n) = self.max_parallel_operations {
            config.max_parallel_operations = n;
        }
        if self.timeout_ms.is_some() {
            config.operation_timeout_ms = self.timeout_ms;
        }
        if self.skip_after_failure {
            config.skip_after_failure = true;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_file_values() {
        let file = ExecutorConfig {
            max_parallel_groups: 2,
            max_parallel_operations: 8,
            operation_timeout_ms: Some(1000),
            skip_after_failure: false,
        };
        let args = ExecutorArgs {
            max_parallel_groups: Some(1),
            timeout_ms: Some(50),
            skip_after_failure: true,
            ..ExecutorArgs::default()
        };

        let merged = args.apply(file);
        assert_eq!(merged.max_parallel_groups, 1);
        assert_eq!(merged.max_parallel_operations, 8);
        assert_eq!(merged.operation_timeout_ms, Some(50));
        assert!(merged.skip_after_failure);
    }

    #[test]
    fn test_no_flags_keep_file_values() {
        let file = ExecutorConfig {
            max_parallel_groups: 3,
            ..ExecutorConfig::default()
        };
        assert_eq!(ExecutorArgs::default().apply(file.clone()), file);
    }
}
