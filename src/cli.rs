use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::model::Verb;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "tugboat",
    version,
    about = "Render Helm charts and drive kubectl through multi-stage deployment pipelines."
)]
pub struct CliArgs {
    /// Namespace to use with kubectl, overriding any namespace from the deployment file
    #[arg(short, long, global = true)]
    pub namespace: Option<String>,

    /// kubectl context to target
    #[arg(long = "context", global = true, env = "TUGBOAT_KUBE_CONTEXT")]
    pub kube_context: Option<String>,

    /// kubeconfig passed through to kubectl
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Release name used for rendering and linting
    #[arg(short, long, global = true, env = "TUGBOAT_RELEASE")]
    pub release: Option<String>,

    /// Never prompt; pick deterministic defaults or fail instead
    #[arg(long, global = true)]
    pub no_prompt: bool,

    /// Tool configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Deployment file listing the charts to operate on
    #[arg(long, global = true, env = "TUGBOAT_FILE", default_value = "tugboat.yaml")]
    pub filename: PathBuf,

    /// Limit the command to a single chart from the deployment file
    #[arg(long, global = true)]
    pub chart: Option<String>,

    /// Values passed through to helm as --set key=value
    #[arg(long = "set", global = true, value_name = "KEY=VALUE")]
    pub helm_set: Vec<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Errors only (overrides --verbose)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// tracing filter (for example: info,debug,trace)
    #[arg(long, global = true, default_value = "info")]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Command,
}

impl CliArgs {
    pub fn effective_log_filter(&self) -> &str {
        if self.quiet {
            "error"
        } else if self.verbose {
            "debug"
        } else {
            &self.log_filter
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Render charts and apply them to the cluster
    Apply(ApplyArgs),
    /// Check, apply, watch pods, then offer a rollback
    Deploy(ApplyArgs),
    /// Get the objects rendered by the charts
    Get(GetArgs),
    /// List pods belonging to the charts' workloads
    Pods(PodsArgs),
    /// Show logs for a pod belonging to the charts' workloads
    Logs(LogsArgs),
    /// Exec into a pod belonging to the charts' workloads
    Exec(ExecArgs),
    /// Undo the last rollout of the charts' workloads
    Rollback(RollbackArgs),
    /// Diff rendered objects against the cluster
    Diff(FilterArgs),
    /// Render charts and check naming and labeling conventions
    Lint(FilterArgs),
    /// Print rendered charts
    Template(FilterArgs),
    /// Print the commands apply would run
    Explain,
}

impl Command {
    pub fn verb(&self) -> Verb {
        match self {
            Self::Apply(_) => Verb::Apply,
            Self::Deploy(_) => Verb::Deploy,
            Self::Get(_) => Verb::Get,
            Self::Pods(_) => Verb::Pods,
            Self::Logs(_) => Verb::Logs,
            Self::Exec(_) => Verb::Exec,
            Self::Rollback(_) => Verb::Rollback,
            Self::Diff(_) => Verb::Diff,
            Self::Lint(_) => Verb::Lint,
            Self::Template(_) => Verb::Template,
            Self::Explain => Verb::Explain,
        }
    }
}

#[derive(Debug, Clone, Default, Args)]
pub struct FilterArgs {
    /// Object kinds to keep (case insensitive, repeatable)
    #[arg(long = "filter", value_name = "KIND")]
    pub filters: Vec<String>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ApplyArgs {
    /// Pass --dry-run=client to kubectl
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub filter: FilterArgs,
}

#[derive(Debug, Clone, Default, Args)]
pub struct GetArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    /// Use kubectl describe instead of kubectl get -o wide
    #[arg(short, long)]
    pub describe: bool,

    /// Extra arguments for kubectl, given after --
    #[arg(last = true)]
    pub extra: Vec<String>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct PodsArgs {
    /// Watch for updates (passes -w to kubectl)
    #[arg(short, long)]
    pub watch: bool,

    /// Use kubectl describe instead of kubectl get -o wide
    #[arg(short, long)]
    pub describe: bool,

    /// Extra arguments for kubectl, given after --
    #[arg(last = true)]
    pub extra: Vec<String>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct LogsArgs {
    /// Container to read logs from
    #[arg(short, long)]
    pub container: Option<String>,

    /// Container to read logs from (same as -c)
    #[arg(value_name = "CONTAINER")]
    pub container_arg: Option<String>,

    /// Follow the log stream
    #[arg(short = 'f', long)]
    pub follow: bool,

    /// Logs of the previously terminated container
    #[arg(short, long)]
    pub previous: bool,

    /// Most recent lines to show; 0 shows everything kubectl has
    #[arg(short, long, default_value_t = 10)]
    pub tail: u32,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ExecArgs {
    /// Container to exec into
    #[arg(short, long)]
    pub container: Option<String>,

    /// Command to run in the container, given after -- (default: /bin/sh)
    #[arg(last = true)]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct RollbackArgs {
    /// Pass --dry-run=client to kubectl
    #[arg(long)]
    pub dry_run: bool,
}

#[cfg(test)]
mod tests {
    use super::{CliArgs, Command};
    use crate::model::Verb;
    use clap::Parser;

    #[test]
    fn get_collects_extra_args_after_separator() {
        let args = CliArgs::parse_from(["tugboat", "get", "--filter", "service", "--", "-o", "json"]);
        let Command::Get(get) = &args.command else {
            panic!("expected get command");
        };
        assert_eq!(get.filter.filters, vec!["service".to_string()]);
        assert_eq!(get.extra, vec!["-o".to_string(), "json".to_string()]);
        assert_eq!(args.command.verb(), Verb::Get);
    }

    #[test]
    fn global_flags_are_accepted_after_the_verb() {
        let args = CliArgs::parse_from(["tugboat", "deploy", "-n", "web", "--no-prompt", "--dry-run"]);
        assert_eq!(args.namespace.as_deref(), Some("web"));
        assert!(args.no_prompt);
        let Command::Deploy(deploy) = &args.command else {
            panic!("expected deploy command");
        };
        assert!(deploy.dry_run);
    }

    #[test]
    fn quiet_overrides_verbose() {
        let args = CliArgs::parse_from(["tugboat", "-v", "-q", "template"]);
        assert_eq!(args.effective_log_filter(), "error");
        let args = CliArgs::parse_from(["tugboat", "-v", "template"]);
        assert_eq!(args.effective_log_filter(), "debug");
    }

    #[test]
    fn logs_defaults_to_ten_lines() {
        let args = CliArgs::parse_from(["tugboat", "logs", "web"]);
        let Command::Logs(logs) = &args.command else {
            panic!("expected logs command");
        };
        assert_eq!(logs.tail, 10);
        assert_eq!(logs.container_arg.as_deref(), Some("web"));
    }
}
