use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config::Settings;
use crate::manifest;
use crate::model::{Invocation, StdioMode};
use crate::plan::{Stage, StageAction, StageScope};
use crate::select;

const WATCH_NOTE: &str = "(this is benign when interrupting a watch via -w)";
const POD_COLUMNS: &str = "NAME:.metadata.name,STATUS:.status.phase,CREATED:.metadata.creationTimestamp,CONTAINERS:.spec.containers[*].name";

fn kubectl(scope: &StageScope<'_>) -> Invocation {
    let settings = scope.settings;
    let mut invocation = Invocation::new(&settings.kubectl);
    if let Some(context) = &settings.kube_context {
        invocation = invocation.args(["--context", context.as_str()]);
    }
    if let Some(namespace) = scope.namespace() {
        invocation = invocation.args(["--namespace", namespace]);
    }
    if let Some(kubeconfig) = &settings.kubeconfig {
        invocation = invocation
            .arg("--kubeconfig")
            .arg(kubeconfig.display().to_string());
    }
    invocation
}

/// Appends pass-through arguments in their fixed order: extras, dry run, then `-- ...`.
fn finish(mut invocation: Invocation, settings: &Settings, dry_run_applies: bool) -> Invocation {
    invocation = invocation.args(settings.extra_args.iter().cloned());
    if dry_run_applies && settings.dry_run {
        invocation = invocation.arg("--dry-run=client");
    }
    if !settings.passthrough.is_empty() {
        invocation = invocation
            .arg("--")
            .args(settings.passthrough.iter().cloned());
    }
    invocation
}

fn watching(invocation: Invocation) -> Invocation {
    invocation
        .tolerate_interrupt(true)
        .benign_exit(1, WATCH_NOTE)
}

fn label_columns(wildcard_labels: &[String]) -> Option<String> {
    (!wildcard_labels.is_empty()).then(|| wildcard_labels.join(","))
}

/// Fails when any rendered object is missing from the cluster.
pub struct CheckStage;

impl Stage for CheckStage {
    fn name(&self) -> &'static str {
        "check"
    }

    fn build_invocation(&self, input: &str, scope: &StageScope<'_>) -> Result<StageAction> {
        let refs = manifest::object_refs(input)?;
        Ok(StageAction::Run(
            kubectl(scope).args(["get", "-o", "name"]).args(refs),
        ))
    }
}

pub struct ApplyStage;

impl Stage for ApplyStage {
    fn name(&self) -> &'static str {
        "apply"
    }

    fn build_invocation(&self, _input: &str, scope: &StageScope<'_>) -> Result<StageAction> {
        let invocation = kubectl(scope)
            .args(["apply", "-f", "-"])
            .stdin(StdioMode::Captured)
            .output(StdioMode::Inherited);
        Ok(StageAction::Run(finish(invocation, scope.settings, true)))
    }
}

/// `get -o wide` (or `describe`) for every rendered object.
pub struct GetStage;

impl Stage for GetStage {
    fn name(&self) -> &'static str {
        "get"
    }

    fn build_invocation(&self, input: &str, scope: &StageScope<'_>) -> Result<StageAction> {
        let settings = scope.settings;
        let refs = manifest::object_refs(input)?;
        let mut invocation = if settings.describe {
            kubectl(scope).arg("describe").args(refs)
        } else {
            let mut get = kubectl(scope).args(["get", "-o", "wide"]).args(refs);
            if let Some(columns) = label_columns(scope.wildcard_labels) {
                get = get.arg("-L").arg(columns);
            }
            get
        };
        invocation = finish(invocation.output(StdioMode::Inherited), settings, false);
        if settings.watch {
            invocation = watching(invocation);
        }
        Ok(StageAction::Run(invocation))
    }
}

/// Lists the pods selected by the rendered workloads.
pub struct PodsStage {
    watch: bool,
}

impl PodsStage {
    pub fn new(watch: bool) -> Self {
        Self { watch }
    }
}

impl Stage for PodsStage {
    fn name(&self) -> &'static str {
        "pods"
    }

    fn build_invocation(&self, input: &str, scope: &StageScope<'_>) -> Result<StageAction> {
        let settings = scope.settings;
        let selector = manifest::selector_constraint(input, scope.wildcard_labels)?;
        let mut invocation = if settings.describe {
            kubectl(scope).args(["describe", "pods", "-l", selector.as_str()])
        } else {
            let mut get = kubectl(scope).args(["get", "pods", "-l", selector.as_str(), "-o", "wide"]);
            if let Some(columns) = label_columns(scope.wildcard_labels) {
                get = get.arg("-L").arg(columns);
            }
            get
        };
        invocation = finish(invocation.output(StdioMode::Inherited), settings, false);
        if self.watch {
            if !invocation.has_arg("-w") && !invocation.has_arg("--watch") {
                invocation = invocation.arg("-w");
            }
            invocation = watching(invocation);
        }
        Ok(StageAction::Run(invocation))
    }
}

/// Produces the fixed-column pod listing the pod selector reads.
pub struct SelectPodsStage;

impl Stage for SelectPodsStage {
    fn name(&self) -> &'static str {
        "select-pods"
    }

    fn build_invocation(&self, input: &str, scope: &StageScope<'_>) -> Result<StageAction> {
        let selector = manifest::selector_constraint(input, scope.wildcard_labels)?;
        let mut columns = POD_COLUMNS.to_string();
        for label in scope.wildcard_labels {
            columns.push_str(&format!(
                ",{}:.metadata.labels.{}",
                label.to_uppercase(),
                label.replace('.', "\\.")
            ));
        }
        let output = format!("custom-columns={columns}");
        Ok(StageAction::Run(kubectl(scope).args([
            "get",
            "pods",
            "-l",
            selector.as_str(),
            "-o",
            output.as_str(),
        ])))
    }
}

pub struct LogsStage;

impl Stage for LogsStage {
    fn name(&self) -> &'static str {
        "logs"
    }

    fn build_invocation(&self, input: &str, scope: &StageScope<'_>) -> Result<StageAction> {
        let settings = scope.settings;
        let target = select::select_pod_and_container(
            input,
            settings.no_prompt,
            settings.container.as_deref(),
            scope.prompter,
        )
        .context("failed to choose a pod for logs")?;
        info!("showing logs for {}/{}", target.pod, target.container);

        let mut invocation = kubectl(scope)
            .args(["logs", target.pod.as_str(), "-c", target.container.as_str()])
            .output(StdioMode::Inherited);
        if settings.tail > 0 {
            invocation = invocation.arg("--tail").arg(settings.tail.to_string());
        }
        if settings.previous {
            invocation = invocation.arg("--previous");
        }
        if settings.follow {
            invocation = invocation.arg("-f").tolerate_interrupt(true);
        }
        Ok(StageAction::Run(finish(invocation, settings, false)))
    }
}

pub struct ExecStage;

impl Stage for ExecStage {
    fn name(&self) -> &'static str {
        "exec"
    }

    fn build_invocation(&self, input: &str, scope: &StageScope<'_>) -> Result<StageAction> {
        let settings = scope.settings;
        let target = select::select_pod_and_container(
            input,
            settings.no_prompt,
            settings.container.as_deref(),
            scope.prompter,
        )
        .context("failed to choose a pod to exec into")?;
        info!("executing on {}/{}", target.pod, target.container);

        let invocation = kubectl(scope)
            .args(["exec", "-it", target.pod.as_str(), "-c", target.container.as_str()])
            .stdin(StdioMode::Inherited)
            .output(StdioMode::Inherited)
            .tolerate_interrupt(true);
        Ok(StageAction::Run(finish(invocation, settings, false)))
    }
}

/// `rollout undo` for every rendered workload.
pub struct RollbackStage;

impl Stage for RollbackStage {
    fn name(&self) -> &'static str {
        "rollback"
    }

    fn build_invocation(&self, input: &str, scope: &StageScope<'_>) -> Result<StageAction> {
        let refs = manifest::workload_refs(input)?;
        let invocation = kubectl(scope)
            .args(["rollout", "undo"])
            .args(refs)
            .output(StdioMode::Inherited);
        Ok(StageAction::Run(finish(invocation, scope.settings, true)))
    }
}

pub struct DiffStage;

impl Stage for DiffStage {
    fn name(&self) -> &'static str {
        "diff"
    }

    fn build_invocation(&self, _input: &str, scope: &StageScope<'_>) -> Result<StageAction> {
        let invocation = match scope.settings.diff_command.as_deref() {
            Some([program, args @ ..]) => {
                debug!(%program, "using configured diff command");
                Invocation::new(program.as_str()).args(args.iter().cloned())
            }
            _ => kubectl(scope).args(["diff", "-f", "-"]),
        };
        Ok(StageAction::Run(
            invocation
                .stdin(StdioMode::Captured)
                .output(StdioMode::Inherited)
                .benign_exit(1, "(differences found)"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ApplyStage, CheckStage, DiffStage, ExecStage, GetStage, LogsStage, PodsStage,
        RollbackStage, SelectPodsStage,
    };
    use crate::config::Settings;
    use crate::model::{Invocation, StdioMode};
    use crate::plan::{Stage, StageAction, StageScope};
    use crate::select::ScriptedPrompter;

    const RENDERED: &str = "kind: Service\nmetadata:\n  name: web-prod\n---\nkind: Deployment\nmetadata:\n  name: web-prod\nspec:\n  selector:\n    matchLabels:\n      app: web\n";
    const LISTING: &str = "NAME STATUS CREATED CONTAINERS\nweb-1 Running 2024-03-01T10:00:00Z web\n";

    fn build(stage: &dyn Stage, input: &str, settings: &Settings, wildcard_labels: &[String]) -> Invocation {
        let prompter = ScriptedPrompter::default();
        let scope = StageScope {
            settings,
            namespace: "web",
            wildcard_labels,
            prompter: &prompter,
        };
        match stage.build_invocation(input, &scope).expect("stage builds") {
            StageAction::Run(invocation) => invocation,
            other => panic!("expected a single invocation, got {other:?}"),
        }
    }

    #[test]
    fn pod_selection_refuses_an_empty_label_selector() {
        let prompter = ScriptedPrompter::default();
        let settings = Settings::default();
        let wildcard_labels = ["app".to_string()];
        let scope = StageScope {
            settings: &settings,
            namespace: "web",
            wildcard_labels: &wildcard_labels,
            prompter: &prompter,
        };
        let error = SelectPodsStage
            .build_invocation(RENDERED, &scope)
            .expect_err("no labels left to select on");
        assert_eq!(
            error.to_string(),
            "No pod selector labels found on the chart's Deployments or StatefulSets"
        );
        assert!(PodsStage::new(false).build_invocation(RENDERED, &scope).is_err());
    }

    #[test]
    fn check_lists_every_object_by_name() {
        let invocation = build(&CheckStage, RENDERED, &Settings::default(), &[]);
        assert_eq!(
            invocation.to_string(),
            "kubectl --namespace web get -o name Service/web-prod Deployment/web-prod"
        );
        assert_eq!(invocation.output, StdioMode::Captured);
    }

    #[test]
    fn apply_reads_stdin_and_orders_dry_run_before_passthrough() {
        let settings = Settings {
            kube_context: Some("staging".to_string()),
            dry_run: true,
            ..Settings::default()
        };
        let invocation = build(&ApplyStage, RENDERED, &settings, &[]);
        assert_eq!(
            invocation.to_string(),
            "kubectl --context staging --namespace web apply -f - --dry-run=client"
        );
        assert_eq!(invocation.stdin, StdioMode::Captured);
    }

    #[test]
    fn get_adds_wildcard_label_columns() {
        let invocation = build(&GetStage, RENDERED, &Settings::default(), &["team".to_string()]);
        assert_eq!(
            invocation.to_string(),
            "kubectl --namespace web get -o wide Service/web-prod Deployment/web-prod -L team"
        );
    }

    #[test]
    fn get_with_watch_flag_tolerates_interrupts() {
        let settings = Settings {
            watch: true,
            extra_args: vec!["-w".to_string()],
            ..Settings::default()
        };
        let invocation = build(&GetStage, RENDERED, &settings, &[]);
        assert!(invocation.tolerate_interrupt);
        assert_eq!(invocation.benign_exit.map(|exit| exit.code), Some(1));
    }

    #[test]
    fn watching_pods_appends_watch_flag_once() {
        let invocation = build(&PodsStage::new(true), RENDERED, &Settings::default(), &[]);
        assert_eq!(
            invocation.to_string(),
            "kubectl --namespace web get pods -l 'app in (web)' -o wide -w"
        );
        assert!(invocation.tolerate_interrupt);

        let settings = Settings {
            extra_args: vec!["-w".to_string()],
            ..Settings::default()
        };
        let invocation = build(&PodsStage::new(true), RENDERED, &settings, &[]);
        assert_eq!(invocation.args.iter().filter(|arg| *arg == "-w").count(), 1);
    }

    #[test]
    fn select_pods_requests_custom_columns() {
        let invocation = build(
            &SelectPodsStage,
            RENDERED,
            &Settings::default(),
            &["app.kubernetes.io/team".to_string()],
        );
        let columns = invocation.args.last().expect("columns arg");
        assert!(columns.starts_with("custom-columns=NAME:.metadata.name,"));
        assert!(columns.ends_with(",APP.KUBERNETES.IO/TEAM:.metadata.labels.app\\.kubernetes\\.io/team"));
    }

    #[test]
    fn logs_targets_selected_pod() {
        let settings = Settings {
            follow: true,
            ..Settings::default()
        };
        let invocation = build(&LogsStage, LISTING, &settings, &[]);
        assert_eq!(
            invocation.to_string(),
            "kubectl --namespace web logs web-1 -c web --tail 10 -f"
        );
        assert!(invocation.tolerate_interrupt);
    }

    #[test]
    fn exec_passes_command_after_separator() {
        let settings = Settings {
            passthrough: vec!["/bin/sh".to_string()],
            ..Settings::default()
        };
        let invocation = build(&ExecStage, LISTING, &settings, &[]);
        assert_eq!(
            invocation.to_string(),
            "kubectl --namespace web exec -it web-1 -c web -- /bin/sh"
        );
        assert_eq!(invocation.stdin, StdioMode::Inherited);
    }

    #[test]
    fn rollback_only_targets_workloads() {
        let invocation = build(&RollbackStage, RENDERED, &Settings::default(), &[]);
        assert_eq!(
            invocation.to_string(),
            "kubectl --namespace web rollout undo Deployment/web-prod"
        );
    }

    #[test]
    fn diff_prefers_configured_command() {
        let invocation = build(&DiffStage, RENDERED, &Settings::default(), &[]);
        assert_eq!(invocation.to_string(), "kubectl --namespace web diff -f -");

        let settings = Settings {
            diff_command: Some(vec!["kubectl-neat-diff".to_string(), "-f".to_string(), "-".to_string()]),
            ..Settings::default()
        };
        let invocation = build(&DiffStage, RENDERED, &settings, &[]);
        assert_eq!(invocation.to_string(), "kubectl-neat-diff -f -");
        assert_eq!(invocation.benign_exit.map(|exit| exit.code), Some(1));
    }
}
