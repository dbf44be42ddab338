use anyhow::{Context, Result};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::helm::{LintStage, RenderStage};
use crate::kubectl::{
    ApplyStage, CheckStage, DiffStage, ExecStage, GetStage, LogsStage, PodsStage, RollbackStage,
    SelectPodsStage,
};
use crate::model::{ChartRef, Verb};
use crate::plan::{self, HookDecision, Plan, PlanStage, StageScope};
use crate::process::CommandRunner;
use crate::select::Prompter;

pub type PlanBuilder = fn(&[ChartRef], &Settings) -> Plan;

pub fn plan_builder(verb: Verb) -> PlanBuilder {
    match verb {
        Verb::Apply | Verb::Explain => apply_plan,
        Verb::Deploy => deploy_plan,
        Verb::Get => get_plan,
        Verb::Pods => pods_plan,
        Verb::Logs => logs_plan,
        Verb::Exec => exec_plan,
        Verb::Rollback => rollback_plan,
        Verb::Diff => diff_plan,
        Verb::Lint => lint_plan,
        Verb::Template => template_plan,
    }
}

fn render(charts: &[ChartRef]) -> PlanStage {
    PlanStage::new(RenderStage::new(charts.to_vec()))
}

fn template_plan(charts: &[ChartRef], _settings: &Settings) -> Plan {
    Plan::new().then(render(charts))
}

fn lint_plan(charts: &[ChartRef], _settings: &Settings) -> Plan {
    Plan::new()
        .then(render(charts))
        .then(PlanStage::new(LintStage))
}

fn apply_plan(charts: &[ChartRef], _settings: &Settings) -> Plan {
    Plan::new()
        .then(render(charts))
        .then(PlanStage::new(ApplyStage))
}

fn get_plan(charts: &[ChartRef], _settings: &Settings) -> Plan {
    Plan::new()
        .then(render(charts))
        .then(PlanStage::new(GetStage))
}

fn pods_plan(charts: &[ChartRef], settings: &Settings) -> Plan {
    Plan::new()
        .then(render(charts))
        .then(PlanStage::new(PodsStage::new(settings.watch)))
}

fn logs_plan(charts: &[ChartRef], _settings: &Settings) -> Plan {
    Plan::new()
        .then(render(charts))
        .then(PlanStage::new(SelectPodsStage))
        .then(PlanStage::new(LogsStage))
}

fn exec_plan(charts: &[ChartRef], _settings: &Settings) -> Plan {
    Plan::new()
        .then(render(charts))
        .then(PlanStage::new(SelectPodsStage))
        .then(PlanStage::new(ExecStage))
}

fn rollback_plan(charts: &[ChartRef], _settings: &Settings) -> Plan {
    Plan::new()
        .then(render(charts))
        .then(PlanStage::new(RollbackStage))
}

fn diff_plan(charts: &[ChartRef], _settings: &Settings) -> Plan {
    Plan::new()
        .then(render(charts))
        .then(PlanStage::new(DiffStage))
}

/// render, check, apply, watch pods, then offer a rollback.
fn deploy_plan(charts: &[ChartRef], settings: &Settings) -> Plan {
    Plan::new()
        .then(render(charts))
        .then(
            PlanStage::new(CheckStage)
                .pre_execute(|_| {
                    info!("Checking to see that objects exist before applying...");
                    Ok(HookDecision::Continue)
                })
                .on_failure(confirm_new_objects)
                .forward_original_input(),
        )
        .then(
            PlanStage::new(ApplyStage)
                .pre_execute(|_| {
                    info!("Applying...");
                    Ok(HookDecision::Continue)
                })
                .forward_original_input(),
        )
        .then(
            PlanStage::new(PodsStage::new(!settings.no_prompt))
                .pre_execute(|scope| {
                    if scope.settings.no_prompt {
                        info!("Listing pods...");
                    } else {
                        info!("Watching pods... (press control-C to stop watching and continue)");
                    }
                    Ok(HookDecision::Continue)
                })
                .forward_original_input(),
        )
        .then(PlanStage::new(RollbackStage).pre_execute(confirm_rollback))
}

fn confirm_new_objects(scope: &StageScope<'_>) -> Result<HookDecision> {
    warn!("Some objects do not yet exist. Apply will create them.");
    if scope.settings.no_prompt {
        info!("creating new objects without confirmation due to --no-prompt");
        return Ok(HookDecision::Continue);
    }

    let choices = ["Abort".to_string(), "OK".to_string()];
    let index = scope.prompter.select(
        "Are you certain that you want to continue to create new objects? Select OK to proceed.",
        "",
        &choices,
    )?;
    if index == 1 {
        Ok(HookDecision::Continue)
    } else {
        warn!("Aborted.");
        Ok(HookDecision::Stop)
    }
}

fn confirm_rollback(scope: &StageScope<'_>) -> Result<HookDecision> {
    if scope.settings.no_prompt {
        info!("Finished. Not offering a rollback due to --no-prompt");
        return Ok(HookDecision::Stop);
    }

    let choices = ["OK".to_string(), "Rollback".to_string()];
    let index = scope.prompter.select(
        "Finished. Select OK to continue, or Rollback to rollback.",
        "",
        &choices,
    )?;
    if index == 0 {
        return Ok(HookDecision::Stop);
    }
    warn!("Rolling back... (kubectl output below may be terse)");
    Ok(HookDecision::Continue)
}

/// Charts that share one effective namespace; empty means kubectl's default.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NamespaceGroup {
    pub namespace: String,
    pub charts: Vec<ChartRef>,
}

/// Groups charts by namespace (command line, then chart, then deployment file).
pub fn group_by_namespace(
    charts: &[ChartRef],
    cli_namespace: Option<&str>,
    file_namespace: Option<&str>,
) -> Vec<NamespaceGroup> {
    let mut groups: BTreeMap<String, Vec<ChartRef>> = BTreeMap::new();
    for chart in charts {
        let namespace = cli_namespace
            .or(chart.namespace.as_deref())
            .or(file_namespace)
            .unwrap_or_default();
        groups
            .entry(namespace.to_string())
            .or_default()
            .push(chart.clone());
    }
    groups
        .into_iter()
        .map(|(namespace, charts)| NamespaceGroup { namespace, charts })
        .collect()
}

/// Runs `verb`'s plan once per namespace group and concatenates the outputs.
pub async fn run_verb<R: CommandRunner>(
    verb: Verb,
    groups: &[NamespaceGroup],
    settings: &Settings,
    runner: &R,
    prompter: &dyn Prompter,
) -> Result<String> {
    let build = plan_builder(verb);
    let mut combined = String::new();

    for group in groups {
        let wildcard_labels = if verb.uses_wildcard_labels() {
            group
                .charts
                .first()
                .and_then(|chart| chart.wildcard_labels.clone())
                .unwrap_or_else(|| settings.wildcard_labels.clone())
        } else {
            Vec::new()
        };
        let namespace_label = if group.namespace.is_empty() {
            "the default namespace"
        } else {
            group.namespace.as_str()
        };
        let chart_names = group
            .charts
            .iter()
            .map(|chart| chart.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        info!("{} [{chart_names}] in {namespace_label}", verb.action());

        let plan = build(&group.charts, settings);
        debug!(stages = ?plan.stage_names(), "built plan");
        let scope = StageScope {
            settings,
            namespace: &group.namespace,
            wildcard_labels: &wildcard_labels,
            prompter,
        };
        let output = plan::execute(&plan, &scope, runner)
            .await
            .with_context(|| format!("{verb} failed in {namespace_label}"))?;
        combined.push_str(&output);
    }

    Ok(combined)
}
