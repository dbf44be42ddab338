use anyhow::{Result, bail};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::manifest::{self, KubeObject};
use crate::model::{ChartRef, Invocation};
use crate::plan::{Stage, StageAction, StageScope};

/// `helm template` for every chart, concatenated into one stream.
pub struct RenderStage {
    charts: Vec<ChartRef>,
}

impl RenderStage {
    pub fn new(charts: Vec<ChartRef>) -> Self {
        Self { charts }
    }

    fn template_invocation(&self, chart: &ChartRef, scope: &StageScope<'_>) -> Invocation {
        let settings = scope.settings;
        let mut invocation = Invocation::new(&settings.helm).arg("template");
        if let Some(release) = &settings.release {
            invocation = invocation.arg(release);
        }
        invocation = invocation.arg(chart.source());
        if let Some(namespace) = scope.namespace() {
            invocation = invocation.args(["--namespace", namespace]);
        }
        if let Some(repository) = &chart.repository {
            invocation = invocation.args(["--repo", repository.as_str()]);
        }
        if let Some(version) = &chart.version {
            invocation = invocation.args(["--version", version.as_str()]);
        }
        for values in &chart.values {
            invocation = invocation.arg("-f").arg(values.display().to_string());
        }

        let mut set = chart.set.clone();
        set.extend(settings.helm_set.clone());
        for (key, value) in set {
            invocation = invocation.arg("--set").arg(format!("{key}={value}"));
        }
        invocation
    }
}

impl Stage for RenderStage {
    fn name(&self) -> &'static str {
        "render"
    }

    fn build_invocation(&self, _input: &str, scope: &StageScope<'_>) -> Result<StageAction> {
        if self.charts.is_empty() {
            bail!("no charts to render");
        }
        Ok(StageAction::RunEach(
            self.charts
                .iter()
                .map(|chart| self.template_invocation(chart, scope))
                .collect(),
        ))
    }

    fn next_input(&self, output: String, scope: &StageScope<'_>) -> Result<String> {
        let filters = &scope.settings.filters;
        if filters.is_empty() {
            return Ok(output);
        }
        debug!(?filters, "filtering rendered objects by kind");
        Ok(manifest::filter_kinds(&output, filters))
    }
}

/// Checks release naming and labeling conventions without spawning anything.
pub struct LintStage;

impl Stage for LintStage {
    fn name(&self) -> &'static str {
        "lint"
    }

    fn build_invocation(&self, input: &str, scope: &StageScope<'_>) -> Result<StageAction> {
        let Some(release) = scope.settings.release.as_deref() else {
            info!("no release configured, nothing to lint");
            return Ok(StageAction::Resolved(String::new()));
        };

        let findings = manifest::parse(input)
            .flat_map(|object| lint_object(&object, release))
            .collect::<Vec<_>>();
        if findings.is_empty() {
            info!("no lint errors found");
            return Ok(StageAction::Resolved(String::new()));
        }

        for finding in &findings {
            warn!("{finding}");
        }
        bail!("lint found {} errors", findings.len())
    }
}

/// Only Deployments and Services are held to the release conventions.
fn lint_object(object: &KubeObject, release: &str) -> Vec<String> {
    let is_deployment = object.kind.eq_ignore_ascii_case("deployment");
    let is_service = object.kind.eq_ignore_ascii_case("service");
    if !is_deployment && !is_service {
        debug!(object = %object.reference(), "not linted");
        return Vec::new();
    }

    let mut findings = Vec::new();
    let suffix = format!("-{release}");

    if !object.name.ends_with(&suffix) {
        findings.push(format!(
            "{} `{}`: name is missing the release suffix `{suffix}`; name objects with .Release.Name to avoid collisions across releases",
            object.kind, object.name
        ));
    }
    if !has_release(&object.labels, release) {
        findings.push(format!(
            "{} `{}`: missing label `release={release}`; found labels {:?}",
            object.kind, object.name, object.labels
        ));
    }

    if is_deployment && !has_release(&object.template_labels, release) {
        findings.push(format!(
            "Deployment `{}`: spec.template.metadata.labels is missing `release={release}`; found {:?}",
            object.name, object.template_labels
        ));
    }

    if is_service
        && object.service_type.as_deref() != Some("ExternalName")
        && !has_release(&object.service_selector, release)
    {
        findings.push(format!(
            "Service `{}`: spec.selector is missing `release={release}`; found {:?}",
            object.name, object.service_selector
        ));
    }

    findings
}

fn has_release(labels: &BTreeMap<String, String>, release: &str) -> bool {
    labels.get("release").is_some_and(|value| value == release)
}
