use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::cli::{CliArgs, Command};
use crate::model::ChartRef;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ToolConfig {
    pub kube_context: Option<String>,
    pub kubeconfig: Option<PathBuf>,
    pub release: Option<String>,
    pub kubectl: KubectlConfig,
    pub helm: HelmConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KubectlConfig {
    pub command: String,
    pub wildcard_labels: Vec<String>,
    pub diff_command: Option<Vec<String>>,
}

impl Default for KubectlConfig {
    fn default() -> Self {
        Self {
            command: "kubectl".to_string(),
            wildcard_labels: Vec::new(),
            diff_command: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HelmConfig {
    pub command: String,
}

impl Default for HelmConfig {
    fn default() -> Self {
        Self {
            command: "helm".to_string(),
        }
    }
}

impl ToolConfig {
    /// Loads the first config found, or defaults when there is none.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match discover_config_path() {
                Some(path) => path,
                None => {
                    debug!("no tool config found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read tool config {}", path.display()))?;
        let parsed = Self::parse(&raw)
            .with_context(|| format!("failed to parse tool config {}", path.display()))?;
        debug!(path = %path.display(), "loaded tool config");
        Ok(parsed)
    }

    fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }
}

fn discover_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("TUGBOAT_CONFIG")
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }

    let cwd_candidates = [
        PathBuf::from("tugboat.config.yaml"),
        PathBuf::from(".tugboat.yaml"),
    ];
    for candidate in cwd_candidates {
        if candidate.exists() {
            return Some(candidate);
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        let candidate = PathBuf::from(home).join(".config/tugboat/config.yaml");
        if candidate.exists() {
            return Some(candidate);
        }
    }

    None
}

/// The deployment file: which charts to render and where they go.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DeployFile {
    pub namespace: Option<String>,
    pub charts: Vec<ChartSpec>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ChartSpec {
    pub name: String,
    pub path: Option<PathBuf>,
    pub version: Option<String>,
    pub repository: Option<String>,
    pub namespace: Option<String>,
    pub values: Vec<PathBuf>,
    pub set: BTreeMap<String, String>,
    pub wildcard_labels: Option<Vec<String>>,
}

impl DeployFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read deployment file {}", path.display()))?;
        let parsed: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse deployment file {}", path.display()))?;
        if parsed.charts.is_empty() {
            bail!("deployment file {} lists no charts", path.display());
        }
        Ok(parsed)
    }

    /// Chart refs with relative paths resolved against the file's directory.
    pub fn chart_refs(&self, base: &Path, only: Option<&str>) -> Result<Vec<ChartRef>> {
        let charts = self
            .charts
            .iter()
            .filter(|chart| only.is_none_or(|name| chart.name == name))
            .map(|chart| ChartRef {
                name: chart.name.clone(),
                path: chart.path.as_ref().map(|path| {
                    if path.is_relative() {
                        base.join(path)
                    } else {
                        path.clone()
                    }
                }),
                version: chart.version.clone(),
                repository: chart.repository.clone(),
                namespace: chart.namespace.clone(),
                values: chart
                    .values
                    .iter()
                    .map(|values| {
                        if values.is_relative() {
                            base.join(values)
                        } else {
                            values.clone()
                        }
                    })
                    .collect(),
                set: chart.set.clone(),
                wildcard_labels: chart.wildcard_labels.clone(),
            })
            .collect::<Vec<_>>();

        if let Some(name) = only
            && charts.is_empty()
        {
            bail!("chart `{name}` is not listed in the deployment file");
        }
        Ok(charts)
    }
}

/// Everything one invocation needs, fixed before the first stage runs.
#[derive(Debug, Clone)]
pub struct Settings {
    pub kubectl: String,
    pub helm: String,
    pub diff_command: Option<Vec<String>>,
    pub kube_context: Option<String>,
    pub kubeconfig: Option<PathBuf>,
    pub release: Option<String>,
    pub wildcard_labels: Vec<String>,
    pub helm_set: BTreeMap<String, String>,
    pub filters: Vec<String>,
    pub no_prompt: bool,
    pub dry_run: bool,
    pub describe: bool,
    pub watch: bool,
    pub follow: bool,
    pub previous: bool,
    pub tail: u32,
    pub container: Option<String>,
    pub extra_args: Vec<String>,
    pub passthrough: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            kubectl: "kubectl".to_string(),
            helm: "helm".to_string(),
            diff_command: None,
            kube_context: None,
            kubeconfig: None,
            release: None,
            wildcard_labels: Vec::new(),
            helm_set: BTreeMap::new(),
            filters: Vec::new(),
            no_prompt: false,
            dry_run: false,
            describe: false,
            watch: false,
            follow: false,
            previous: false,
            tail: 10,
            container: None,
            extra_args: Vec::new(),
            passthrough: Vec::new(),
        }
    }
}

impl Settings {
    pub fn resolve(args: &CliArgs, config: ToolConfig) -> Result<Self> {
        let diff_command = std::env::var("TUGBOAT_DIFF_COMMAND")
            .ok()
            .map(|raw| {
                raw.split_whitespace()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|argv| !argv.is_empty())
            .or(config.kubectl.diff_command);

        let mut settings = Self {
            kubectl: config.kubectl.command,
            helm: config.helm.command,
            diff_command,
            kube_context: args.kube_context.clone().or(config.kube_context),
            kubeconfig: args.kubeconfig.clone().or(config.kubeconfig),
            release: args.release.clone().or(config.release),
            wildcard_labels: config.kubectl.wildcard_labels,
            helm_set: parse_set_pairs(&args.helm_set)?,
            no_prompt: args.no_prompt,
            ..Self::default()
        };

        match &args.command {
            Command::Apply(apply) | Command::Deploy(apply) => {
                settings.dry_run = apply.dry_run;
                settings.filters = apply.filter.filters.clone();
            }
            Command::Get(get) => {
                settings.filters = get.filter.filters.clone();
                settings.describe = get.describe;
                settings.watch = get.extra.iter().any(|arg| arg == "-w" || arg == "--watch");
                settings.extra_args = get.extra.clone();
            }
            Command::Pods(pods) => {
                settings.watch = pods.watch;
                settings.describe = pods.describe;
                settings.extra_args = pods.extra.clone();
            }
            Command::Logs(logs) => {
                settings.container = match (&logs.container, &logs.container_arg) {
                    (Some(flag), Some(positional)) if flag != positional => {
                        bail!(
                            "container given twice (-c {flag} and {positional}); pass only one"
                        )
                    }
                    (flag, positional) => flag.clone().or_else(|| positional.clone()),
                };
                settings.follow = logs.follow;
                settings.previous = logs.previous;
                settings.tail = logs.tail;
            }
            Command::Exec(exec) => {
                settings.container = exec.container.clone();
                settings.passthrough = if exec.command.is_empty() {
                    vec!["/bin/sh".to_string()]
                } else {
                    exec.command.clone()
                };
            }
            Command::Rollback(rollback) => settings.dry_run = rollback.dry_run,
            Command::Diff(filter) | Command::Lint(filter) | Command::Template(filter) => {
                settings.filters = filter.filters.clone();
            }
            Command::Explain => {}
        }

        Ok(settings)
    }
}

fn parse_set_pairs(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.to_string()))
            }
            _ => bail!("malformed --set value `{pair}`, expected KEY=VALUE"),
        })
        .collect()
}
