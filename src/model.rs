use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// How one side of a child process is wired.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum StdioMode {
    /// A pipe owned by the runner (stdin is fed the running input, output is returned).
    #[default]
    Captured,
    /// The caller's own terminal stream.
    Inherited,
    /// Nothing attached.
    Discarded,
}

/// A non-zero exit status the runner reclassifies as success.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct BenignExit {
    pub code: i32,
    pub note: &'static str,
}

/// One external command, fully described before it is run.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: StdioMode,
    pub output: StdioMode,
    pub tolerate_interrupt: bool,
    pub benign_exit: Option<BenignExit>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: StdioMode::Discarded,
            output: StdioMode::Captured,
            tolerate_interrupt: false,
            benign_exit: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, mode: StdioMode) -> Self {
        self.stdin = mode;
        self
    }

    pub fn output(mut self, mode: StdioMode) -> Self {
        self.output = mode;
        self
    }

    pub fn tolerate_interrupt(mut self, tolerate: bool) -> Self {
        self.tolerate_interrupt = tolerate;
        self
    }

    pub fn benign_exit(mut self, code: i32, note: &'static str) -> Self {
        self.benign_exit = Some(BenignExit { code, note });
        self
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|existing| existing == arg)
    }
}

impl Display for Invocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", shell_quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        Ok(())
    }
}

fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Verb {
    Apply,
    Deploy,
    Get,
    Pods,
    Logs,
    Exec,
    Rollback,
    Diff,
    Lint,
    Template,
    Explain,
}

impl Verb {
    #[cfg(test)]
    pub const ALL: [Self; 11] = [
        Self::Apply,
        Self::Deploy,
        Self::Get,
        Self::Pods,
        Self::Logs,
        Self::Exec,
        Self::Rollback,
        Self::Diff,
        Self::Lint,
        Self::Template,
        Self::Explain,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Deploy => "deploy",
            Self::Get => "get",
            Self::Pods => "pods",
            Self::Logs => "logs",
            Self::Exec => "exec",
            Self::Rollback => "rollback",
            Self::Diff => "diff",
            Self::Lint => "lint",
            Self::Template => "template",
            Self::Explain => "explain",
        }
    }

    pub fn action(self) -> &'static str {
        match self {
            Self::Apply => "Applying charts",
            Self::Deploy => "Running multi-stage deployment of charts",
            Self::Get => "Getting objects from charts",
            Self::Pods => "Getting pods associated with charts",
            Self::Logs => "Getting logs for pods from charts",
            Self::Exec => "Executing on pods from charts",
            Self::Rollback => "Rolling back workloads associated with charts",
            Self::Diff => "Diffing objects from charts",
            Self::Lint => "Linting charts",
            Self::Template => "Templating charts",
            Self::Explain => "Explaining charts",
        }
    }

    /// Verbs whose listings honor the configured wildcard label columns.
    pub fn uses_wildcard_labels(self) -> bool {
        matches!(
            self,
            Self::Diff | Self::Get | Self::Pods | Self::Exec | Self::Logs
        )
    }
}

impl Display for Verb {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.title())
    }
}

/// A chart to render, as named by the deployment file.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct ChartRef {
    pub name: String,
    pub path: Option<PathBuf>,
    pub version: Option<String>,
    pub repository: Option<String>,
    pub namespace: Option<String>,
    pub values: Vec<PathBuf>,
    pub set: BTreeMap<String, String>,
    pub wildcard_labels: Option<Vec<String>>,
}

impl ChartRef {
    pub fn source(&self) -> String {
        match &self.path {
            Some(path) => path.display().to_string(),
            None => self.name.clone(),
        }
    }
}

/// One data row of the custom-column pod listing.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct PodRow {
    pub name: String,
    pub status: String,
    pub created: String,
    pub containers: Vec<String>,
    pub extra: Vec<String>,
    pub line: String,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PodTarget {
    pub pod: String,
    pub container: String,
}

#[cfg(test)]
mod tests {
    use super::{Invocation, StdioMode, Verb};

    #[test]
    fn invocation_renders_quoted_command_line() {
        let invocation = Invocation::new("kubectl")
            .args(["get", "pods", "-l", "app in (web,api)"])
            .stdin(StdioMode::Captured);

        assert_eq!(
            invocation.to_string(),
            "kubectl get pods -l 'app in (web,api)'"
        );
    }

    #[test]
    fn invocation_defaults_to_captured_output_without_stdin() {
        let invocation = Invocation::new("helm");
        assert_eq!(invocation.stdin, StdioMode::Discarded);
        assert_eq!(invocation.output, StdioMode::Captured);
        assert!(!invocation.tolerate_interrupt);
        assert!(invocation.benign_exit.is_none());
    }

    #[test]
    fn wildcard_labels_only_apply_to_listing_verbs() {
        let listing = Verb::ALL
            .into_iter()
            .filter(|verb| verb.uses_wildcard_labels())
            .collect::<Vec<_>>();
        assert_eq!(
            listing,
            vec![Verb::Get, Verb::Pods, Verb::Logs, Verb::Exec, Verb::Diff]
        );
    }
}
