use anyhow::{Error, Result};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::Settings;
use crate::model::Invocation;
use crate::process::{CommandRunner, ProcessError};
use crate::select::Prompter;

/// Read-only context handed to every stage and hook of one plan run.
pub struct StageScope<'a> {
    pub settings: &'a Settings,
    pub namespace: &'a str,
    pub wildcard_labels: &'a [String],
    pub prompter: &'a dyn Prompter,
}

impl StageScope<'_> {
    pub fn namespace(&self) -> Option<&str> {
        (!self.namespace.is_empty()).then_some(self.namespace)
    }
}

/// What a stage wants done with the running input.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum StageAction {
    Run(Invocation),
    /// Run each in order with the same input and concatenate the outputs.
    RunEach(Vec<Invocation>),
    /// Computed in-process; nothing to spawn.
    Resolved(String),
}

pub trait Stage {
    fn name(&self) -> &'static str;

    fn build_invocation(&self, input: &str, scope: &StageScope<'_>) -> Result<StageAction>;

    fn next_input(&self, output: String, _scope: &StageScope<'_>) -> Result<String> {
        Ok(output)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum HookDecision {
    Continue,
    Stop,
}

pub type Hook = Box<dyn Fn(&StageScope<'_>) -> Result<HookDecision>>;

pub struct PlanStage {
    stage: Box<dyn Stage>,
    pre_execute: Option<Hook>,
    on_failure: Option<Hook>,
    forward_original_input: bool,
}

impl PlanStage {
    pub fn new(stage: impl Stage + 'static) -> Self {
        Self {
            stage: Box::new(stage),
            pre_execute: None,
            on_failure: None,
            forward_original_input: false,
        }
    }

    pub fn pre_execute(
        mut self,
        hook: impl Fn(&StageScope<'_>) -> Result<HookDecision> + 'static,
    ) -> Self {
        self.pre_execute = Some(Box::new(hook));
        self
    }

    pub fn on_failure(
        mut self,
        hook: impl Fn(&StageScope<'_>) -> Result<HookDecision> + 'static,
    ) -> Self {
        self.on_failure = Some(Box::new(hook));
        self
    }

    pub fn forward_original_input(mut self) -> Self {
        self.forward_original_input = true;
        self
    }

    pub fn name(&self) -> &'static str {
        self.stage.name()
    }
}

#[derive(Default)]
pub struct Plan {
    stages: Vec<PlanStage>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, stage: PlanStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(PlanStage::name).collect()
    }
}

enum StageOutcome {
    Output(String),
    Recovered,
    Stopped,
}

/// Runs `plan` from an empty input and returns what the last stage left behind.
pub async fn execute<R: CommandRunner>(
    plan: &Plan,
    scope: &StageScope<'_>,
    runner: &R,
) -> Result<String> {
    let mut input = String::new();

    for entry in &plan.stages {
        let span = info_span!("stage", name = entry.name());
        let outcome = run_stage(entry, &input, scope, runner)
            .instrument(span)
            .await?;

        match outcome {
            StageOutcome::Stopped => {
                if !entry.forward_original_input {
                    input.clear();
                }
                return Ok(input);
            }
            StageOutcome::Recovered => {
                if !entry.forward_original_input {
                    input.clear();
                }
            }
            StageOutcome::Output(output) => {
                if !entry.forward_original_input {
                    input = output;
                }
            }
        }
    }

    Ok(input)
}

async fn run_stage<R: CommandRunner>(
    entry: &PlanStage,
    input: &str,
    scope: &StageScope<'_>,
    runner: &R,
) -> Result<StageOutcome> {
    if let Some(hook) = &entry.pre_execute
        && hook(scope)? == HookDecision::Stop
    {
        info!("plan stopped before {}", entry.name());
        return Ok(StageOutcome::Stopped);
    }

    debug!("starting");
    let error = match attempt(entry.stage.as_ref(), input, scope, runner).await {
        Ok(output) => return Ok(StageOutcome::Output(output)),
        Err(error) => error,
    };

    let Some(hook) = &entry.on_failure else {
        return Err(error);
    };
    match hook(scope)? {
        HookDecision::Continue => {
            match error.downcast_ref::<ProcessError>().and_then(ProcessError::stderr) {
                Some(stderr) => warn!("recovered from {}: {stderr}", entry.name()),
                None => warn!("recovered from {}: {error:#}", entry.name()),
            }
            Ok(StageOutcome::Recovered)
        }
        HookDecision::Stop => Err(error),
    }
}

async fn attempt<R: CommandRunner>(
    stage: &dyn Stage,
    input: &str,
    scope: &StageScope<'_>,
    runner: &R,
) -> Result<String, Error> {
    let output = match stage.build_invocation(input, scope)? {
        StageAction::Run(invocation) => runner.run(invocation, input).await?,
        StageAction::RunEach(invocations) => {
            let mut combined = String::new();
            for invocation in invocations {
                let output = runner.run(invocation, input).await?;
                if !combined.is_empty() && !combined.ends_with('\n') {
                    combined.push('\n');
                }
                combined.push_str(&output);
            }
            combined
        }
        StageAction::Resolved(output) => output,
    };
    stage.next_input(output, scope)
}
