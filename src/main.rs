mod app;
mod cli;
mod config;
mod helm;
mod input;
mod kubectl;
mod manifest;
mod model;
mod plan;
mod process;
mod select;
mod ui;

use anyhow::{Context, Result};
use clap::Parser;
use cli::CliArgs;
use config::{DeployFile, Settings, ToolConfig};
use model::Verb;
use process::{ExplainRunner, ProcessRunner, SignalRelay};
use std::path::Path;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use ui::TerminalPrompter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.effective_log_filter())?;

    let config = ToolConfig::load(args.config.as_deref())?;
    let settings = Settings::resolve(&args, config)?;
    debug!(?settings, "resolved settings");

    let deploy = DeployFile::load(&args.filename)?;
    let base = args.filename.parent().unwrap_or(Path::new(""));
    let charts = deploy.chart_refs(base, args.chart.as_deref())?;
    let groups = app::group_by_namespace(
        &charts,
        args.namespace.as_deref(),
        deploy.namespace.as_deref(),
    );

    let verb = args.command.verb();
    let prompter = TerminalPrompter;
    let output = if verb == Verb::Explain {
        app::run_verb(verb, &groups, &settings, &ExplainRunner, &prompter).await?
    } else {
        let relay = SignalRelay::default();
        relay.install()?;
        let runner = ProcessRunner::new(relay);
        app::run_verb(verb, &groups, &settings, &runner, &prompter).await?
    };

    if !output.is_empty() {
        print!("{output}");
    }
    Ok(())
}

fn init_tracing(level_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level_filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to initialize tracing filter")?;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .try_init();

    Ok(())
}
