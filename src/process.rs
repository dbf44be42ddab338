use anyhow::{Context, Result};
use std::future::Future;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command as TokioCommand;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info, warn};

use crate::model::{Invocation, StdioMode};

const SIGINT: i32 = 2;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("i/o error while talking to `{program}`")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error(
        "error running `{program}`: {status} -- the {program} process had the following output on stderr:\n{stderr}"
    )]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

impl ProcessError {
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Failed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

/// Runs one [`Invocation`], feeding it the pipeline's running input.
pub trait CommandRunner {
    fn run(
        &self,
        invocation: Invocation,
        input: &str,
    ) -> impl Future<Output = Result<String, ProcessError>>;
}

/// Spawns real child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    relay: SignalRelay,
}

impl ProcessRunner {
    pub fn new(relay: SignalRelay) -> Self {
        Self { relay }
    }
}

impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: Invocation, input: &str) -> Result<String, ProcessError> {
        debug!(command = %invocation, "running");

        let mut cmd = TokioCommand::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(stdio_for(invocation.stdin))
            .stdout(stdio_for(invocation.output))
            .stderr(stdio_for(invocation.output));

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let _guard = invocation.tolerate_interrupt.then(|| self.relay.catch());

        let feed = async move {
            let Some(mut pipe) = stdin else {
                return Ok(());
            };
            match pipe.write_all(input.as_bytes()).await {
                Err(error) if error.kind() != io::ErrorKind::BrokenPipe => return Err(error),
                _ => {}
            }
            drop(pipe);
            Ok(())
        };
        let (fed, captured_stdout, captured_stderr) =
            tokio::join!(feed, drain(stdout), drain(stderr));
        let io_error = |source| ProcessError::Io {
            program: invocation.program.clone(),
            source,
        };
        fed.map_err(io_error)?;
        let captured_stdout = captured_stdout.map_err(io_error)?;
        let captured_stderr = captured_stderr.map_err(io_error)?;

        let status = child.wait().await.map_err(io_error)?;
        interpret_exit(&invocation, status, captured_stdout, captured_stderr)
    }
}

fn stdio_for(mode: StdioMode) -> Stdio {
    match mode {
        StdioMode::Captured => Stdio::piped(),
        StdioMode::Inherited => Stdio::inherit(),
        StdioMode::Discarded => Stdio::null(),
    }
}

async fn drain<R>(pipe: Option<R>) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return Ok(String::new());
    };
    let mut buf = Vec::new();
    pipe.read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn interpret_exit(
    invocation: &Invocation,
    status: ExitStatus,
    stdout: String,
    stderr: String,
) -> Result<String, ProcessError> {
    if status.signal() == Some(SIGINT) {
        info!("{} interrupted", invocation.program);
        return Ok(String::new());
    }

    if status.success() {
        return Ok(stdout);
    }

    if let Some(benign) = invocation.benign_exit
        && status.code() == Some(benign.code)
    {
        info!(
            "{} exited with code {} {}",
            invocation.program, benign.code, benign.note
        );
        return Ok(stdout);
    }

    Err(ProcessError::Failed {
        program: invocation.program.clone(),
        status: describe_status(status),
        stderr,
    })
}

fn describe_status(status: ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exit code {code}"),
        (None, Some(signal)) => format!("terminated by signal {signal}"),
        (None, None) => status.to_string(),
    }
}

/// Prints what would run instead of running it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplainRunner;

impl CommandRunner for ExplainRunner {
    async fn run(&self, invocation: Invocation, input: &str) -> Result<String, ProcessError> {
        Ok(explain(&invocation, input))
    }
}

fn explain(invocation: &Invocation, input: &str) -> String {
    let command = invocation.to_string();
    let upstream = input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>();

    if invocation.stdin != StdioMode::Captured || upstream.is_empty() {
        return format!("{command}\n");
    }

    match upstream.as_slice() {
        [single] => format!("{single} | {command}\n"),
        many => format!("( {} ) | {command}\n", many.join(" && \\\n  ")),
    }
}

/// Decides whether an interrupt ends tugboat or is left to the running child.
#[derive(Debug, Clone, Default)]
pub struct SignalRelay {
    catching: Arc<AtomicBool>,
}

impl SignalRelay {
    pub fn install(&self) -> Result<()> {
        let mut interrupt =
            signal(SignalKind::interrupt()).context("failed to listen for SIGINT")?;
        let mut terminate =
            signal(SignalKind::terminate()).context("failed to listen for SIGTERM")?;
        let catching = self.catching.clone();

        tokio::spawn(async move {
            loop {
                let exit_code = tokio::select! {
                    Some(()) = interrupt.recv() => 130,
                    Some(()) = terminate.recv() => 143,
                    else => break,
                };
                if catching.load(Ordering::SeqCst) {
                    debug!("signal left to the running command");
                    continue;
                }
                warn!("received signal, exiting");
                std::process::exit(exit_code);
            }
        });

        Ok(())
    }

    pub fn catch(&self) -> CatchGuard {
        self.catching.store(true, Ordering::SeqCst);
        CatchGuard {
            catching: self.catching.clone(),
        }
    }
}

#[must_use]
pub struct CatchGuard {
    catching: Arc<AtomicBool>,
}

impl Drop for CatchGuard {
    fn drop(&mut self) {
        self.catching.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CommandRunner, ExplainRunner, ProcessError, ProcessRunner, SignalRelay, interpret_exit,
    };
    use crate::model::{Invocation, StdioMode};
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::sync::atomic::Ordering;

    fn sh(script: &str) -> Invocation {
        Invocation::new("sh").args(["-c", script])
    }

    #[tokio::test]
    async fn captured_stdin_is_fed_to_the_child() {
        let runner = ProcessRunner::default();
        let invocation = Invocation::new("cat").stdin(StdioMode::Captured);
        let output = runner
            .run(invocation, "kind: Service\n")
            .await
            .expect("cat should succeed");
        assert_eq!(output, "kind: Service\n");
    }

    #[tokio::test]
    async fn discarded_stdin_sees_no_input() {
        let runner = ProcessRunner::default();
        let output = runner
            .run(Invocation::new("cat"), "ignored")
            .await
            .expect("cat should succeed");
        assert_eq!(output, "");
    }

    #[tokio::test]
    async fn failure_carries_program_and_stderr() {
        let runner = ProcessRunner::default();
        let error = runner
            .run(sh("echo 'objects not found' >&2; exit 3"), "")
            .await
            .expect_err("exit 3 should fail");

        assert_eq!(error.stderr(), Some("objects not found\n"));
        assert_eq!(
            error.to_string(),
            "error running `sh`: exit code 3 -- the sh process had the following output on stderr:\nobjects not found\n"
        );
    }

    #[tokio::test]
    async fn benign_exit_code_is_success() {
        let runner = ProcessRunner::default();
        let invocation = sh("printf 'listing\\n'; exit 1").benign_exit(1, "(benign)");
        let output = runner.run(invocation, "").await.expect("exit 1 is benign");
        assert_eq!(output, "listing\n");
    }

    #[tokio::test]
    async fn both_streams_drain_without_deadlock() {
        let runner = ProcessRunner::default();
        let script = "i=0; while [ $i -lt 20000 ]; do echo out $i; echo err $i >&2; i=$((i+1)); done";
        let output = runner.run(sh(script), "").await.expect("script should succeed");
        assert_eq!(output.lines().count(), 20000);
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let runner = ProcessRunner::default();
        let error = runner
            .run(Invocation::new("tugboat-no-such-program"), "")
            .await
            .expect_err("spawn should fail");
        assert!(matches!(error, ProcessError::Spawn { .. }));
    }

    #[test]
    fn sigint_termination_is_not_an_error() {
        let invocation = Invocation::new("kubectl");
        let status = ExitStatus::from_raw(2);
        let output = interpret_exit(&invocation, status, "partial".to_string(), String::new())
            .expect("interrupt is benign");
        assert_eq!(output, "");
    }

    #[tokio::test]
    async fn child_killed_by_sigint_yields_empty_output() {
        let runner = ProcessRunner::default();
        let output = runner
            .run(sh("echo partial; kill -INT $$"), "")
            .await
            .expect("interrupt is benign");
        assert_eq!(output, "");
    }

    #[test]
    fn exit_code_one_without_benign_marker_fails() {
        let invocation = Invocation::new("kubectl");
        let status = ExitStatus::from_raw(256);
        let error = interpret_exit(&invocation, status, String::new(), "boom".to_string())
            .expect_err("exit 1 should fail");
        assert!(error.to_string().starts_with("error running `kubectl`: exit code 1"));
    }

    #[test]
    fn catch_guard_clears_flag_on_drop() {
        let relay = SignalRelay::default();
        {
            let _guard = relay.catch();
            assert!(relay.catching.load(Ordering::SeqCst));
        }
        assert!(!relay.catching.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn explain_pipes_upstream_commands_into_stdin_consumers() {
        let runner = ExplainRunner;
        let render = "helm template web ./charts/web\nhelm template api ./charts/api\n";
        let apply = Invocation::new("kubectl")
            .args(["apply", "-f", "-"])
            .stdin(StdioMode::Captured);

        let output = runner.run(apply, render).await.expect("explain never fails");
        assert_eq!(
            output,
            "( helm template web ./charts/web && \\\n  helm template api ./charts/api ) | kubectl apply -f -\n"
        );

        let standalone = runner
            .run(Invocation::new("helm").args(["template", "web"]), render)
            .await
            .expect("explain never fails");
        assert_eq!(standalone, "helm template web\n");
    }
}
