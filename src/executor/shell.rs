use async_trait::async_trait;
use std::borrow::Cow;
use std::fs::File;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command as TokioCommand;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::encoding::decode_line;
use super::{CommandExecutor, CommandOutput, ExecutorError, OutputLine, OutputStream, StepContext};
use crate::config::{ExecutorConfig, SshConfig};

/// Runs payloads through a POSIX shell, locally or over ssh.
///
/// The payload is written to a temporary script file. Local nodes (and every
/// node when ssh is not configured) run `<shell> <script>`; remote nodes get
/// `ssh <host> <shell> -s` with the script on stdin.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
    timeout: Option<Duration>,
    ssh: Option<SshConfig>,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new("/bin/bash")
    }
}

impl ShellExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            timeout: None,
            ssh: None,
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            timeout: config.timeout_secs.map(Duration::from_secs),
            ssh: config.ssh.clone(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_ssh(mut self, ssh: SshConfig) -> Self {
        self.ssh = Some(ssh);
        self
    }

    fn remote_settings(&self, ctx: &StepContext<'_>) -> Option<&SshConfig> {
        if ctx.node.local {
            None
        } else {
            self.ssh.as_ref()
        }
    }

    /// Program and arguments for a step, given the script path.
    fn invocation(&self, ctx: &StepContext<'_>, script: &Path) -> (String, Vec<String>) {
        let Some(ssh) = self.remote_settings(ctx) else {
            return (self.shell.clone(), vec![script.to_string_lossy().into_owned()]);
        };

        let mut args = ssh.options.clone();
        let user = ctx.node.username.as_deref().or(ssh.default_user.as_deref());
        args.push(match user {
            Some(user) => format!("{user}@{}", ctx.node.host()),
            None => ctx.node.host().to_string(),
        });
        let env = step_env(ctx)
            .iter()
            .map(|(key, value)| format!("{key}={}", shell_quote(value)))
            .collect::<Vec<_>>()
            .join(" ");
        args.push(format!("{env} {} -s", shell_quote(&self.shell)));
        (ssh.binary.clone(), args)
    }
}

/// Option variables reach remote shells as `export` lines ahead of the
/// payload, so their values stay out of the ssh command line.
fn script_text<'p>(ctx: &StepContext<'_>, payload: &'p str, remote: bool) -> Cow<'p, str> {
    if !remote || ctx.options.is_empty() {
        return Cow::Borrowed(payload);
    }
    let mut text: String = ctx
        .options
        .env_vars()
        .map(|(key, value)| format!("export {key}={}\n", shell_quote(value)))
        .collect();
    text.push_str(payload);
    Cow::Owned(text)
}

fn step_env(ctx: &StepContext<'_>) -> [(&'static str, String); 3] {
    [
        ("NODE_NAME", ctx.node.nodename.clone()),
        ("NODE_HOSTNAME", ctx.node.host().to_string()),
        ("JOB_ID", ctx.job_id.to_string()),
    ]
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(&self, ctx: &StepContext<'_>) -> Result<CommandOutput, ExecutorError> {
        let payload = ctx
            .command
            .payload()
            .filter(|p| !p.trim().is_empty())
            .ok_or(ExecutorError::EmptyPayload {
                command_index: ctx.step.command,
            })?;

        let temp_file = tempfile::Builder::new()
            .prefix("jobctl-")
            .suffix(".sh")
            .tempfile()
            .map_err(ExecutorError::ScriptFile)?;
        let remote = self.remote_settings(ctx).is_some();
        let script_text = script_text(ctx, payload, remote);
        fs::write(temp_file.path(), script_text.as_bytes())
            .await
            .map_err(ExecutorError::ScriptFile)?;
        // Closes our handle; the file is removed when `script` drops.
        let script = temp_file.into_temp_path();

        let (program, args) = self.invocation(ctx, &script);
        let mut command = TokioCommand::new(&program);
        command
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if remote {
            let stdin = File::open(&script).map_err(ExecutorError::ScriptFile)?;
            command.stdin(Stdio::from(stdin));
        } else {
            command.stdin(Stdio::null());
            for (key, value) in step_env(ctx) {
                command.env(key, value);
            }
            command.envs(ctx.options.env_vars());
        }

        debug!(
            run_id = %ctx.run_id,
            node = %ctx.node.nodename,
            command_index = ctx.step.command,
            program = %program,
            "Spawning command."
        );
        let mut child = command.spawn().map_err(|e| {
            error!(program = %program, error = %e, "Failed to spawn command.");
            ExecutorError::Spawn {
                program: program.clone(),
                source: e,
            }
        })?;
        info!(pid = ?child.id(), node = %ctx.node.nodename, "Command process started.");

        let stdout = child.stdout.take().ok_or(ExecutorError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(ExecutorError::MissingPipe("stderr"))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let run = async {
            tokio::join!(
                stream_output(stdout, OutputStream::Stdout, tx.clone()),
                stream_output(stderr, OutputStream::Stderr, tx.clone()),
            );
            child.wait().await
        };
        let finished = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.ok(),
            None => Some(run.await),
        };

        let mut output = CommandOutput::default();
        match finished {
            Some(Ok(status)) => {
                debug!(?status, node = %ctx.node.nodename, "Command completed.");
                output.exit_code = status.code().unwrap_or(-1);
            }
            Some(Err(e)) => {
                error!(error = %e, "Failed to wait for command.");
                return Err(ExecutorError::Wait(e));
            }
            None => {
                warn!(
                    node = %ctx.node.nodename,
                    command_index = ctx.step.command,
                    timeout = ?self.timeout,
                    "Command timed out, killing it."
                );
                if let Err(e) = child.kill().await {
                    error!(error = %e, "Failed to kill timed out command.");
                }
                output.exit_code = -1;
                output.timed_out = true;
            }
        }

        drop(tx);
        while let Ok(line) = rx.try_recv() {
            output.lines.push(line);
        }
        Ok(output)
    }
}

async fn stream_output(
    stream: impl AsyncRead + Unpin,
    stream_type: OutputStream,
    tx: mpsc::UnboundedSender<OutputLine>,
) {
    let mut reader = BufReader::new(stream);
    let mut buffer = Vec::new();
    while let Ok(bytes_read) = reader.read_until(b'\n', &mut buffer).await {
        if bytes_read == 0 {
            break;
        }
        let line = OutputLine {
            stream: stream_type,
            text: decode_line(&buffer),
            timestamp: chrono::Utc::now(),
        };
        if tx.send(line).is_err() {
            break;
        }
        buffer.clear();
    }
}
