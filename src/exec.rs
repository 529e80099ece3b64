//! Blocking subprocess execution with a hard per-call timeout.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{HarnessError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A fully-described external command.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout,
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn envs(mut self, vars: &[(String, String)]) -> Self {
        self.env.extend(vars.iter().cloned());
        self
    }

    /// Program and arguments joined by spaces, for logs and error messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a command that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs external commands. Everything that shells out goes through this seam.
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion.
    ///
    /// Returns `ToolUnavailable` when the binary cannot be found and
    /// `ToolTimeout` when the deadline passes; a non-zero exit is still `Ok`.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands as real child processes.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        if let Some(dir) = &spec.cwd {
            if !dir.is_dir() {
                return Err(HarnessError::Config(format!(
                    "Directory {} does not exist",
                    dir.display()
                )));
            }
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        tracing::debug!(command = %spec.display(), timeout_secs = spec.timeout.as_secs(), "spawning");

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                HarnessError::ToolUnavailable {
                    tool: spec.program.clone(),
                    message: format!("{} is not installed or not on PATH", spec.program),
                }
            } else {
                HarnessError::Io(e)
            }
        })?;

        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let deadline = Instant::now() + spec.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                tracing::debug!(command = %spec.display(), "killed after timeout");
                return Err(HarnessError::ToolTimeout {
                    tool: spec.program.clone(),
                    seconds: spec.timeout.as_secs(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        // A grandchild that inherited the pipes can keep them open after the
        // direct child exits, so the readers share the same deadline.
        let (stdout, stderr) = match (join_reader(stdout, deadline), join_reader(stderr, deadline)) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                tracing::debug!(command = %spec.display(), "output pipes still open at deadline");
                return Err(HarnessError::ToolTimeout {
                    tool: spec.program.clone(),
                    seconds: spec.timeout.as_secs(),
                });
            }
        };
        let output = CommandOutput {
            code: status.code(),
            stdout,
            stderr,
        };
        tracing::debug!(command = %spec.display(), code = ?output.code, "finished");
        Ok(output)
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut source: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = source.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// `None` when the stream is still open at `deadline`.
fn join_reader(handle: Option<JoinHandle<String>>, deadline: Instant) -> Option<String> {
    let Some(handle) = handle else {
        return Some(String::new());
    };
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(POLL_INTERVAL);
    }
    Some(handle.join().unwrap_or_default())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted runner for exercising tool adapters without real binaries.

    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone)]
    pub enum Scripted {
        Exit(i32, String, String),
        NotFound,
        Timeout,
    }

    /// Answers each command with the first script whose key prefixes
    /// `CommandSpec::display()`. Unscripted commands behave as missing binaries.
    #[derive(Default)]
    pub struct ScriptedRunner {
        scripts: Vec<(String, Scripted)>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn on(mut self, prefix: &str, response: Scripted) -> Self {
            self.scripts.push((prefix.to_string(), response));
            self
        }

        pub fn ok(self, prefix: &str, stdout: &str) -> Self {
            self.on(prefix, Scripted::Exit(0, stdout.to_string(), String::new()))
        }

        pub fn exit(self, prefix: &str, code: i32, stdout: &str, stderr: &str) -> Self {
            self.on(
                prefix,
                Scripted::Exit(code, stdout.to_string(), stderr.to_string()),
            )
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            let line = spec.display();
            self.calls.lock().unwrap().push(line.clone());
            let script = self
                .scripts
                .iter()
                .find(|(prefix, _)| line.starts_with(prefix.as_str()))
                .map(|(_, s)| s.clone())
                .unwrap_or(Scripted::NotFound);
            match script {
                Scripted::Exit(code, stdout, stderr) => Ok(CommandOutput {
                    code: Some(code),
                    stdout,
                    stderr,
                }),
                Scripted::NotFound => Err(HarnessError::ToolUnavailable {
                    tool: spec.program.clone(),
                    message: "not installed".into(),
                }),
                Scripted::Timeout => Err(HarnessError::ToolTimeout {
                    tool: spec.program.clone(),
                    seconds: spec.timeout.as_secs(),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_program_and_args() {
        let spec = CommandSpec::new("tflint", Duration::from_secs(60))
            .arg("--format=json")
            .args(["--chdir", "infra"]);
        assert_eq!(spec.display(), "tflint --format=json --chdir infra");
    }

    #[test]
    fn missing_binary_is_tool_unavailable() {
        let spec = CommandSpec::new("iac-harness-no-such-binary", Duration::from_secs(5));
        let err = SystemRunner.run(&spec).unwrap_err();
        assert!(matches!(err, HarnessError::ToolUnavailable { .. }));
    }

    #[test]
    fn missing_working_directory_is_config_error() {
        let spec = CommandSpec::new("sh", Duration::from_secs(5)).current_dir("/no/such/dir/here");
        let err = SystemRunner.run(&spec).unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[cfg(unix)]
    #[test]
    fn captures_stdout_stderr_and_code() {
        let spec = CommandSpec::new("sh", Duration::from_secs(10))
            .args(["-c", "echo out; echo err >&2; exit 3"]);
        let output = SystemRunner.run(&spec).unwrap();
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert!(!output.success());
    }

    #[cfg(unix)]
    #[test]
    fn passes_environment() {
        let spec = CommandSpec::new("sh", Duration::from_secs(10))
            .args(["-c", "printf %s \"$HARNESS_TARGET\""])
            .envs(&[("HARNESS_TARGET".into(), "localstack".into())]);
        assert_eq!(SystemRunner.run(&spec).unwrap().stdout, "localstack");
    }

    #[cfg(unix)]
    #[test]
    fn background_process_holding_pipes_hits_deadline() {
        let spec = CommandSpec::new("sh", Duration::from_millis(500))
            .args(["-c", "sleep 5 & echo started"]);
        let started = Instant::now();
        let err = SystemRunner.run(&spec).unwrap_err();
        assert!(matches!(err, HarnessError::ToolTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn kills_on_timeout() {
        let spec = CommandSpec::new("sleep", Duration::from_millis(200)).arg("5");
        let started = Instant::now();
        let err = SystemRunner.run(&spec).unwrap_err();
        assert!(matches!(err, HarnessError::ToolTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
