//! Toolchain process invocation.
//!
//! Every call into the host toolchain goes through [`ProcessRunner`], which
//! is the only place this crate starts processes. Tests plug in a closure
//! that returns captured output instead.

use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use crate::error::ExecError;

/// A single toolchain invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    /// Program to run (e.g. "go").
    pub program: String,
    /// Arguments, without the program name.
    pub args: Vec<String>,
    /// Working directory; `None` inherits the current one.
    pub dir: Option<PathBuf>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        ToolCommand {
            program: program.into(),
            args: Vec::new(),
            dir: None,
            env: Vec::new(),
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

    pub fn dir(mut self, dir: Option<PathBuf>) -> Self {
        self.dir = dir;
        self
    }

    pub fn envs(mut self, env: &[(String, String)]) -> Self {
        self.env.extend(env.iter().cloned());
        self
    }

    /// Returns the package arguments that follow the subcommand and flags.
    ///
    /// The value of `-f` is skipped.
    pub fn packages(&self) -> Vec<&str> {
        let mut pkgs = Vec::new();
        let mut iter = self.args.iter().skip(1);
        while let Some(arg) = iter.next() {
            if arg == "-f" {
                iter.next();
            } else if !arg.starts_with('-') {
                pkgs.push(arg.as_str());
            }
        }
        pkgs
    }

    /// Reports whether a flag is present.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        let mut iter = self.args.iter();
        while let Some(arg) = iter.next() {
            write!(f, " {}", arg)?;
            // Templates are long and multi-line.
            if arg == "-f" && iter.next().is_some() {
                write!(f, " <template>")?;
            }
        }
        if let Some(dir) = &self.dir {
            write!(f, " (in {})", dir.display())?;
        }
        Ok(())
    }
}

/// Runs toolchain commands and returns their stdout.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, cmd: &ToolCommand) -> Result<Vec<u8>, ExecError>;
}

impl<F> ProcessRunner for F
where
    F: Fn(&ToolCommand) -> Result<Vec<u8>, ExecError> + Send + Sync,
{
    fn run(&self, cmd: &ToolCommand) -> Result<Vec<u8>, ExecError> {
        self(cmd)
    }
}

/// Runs commands as OS processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRunner;

impl ProcessRunner for CommandRunner {
    fn run(&self, cmd: &ToolCommand) -> Result<Vec<u8>, ExecError> {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);
        if let Some(dir) = &cmd.dir {
            command.current_dir(dir);
        }
        for (key, value) in &cmd.env {
            command.env(key, value);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = command.spawn().map_err(ExecError::with_source)?;
        let mut guard = ChildGuard(Some(child));
        let (stdout, stderr) = guard.drain().map_err(ExecError::with_source)?;
        let status = guard.wait().map_err(ExecError::with_source)?;

        if status.success() {
            Ok(stdout)
        } else {
            Err(ExecError {
                stderr,
                source: None,
                status: Some(status.to_string()),
            })
        }
    }
}

/// Owns a child process until it has been reaped.
///
/// Dropping the guard before `wait` kills and reaps the child.
struct ChildGuard(Option<Child>);

impl ChildGuard {
    fn drain(&mut self) -> std::io::Result<(Vec<u8>, Vec<u8>)> {
        let Some(child) = self.0.as_mut() else {
            return Ok((Vec::new(), Vec::new()));
        };
        let mut out_pipe = child.stdout.take();
        let mut err_pipe = child.stderr.take();

        // stderr is drained concurrently so neither pipe can fill up and
        // block the child.
        std::thread::scope(|scope| -> std::io::Result<(Vec<u8>, Vec<u8>)> {
            let err_reader = scope.spawn(move || {
                let mut buf = Vec::new();
                if let Some(pipe) = err_pipe.as_mut() {
                    pipe.read_to_end(&mut buf)?;
                }
                Ok::<_, std::io::Error>(buf)
            });

            let mut stdout = Vec::new();
            let out_result = match out_pipe.as_mut() {
                Some(pipe) => pipe.read_to_end(&mut stdout).map(|_| ()),
                None => Ok(()),
            };
            let stderr = err_reader
                .join()
                .unwrap_or_else(|_| Err(std::io::Error::other("stderr reader panicked")));
            out_result?;
            Ok((stdout, stderr?))
        })
    }

    fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        match self.0.take() {
            Some(mut child) => child.wait(),
            None => Err(std::io::Error::other("process already reaped")),
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.0.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_command_packages() {
        let cmd = ToolCommand::new("go")
            .args(["list", "-e", "-export", "-f", "{{.ImportPath}}", "fmt", "strings"]);
        assert_eq!(cmd.packages(), vec!["fmt", "strings"]);
        assert!(cmd.has_flag("-e"));
        assert!(!cmd.has_flag("-deps"));
    }

    #[test]
    fn test_tool_command_display() {
        let cmd = ToolCommand::new("go")
            .args(["list", "-f", "{{.Name}}\n", "fmt"])
            .dir(Some(PathBuf::from("/work")));
        assert_eq!(cmd.to_string(), "go list -f <template> fmt (in /work)");
    }

    #[test]
    fn test_closure_runner() {
        let runner = |cmd: &ToolCommand| -> Result<Vec<u8>, ExecError> {
            Ok(cmd.args.join(" ").into_bytes())
        };
        let out = runner.run(&ToolCommand::new("go").args(["list", "fmt"])).unwrap();
        assert_eq!(out, b"list fmt");
    }

    #[test]
    fn test_spawn_failure_is_exec_error() {
        let cmd = ToolCommand::new("vo-packages-no-such-tool-xyz");
        let err = CommandRunner.run(&cmd).unwrap_err();
        assert!(err.source.is_some());
        assert!(err.stderr.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_stdout_and_stderr_captured() {
        let ok = ToolCommand::new("sh").args(["-c", "printf 'a b'; printf warn >&2"]);
        assert_eq!(CommandRunner.run(&ok).unwrap(), b"a b");

        let fail = ToolCommand::new("sh").args(["-c", "echo 'bad path' >&2; exit 1"]);
        let err = CommandRunner.run(&fail).unwrap_err();
        assert_eq!(err.to_string(), "bad path");
        assert!(err.status.is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_invalid_working_dir() {
        let cmd = ToolCommand::new("sh")
            .args(["-c", "true"])
            .dir(Some(PathBuf::from("/.vo-packages-missing-dir")));
        let err = CommandRunner.run(&cmd).unwrap_err();
        assert!(err.source.is_some());
    }

    /// Asserts that the child `pid` was killed and reaped promptly.
    #[cfg(unix)]
    fn assert_reaped(pid: u32, started: std::time::Instant) {
        assert!(
            started.elapsed() < std::time::Duration::from_secs(10),
            "child {} was waited for instead of killed",
            pid
        );
        // A reaped child has no process table entry left.
        #[cfg(target_os = "linux")]
        assert!(!std::path::Path::new(&format!("/proc/{}", pid)).exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_child_guard_kills_on_drop() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        let started = std::time::Instant::now();

        drop(ChildGuard(Some(child)));
        assert_reaped(pid, started);
    }

    #[cfg(unix)]
    #[test]
    fn test_child_guard_kills_on_panic() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        let started = std::time::Instant::now();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = ChildGuard(Some(child));
            panic!("reader failed");
        }));
        assert!(result.is_err());
        assert_reaped(pid, started);
    }

    #[cfg(unix)]
    #[test]
    fn test_child_guard_wait_reaps_once() {
        let child = Command::new("sh").args(["-c", "exit 3"]).spawn().unwrap();
        let mut guard = ChildGuard(Some(child));

        let status = guard.wait().unwrap();
        assert_eq!(status.code(), Some(3));
        assert!(guard.wait().is_err());
    }
}
