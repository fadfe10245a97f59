//! External toolchain invocation.
//!
//! Runs the generator and builder programs as blocking child processes and
//! merges their stdout and stderr into one line stream.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;

/// One toolchain step of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildStep {
    /// Project generation: dependency resolution, lockfile.
    Generate,
    /// Compile and link.
    Build,
}

impl BuildStep {
    /// Tag prefixed to every log line of this step.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Build => "build",
        }
    }
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Result of running one step.
#[derive(Debug)]
pub(crate) struct StepOutcome {
    pub success: bool,
    /// Every line written to the log by this step, tag included.
    pub log: String,
}

/// Resolve a program name through `search_path`, falling back to the host
/// `PATH`. Paths with a directory component are resolved against `cwd`.
pub(crate) fn resolve_program(
    program: &Path,
    search_path: Option<&OsStr>,
    cwd: &Path,
) -> Result<PathBuf, String> {
    let paths = search_path
        .map(OsStr::to_os_string)
        .or_else(|| std::env::var_os("PATH"));
    which::which_in(program, paths, cwd)
        .map_err(|e| format!("cannot find `{}`: {}", program.display(), e))
}

/// A single external command for one step.
#[derive(Debug)]
pub(crate) struct StepCommand {
    pub step: BuildStep,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(OsString, OsString)>,
    pub current_dir: PathBuf,
}

impl StepCommand {
    /// `PATH` as the child will see it, if overridden.
    fn search_path(&self) -> Option<&OsStr> {
        self.env
            .iter()
            .rev()
            .find(|(name, _)| is_path_var(name))
            .map(|(_, value)| value.as_os_str())
    }

    /// Run the command to completion.
    ///
    /// Output lines are written to `log_file` prefixed with the step tag and
    /// handed to `sink` as they arrive. A program that cannot be found or
    /// spawned counts as a failed step, with the reason in the log.
    pub fn run(
        &self,
        log_file: &mut dyn Write,
        sink: &mut dyn FnMut(BuildStep, &str),
    ) -> StepOutcome {
        let mut log = String::new();
        let mut emit = |line: &str| {
            let tagged = format!("[{}] {}", self.step.tag(), line);
            // Log writes are best effort; the captured text still reaches the caller.
            let _ = writeln!(log_file, "{}", tagged);
            log.push_str(&tagged);
            log.push('\n');
            sink(self.step, line);
        };

        let search_path = self.search_path();
        let program = match resolve_program(&self.program, search_path, &self.current_dir) {
            Ok(program) => program,
            Err(message) => {
                emit(&message);
                return StepOutcome {
                    success: false,
                    log,
                };
            }
        };

        tracing::debug!(
            "Running {} step: {} {:?}",
            self.step,
            program.display(),
            self.args
        );

        let mut cmd = Command::new(&program);
        cmd.args(&self.args)
            .current_dir(&self.current_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (name, value) in &self.env {
            cmd.env(name, value);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                emit(&format!("failed to run `{}`: {}", program.display(), e));
                return StepOutcome {
                    success: false,
                    log,
                };
            }
        };

        let (tx, rx) = mpsc::channel();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        // Ends once both pipes are closed.
        for line in rx {
            emit(&line);
        }
        for reader in readers {
            let _ = reader.join();
        }

        let success = match child.wait() {
            Ok(status) if status.success() => true,
            Ok(status) => {
                emit(&format!("`{}` exited with {}", program.display(), status));
                false
            }
            Err(e) => {
                emit(&format!("failed to wait for `{}`: {}", program.display(), e));
                false
            }
        };

        StepOutcome { success, log }
    }
}

fn is_path_var(name: &OsStr) -> bool {
    if cfg!(windows) {
        name.eq_ignore_ascii_case("PATH")
    } else {
        name == "PATH"
    }
}

fn forward_lines<R: Read + Send + 'static>(
    pipe: R,
    tx: mpsc::Sender<String>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']).to_string();
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            }
        }
    })
}
