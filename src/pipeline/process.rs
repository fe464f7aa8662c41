/*
 *  Copyright (C) 2025 Michael Bachmann
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU Affero General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU Affero General Public License for more details.
 *
 *  You should have received a copy of the GNU Affero General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! A single spawned child, tracked the way `reynard.pipelines.pipeline.Process`
//! wraps a `subprocess.Popen`: start once, poll a status, kill, wait.

use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::fs::File;
use tokio::process::{Child, Command};

/// How many trailing lines `status()` reports per child, mirroring
/// `container.logs(tail=20)` in `junk_2_db_2_null.py::_status`.
const LOG_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running,
    Failed,
    Completed,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessState::NotStarted => "not started",
            ProcessState::Running => "running",
            ProcessState::Failed => "failed",
            ProcessState::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// A named child process. `name` is the salted logical name used for
/// container/log lookups; `cmd`/`args` are kept for `restart`.
pub struct ManagedProcess {
    pub name: String,
    cmd: String,
    args: Vec<String>,
    child: Option<Child>,
    exit: Option<ExitStatus>,
    log_path: PathBuf,
}

impl ManagedProcess {
    /// Spawns immediately; `cmd` is split on whitespace the way `shlex.split`
    /// tokenizes a shell command. Stdout/stderr are redirected into a
    /// per-child log file under the system temp dir, opened before the child
    /// is spawned and closed (via `Stdio::from`) before `spawn` returns.
    pub async fn spawn(name: impl Into<String>, cmd: &str) -> std::io::Result<Self> {
        let name = name.into();
        let mut parts = cmd.split_whitespace();
        let program = parts.next().unwrap_or_default().to_owned();
        let args: Vec<String> = parts.map(str::to_owned).collect();

        let log_path = std::env::temp_dir().join(format!("reynard-{name}.log"));
        let log_file = File::create(&log_path).await?.into_std().await;

        let child = Command::new(&program)
            .args(&args)
            .stdout(Stdio::from(log_file.try_clone()?))
            .stderr(Stdio::from(log_file))
            .spawn()?;
        Ok(Self {
            name,
            cmd: program,
            args,
            child: Some(child),
            exit: None,
            log_path,
        })
    }

    /// Last [`LOG_TAIL_LINES`] lines written by the child so far.
    pub async fn log_tail(&self) -> Vec<String> {
        read_tail(&self.log_path).await
    }

    /// A detached, read-only reference to this child's log file, cheap to
    /// hand to a status reader while the `ManagedProcess` itself has been
    /// moved into its watchdog task.
    pub fn log_handle(&self) -> ChildLogHandle {
        ChildLogHandle {
            path: self.log_path.clone(),
        }
    }

    pub fn status(&mut self) -> ProcessState {
        let Some(child) = self.child.as_mut() else {
            return ProcessState::NotStarted;
        };
        match child.try_wait() {
            Ok(None) => ProcessState::Running,
            Ok(Some(status)) => {
                self.exit = Some(status);
                if status.success() {
                    ProcessState::Completed
                } else {
                    ProcessState::Failed
                }
            }
            Err(_) => ProcessState::Failed,
        }
    }

    pub async fn kill(&mut self) {
        if self.exit.is_some() {
            return;
        }
        if let Some(child) = self.child.as_mut() {
            child.start_kill().ok();
            if let Ok(status) = child.wait().await {
                self.exit = Some(status);
            }
        }
    }

    /// Awaits exit, consuming the child handle. Used by the watchdog task.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        let child = self.child.as_mut().expect("wait() on unstarted process");
        let status = child.wait().await?;
        self.exit = Some(status);
        Ok(status)
    }

    pub async fn restart(&mut self) -> std::io::Result<()> {
        self.kill().await;
        let log_file = File::options()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?
            .into_std()
            .await;
        let child = Command::new(&self.cmd)
            .args(&self.args)
            .stdout(Stdio::from(log_file.try_clone()?))
            .stderr(Stdio::from(log_file))
            .spawn()?;
        self.child = Some(child);
        self.exit = None;
        Ok(())
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit.and_then(|s| s.code())
    }
}

/// Runs a one-shot setup/teardown command to completion, the way the
/// teacher's pipelines run a blocking (non-`detach`) `docker.run(...)` to
/// create or destroy a dada ring buffer: spawn, await exit, done — never
/// added to a pipeline's watched child set.
pub async fn run_to_completion(
    name: impl Into<String>,
    cmd: &str,
) -> std::io::Result<ExitStatus> {
    let mut process = ManagedProcess::spawn(name, cmd).await?;
    process.wait().await
}

impl fmt::Display for ManagedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit {
            Some(status) if !status.success() => {
                write!(f, "'{}' failed (return code: {:?})", self.name, status.code())
            }
            Some(_) => write!(f, "'{}' completed", self.name),
            None => write!(f, "'{}' running", self.name),
        }
    }
}

/// Cheap handle to a child's log file, independent of the `ManagedProcess`
/// (and therefore usable after ownership of the child has moved into its
/// watchdog task).
#[derive(Clone)]
pub struct ChildLogHandle {
    path: PathBuf,
}

impl ChildLogHandle {
    pub async fn tail(&self) -> Vec<String> {
        read_tail(&self.path).await
    }
}

async fn read_tail(path: &std::path::Path) -> Vec<String> {
    let Ok(content) = tokio::fs::read_to_string(path).await else {
        return Vec::new();
    };
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(LOG_TAIL_LINES);
    lines[start..].iter().map(|s| (*s).to_owned()).collect()
}
