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

//! The Pipeline Instance state machine, grounded on
//! `reynard.pipelines.pipeline.Pipeline`: an actor run as a single task, so
//! every transition is serialized for free by the actor's own command loop
//! owning all mutable state.

mod builtin;
mod process;
mod registry;
mod watchdog;

pub use builtin::{JunkDbNull, UdpDbDspsr};
pub use process::{ChildLogHandle, ManagedProcess, ProcessState};
pub use registry::{PipelineDescriptor, PipelineRegistry};
pub use watchdog::{ChildHandle, Standdown, WatchdogFired, WatchdogOutcome};

use process::run_to_completion;

use crate::{
    error::{PipelineError, PipelineResult},
    sensor::SensorReading,
};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use std::{collections::HashMap, fmt};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, instrument, warn};

/// A configure-time snapshot of the sensors a pipeline declared as required.
pub type SensorSnapshot = HashMap<String, SensorReading>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Configuring,
    Ready,
    Starting,
    Running,
    Stopping,
    Deconfiguring,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Idle => "idle",
            PipelineState::Configuring => "configuring",
            PipelineState::Ready => "ready",
            PipelineState::Starting => "starting",
            PipelineState::Running => "running",
            PipelineState::Stopping => "stopping",
            PipelineState::Deconfiguring => "deconfiguring",
            PipelineState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One child a [`PipelineKind`] wants spawned, either at configure time (the
/// dada-buffer-style persistent infrastructure) or at start time (the
/// work process).
pub struct ChildSpec {
    pub name: String,
    pub command: String,
    /// A persistent child fails the pipeline on *any* exit, not only a
    /// non-zero one.
    pub persistent: bool,
}

impl ChildSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>, persistent: bool) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            persistent,
        }
    }
}

/// What a pipeline type knows how to do. Pure and synchronous — actually
/// running commands, watchdogging and state tracking is owned by
/// [`PipelineInstance`], the same split a base `Pipeline` class draws
/// between itself and subclasses implementing `_configure`/`_start`/
/// `_deconfigure`.
///
/// `setup`/`teardown` mirror the non-detached `dada_db`-style commands
/// `_configure`/`_deconfigure` run in `junk_2_db_2_null.py`: a single
/// one-shot command expected to exit quickly, checked for success but never
/// registered as a watched child. `start_children` is the only source of
/// long-running, watchdog-supervised children (the `detach=True` containers
/// spawned from `_start`).
pub trait PipelineKind: Send {
    fn required_sensors(&self) -> &[String];
    fn setup(&mut self, config: &Value, sensors: &SensorSnapshot) -> PipelineResult<Option<String>>;
    fn start_children(&mut self, sensors: &SensorSnapshot) -> PipelineResult<Vec<ChildSpec>>;
    fn teardown(&mut self) -> PipelineResult<Option<String>>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ChildStatus {
    pub name: String,
    pub running: bool,
    pub log_tail: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub name: String,
    pub state: PipelineState,
    pub children: Vec<ChildStatus>,
}

enum Command {
    Configure {
        config: Value,
        sensors: SensorSnapshot,
        resp: oneshot::Sender<PipelineResult<()>>,
    },
    Start {
        sensors: SensorSnapshot,
        resp: oneshot::Sender<PipelineResult<()>>,
    },
    Stop {
        failed: bool,
        resp: oneshot::Sender<PipelineResult<()>>,
    },
    Reset {
        resp: oneshot::Sender<PipelineResult<()>>,
    },
    Deconfigure {
        resp: oneshot::Sender<PipelineResult<()>>,
    },
    Status {
        resp: oneshot::Sender<PipelineStatus>,
    },
}

/// Cheap, cloneable handle to a running [`PipelineInstance`] actor.
#[derive(Clone)]
pub struct PipelineApi {
    pub name: String,
    tx: mpsc::Sender<Command>,
}

struct ChildRecord {
    handle: ChildHandle,
    process_name: String,
    log: ChildLogHandle,
    /// Flipped to `Some` by an incoming [`WatchdogFired`] before the state
    /// transition it drives is announced.
    exited: Option<Option<i32>>,
}

/// Owned pipeline actor. Runs as its own task; every public operation is a
/// message round-trip, so transitions are trivially serialized by a single
/// per-instance lock.
pub struct PipelineInstance {
    name: String,
    salt: String,
    state: PipelineState,
    kind: Box<dyn PipelineKind>,
    config: Option<Value>,
    sensor_snapshot: SensorSnapshot,
    children: HashMap<String, ChildRecord>,
    standdown: Standdown,
    watchdog_tx: mpsc::Sender<WatchdogFired>,
    watchdog_rx: mpsc::Receiver<WatchdogFired>,
    cmd_rx: mpsc::Receiver<Command>,
    on_state_change: Vec<mpsc::Sender<(String, PipelineState)>>,
}

impl PipelineInstance {
    pub fn new(name: impl Into<String>, kind: Box<dyn PipelineKind>) -> (Self, PipelineApi) {
        let name = name.into();
        let (tx, cmd_rx) = mpsc::channel(32);
        let (watchdog_tx, watchdog_rx) = mpsc::channel(32);
        let salt: String = rand::rng()
            .sample_iter(&rand::distr::Alphanumeric)
            .take(6)
            .map(char::from)
            .collect();
        (
            Self {
                name: name.clone(),
                salt,
                state: PipelineState::Idle,
                kind,
                config: None,
                sensor_snapshot: SensorSnapshot::new(),
                children: HashMap::new(),
                standdown: Standdown::new(),
                watchdog_tx,
                watchdog_rx,
                cmd_rx,
                on_state_change: Vec::new(),
            },
            PipelineApi { name, tx },
        )
    }

    /// Registers a listener fed `(pipeline_name, new_state)` on every
    /// transition, in FSM order.
    pub fn on_state_change(&mut self, listener: mpsc::Sender<(String, PipelineState)>) {
        self.on_state_change.push(listener);
    }

    /// Resolves the salted container/process name for a logical child name.
    fn salted(&self, logical: &str) -> String {
        format!("{}-{}-{}", self.name, logical, self.salt)
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle(cmd).await,
                        None => break,
                    }
                }
                Some(fired) = self.watchdog_rx.recv() => {
                    self.on_watchdog_fired(fired).await;
                }
            }
        }
    }

    async fn announce(&mut self) {
        self.on_state_change
            .retain(|tx| tx.try_send((self.name.clone(), self.state)).is_ok());
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Configure {
                config,
                sensors,
                resp,
            } => {
                let result = self.do_configure(config, sensors).await;
                resp.send(result).ok();
            }
            Command::Start { sensors, resp } => {
                let result = self.do_start(sensors).await;
                resp.send(result).ok();
            }
            Command::Stop { failed, resp } => {
                let result = self.do_stop(failed).await;
                resp.send(result).ok();
            }
            Command::Reset { resp } => {
                let result = self.do_reset().await;
                resp.send(result).ok();
            }
            Command::Deconfigure { resp } => {
                let result = self.do_deconfigure().await;
                resp.send(result).ok();
            }
            Command::Status { resp } => {
                let status = self.do_status().await;
                resp.send(status).ok();
            }
        }
    }

    #[instrument(skip_all, fields(pipeline = %self.name))]
    async fn do_configure(&mut self, config: Value, sensors: SensorSnapshot) -> PipelineResult<()> {
        if self.state != PipelineState::Idle {
            return Err(PipelineError::InvalidTransition {
                state: self.state.to_string(),
                action: "configure".to_owned(),
            });
        }
        self.state = PipelineState::Configuring;
        self.announce().await;

        for required in self.kind.required_sensors() {
            if !sensors.contains_key(required) {
                self.state = PipelineState::Failed;
                self.announce().await;
                return Err(PipelineError::MissingSensor {
                    name: self.name.clone(),
                    sensor: required.clone(),
                });
            }
        }

        let setup_cmd = match self.kind.setup(&config, &sensors) {
            Ok(cmd) => cmd,
            Err(e) => {
                self.state = PipelineState::Failed;
                self.announce().await;
                return Err(e);
            }
        };

        self.standdown.reset();
        if let Some(cmd) = setup_cmd {
            let name = self.salted("setup");
            match run_to_completion(name, &cmd).await {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    self.state = PipelineState::Failed;
                    self.announce().await;
                    return Err(PipelineError::SpawnFailed(
                        self.name.clone(),
                        format!("setup command exited with {status:?}"),
                    ));
                }
                Err(e) => {
                    self.state = PipelineState::Failed;
                    self.announce().await;
                    return Err(PipelineError::SpawnFailed(self.name.clone(), e.to_string()));
                }
            }
        }

        self.config = Some(config);
        self.sensor_snapshot = sensors;
        self.state = PipelineState::Ready;
        self.announce().await;
        info!("pipeline '{}' configured", self.name);
        Ok(())
    }

    #[instrument(skip_all, fields(pipeline = %self.name))]
    async fn do_start(&mut self, sensors: SensorSnapshot) -> PipelineResult<()> {
        if self.state != PipelineState::Ready {
            return Err(PipelineError::InvalidTransition {
                state: self.state.to_string(),
                action: "start".to_owned(),
            });
        }
        self.state = PipelineState::Starting;
        self.announce().await;

        let specs = match self.kind.start_children(&sensors) {
            Ok(specs) => specs,
            Err(e) => {
                self.state = PipelineState::Failed;
                self.announce().await;
                return Err(e);
            }
        };

        for spec in specs {
            if let Err(e) = self.spawn_child(spec).await {
                self.state = PipelineState::Failed;
                self.announce().await;
                return Err(e);
            }
        }

        self.sensor_snapshot = sensors;
        self.state = PipelineState::Running;
        self.announce().await;
        info!("pipeline '{}' running", self.name);
        Ok(())
    }

    /// `failed` mirrors the watchdog/§4.3 `stop(failed=true|false)` split:
    /// a failed stop lands in `failed`, a clean one lands back in `ready`.
    #[instrument(skip_all, fields(pipeline = %self.name))]
    async fn do_stop(&mut self, failed: bool) -> PipelineResult<()> {
        if !matches!(
            self.state,
            PipelineState::Running | PipelineState::Failed | PipelineState::Starting
        ) {
            return Err(PipelineError::InvalidTransition {
                state: self.state.to_string(),
                action: "stop".to_owned(),
            });
        }
        self.state = PipelineState::Stopping;
        self.announce().await;

        self.standdown.set();
        for (_, record) in self.children.drain() {
            record.handle.kill().await;
        }

        self.state = if failed {
            PipelineState::Failed
        } else {
            PipelineState::Ready
        };
        self.announce().await;
        Ok(())
    }

    #[instrument(skip_all, fields(pipeline = %self.name))]
    async fn do_reset(&mut self) -> PipelineResult<()> {
        self.standdown.set();
        for (_, record) in self.children.drain() {
            record.handle.kill().await;
        }
        self.config = None;
        self.sensor_snapshot.clear();
        self.state = PipelineState::Idle;
        self.announce().await;
        Ok(())
    }

    /// Idempotent, always attempts teardown regardless of prior errors.
    #[instrument(skip_all, fields(pipeline = %self.name))]
    async fn do_deconfigure(&mut self) -> PipelineResult<()> {
        if !matches!(self.state, PipelineState::Ready | PipelineState::Failed) {
            return Err(PipelineError::InvalidTransition {
                state: self.state.to_string(),
                action: "deconfigure".to_owned(),
            });
        }
        self.state = PipelineState::Deconfiguring;
        self.announce().await;

        self.standdown.set();
        for (_, record) in self.children.drain() {
            record.handle.kill().await;
        }

        match self.kind.teardown() {
            Ok(Some(cmd)) => {
                let name = self.salted("teardown");
                if let Err(e) = run_to_completion(name, &cmd).await {
                    warn!("pipeline '{}' teardown command failed: {e}", self.name);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("pipeline '{}' teardown hook failed: {e}", self.name),
        }

        self.config = None;
        self.sensor_snapshot.clear();

        self.state = PipelineState::Idle;
        self.announce().await;
        Ok(())
    }

    async fn do_status(&mut self) -> PipelineStatus {
        let mut children = Vec::with_capacity(self.children.len());
        for (logical, record) in &self.children {
            children.push(ChildStatus {
                name: logical.clone(),
                running: record.exited.is_none(),
                log_tail: record.log.tail().await,
            });
        }
        PipelineStatus {
            name: self.name.clone(),
            state: self.state,
            children,
        }
    }

    async fn spawn_child(&mut self, spec: ChildSpec) -> PipelineResult<()> {
        let salted = self.salted(&spec.name);
        let process = ManagedProcess::spawn(salted.clone(), &spec.command)
            .await
            .map_err(|e| PipelineError::SpawnFailed(spec.name.clone(), e.to_string()))?;
        let log = process.log_handle();
        let handle = watchdog::watch(
            process,
            spec.persistent,
            self.standdown.clone(),
            self.watchdog_tx.clone(),
        );
        self.children.insert(
            spec.name.clone(),
            ChildRecord {
                handle,
                process_name: salted,
                log,
                exited: None,
            },
        );
        Ok(())
    }

    async fn on_watchdog_fired(&mut self, fired: WatchdogFired) {
        let Some((logical, _)) = self
            .children
            .iter()
            .find(|(_, r)| r.process_name == fired.child_name)
            .map(|(k, _)| (k.clone(), ()))
        else {
            warn!("watchdog fired for unknown child '{}'", fired.child_name);
            return;
        };
        if let Some(record) = self.children.get_mut(&logical) {
            record.exited = Some(match fired.outcome {
                WatchdogOutcome::Failed { exit_code } | WatchdogOutcome::Stopped { exit_code } => {
                    exit_code
                }
            });
        }
        match fired.outcome {
            WatchdogOutcome::Failed { .. } => {
                warn!("child '{}' watchdog fired failed", fired.child_name);
                self.do_stop(true).await.ok();
            }
            WatchdogOutcome::Stopped { .. } => {
                info!("child '{}' exited cleanly", fired.child_name);
                self.do_stop(false).await.ok();
            }
        }
    }
}

impl PipelineApi {
    pub async fn configure(&self, config: Value, sensors: SensorSnapshot) -> PipelineResult<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::Configure {
                config,
                sensors,
                resp: tx,
            })
            .await
            .ok();
        rx.await.unwrap_or_else(|_| Err(dead_actor(&self.name)))
    }

    pub async fn start(&self, sensors: SensorSnapshot) -> PipelineResult<()> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Command::Start { sensors, resp: tx }).await.ok();
        rx.await.unwrap_or_else(|_| Err(dead_actor(&self.name)))
    }

    pub async fn stop(&self) -> PipelineResult<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::Stop {
                failed: false,
                resp: tx,
            })
            .await
            .ok();
        rx.await.unwrap_or_else(|_| Err(dead_actor(&self.name)))
    }

    pub async fn reset(&self) -> PipelineResult<()> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Command::Reset { resp: tx }).await.ok();
        rx.await.unwrap_or_else(|_| Err(dead_actor(&self.name)))
    }

    pub async fn deconfigure(&self) -> PipelineResult<()> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Command::Deconfigure { resp: tx }).await.ok();
        rx.await.unwrap_or_else(|_| Err(dead_actor(&self.name)))
    }

    pub async fn status(&self) -> PipelineResult<PipelineStatus> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Command::Status { resp: tx }).await.ok();
        rx.await.map_err(|_| dead_actor(&self.name))
    }
}

fn dead_actor(name: &str) -> PipelineError {
    PipelineError::Failed(name.to_owned(), "pipeline actor shut down".to_owned())
}
