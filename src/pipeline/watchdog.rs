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

//! One watchdog task per spawned child: awaits its exit and reports the
//! outcome back to the owning pipeline instance, unless the instance has
//! already latched standdown (an intentional stop/deconfigure in progress).
//! Grounded on the `_set_watchdog`/global container-event demultiplexing
//! described for `Junk2Db2Null`/`Udp2Db2Dspsr`; the Docker container-events
//! stream those watchdogs subscribe to becomes, here, a dedicated task per
//! child awaiting `Child::wait()` directly, so the owning service's select
//! loop never blocks on child I/O.

use super::process::ManagedProcess;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::mpsc;
use tracing::debug;

/// Fires `failed` when persistent, or when the exit code is non-zero.
/// Otherwise a clean exit returns the pipeline to `ready`.
#[derive(Debug, Clone, Copy)]
pub enum WatchdogOutcome {
    Failed { exit_code: Option<i32> },
    Stopped { exit_code: Option<i32> },
}

#[derive(Debug)]
pub struct WatchdogFired {
    pub child_name: String,
    pub outcome: WatchdogOutcome,
}

/// Shared latch set by `stop`/`deconfigure` before children are killed, so a
/// watchdog racing the intentional teardown does not also report a failure.
#[derive(Clone, Default)]
pub struct Standdown(Arc<AtomicBool>);

impl Standdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle to a running watchdog task, held by the owning
/// [`super::PipelineInstance`] so it can request the child be killed without
/// needing `&mut` access to the `ManagedProcess` the watchdog task now owns
/// exclusively.
#[derive(Clone)]
pub struct ChildHandle {
    kill: mpsc::Sender<()>,
}

impl ChildHandle {
    /// Requests the watchdog kill its child. Idempotent: a send to an
    /// already-finished watchdog task is silently dropped.
    pub async fn kill(&self) {
        self.kill.send(()).await.ok();
    }
}

/// Spawns the background task that awaits `process`'s exit, or kills it on
/// request. `persistent` children fail the pipeline on any exit, not only
/// non-zero ones — used for the long-lived buffer processes a pipeline
/// spawns at configure time.
pub fn watch(
    mut process: ManagedProcess,
    persistent: bool,
    standdown: Standdown,
    fired: mpsc::Sender<WatchdogFired>,
) -> ChildHandle {
    let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        let name = process.name.clone();
        tokio::select! {
            result = process.wait() => {
                if standdown.is_set() {
                    debug!("watchdog for '{name}' exited during standdown, not reporting");
                    return;
                }
                let exit_code = result.ok().and_then(|s| s.code());
                let outcome = if persistent || exit_code != Some(0) {
                    WatchdogOutcome::Failed { exit_code }
                } else {
                    WatchdogOutcome::Stopped { exit_code }
                };
                fired.send(WatchdogFired { child_name: name, outcome }).await.ok();
            }
            _ = kill_rx.recv() => {
                debug!("watchdog for '{name}' received kill request");
                process.kill().await;
            }
        }
    });
    ChildHandle { kill: kill_tx }
}
