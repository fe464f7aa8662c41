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

use super::{ListenerHandle, SamplingStrategy, SensorEvent, SensorStatus, SensorType, SensorValue};
use crate::error::{SensorError, SensorResult};
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::{
    sync::{mpsc, oneshot},
    time::interval,
};
use tracing::{instrument, warn};

pub type SensorReading = (DateTime<Utc>, SensorStatus, SensorValue);

#[derive(Debug, Clone)]
pub struct SensorSpec {
    pub name: String,
    pub description: String,
    pub unit: Option<String>,
    pub ty: SensorType,
    pub default: SensorValue,
}

enum Command {
    AddSensor(SensorSpec, oneshot::Sender<SensorResult<()>>),
    SetValue {
        name: String,
        value: SensorValue,
        status: Option<SensorStatus>,
        resp: oneshot::Sender<SensorResult<()>>,
    },
    GetReading(String, oneshot::Sender<SensorResult<SensorReading>>),
    RegisterListener {
        name: String,
        strategy: SamplingStrategy,
        handler: mpsc::Sender<SensorEvent>,
        resp: oneshot::Sender<SensorResult<ListenerHandle>>,
    },
    UnregisterListener(ListenerHandle, oneshot::Sender<()>),
    PeriodicFlush(ListenerHandle),
}

/// Cheap, cloneable handle to a running [`SensorTree`] actor.
#[derive(Clone)]
pub struct SensorApi {
    tx: mpsc::Sender<Command>,
}

struct SensorRecord {
    spec: SensorSpec,
    value: SensorValue,
    status: SensorStatus,
    timestamp: DateTime<Utc>,
}

struct ListenerRecord {
    sensor: String,
    strategy: SamplingStrategy,
    handler: mpsc::Sender<SensorEvent>,
    cancel: Arc<AtomicBool>,
}

/// Owned sensor store, run as an actor draining a single command channel.
pub struct SensorTree {
    rx: mpsc::Receiver<Command>,
    tx: mpsc::Sender<Command>,
    sensors: HashMap<String, SensorRecord>,
    listeners: HashMap<u64, ListenerRecord>,
    next_listener_id: u64,
}

impl SensorTree {
    pub fn new() -> (Self, SensorApi) {
        let (tx, rx) = mpsc::channel(1024);
        let api = SensorApi { tx: tx.clone() };
        (
            Self {
                rx,
                tx,
                sensors: HashMap::new(),
                listeners: HashMap::new(),
                next_listener_id: 0,
            },
            api,
        )
    }

    pub async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            self.handle(cmd);
        }
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::AddSensor(spec, resp) => {
                resp.send(self.add_sensor(spec)).ok();
            }
            Command::SetValue {
                name,
                value,
                status,
                resp,
            } => {
                resp.send(self.set_value(&name, value, status)).ok();
            }
            Command::GetReading(name, resp) => {
                resp.send(self.get_reading(&name)).ok();
            }
            Command::RegisterListener {
                name,
                strategy,
                handler,
                resp,
            } => {
                resp.send(self.register_listener(name, strategy, handler))
                    .ok();
            }
            Command::UnregisterListener(handle, resp) => {
                self.unregister_listener(handle);
                resp.send(()).ok();
            }
            Command::PeriodicFlush(handle) => self.periodic_flush(handle),
        }
    }

    fn add_sensor(&mut self, spec: SensorSpec) -> SensorResult<()> {
        if self.sensors.contains_key(&spec.name) {
            return Err(SensorError::AlreadyExists(spec.name));
        }
        let record = SensorRecord {
            value: spec.default.clone(),
            status: SensorStatus::Unknown,
            timestamp: Utc::now(),
            spec,
        };
        self.sensors.insert(record.spec.name.clone(), record);
        Ok(())
    }

    fn set_value(
        &mut self,
        name: &str,
        value: SensorValue,
        status: Option<SensorStatus>,
    ) -> SensorResult<()> {
        let record = self
            .sensors
            .get_mut(name)
            .ok_or_else(|| SensorError::NotFound(name.to_owned()))?;
        if !value.matches(&record.spec.ty) {
            return Err(SensorError::WrongType {
                name: name.to_owned(),
                expected: record.spec.ty_name(),
            });
        }
        record.value = value.clone();
        record.status = status.unwrap_or(SensorStatus::Nominal);
        record.timestamp = Utc::now();
        let event = SensorEvent {
            name: name.to_owned(),
            timestamp: record.timestamp,
            status: record.status,
            value,
        };
        for listener in self.listeners.values() {
            if listener.sensor == name && matches!(listener.strategy, SamplingStrategy::Event) {
                listener.handler.try_send(event.clone()).ok();
            }
        }
        Ok(())
    }

    fn get_reading(&self, name: &str) -> SensorResult<SensorReading> {
        let record = self
            .sensors
            .get(name)
            .ok_or_else(|| SensorError::NotFound(name.to_owned()))?;
        Ok((record.timestamp, record.status, record.value.clone()))
    }

    fn register_listener(
        &mut self,
        name: String,
        strategy: SamplingStrategy,
        handler: mpsc::Sender<SensorEvent>,
    ) -> SensorResult<ListenerHandle> {
        if !self.sensors.contains_key(&name) {
            return Err(SensorError::NotFound(name));
        }
        for (id, existing) in &self.listeners {
            if existing.sensor == name && existing.handler.same_channel(&handler) {
                return Ok(ListenerHandle(*id));
            }
        }
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        let cancel = Arc::new(AtomicBool::new(false));

        if let SamplingStrategy::Period(period) = strategy {
            let tx = self.tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut ticker = interval(period);
                loop {
                    ticker.tick().await;
                    if cancel.load(Ordering::Relaxed) {
                        break;
                    }
                    if tx
                        .send(Command::PeriodicFlush(ListenerHandle(id)))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            });
        }

        self.listeners.insert(
            id,
            ListenerRecord {
                sensor: name,
                strategy,
                handler,
                cancel,
            },
        );
        Ok(ListenerHandle(id))
    }

    fn unregister_listener(&mut self, handle: ListenerHandle) {
        if let Some(listener) = self.listeners.remove(&handle.0) {
            listener.cancel.store(true, Ordering::Relaxed);
        }
    }

    fn periodic_flush(&mut self, handle: ListenerHandle) {
        let Some(listener) = self.listeners.get(&handle.0) else {
            return;
        };
        let Some(record) = self.sensors.get(&listener.sensor) else {
            return;
        };
        let event = SensorEvent {
            name: listener.sensor.clone(),
            timestamp: record.timestamp,
            status: record.status,
            value: record.value.clone(),
        };
        listener.handler.try_send(event).ok();
    }
}

impl SensorType {
    fn ty_name(&self) -> &'static str {
        match self {
            SensorType::Float => "float",
            SensorType::Int => "int",
            SensorType::Bool => "bool",
            SensorType::String => "string",
            SensorType::Discrete { .. } => "discrete",
        }
    }
}

impl SensorApi {
    #[instrument(skip(self))]
    pub async fn add_sensor(&self, spec: SensorSpec) -> SensorResult<()> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Command::AddSensor(spec, tx)).await.ok();
        rx.await.unwrap_or(Err(SensorError::NotFound(
            "sensor tree shut down".to_owned(),
        )))
    }

    #[instrument(skip(self, value))]
    pub async fn set_value(
        &self,
        name: impl Into<String>,
        value: SensorValue,
        status: Option<SensorStatus>,
    ) -> SensorResult<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::SetValue {
                name: name.into(),
                value,
                status,
                resp: tx,
            })
            .await
            .ok();
        rx.await.unwrap_or(Err(SensorError::NotFound(
            "sensor tree shut down".to_owned(),
        )))
    }

    pub async fn get_value(&self, name: impl Into<String>) -> SensorResult<SensorReading> {
        self.get_reading(name).await
    }

    pub async fn get_reading(&self, name: impl Into<String>) -> SensorResult<SensorReading> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::GetReading(name.into(), tx))
            .await
            .ok();
        rx.await.unwrap_or(Err(SensorError::NotFound(
            "sensor tree shut down".to_owned(),
        )))
    }

    pub async fn register_listener(
        &self,
        name: impl Into<String>,
        strategy: SamplingStrategy,
        handler: mpsc::Sender<SensorEvent>,
    ) -> SensorResult<ListenerHandle> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Command::RegisterListener {
                name: name.into(),
                strategy,
                handler,
                resp: tx,
            })
            .await
            .ok();
        rx.await.unwrap_or(Err(SensorError::NotFound(
            "sensor tree shut down".to_owned(),
        )))
    }

    pub async fn unregister_listener(&self, handle: ListenerHandle) {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(Command::UnregisterListener(handle, tx))
            .await
            .is_ok()
        {
            rx.await.ok();
        }
    }

    /// Convenience snapshot of every sensor's current reading, used by
    /// [`crate::aggregator`] to build the JSON/XML snapshot.
    pub async fn snapshot(&self, names: &[&str]) -> HashMap<String, SensorReading> {
        let mut out = HashMap::new();
        for name in names {
            if let Ok(reading) = self.get_reading(*name).await {
                out.insert((*name).to_owned(), reading);
            } else {
                warn!("sensor '{name}' missing from snapshot");
            }
        }
        out
    }
}
