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

//! Crate-wide error types. Each subsystem gets its own enum; failures that
//! cross a module boundary roll up into [`ReynardError`] via `#[from]`.

use miette::Diagnostic;
use std::io;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum ReynardError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("node unavailable: requested {requested}, only {available} free")]
    NodeUnavailable { requested: usize, available: usize },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("pipeline failure: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("sensor tree error: {0}")]
    Sensor(#[from] SensorError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("tracing init error: {0}")]
    TracingInit(#[from] tracing_subscriber::util::TryInitError),

    #[error("tracing filter error: {0}")]
    TracingFilter(#[from] tracing_subscriber::filter::ParseError),

    #[error("actor channel closed unexpectedly")]
    ChannelClosed,
}

pub type ReynardResult<T> = Result<T, ReynardError>;

/// Surfaced to the caller, never retried.
#[derive(Error, Debug, Diagnostic)]
pub enum ConfigError {
    #[error("missing config file and no default available: {0}")]
    Missing(String),
    #[error("malformed config: {0}")]
    Malformed(#[from] serde_yaml::Error),
    #[error("malformed template: {0}")]
    MalformedTemplate(#[from] serde_json::Error),
    #[error("no template found for (project={project}, receiver={receiver}, tag={tag})")]
    NoTemplate {
        project: String,
        receiver: String,
        tag: String,
    },
    #[error("unknown receiver '{receiver}' for telescope '{telescope}'")]
    UnknownReceiver { telescope: String, receiver: String },
    #[error("no network interface found with address {0}")]
    NoSuchNic(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// RPC timeout or dropped connection. Degrades a monitor-style
/// probe to `degraded`; fails a configure fan-out outright.
#[derive(Error, Debug, Diagnostic)]
pub enum TransportError {
    #[error("request to '{node}' timed out after {timeout_secs}s")]
    Timeout { node: String, timeout_secs: u64 },
    #[error("connection to '{node}' dropped: {reason}")]
    Dropped { node: String, reason: String },
    #[error("no node registered with name '{0}'")]
    UnknownNode(String),
    #[error("malformed katcp reply: {0}")]
    Protocol(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// A state-machine transition that could not complete; logged and
/// moves the owning pipeline to `failed`.
#[derive(Error, Debug, Diagnostic)]
pub enum PipelineError {
    #[error("no pipeline type registered with name '{0}'")]
    UnknownType(String),
    #[error("pipeline named '{0}' already exists")]
    NameExists(String),
    #[error("pipeline '{name}' missing required sensor '{sensor}' at configure time")]
    MissingSensor { name: String, sensor: String },
    #[error("invalid transition: cannot '{action}' while in state '{state}'")]
    InvalidTransition { state: String, action: String },
    #[error("child process '{0}' failed to spawn: {1}")]
    SpawnFailed(String, String),
    #[error("pipeline '{0}' failed: {1}")]
    Failed(String, String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Error, Debug, Diagnostic)]
pub enum SensorError {
    #[error("sensor '{0}' already exists")]
    AlreadyExists(String),
    #[error("no sensor named '{0}'")]
    NotFound(String),
    #[error("value of wrong type for sensor '{name}': expected {expected}")]
    WrongType { name: String, expected: &'static str },
}

pub type SensorResult<T> = Result<T, SensorError>;
