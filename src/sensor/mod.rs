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

//! Typed, observable named-value store, grounded on the
//! `katcp.Sensor`/`DeviceServer.add_sensor` model in `status_server.py` and
//! built as an owned actor behind a cheap, cloneable `Api` handle.

mod listener;
mod tree;

pub use listener::{ListenerHandle, SamplingStrategy, SensorEvent};
pub use tree::{SensorApi, SensorReading, SensorSpec, SensorTree};

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorStatus {
    Unknown,
    Nominal,
    Warn,
    Error,
    Inactive,
}

impl fmt::Display for SensorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SensorStatus::Unknown => "unknown",
            SensorStatus::Nominal => "nominal",
            SensorStatus::Warn => "warn",
            SensorStatus::Error => "error",
            SensorStatus::Inactive => "inactive",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum SensorType {
    Float,
    Int,
    Bool,
    String,
    Discrete { params: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    String(String),
}

impl SensorValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            SensorValue::Float(_) => "float",
            SensorValue::Int(_) => "int",
            SensorValue::Bool(_) => "bool",
            SensorValue::String(_) => "string",
        }
    }

    pub fn matches(&self, ty: &SensorType) -> bool {
        matches!(
            (self, ty),
            (SensorValue::Float(_), SensorType::Float)
                | (SensorValue::Int(_), SensorType::Int)
                | (SensorValue::Bool(_), SensorType::Bool)
                | (SensorValue::String(_), SensorType::String)
                | (SensorValue::String(_), SensorType::Discrete { .. })
        )
    }
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorValue::Float(v) => write!(f, "{v}"),
            SensorValue::Int(v) => write!(f, "{v}"),
            SensorValue::Bool(v) => write!(f, "{v}"),
            SensorValue::String(v) => write!(f, "{v}"),
        }
    }
}
