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

use super::{SensorStatus, SensorValue};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Per-subscription sampling strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplingStrategy {
    None,
    Event,
    Period(Duration),
}

#[derive(Debug, Clone)]
pub struct SensorEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub status: SensorStatus,
    pub value: SensorValue,
}

/// Opaque handle returned by `register_listener`, used only for
/// `unregister_listener`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(pub(super) u64);
