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

//! Reynard: a distributed control plane for a radio telescope's pulsar
//! backend — Telescope State Aggregator, Backend Node (UBN), Backend
//! Interface (UBI), and Observation Controller (CAM), each a standalone
//! service sharing this crate's wire protocol, sensor tree, and config
//! layers.

pub mod aggregator;
pub mod config;
pub mod controller;
pub mod error;
pub mod escape;
pub mod katcp;
pub mod node_pool;
pub mod pipeline;
pub mod receiver_registry;
pub mod sensor;
pub mod socket;
pub mod telemetry;
pub mod ubi;
pub mod ubn;
