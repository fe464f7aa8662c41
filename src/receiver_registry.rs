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

//! Per-(telescope, receiver) control hooks, grounded on
//! `receiver.py`'s `reynard_receiver`/`get_receiver` registry and
//! `effelsberg/receivers/p200_3.py`'s `configure`/`trigger`/`deconfigure`.

use crate::{error::ConfigError, node_pool::Node};
use async_trait::async_trait;
use std::collections::HashMap;

/// Firmware control surface a concrete receiver implements. `trigger` fires
/// the receiver's own start-of-scan signal independent of pipeline startup.
#[async_trait]
pub trait ReceiverClass: Send + Sync {
    fn get_capture_nodes(&self) -> Vec<Node>;
    async fn configure(&self) -> Result<(), String>;
    async fn trigger(&self) -> Result<(), String>;
    async fn deconfigure(&self) -> Result<(), String>;
}

/// A receiver whose firmware needs no explicit control calls: capture nodes
/// only.
pub struct StaticReceiver {
    nodes: Vec<Node>,
}

impl StaticReceiver {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }
}

#[async_trait]
impl ReceiverClass for StaticReceiver {
    fn get_capture_nodes(&self) -> Vec<Node> {
        self.nodes.clone()
    }

    async fn configure(&self) -> Result<(), String> {
        Ok(())
    }

    async fn trigger(&self) -> Result<(), String> {
        Ok(())
    }

    async fn deconfigure(&self) -> Result<(), String> {
        Ok(())
    }
}

/// `(telescope, receiver)` → [`ReceiverClass`], keyed case-insensitively the
/// way `reynard_receiver` lower-cases both parts before registering.
#[derive(Default)]
pub struct ReceiverRegistry {
    receivers: HashMap<(String, String), Box<dyn ReceiverClass>>,
}

impl ReceiverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        telescope: &str,
        receiver: &str,
        class: Box<dyn ReceiverClass>,
    ) {
        self.receivers
            .insert((telescope.to_lowercase(), receiver.to_lowercase()), class);
    }

    pub fn get(&self, telescope: &str, receiver: &str) -> Result<&dyn ReceiverClass, ConfigError> {
        self.receivers
            .get(&(telescope.to_lowercase(), receiver.to_lowercase()))
            .map(|b| b.as_ref())
            .ok_or_else(|| ConfigError::UnknownReceiver {
                telescope: telescope.to_owned(),
                receiver: receiver.to_owned(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut registry = ReceiverRegistry::new();
        registry.register("Effelsberg", "P200-3", Box::new(StaticReceiver::new(vec![])));
        assert!(registry.get("effelsberg", "p200-3").is_ok());
        assert!(registry.get("effelsberg", "unknown").is_err());
    }
}
