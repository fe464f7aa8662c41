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

//! Registry of pipeline types, keyed by name. Replaces the decorator-based
//! `@reynard_pipeline(...)` registration with an explicit `register` call at
//! service start.

use super::PipelineKind;
use crate::error::{PipelineError, PipelineResult};
use std::collections::HashMap;

/// Static metadata about a pipeline type, surfaced verbatim by
/// `pipeline-avail`.
#[derive(Debug, Clone)]
pub struct PipelineDescriptor {
    pub name: String,
    pub description: String,
    pub version: String,
    pub requires_nvidia: bool,
    pub required_sensors: Vec<String>,
    pub required_containers: Vec<String>,
}

type Factory = Box<dyn Fn() -> Box<dyn PipelineKind> + Send + Sync>;

struct Entry {
    descriptor: PipelineDescriptor,
    factory: Factory,
}

#[derive(Default)]
pub struct PipelineRegistry {
    entries: HashMap<String, Entry>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        descriptor: PipelineDescriptor,
        factory: impl Fn() -> Box<dyn PipelineKind> + Send + Sync + 'static,
    ) {
        self.entries.insert(
            descriptor.name.clone(),
            Entry { descriptor, factory: Box::new(factory) },
        );
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &PipelineDescriptor> {
        self.entries.values().map(|e| &e.descriptor)
    }

    pub fn descriptor(&self, name: &str) -> PipelineResult<&PipelineDescriptor> {
        self.entries
            .get(name)
            .map(|e| &e.descriptor)
            .ok_or_else(|| PipelineError::UnknownType(name.to_owned()))
    }

    pub fn create(&self, name: &str) -> PipelineResult<Box<dyn PipelineKind>> {
        self.entries
            .get(name)
            .map(|e| (e.factory)())
            .ok_or_else(|| PipelineError::UnknownType(name.to_owned()))
    }
}
