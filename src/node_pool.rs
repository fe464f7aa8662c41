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

//! Priority-ordered allocation pool for backend nodes, grounded
//! on `nodes/nodes.py`'s `NodeManager`: free ∪ allocated always equals the
//! full node set, allocation is atomic (all-or-nothing), and lower priority
//! numbers are handed out first.

use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    net::IpAddr,
    sync::{Arc, Mutex},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub host: String,
    pub port: u16,
    pub nics: Vec<IpAddr>,
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_priority() -> u32 {
    3
}

/// Thread-safe node pool; cheap to clone, shared by the interface that
/// allocates nodes to observations and the monitors that report on them.
#[derive(Clone)]
pub struct NodePool {
    inner: Arc<Mutex<Pool>>,
}

struct Pool {
    nodes: HashSet<Node>,
    allocated: HashSet<Node>,
}

#[derive(Debug, thiserror::Error)]
#[error("cannot allocate {requested} nodes, only {available} available")]
pub struct NodeUnavailable {
    pub requested: usize,
    pub available: usize,
}

impl From<NodeUnavailable> for crate::error::ReynardError {
    fn from(e: NodeUnavailable) -> Self {
        crate::error::ReynardError::NodeUnavailable {
            requested: e.requested,
            available: e.available,
        }
    }
}

impl NodePool {
    pub fn new(nodes: impl IntoIterator<Item = Node>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Pool {
                nodes: nodes.into_iter().collect(),
                allocated: HashSet::new(),
            })),
        }
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let nodes: Vec<Node> = serde_json::from_str(json)?;
        Ok(Self::new(nodes))
    }

    /// Allocate `count` lowest-priority-number-first nodes, or fail leaving
    /// the pool untouched.
    pub fn allocate(&self, count: usize) -> Result<Vec<Node>, NodeUnavailable> {
        let mut pool = self.inner.lock().expect("node pool mutex poisoned");
        let mut available: Vec<Node> = pool.nodes.difference(&pool.allocated).cloned().collect();
        if available.len() < count {
            return Err(NodeUnavailable {
                requested: count,
                available: available.len(),
            });
        }
        available.sort_by_key(|node| node.priority);
        let chosen: Vec<Node> = available.into_iter().take(count).collect();
        for node in &chosen {
            pool.allocated.insert(node.clone());
        }
        Ok(chosen)
    }

    /// Errors if any node in `nodes` is not currently allocated; the pool is
    /// still left with every other node in `nodes` released.
    pub fn deallocate(&self, nodes: &[Node]) -> Result<(), crate::error::ReynardError> {
        let mut pool = self.inner.lock().expect("node pool mutex poisoned");
        let mut unknown = Vec::new();
        for node in nodes {
            if !pool.allocated.remove(node) {
                unknown.push(node.host.clone());
            }
        }
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(crate::error::ReynardError::Invariant(format!(
                "cannot deallocate unallocated node(s): {}",
                unknown.join(", ")
            )))
        }
    }

    pub fn reset(&self) {
        let mut pool = self.inner.lock().expect("node pool mutex poisoned");
        pool.allocated.clear();
    }

    pub fn available(&self) -> Vec<Node> {
        let pool = self.inner.lock().expect("node pool mutex poisoned");
        pool.nodes.difference(&pool.allocated).cloned().collect()
    }

    pub fn used(&self) -> Vec<Node> {
        let pool = self.inner.lock().expect("node pool mutex poisoned");
        pool.allocated.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(host: &str, priority: u32) -> Node {
        Node {
            host: host.to_owned(),
            port: 5100,
            nics: vec![],
            priority,
        }
    }

    #[test]
    fn allocates_lowest_priority_first() {
        let pool = NodePool::new(vec![node("a", 3), node("b", 0), node("c", 1)]);
        let allocated = pool.allocate(2).unwrap();
        let hosts: Vec<_> = allocated.iter().map(|n| n.host.clone()).collect();
        assert_eq!(hosts, vec!["b".to_owned(), "c".to_owned()]);
        assert_eq!(pool.available().len(), 1);
    }

    #[test]
    fn allocation_is_atomic_on_failure() {
        let pool = NodePool::new(vec![node("a", 0)]);
        assert!(pool.allocate(2).is_err());
        assert_eq!(pool.available().len(), 1);
        assert_eq!(pool.used().len(), 0);
    }

    #[test]
    fn deallocate_and_reset_restore_the_pool() {
        let pool = NodePool::new(vec![node("a", 0), node("b", 1)]);
        let allocated = pool.allocate(2).unwrap();
        pool.deallocate(&allocated[..1]).unwrap();
        assert_eq!(pool.available().len(), 1);
        pool.reset();
        assert_eq!(pool.available().len(), 2);
    }

    #[test]
    fn deallocating_an_unallocated_node_is_an_error() {
        let pool = NodePool::new(vec![node("a", 0), node("b", 1)]);
        pool.allocate(1).unwrap();
        assert!(pool.deallocate(&[node("b", 1)]).is_err());
    }
}
