//! System ordering.
//!
//! Each system contributes two nodes to the ordering graph, `Start(S)` (where
//! its execute runs) and `End(S)` (once everything inside it has run), with
//! the edge `Start(S) → End(S)`. Constraints add edges:
//!
//! ```text
//! with G     Start(G) → Start(S),  End(S) → End(G)
//! after X    End(X)   → Start(S)
//! before X   End(S)   → Start(X)
//! ```
//!
//! The graph is sorted with Kahn's algorithm. Among ready nodes the one with
//! the lowest registration sequence goes first, so unconstrained systems run
//! in registration order. Execution order is the order of the `Start` nodes.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;

use crate::config::{Insert, SystemUuid};
use crate::error::SchedulerError;

/// A cycle was found; carries the nodes that could not be ordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError<T> {
    pub unresolved: Vec<T>,
}

/// Kahn's algorithm over `nodes` and `(parent, child)` edges. Ready nodes are
/// taken smallest first.
///
/// # Errors
///
/// Returns [`CycleError`] listing the nodes on or behind a cycle.
pub fn topological_sort<T>(
    nodes: impl IntoIterator<Item = T>,
    edges: impl IntoIterator<Item = (T, T)>,
) -> Result<Vec<T>, CycleError<T>>
where
    T: Copy + Ord + Hash,
{
    let node_list: Vec<T> = nodes.into_iter().collect();
    let mut adjacency: HashMap<T, Vec<T>> = HashMap::new();
    let mut in_degree: HashMap<T, usize> = node_list.iter().map(|node| (*node, 0)).collect();

    for (parent, child) in edges {
        adjacency.entry(parent).or_default().push(child);
        if let Some(degree) = in_degree.get_mut(&child) {
            *degree += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<T>> = node_list
        .iter()
        .filter(|node| in_degree.get(*node).copied().unwrap_or(0) == 0)
        .map(|node| Reverse(*node))
        .collect();

    let mut sorted = Vec::with_capacity(node_list.len());
    while let Some(Reverse(node)) = ready.pop() {
        sorted.push(node);
        for child in adjacency.get(&node).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(child) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(*child));
                }
            }
        }
    }

    if sorted.len() == node_list.len() {
        Ok(sorted)
    } else {
        let mut unresolved: Vec<T> = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(node, _)| node)
            .collect();
        unresolved.sort();
        Err(CycleError { unresolved })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Phase {
    Start,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct Node {
    seq: u64,
    phase: Phase,
}

impl Node {
    fn start(seq: u64) -> Self {
        Self {
            seq,
            phase: Phase::Start,
        }
    }

    fn end(seq: u64) -> Self {
        Self {
            seq,
            phase: Phase::End,
        }
    }
}

/// One registered system as seen by the resolver.
#[derive(Debug, Clone, Copy)]
pub struct OrderEntry<'a> {
    pub seq: u64,
    pub uuid: &'a SystemUuid,
    pub insert: &'a Insert,
}

/// Resolve the execution order of `systems`.
///
/// # Errors
///
/// [`SchedulerError::OrderingCycle`] naming the systems caught in a cycle.
pub fn resolve_order(systems: &[OrderEntry<'_>]) -> Result<Vec<SystemUuid>, SchedulerError> {
    let seq_of: HashMap<&SystemUuid, u64> =
        systems.iter().map(|entry| (entry.uuid, entry.seq)).collect();
    let uuid_of: HashMap<u64, &SystemUuid> =
        systems.iter().map(|entry| (entry.seq, entry.uuid)).collect();

    let nodes = systems
        .iter()
        .flat_map(|entry| [Node::start(entry.seq), Node::end(entry.seq)]);

    let mut edges = Vec::new();
    for entry in systems {
        let seq = entry.seq;
        edges.push((Node::start(seq), Node::end(seq)));
        if let Some(&group) = entry.insert.with.as_ref().and_then(|g| seq_of.get(g)) {
            edges.push((Node::start(group), Node::start(seq)));
            edges.push((Node::end(seq), Node::end(group)));
        }
        if let Some(&anchor) = entry.insert.after.as_ref().and_then(|a| seq_of.get(a)) {
            edges.push((Node::end(anchor), Node::start(seq)));
        }
        if let Some(&anchor) = entry.insert.before.as_ref().and_then(|b| seq_of.get(b)) {
            edges.push((Node::end(seq), Node::start(anchor)));
        }
    }

    match topological_sort(nodes, edges) {
        Ok(sorted) => Ok(sorted
            .into_iter()
            .filter(|node| node.phase == Phase::Start)
            .filter_map(|node| uuid_of.get(&node.seq).map(|uuid| (*uuid).clone()))
            .collect()),
        Err(CycleError { unresolved }) => {
            let mut cycle: Vec<SystemUuid> = Vec::new();
            for node in unresolved {
                if let Some(uuid) = uuid_of.get(&node.seq)
                    && !cycle.contains(*uuid)
                {
                    cycle.push((*uuid).clone());
                }
            }
            Err(SchedulerError::OrderingCycle(cycle))
        }
    }
}
