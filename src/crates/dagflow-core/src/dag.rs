//! Acyclic graph of task vertices with topological sort and cycle
//! prevention.
//!
//! Edges point from a vertex to the vertices it **depends on** (`outgoing`),
//! matching `spec.md` §3's "depends-on" edge direction. `Dag<T>` is generic
//! over the payload type so it can hold `Task` in [`crate::workflow::Workflow`]
//! while staying independently testable with plain values.

use crate::error::{DagflowError, Result};
use crate::ids::TaskId;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

struct Vertex<T> {
    payload: T,
    outgoing: HashSet<TaskId>,
}

/// Acyclic graph of `T`-valued vertices keyed by [`TaskId`].
pub struct Dag<T> {
    vertices: HashMap<TaskId, Vertex<T>>,
    /// Insertion order, needed for the "equal-priority vertices retain
    /// insertion order" stability guarantee (`spec.md` §3).
    order: Vec<TaskId>,
    cache: RefCell<Option<Vec<TaskId>>>,
}

impl<T> Default for Dag<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Dag<T> {
    /// An empty graph.
    pub fn new() -> Self {
        Self {
            vertices: HashMap::new(),
            order: Vec::new(),
            cache: RefCell::new(None),
        }
    }

    fn invalidate(&self) {
        *self.cache.borrow_mut() = None;
    }

    /// Insert a new vertex depending on `depends_on`. Fails with
    /// [`DagflowError::DuplicateId`] if `id` is already present, or
    /// [`DagflowError::CycleDetected`] if `depends_on` contains `id` itself
    /// (a self-edge).
    pub fn add_vertex(&mut self, id: TaskId, payload: T, depends_on: Vec<TaskId>) -> Result<()> {
        if self.vertices.contains_key(&id) {
            return Err(DagflowError::DuplicateId(id.to_string()));
        }
        if depends_on.iter().any(|d| *d == id) {
            return Err(DagflowError::cycle(id.to_string(), id.to_string()));
        }
        self.order.push(id.clone());
        self.vertices.insert(
            id,
            Vertex {
                payload,
                outgoing: depends_on.into_iter().collect(),
            },
        );
        self.invalidate();
        Ok(())
    }

    /// Remove `id`, scrubbing it from every other vertex's outgoing set, and
    /// return its payload if it existed.
    pub fn remove_vertex(&mut self, id: &TaskId) -> Option<T> {
        let removed = self.vertices.remove(id)?;
        for vertex in self.vertices.values_mut() {
            vertex.outgoing.remove(id);
        }
        self.order.retain(|v| v != id);
        self.invalidate();
        Some(removed.payload)
    }

    /// Add a `from -> to` depends-on edge. Rejects self-loops and any edge
    /// whose introduction would create a cycle, i.e. where `from` is already
    /// reachable from `to` by following outgoing edges.
    pub fn add_edge(&mut self, from: &TaskId, to: &TaskId) -> Result<()> {
        if from == to {
            return Err(DagflowError::cycle(from.to_string(), to.to_string()));
        }
        if self.reachable_from(to).contains(from) {
            return Err(DagflowError::cycle(from.to_string(), to.to_string()));
        }
        let vertex = self
            .vertices
            .get_mut(from)
            .expect("add_edge source vertex must exist");
        vertex.outgoing.insert(to.clone());
        self.invalidate();
        Ok(())
    }

    /// Vertices reachable from `start` by following outgoing (depends-on)
    /// edges, including `start` itself.
    pub fn reachable_from(&self, start: &TaskId) -> HashSet<TaskId> {
        let mut seen = HashSet::new();
        let mut stack = vec![start.clone()];
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(vertex) = self.vertices.get(&id) {
                for next in &vertex.outgoing {
                    if !seen.contains(next) {
                        stack.push(next.clone());
                    }
                }
            }
        }
        seen
    }

    /// `true` iff no other vertex lists `id` in its outgoing set (nothing
    /// depends on it).
    pub fn is_terminal(&self, id: &TaskId) -> bool {
        self.vertices.values().all(|v| !v.outgoing.contains(id))
    }

    /// Dependency ids of `id`, in the order they were declared.
    pub fn depends_on(&self, id: &TaskId) -> Vec<TaskId> {
        self.vertices
            .get(id)
            .map(|v| v.outgoing.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Borrow `id`'s payload.
    pub fn get(&self, id: &TaskId) -> Option<&T> {
        self.vertices.get(id).map(|v| &v.payload)
    }

    /// Number of vertices.
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// `true` iff the graph has no vertices.
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Topological order of vertex ids: every id appears after all ids it
    /// depends on. DFS over a visited set; `compare` (when given) reorders a
    /// vertex's outgoing edges in a scratch buffer before recursing into
    /// them, honoring comparator order wherever dependencies leave room,
    /// without mutating the stored edge set (the read-mutation hazard
    /// flagged in `spec.md` §9 is fixed here by construction). Results for
    /// the `compare = None` case are cached and invalidated on mutation; a
    /// supplied comparator is re-applied fresh on every call since its
    /// identity can't be cheaply compared across calls.
    pub fn topo_order(&self, compare: Option<&dyn Fn(&TaskId, &TaskId) -> Ordering>) -> Vec<TaskId> {
        if compare.is_none() {
            if let Some(cached) = self.cache.borrow().as_ref() {
                return cached.clone();
            }
        }

        let mut start: Vec<TaskId> = self.order.clone();
        if let Some(cmp) = compare {
            start.sort_by(|a, b| cmp(a, b));
        }

        let mut visited = HashSet::new();
        let mut result = Vec::with_capacity(self.vertices.len());
        for id in &start {
            self.visit(id, compare, &mut visited, &mut result);
        }

        if compare.is_none() {
            *self.cache.borrow_mut() = Some(result.clone());
        }
        result
    }

    fn visit(
        &self,
        id: &TaskId,
        compare: Option<&dyn Fn(&TaskId, &TaskId) -> Ordering>,
        visited: &mut HashSet<TaskId>,
        result: &mut Vec<TaskId>,
    ) {
        if !visited.insert(id.clone()) {
            return;
        }
        let Some(vertex) = self.vertices.get(id) else {
            return;
        };
        let mut deps: Vec<TaskId> = vertex.outgoing.iter().cloned().collect();
        if let Some(cmp) = compare {
            deps.sort_by(|a, b| cmp(a, b));
        }
        for dep in &deps {
            self.visit(dep, compare, visited, result);
        }
        result.push(id.clone());
    }

    /// Topological order of payload references, derived from
    /// [`Dag::topo_order`].
    pub fn topo_sort(&self, compare: Option<&dyn Fn(&TaskId, &TaskId) -> Ordering>) -> Vec<&T> {
        self.topo_order(compare)
            .into_iter()
            .filter_map(|id| self.vertices.get(&id).map(|v| &v.payload))
            .collect()
    }
}
