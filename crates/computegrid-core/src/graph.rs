//! Dependency graph with per-node lifecycle state.
//!
//! [`DependencyGraph`] is a generic container: it knows nothing about what a
//! payload means, only which nodes depend on which and where each node is in
//! its lifecycle. All operations take `&self`; the graph is internally
//! synchronized so that workers finishing different nodes can mark them
//! concurrently while an orchestrator reads the ready frontier.
//!
//! A node that fails permanently blocks everything downstream of it: its
//! transitive dependents are marked [`NodeState::Failed`] with a
//! "dependency failed" cause so the graph can still reach completion.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::error::GraphError;
use crate::status::NodeState;

struct Node<K, P, R> {
    payload: P,
    state: NodeState,
    dependencies: HashSet<K>,
    dependents: HashSet<K>,
    result: Option<R>,
    error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

struct Inner<K, P, R> {
    nodes: HashMap<K, Node<K, P, R>>,
    /// Insertion order, used to hand out ready nodes deterministically.
    order: Vec<K>,
}

/// Point-in-time view of a single node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot<K> {
    pub id: K,
    pub state: NodeState,
    pub dependencies: Vec<K>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A DAG of tasks keyed by `K`, carrying payload `P` and producing result `R`.
pub struct DependencyGraph<K, P, R> {
    inner: Mutex<Inner<K, P, R>>,
}

impl<K, P, R> Default for DependencyGraph<K, P, R>
where
    K: Eq + Hash + Clone + Display,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P, R> DependencyGraph<K, P, R>
where
    K: Eq + Hash + Clone + Display,
{
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                nodes: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, P, R>> {
        // Every mutation leaves the node map consistent before it can panic,
        // so a poisoned lock still guards valid data.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a task in the PENDING state.
    pub fn add_task(&self, id: K, payload: P) -> Result<(), GraphError> {
        let mut inner = self.lock();
        if inner.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateNode(id.to_string()));
        }
        inner.order.push(id.clone());
        inner.nodes.insert(
            id,
            Node {
                payload,
                state: NodeState::Pending,
                dependencies: HashSet::new(),
                dependents: HashSet::new(),
                result: None,
                error: None,
                started_at: None,
                finished_at: None,
            },
        );
        Ok(())
    }

    /// Declare that `id` cannot start before `depends_on` has completed.
    ///
    /// Rejects edges to unknown nodes, self edges and edges that would close
    /// a cycle.
    pub fn add_dependency(&self, id: &K, depends_on: &K) -> Result<(), GraphError> {
        let mut inner = self.lock();
        if !inner.nodes.contains_key(id) {
            return Err(GraphError::UnknownNode(id.to_string()));
        }
        if !inner.nodes.contains_key(depends_on) {
            return Err(GraphError::UnknownNode(depends_on.to_string()));
        }
        if id == depends_on {
            return Err(GraphError::SelfDependency(id.to_string()));
        }
        if Self::reaches(&inner, depends_on, id) {
            return Err(GraphError::Cycle(id.to_string()));
        }

        if let Some(node) = inner.nodes.get_mut(id) {
            node.dependencies.insert(depends_on.clone());
        }
        if let Some(node) = inner.nodes.get_mut(depends_on) {
            node.dependents.insert(id.clone());
        }
        Ok(())
    }

    /// Returns true if `target` is a transitive dependency of `from`.
    fn reaches(inner: &Inner<K, P, R>, from: &K, target: &K) -> bool {
        let mut stack = vec![from.clone()];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if &current == target {
                return true;
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(node) = inner.nodes.get(&current) {
                stack.extend(node.dependencies.iter().cloned());
            }
        }
        false
    }

    /// Return every PENDING task whose dependencies have all COMPLETED.
    ///
    /// Returned tasks move to READY, so a task is handed out at most once.
    pub fn ready_tasks(&self) -> Vec<(K, P)>
    where
        P: Clone,
    {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let ready: Vec<K> = inner
            .order
            .iter()
            .filter(|id| {
                inner.nodes.get(*id).is_some_and(|node| {
                    node.state == NodeState::Pending
                        && node.dependencies.iter().all(|dep| {
                            inner
                                .nodes
                                .get(dep)
                                .is_some_and(|d| d.state == NodeState::Completed)
                        })
                })
            })
            .cloned()
            .collect();

        ready
            .into_iter()
            .filter_map(|id| {
                let node = inner.nodes.get_mut(&id)?;
                node.state = NodeState::Ready;
                Some((id, node.payload.clone()))
            })
            .collect()
    }

    /// Move a READY task to RUNNING.
    pub fn mark_started(&self, id: &K) -> Result<(), GraphError> {
        let mut inner = self.lock();
        let node = inner
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownNode(id.to_string()))?;
        if node.state != NodeState::Ready {
            return Err(GraphError::InvalidTransition {
                node: id.to_string(),
                from: format!("{:?}", node.state),
                to: "Running".to_string(),
            });
        }
        node.state = NodeState::Running;
        node.started_at = Some(Utc::now());
        Ok(())
    }

    /// Record a successful result.
    ///
    /// Returns `Ok(false)` if the task had already reached a terminal state;
    /// the first outcome wins.
    pub fn mark_completed(&self, id: &K, result: R) -> Result<bool, GraphError> {
        let mut inner = self.lock();
        let node = inner
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownNode(id.to_string()))?;
        match node.state {
            NodeState::Completed | NodeState::Failed => Ok(false),
            NodeState::Pending => Err(GraphError::InvalidTransition {
                node: id.to_string(),
                from: "Pending".to_string(),
                to: "Completed".to_string(),
            }),
            NodeState::Ready | NodeState::Running => {
                node.state = NodeState::Completed;
                node.result = Some(result);
                node.finished_at = Some(Utc::now());
                Ok(true)
            }
        }
    }

    /// Record a failure and block every transitive dependent.
    ///
    /// Returns the ids of dependents that were failed as a consequence. A task
    /// already in a terminal state is left untouched.
    pub fn mark_failed(&self, id: &K, error: impl Into<String>) -> Result<Vec<K>, GraphError> {
        let mut inner = self.lock();
        let now = Utc::now();
        let node = inner
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownNode(id.to_string()))?;
        if node.state.is_terminal() {
            return Ok(Vec::new());
        }
        node.state = NodeState::Failed;
        node.error = Some(error.into());
        node.finished_at = Some(now);

        let mut blocked = Vec::new();
        let mut queue: VecDeque<(K, K)> = node
            .dependents
            .iter()
            .map(|dep| (dep.clone(), id.clone()))
            .collect();

        while let Some((current, cause)) = queue.pop_front() {
            let Some(node) = inner.nodes.get_mut(&current) else {
                continue;
            };
            if node.state.is_terminal() {
                continue;
            }
            node.state = NodeState::Failed;
            node.error = Some(format!("dependency '{}' failed", cause));
            node.finished_at = Some(now);
            queue.extend(
                node.dependents
                    .iter()
                    .map(|dep| (dep.clone(), current.clone())),
            );
            blocked.push(current);
        }

        Ok(blocked)
    }

    /// True when every task is COMPLETED or FAILED.
    pub fn is_complete(&self) -> bool {
        self.lock().nodes.values().all(|n| n.state.is_terminal())
    }

    /// Number of tasks currently READY or RUNNING.
    pub fn in_flight(&self) -> usize {
        self.lock()
            .nodes
            .values()
            .filter(|n| matches!(n.state, NodeState::Ready | NodeState::Running))
            .count()
    }

    /// Current state of a task.
    pub fn state(&self, id: &K) -> Option<NodeState> {
        self.lock().nodes.get(id).map(|n| n.state)
    }

    /// Result recorded for a completed task.
    pub fn result(&self, id: &K) -> Option<R>
    where
        R: Clone,
    {
        self.lock().nodes.get(id).and_then(|n| n.result.clone())
    }

    /// Error recorded for a failed task.
    pub fn error(&self, id: &K) -> Option<String> {
        self.lock().nodes.get(id).and_then(|n| n.error.clone())
    }

    /// Number of tasks in the graph.
    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    /// Returns true if the dependency edges contain a cycle.
    ///
    /// [`add_dependency`](Self::add_dependency) refuses cycle-closing edges,
    /// so this holds only for graphs that bypassed it.
    pub fn has_cycle(&self) -> bool {
        let inner = self.lock();
        let mut remaining: HashMap<&K, usize> = inner
            .nodes
            .iter()
            .map(|(id, node)| (id, node.dependencies.len()))
            .collect();
        let mut queue: VecDeque<&K> = remaining
            .iter()
            .filter(|(_, deps)| **deps == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut visited = 0;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            let Some(node) = inner.nodes.get(id) else {
                continue;
            };
            for dependent in &node.dependents {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }
        visited != inner.nodes.len()
    }

    /// Task ids in insertion order.
    pub fn ids(&self) -> Vec<K> {
        self.lock().order.clone()
    }

    /// Snapshot of a task's state, dependencies and timestamps.
    pub fn snapshot(&self, id: &K) -> Option<NodeSnapshot<K>> {
        let inner = self.lock();
        let node = inner.nodes.get(id)?;
        let mut dependencies: Vec<K> = Vec::with_capacity(node.dependencies.len());
        for dep in &inner.order {
            if node.dependencies.contains(dep) {
                dependencies.push(dep.clone());
            }
        }
        Some(NodeSnapshot {
            id: id.clone(),
            state: node.state,
            dependencies,
            error: node.error.clone(),
            started_at: node.started_at,
            finished_at: node.finished_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    type TestGraph = DependencyGraph<String, u32, u32>;

    fn diamond() -> TestGraph {
        let graph = TestGraph::new();
        for (i, id) in ["a", "b", "c", "d"].iter().enumerate() {
            graph.add_task(id.to_string(), i as u32).unwrap();
        }
        graph.add_dependency(&"b".into(), &"a".into()).unwrap();
        graph.add_dependency(&"c".into(), &"a".into()).unwrap();
        graph.add_dependency(&"d".into(), &"b".into()).unwrap();
        graph.add_dependency(&"d".into(), &"c".into()).unwrap();
        graph
    }

    fn ids(ready: &[(String, u32)]) -> Vec<&str> {
        ready.iter().map(|(id, _)| id.as_str()).collect()
    }

    fn run(graph: &TestGraph, id: &str) {
        let id = id.to_string();
        graph.mark_started(&id).unwrap();
        assert!(graph.mark_completed(&id, 1).unwrap());
    }

    #[test]
    fn test_diamond_wavefronts() {
        let graph = diamond();

        let first = graph.ready_tasks();
        assert_eq!(ids(&first), vec!["a"]);
        assert!(graph.ready_tasks().is_empty());
        run(&graph, "a");

        let second = graph.ready_tasks();
        assert_eq!(ids(&second), vec!["b", "c"]);
        run(&graph, "b");
        assert!(graph.ready_tasks().is_empty());
        run(&graph, "c");

        let third = graph.ready_tasks();
        assert_eq!(ids(&third), vec!["d"]);
        assert!(!graph.is_complete());
        run(&graph, "d");
        assert!(graph.is_complete());
    }

    #[test]
    fn test_failure_blocks_transitive_dependents() {
        let graph = diamond();
        graph.ready_tasks();
        graph.mark_started(&"a".into()).unwrap();

        let blocked = graph.mark_failed(&"a".into(), "boom").unwrap();
        assert_eq!(blocked.len(), 3);
        assert_eq!(graph.state(&"d".into()), Some(NodeState::Failed));
        assert_eq!(
            graph.error(&"b".into()).as_deref(),
            Some("dependency 'a' failed")
        );
        assert!(graph.ready_tasks().is_empty());
        assert!(graph.is_complete());
    }

    #[test]
    fn test_terminal_marks_are_idempotent() {
        let graph = diamond();
        graph.ready_tasks();
        run(&graph, "a");

        assert!(!graph.mark_completed(&"a".into(), 99).unwrap());
        assert!(graph.mark_failed(&"a".into(), "late").unwrap().is_empty());
        assert_eq!(graph.result(&"a".into()), Some(1));
        assert_eq!(graph.state(&"a".into()), Some(NodeState::Completed));
    }

    #[test]
    fn test_cannot_complete_pending_task() {
        let graph = diamond();
        let result = graph.mark_completed(&"d".into(), 1);
        assert!(matches!(result, Err(GraphError::InvalidTransition { .. })));
    }

    #[test]
    fn test_rejects_cycles_and_bad_edges() {
        let graph = diamond();
        assert!(matches!(
            graph.add_dependency(&"a".into(), &"d".into()),
            Err(GraphError::Cycle(_))
        ));
        assert!(matches!(
            graph.add_dependency(&"a".into(), &"a".into()),
            Err(GraphError::SelfDependency(_))
        ));
        assert!(matches!(
            graph.add_dependency(&"a".into(), &"zzz".into()),
            Err(GraphError::UnknownNode(_))
        ));
        assert!(matches!(
            graph.add_task("a".into(), 0),
            Err(GraphError::DuplicateNode(_))
        ));
        assert!(!graph.has_cycle());
        assert!(!TestGraph::new().has_cycle());
    }

    #[test]
    fn test_concurrent_branch_completion() {
        let graph = Arc::new(diamond());
        graph.ready_tasks();
        run(&graph, "a");
        assert_eq!(graph.ready_tasks().len(), 2);
        graph.mark_started(&"b".into()).unwrap();
        graph.mark_started(&"c".into()).unwrap();

        std::thread::scope(|s| {
            for id in ["b", "c"] {
                let graph = graph.clone();
                s.spawn(move || {
                    graph.mark_completed(&id.to_string(), 2).unwrap();
                });
            }
        });

        assert_eq!(ids(&graph.ready_tasks()), vec!["d"]);
        assert!(graph.ready_tasks().is_empty());
    }

    #[test]
    fn test_snapshot_timestamps_respect_ordering() {
        let graph = diamond();
        for _ in 0..3 {
            for (id, _) in graph.ready_tasks() {
                run(&graph, &id);
            }
        }
        let a = graph.snapshot(&"a".into()).unwrap();
        let d = graph.snapshot(&"d".into()).unwrap();
        assert_eq!(d.dependencies, vec!["b".to_string(), "c".to_string()]);
        assert!(d.started_at.unwrap() >= a.finished_at.unwrap());
    }

    proptest! {
        /// Each node is handed out exactly once, and only after all of its
        /// dependencies completed, regardless of completion order.
        #[test]
        fn prop_ready_set_hands_out_each_node_once(
            edges in proptest::collection::vec((0usize..12, 0usize..12), 0..40),
            picks in proptest::collection::vec(any::<prop::sample::Index>(), 64),
        ) {
            let graph: DependencyGraph<usize, (), ()> = DependencyGraph::new();
            for i in 0..12 {
                graph.add_task(i, ()).unwrap();
            }
            for (a, b) in edges {
                // Edges only point from higher to lower index, keeping it acyclic.
                if a > b {
                    let _ = graph.add_dependency(&a, &b);
                }
            }

            let mut handed_out = std::collections::HashSet::new();
            let mut frontier = Vec::new();
            let mut pick = picks.into_iter().cycle();

            while !graph.is_complete() {
                for (id, _) in graph.ready_tasks() {
                    prop_assert!(handed_out.insert(id), "node {} handed out twice", id);
                    let snap = graph.snapshot(&id).unwrap();
                    for dep in snap.dependencies {
                        prop_assert_eq!(graph.state(&dep), Some(NodeState::Completed));
                    }
                    graph.mark_started(&id).unwrap();
                    frontier.push(id);
                }
                prop_assert!(!frontier.is_empty(), "graph stalled");
                let idx = pick.next().unwrap().index(frontier.len());
                let id = frontier.swap_remove(idx);
                graph.mark_completed(&id, ()).unwrap();
            }

            prop_assert_eq!(handed_out.len(), 12);
        }
    }
}
