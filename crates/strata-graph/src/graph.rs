//! Arena-backed dependency graph.

use ahash::{AHashMap, AHashSet};
use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use strata_core::{ArtifactId, ContentHash, CycleError};
use tracing::{debug, warn};

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Known only as somebody's dependency, or never seen.
    Unregistered,
    /// Registered and not affected by any change since.
    Clean,
    /// Reported by `affected_by`; stays here until re-registered.
    Affected,
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) id: ArtifactId,
    /// Content hash of the source at registration.
    pub(crate) fingerprint: Option<ContentHash>,
    /// Derived key fingerprint of the last artifact built for this node.
    pub(crate) key_fingerprint: Option<ContentHash>,
    pub(crate) state: NodeState,
}

impl Node {
    const fn unregistered(id: ArtifactId) -> Self {
        Self {
            id,
            fingerprint: None,
            key_fingerprint: None,
            state: NodeState::Unregistered,
        }
    }
}

/// Result of an affected-set query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Affected {
    /// Changed artifacts plus everything that transitively depends on them.
    pub ids: BTreeSet<ArtifactId>,
    /// Dependency cycles touching the affected set.
    pub cycles: Vec<Vec<ArtifactId>>,
}

/// Directed graph of "dependent -> dependency" edges.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    pub(crate) graph: StableDiGraph<Node, ()>,
    pub(crate) indices: AHashMap<ArtifactId, NodeIndex>,
}

impl DependencyGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes, registered or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Whether `id` has a node.
    #[must_use]
    pub fn contains(&self, id: &ArtifactId) -> bool {
        self.indices.contains_key(id)
    }

    /// All known artifact ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<ArtifactId> {
        let mut ids: Vec<ArtifactId> = self.indices.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub(crate) fn ensure_node(&mut self, id: &ArtifactId) -> NodeIndex {
        if let Some(&idx) = self.indices.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(Node::unregistered(id.clone()));
        self.indices.insert(id.clone(), idx);
        idx
    }

    /// Record `id`'s content fingerprint and replace its outgoing edges with
    /// `deps`. The node becomes clean.
    ///
    /// Self-references are ignored; an artifact is always rebuilt when its own
    /// content changes.
    pub fn register(&mut self, id: &ArtifactId, fingerprint: ContentHash, deps: &[ArtifactId]) {
        let idx = self.ensure_node(id);

        let old: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| e.id())
            .collect();
        for edge in old {
            self.graph.remove_edge(edge);
        }

        let mut seen = AHashSet::with_capacity(deps.len());
        for dep in deps {
            if dep == id || !seen.insert(dep) {
                continue;
            }
            let dep_idx = self.ensure_node(dep);
            self.graph.add_edge(idx, dep_idx, ());
        }

        let node = &mut self.graph[idx];
        if node.fingerprint != Some(fingerprint) {
            node.key_fingerprint = None;
        }
        node.fingerprint = Some(fingerprint);
        node.state = NodeState::Clean;
        debug!(id = %id, deps = seen.len(), "registered dependencies");
    }

    /// Record the derived key fingerprint of the artifact last built for `id`.
    /// Returns `false` if `id` is unknown.
    pub fn set_key_fingerprint(&mut self, id: &ArtifactId, key_fingerprint: ContentHash) -> bool {
        match self.indices.get(id) {
            Some(&idx) => {
                self.graph[idx].key_fingerprint = Some(key_fingerprint);
                true
            }
            None => false,
        }
    }

    /// Registered content fingerprint of `id`.
    #[must_use]
    pub fn fingerprint(&self, id: &ArtifactId) -> Option<ContentHash> {
        self.indices.get(id).and_then(|&i| self.graph[i].fingerprint)
    }

    /// Key fingerprint of the last artifact built for `id`.
    #[must_use]
    pub fn key_fingerprint(&self, id: &ArtifactId) -> Option<ContentHash> {
        self.indices.get(id).and_then(|&i| self.graph[i].key_fingerprint)
    }

    /// Lifecycle state of `id`.
    #[must_use]
    pub fn state(&self, id: &ArtifactId) -> NodeState {
        self.indices
            .get(id)
            .map_or(NodeState::Unregistered, |&i| self.graph[i].state)
    }

    /// Direct dependencies of `id`, sorted.
    #[must_use]
    pub fn dependencies(&self, id: &ArtifactId) -> Vec<ArtifactId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Direct dependents of `id`, sorted.
    #[must_use]
    pub fn dependents(&self, id: &ArtifactId) -> Vec<ArtifactId> {
        self.neighbors(id, Direction::Incoming)
    }

    fn neighbors(&self, id: &ArtifactId, dir: Direction) -> Vec<ArtifactId> {
        let Some(&idx) = self.indices.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<ArtifactId> = self
            .graph
            .neighbors_directed(idx, dir)
            .map(|n| self.graph[n].id.clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Everything whose cached artifact may be stale after `changed` changed,
    /// including `changed` itself. Every reported node moves to
    /// [`NodeState::Affected`].
    pub fn affected_by(&mut self, changed: &[ArtifactId]) -> BTreeSet<ArtifactId> {
        self.affected_by_detailed(changed).ids
    }

    /// Like [`DependencyGraph::affected_by`], also reporting the cycles the
    /// traversal ran into.
    pub fn affected_by_detailed(&mut self, changed: &[ArtifactId]) -> Affected {
        let mut ids = BTreeSet::new();
        let mut visited: AHashSet<NodeIndex> = AHashSet::new();
        let mut queue = VecDeque::new();

        for id in changed {
            ids.insert(id.clone());
            if let Some(&idx) = self.indices.get(id)
                && visited.insert(idx)
            {
                queue.push_back(idx);
            }
        }

        while let Some(current) = queue.pop_front() {
            for dependent in self.graph.neighbors_directed(current, Direction::Incoming) {
                if visited.insert(dependent) {
                    queue.push_back(dependent);
                }
            }
        }

        for &idx in &visited {
            let node = &mut self.graph[idx];
            node.state = NodeState::Affected;
            ids.insert(node.id.clone());
        }

        let cycles = self.cycles_touching(&visited);
        for cycle in &cycles {
            let members: Vec<String> = cycle.iter().map(ToString::to_string).collect();
            warn!(cycle = %members.join(" -> "), "dependency cycle in affected set");
        }

        debug!(changed = changed.len(), affected = ids.len(), "computed affected set");
        Affected { ids, cycles }
    }

    /// Strongly connected components with more than one node.
    #[must_use]
    pub fn cycles(&self) -> Vec<Vec<ArtifactId>> {
        let all: AHashSet<NodeIndex> = self.graph.node_indices().collect();
        self.cycles_touching(&all)
    }

    fn cycles_touching(&self, nodes: &AHashSet<NodeIndex>) -> Vec<Vec<ArtifactId>> {
        let mut cycles: Vec<Vec<ArtifactId>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 && scc.iter().any(|i| nodes.contains(i)))
            .map(|scc| {
                let mut ids: Vec<ArtifactId> =
                    scc.into_iter().map(|i| self.graph[i].id.clone()).collect();
                ids.sort();
                ids
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// Order `ids` so every artifact comes after the dependencies it shares
    /// with the batch. Ties are broken by id, so the order is deterministic.
    ///
    /// Ids without a node are treated as having no dependencies.
    pub fn build_order<'a, I>(&self, ids: I) -> Result<Vec<ArtifactId>, CycleError>
    where
        I: IntoIterator<Item = &'a ArtifactId>,
    {
        let batch: BTreeSet<ArtifactId> = ids.into_iter().cloned().collect();

        let mut pending: BTreeMap<ArtifactId, usize> = BTreeMap::new();
        let mut deps_in_batch: AHashMap<ArtifactId, Vec<ArtifactId>> = AHashMap::new();
        let mut dependents_in_batch: AHashMap<ArtifactId, Vec<ArtifactId>> = AHashMap::new();

        for id in &batch {
            let deps: Vec<ArtifactId> = self
                .dependencies(id)
                .into_iter()
                .filter(|d| batch.contains(d))
                .collect();
            pending.insert(id.clone(), deps.len());
            for dep in &deps {
                dependents_in_batch
                    .entry(dep.clone())
                    .or_default()
                    .push(id.clone());
            }
            deps_in_batch.insert(id.clone(), deps);
        }

        let mut ready: BTreeSet<ArtifactId> = pending
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| id.clone())
            .collect();
        let mut order = Vec::with_capacity(batch.len());

        while let Some(id) = ready.pop_first() {
            pending.remove(&id);
            if let Some(children) = dependents_in_batch.get(&id) {
                for child in children {
                    if let Some(n) = pending.get_mut(child) {
                        *n = n.saturating_sub(1);
                        if *n == 0 {
                            ready.insert(child.clone());
                        }
                    }
                }
            }
            order.push(id);
        }

        if pending.is_empty() {
            Ok(order)
        } else {
            Err(find_cycle(&pending, &deps_in_batch))
        }
    }

    /// Remove `id` and its edges, returning its former dependents.
    pub fn remove(&mut self, id: &ArtifactId) -> Vec<ArtifactId> {
        let dependents = self.dependents(id);
        if let Some(idx) = self.indices.remove(id) {
            self.graph.remove_node(idx);
            debug!(id = %id, dependents = dependents.len(), "removed node");
        }
        dependents
    }
}

/// Walk unresolved dependencies from the smallest pending id until a node
/// repeats. Every pending node still waits on another pending node, so the
/// walk always closes a loop.
fn find_cycle(
    pending: &BTreeMap<ArtifactId, usize>,
    deps_in_batch: &AHashMap<ArtifactId, Vec<ArtifactId>>,
) -> CycleError {
    let Some(mut current) = pending.keys().next().cloned() else {
        return CycleError::new(Vec::new());
    };
    let mut path: Vec<ArtifactId> = Vec::new();
    let mut position: AHashMap<ArtifactId, usize> = AHashMap::new();

    loop {
        if let Some(&start) = position.get(&current) {
            return CycleError::new(path.split_off(start));
        }
        position.insert(current.clone(), path.len());
        path.push(current.clone());

        let next = deps_in_batch
            .get(&current)
            .and_then(|deps| deps.iter().find(|d| pending.contains_key(*d)));
        match next {
            Some(dep) => current = dep.clone(),
            None => return CycleError::new(pending.keys().cloned().collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rstest::rstest;

    fn id(name: &str) -> ArtifactId {
        ArtifactId::new(name, "rust")
    }

    fn fp(name: &str) -> ContentHash {
        ContentHash::of(name.as_bytes())
    }

    /// A -> B -> C
    fn chain() -> DependencyGraph {
        let mut g = DependencyGraph::new();
        g.register(&id("a"), fp("a"), &[id("b")]);
        g.register(&id("b"), fp("b"), &[id("c")]);
        g.register(&id("c"), fp("c"), &[]);
        g
    }

    #[test]
    fn test_affected_by_chain() {
        let mut g = chain();
        let affected = g.affected_by(&[id("c")]);
        assert_eq!(affected, BTreeSet::from([id("a"), id("b"), id("c")]));
    }

    #[test]
    fn test_affected_by_middle_excludes_dependencies() {
        let mut g = chain();
        let affected = g.affected_by(&[id("b")]);
        assert_eq!(affected, BTreeSet::from([id("a"), id("b")]));
    }

    #[test]
    fn test_affected_by_unknown_id() {
        let mut g = chain();
        let affected = g.affected_by(&[id("zzz")]);
        assert_eq!(affected, BTreeSet::from([id("zzz")]));
    }

    #[test]
    fn test_state_machine() {
        let mut g = chain();
        assert_eq!(g.state(&id("a")), NodeState::Clean);
        assert_eq!(g.state(&id("nope")), NodeState::Unregistered);

        g.affected_by(&[id("c")]);
        assert_eq!(g.state(&id("a")), NodeState::Affected);

        g.register(&id("a"), fp("a"), &[id("b")]);
        assert_eq!(g.state(&id("a")), NodeState::Clean);
        assert_eq!(g.state(&id("b")), NodeState::Affected);
    }

    #[test]
    fn test_dependency_only_node_is_unregistered() {
        let mut g = DependencyGraph::new();
        g.register(&id("a"), fp("a"), &[id("ext")]);
        assert_eq!(g.state(&id("ext")), NodeState::Unregistered);
        assert_eq!(g.dependents(&id("ext")), vec![id("a")]);
    }

    #[test]
    fn test_register_replaces_edges() {
        let mut g = chain();
        g.register(&id("a"), fp("a2"), &[id("c")]);
        assert_eq!(g.dependencies(&id("a")), vec![id("c")]);
        assert!(g.dependents(&id("b")).is_empty());

        let affected = g.affected_by(&[id("b")]);
        assert_eq!(affected, BTreeSet::from([id("b")]));
    }

    #[test]
    fn test_register_clears_stale_key_fingerprint() {
        let mut g = chain();
        assert!(g.set_key_fingerprint(&id("a"), fp("key")));
        g.register(&id("a"), fp("a"), &[id("b")]);
        assert_eq!(g.key_fingerprint(&id("a")), Some(fp("key")));
        g.register(&id("a"), fp("a changed"), &[id("b")]);
        assert_eq!(g.key_fingerprint(&id("a")), None);
    }

    #[test]
    fn test_self_dependency_ignored() {
        let mut g = DependencyGraph::new();
        g.register(&id("a"), fp("a"), &[id("a")]);
        assert_eq!(g.edge_count(), 0);
        assert_eq!(g.build_order(&[id("a")]).unwrap(), vec![id("a")]);
    }

    #[test]
    fn test_duplicate_dependencies_collapse() {
        let mut g = DependencyGraph::new();
        g.register(&id("a"), fp("a"), &[id("b"), id("b")]);
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn test_build_order_dependencies_first() {
        let g = chain();
        let order = g.build_order(&[id("a"), id("b"), id("c")]).unwrap();
        assert_eq!(order, vec![id("c"), id("b"), id("a")]);
    }

    #[test]
    fn test_build_order_diamond_is_deterministic() {
        // top -> left, right -> bottom
        let mut g = DependencyGraph::new();
        g.register(&id("top"), fp("t"), &[id("right"), id("left")]);
        g.register(&id("left"), fp("l"), &[id("bottom")]);
        g.register(&id("right"), fp("r"), &[id("bottom")]);
        g.register(&id("bottom"), fp("b"), &[]);

        let batch = [id("top"), id("left"), id("right"), id("bottom")];
        let order = g.build_order(&batch).unwrap();
        assert_eq!(order, vec![id("bottom"), id("left"), id("right"), id("top")]);
    }

    #[test]
    fn test_build_order_ignores_edges_outside_batch() {
        let g = chain();
        let order = g.build_order(&[id("a"), id("c")]).unwrap();
        assert_eq!(order, vec![id("a"), id("c")]);
    }

    #[rstest]
    #[case::two_cycle(&["a", "b"])]
    #[case::three_cycle(&["a", "b", "c"])]
    fn test_build_order_cycle_is_error(#[case] ring: &[&str]) {
        let mut g = DependencyGraph::new();
        for (i, name) in ring.iter().enumerate() {
            let next = ring[(i + 1) % ring.len()];
            g.register(&id(name), fp(name), &[id(next)]);
        }
        let batch: Vec<ArtifactId> = ring.iter().map(|n| id(n)).collect();

        let err = g.build_order(&batch).unwrap_err();
        assert_eq!(err.cycle.len(), ring.len());
        for name in ring {
            assert!(err.contains(&id(name)));
        }
    }

    #[test]
    fn test_cycle_error_excludes_nodes_outside_cycle() {
        // x -> a <-> b
        let mut g = DependencyGraph::new();
        g.register(&id("x"), fp("x"), &[id("a")]);
        g.register(&id("a"), fp("a"), &[id("b")]);
        g.register(&id("b"), fp("b"), &[id("a")]);

        let err = g.build_order(&[id("x"), id("a"), id("b")]).unwrap_err();
        assert_eq!(err.cycle, vec![id("a"), id("b")]);
    }

    #[test]
    fn test_affected_by_terminates_on_cycle() {
        let mut g = DependencyGraph::new();
        g.register(&id("a"), fp("a"), &[id("b")]);
        g.register(&id("b"), fp("b"), &[id("a")]);
        g.register(&id("c"), fp("c"), &[id("a")]);

        let affected = g.affected_by_detailed(&[id("a")]);
        assert_eq!(affected.ids, BTreeSet::from([id("a"), id("b"), id("c")]));
        assert_eq!(affected.cycles, vec![vec![id("a"), id("b")]]);
        assert_eq!(g.cycles().len(), 1);
    }

    #[test]
    fn test_remove_returns_dependents() {
        let mut g = chain();
        assert_eq!(g.remove(&id("c")), vec![id("b")]);
        assert!(!g.contains(&id("c")));
        assert!(g.dependencies(&id("b")).is_empty());
        assert_eq!(g.len(), 2);
    }

    proptest! {
        /// Every node with a path to a changed node is reported.
        #[test]
        fn prop_affected_is_sound(
            edges in proptest::collection::vec((0u8..12, 0u8..12), 0..40),
            changed in 0u8..12,
        ) {
            let mut deps: BTreeMap<u8, Vec<ArtifactId>> = BTreeMap::new();
            for (from, to) in &edges {
                deps.entry(*from).or_default().push(id(&to.to_string()));
            }
            let mut g = DependencyGraph::new();
            for (from, to) in &deps {
                g.register(&id(&from.to_string()), fp("x"), to);
            }

            let affected = g.affected_by(&[id(&changed.to_string())]);

            // Naive fixpoint over the edge list.
            let mut expected: BTreeSet<u8> = BTreeSet::from([changed]);
            loop {
                let before = expected.len();
                for (from, to) in &edges {
                    if from != to && expected.contains(to) {
                        expected.insert(*from);
                    }
                }
                if expected.len() == before {
                    break;
                }
            }
            for n in expected {
                prop_assert!(affected.contains(&id(&n.to_string())));
            }
        }
    }
}
