//! Dependency graph for incremental rebuilds.
//!
//! Edges point from a dependent artifact to the artifact it depends on. When a
//! set of artifacts changes, [`DependencyGraph::affected_by`] walks incoming
//! edges to find everything that may now be stale, and
//! [`DependencyGraph::build_order`] orders a rebuild batch dependencies-first.
//!
//! ```
//! use strata_core::{ArtifactId, ContentHash};
//! use strata_graph::DependencyGraph;
//!
//! let a = ArtifactId::new("a.rs", "rust");
//! let b = ArtifactId::new("b.rs", "rust");
//!
//! let mut graph = DependencyGraph::new();
//! graph.register(&a, ContentHash::of(b"a"), &[b.clone()]);
//! graph.register(&b, ContentHash::of(b"b"), &[]);
//!
//! let affected = graph.affected_by(&[b.clone()]);
//! assert!(affected.contains(&a));
//! assert_eq!(graph.build_order(&affected).unwrap(), vec![b, a]);
//! ```

#![warn(clippy::all)]

mod graph;
mod snapshot;

pub use graph::{Affected, DependencyGraph, NodeState};
pub use snapshot::GRAPH_MAGIC;
