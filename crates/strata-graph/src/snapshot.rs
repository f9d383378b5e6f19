//! On-disk snapshot of the dependency graph.
//!
//! Format: 8-byte magic, then an rkyv archive of [`GraphSnapshot`]. The magic
//! is 8 bytes so the archive stays aligned once copied into an aligned buffer.

use crate::graph::{DependencyGraph, Node, NodeState};
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use strata_core::{ArtifactId, ContentHash, Error, Result};
use tracing::{debug, warn};

/// Magic bytes at the start of a graph snapshot.
pub const GRAPH_MAGIC: &[u8; 8] = b"STRGRPH1";

#[derive(Archive, Serialize, Deserialize, Debug)]
struct GraphSnapshot {
    version: u32,
    nodes: Vec<SnapshotNode>,
}

#[derive(Archive, Serialize, Deserialize, Debug)]
struct SnapshotNode {
    id: ArtifactId,
    fingerprint: Option<ContentHash>,
    key_fingerprint: Option<ContentHash>,
    /// Positions of this node's dependencies in `GraphSnapshot::nodes`.
    deps: Vec<u32>,
}

impl GraphSnapshot {
    const CURRENT_VERSION: u32 = 1;
}

impl DependencyGraph {
    /// Write the graph to `path` atomically.
    ///
    /// Affected nodes are saved as clean-but-unkeyed: their key fingerprint is
    /// dropped so a later load rebuilds them rather than trusting a result
    /// computed before the change.
    pub fn save(&self, path: &Path) -> Result<()> {
        let ids = self.ids();
        let position: ahash::AHashMap<&ArtifactId, u32> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id, i as u32))
            .collect();

        let nodes = ids
            .iter()
            .filter_map(|id| self.indices.get(id).map(|&idx| (id, &self.graph[idx])))
            .map(|(id, node)| {
                let mut deps: Vec<u32> = self
                    .dependencies(id)
                    .iter()
                    .filter_map(|d| position.get(d).copied())
                    .collect();
                deps.sort_unstable();
                SnapshotNode {
                    id: id.clone(),
                    fingerprint: node.fingerprint,
                    key_fingerprint: match node.state {
                        NodeState::Affected => None,
                        _ => node.key_fingerprint,
                    },
                    deps,
                }
            })
            .collect();

        let snapshot = GraphSnapshot {
            version: GraphSnapshot::CURRENT_VERSION,
            nodes,
        };
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(&snapshot)
            .map_err(|e| Error::serialization(format!("graph snapshot: {e}")))?;

        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| Error::storage(parent, e))?;
        let mut temp =
            tempfile::NamedTempFile::new_in(parent).map_err(|e| Error::storage(parent, e))?;
        let write = |file: &mut tempfile::NamedTempFile| -> std::io::Result<()> {
            file.write_all(GRAPH_MAGIC)?;
            file.write_all(&bytes)?;
            file.as_file().sync_all()
        };
        write(&mut temp).map_err(|e| Error::storage(path, e))?;
        temp.persist(path)
            .map_err(|e| Error::storage(path, e.error))?;

        debug!(path = %path.display(), nodes = self.len(), "saved dependency graph");
        Ok(())
    }

    /// Load a graph written by [`DependencyGraph::save`].
    ///
    /// A missing file yields an empty graph. A file with the wrong magic or
    /// version, or one that fails validation, is reported as an error.
    pub fn load(path: &Path) -> Result<Self> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(Error::storage(path, e)),
        };

        if data.len() < GRAPH_MAGIC.len() || &data[..GRAPH_MAGIC.len()] != GRAPH_MAGIC {
            return Err(Error::serialization(format!(
                "{} is not a graph snapshot",
                path.display()
            )));
        }

        let mut aligned = AlignedVec::<16>::with_capacity(data.len() - GRAPH_MAGIC.len());
        aligned.extend_from_slice(&data[GRAPH_MAGIC.len()..]);
        let snapshot = rkyv::from_bytes::<GraphSnapshot, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::serialization(format!("graph snapshot: {e}")))?;

        if snapshot.version != GraphSnapshot::CURRENT_VERSION {
            return Err(Error::serialization(format!(
                "unsupported graph snapshot version {}",
                snapshot.version
            )));
        }

        let mut graph = Self::new();
        let mut indices = Vec::with_capacity(snapshot.nodes.len());
        for node in &snapshot.nodes {
            let idx = graph.ensure_node(&node.id);
            graph.graph[idx] = Node {
                id: node.id.clone(),
                fingerprint: node.fingerprint,
                key_fingerprint: node.key_fingerprint,
                state: if node.fingerprint.is_some() {
                    NodeState::Clean
                } else {
                    NodeState::Unregistered
                },
            };
            indices.push(idx);
        }
        for (from, node) in indices.iter().zip(&snapshot.nodes) {
            for &dep in &node.deps {
                match indices.get(dep as usize) {
                    Some(&to) => {
                        graph.graph.add_edge(*from, to, ());
                    }
                    None => warn!(id = %node.id, dep, "dangling edge in graph snapshot"),
                }
            }
        }

        debug!(path = %path.display(), nodes = graph.len(), "loaded dependency graph");
        Ok(graph)
    }
}
