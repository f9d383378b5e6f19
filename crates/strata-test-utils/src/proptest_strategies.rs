//! Proptest strategies for strata types.

use proptest::prelude::*;
use strata_core::{ArtifactId, CacheEntry, CacheKey, ContentHash};

/// Relative source paths such as `src/ab/cd.rs`.
pub fn source_path_strategy() -> impl Strategy<Value = String> {
    (
        prop::collection::vec("[a-z][a-z0-9_]{0,8}", 0..3),
        "[a-z][a-z0-9_]{0,12}",
        prop_oneof![Just("rs"), Just("py"), Just("ts"), Just("txt")],
    )
        .prop_map(|(dirs, stem, ext)| {
            let mut path = dirs.join("/");
            if !path.is_empty() {
                path.push('/');
            }
            format!("{path}{stem}.{ext}")
        })
}

/// Analyzer language names.
pub fn language_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("rust".to_string()),
        Just("python".to_string()),
        Just("typescript".to_string()),
    ]
}

/// Artifact ids.
pub fn artifact_id_strategy() -> impl Strategy<Value = ArtifactId> {
    (source_path_strategy(), language_strategy())
        .prop_map(|(path, language)| ArtifactId::new(path, language))
}

/// Source or artifact bytes.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..4096)
}

/// Content hashes of arbitrary bytes.
pub fn content_hash_strategy() -> impl Strategy<Value = ContentHash> {
    payload_strategy().prop_map(|bytes| ContentHash::of(&bytes))
}

/// Cache entries whose key fingerprint is the hash of their payload.
pub fn cache_entry_strategy() -> impl Strategy<Value = CacheEntry> {
    (
        artifact_id_strategy(),
        payload_strategy(),
        prop::collection::vec(artifact_id_strategy(), 0..4),
    )
        .prop_map(|(id, payload, deps)| {
            let hash = ContentHash::of(&payload);
            CacheEntry::new(CacheKey::new(id, hash), payload, deps, hash)
        })
}

/// Acyclic dependency lists over `n` nodes: node `i` may only depend on
/// nodes with a smaller index.
pub fn dag_strategy(n: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    let per_node: Vec<_> = (0..n)
        .map(|i| {
            prop::collection::btree_set(0..i.max(1), 0..=i.min(3))
                .prop_map(move |deps| deps.into_iter().filter(|&d| d < i).collect::<Vec<_>>())
        })
        .collect();
    per_node
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn dag_edges_point_backwards(dag in dag_strategy(12)) {
            for (i, deps) in dag.iter().enumerate() {
                prop_assert!(deps.iter().all(|&d| d < i));
            }
        }

        #[test]
        fn source_paths_are_relative(path in source_path_strategy()) {
            prop_assert!(!path.starts_with('/'));
        }
    }
}
