// src/util/hash.rs

//! Digest helpers for task identity and versioning.
//!
//! A task's `subtree_sha` fingerprints the structural shape of the subtree
//! rooted at it: its own id combined with the digests of its children,
//! hashed in sorted-child order so the result is independent of declaration
//! order. The task *version* additionally folds in the generation counter,
//! so either a structural change or a "inputs changed" bump invalidates
//! in-flight executions.

use blake3::Hasher;

pub type Digest = blake3::Hash;

/// Digest of a task id plus the (already sorted) digests of its children.
pub fn subtree_digest<'a, I>(task_id: &str, child_digests: I) -> Digest
where
    I: IntoIterator<Item = &'a Digest>,
{
    let mut hasher = Hasher::new();
    hasher.update(task_id.as_bytes());
    // Separator so ("ab", []) and ("a", [digest-of-"b"]) cannot collide.
    hasher.update(&[0u8]);
    for child in child_digests {
        hasher.update(child.as_bytes());
    }
    hasher.finalize()
}

/// Digest of `(generation, subtree_sha)`: the task version.
pub fn version_digest(generation: u64, subtree_sha: &Digest) -> Digest {
    let mut hasher = Hasher::new();
    hasher.update(&generation.to_le_bytes());
    hasher.update(subtree_sha.as_bytes());
    hasher.finalize()
}
