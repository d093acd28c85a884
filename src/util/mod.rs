// src/util/mod.rs

//! Small shared utilities: the keyed-set [`Multimap`] container and the
//! blake3 digest helpers used for task versioning.

pub mod hash;
pub mod multimap;

pub use hash::{Digest, subtree_digest, version_digest};
pub use multimap::Multimap;
