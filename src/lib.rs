//! Maintain a binary Merkle tree across independently versioned storage levels.
//!
//! Each level of the tree is persisted in its own versioned [store::Store]. Sparse
//! batches of changes are applied level by level up to the root, after which every
//! level is committed under a single shared version tag so the tree can be rolled
//! back to any named snapshot in lock-step. See [tree] for the update algorithm
//! and a usage example.
//!
//! # Status
//!
//! `versioned-merkle` is **ALPHA** software and is not yet recommended for production use.
//! Developers should expect breaking changes and occasional instability.

pub mod store;
pub mod tree;
