//! A binary Merkle tree persisted across independently versioned storage levels.
//!
//! # Structure
//!
//! Level 0 holds the digests of the leaves and level `height` holds the root. The
//! digest of a parent at position `p` is `hash(left ‖ right)` over its children at
//! positions `2p` and `2p + 1` on the level below, substituting the level's
//! empty-subtree digest for an absent child. Trees are not required to be perfectly
//! balanced: a tree over leaves at positions 0, 1 and 2 has
//!
//! ```text
//! level 2:                 root = hash(i0 ‖ i1)
//! level 1:    i0 = hash(l0 ‖ l1)          i1 = hash(l2 ‖ empty(0))
//! level 0:    l0            l1            l2
//! ```
//!
//! # Batched updates
//!
//! [Tree::batch_update] applies a sparse set of changes in one pass. Changes are
//! applied to the level's store, each affected position is paired with its sibling
//! (stored, changed in the same batch, or absent), and the resolved pairs are hashed
//! into the change set for the level above. The loop ends at the root, where every
//! level is committed under a single freshly generated version tag and the tree
//! asserts that all levels agree on their latest version.
//!
//! Removing an even (left) position and setting its odd (right) sibling in the same
//! batch is a structural violation: the hole would separate the new right child from
//! the rest of the level. Such a batch fails with [Error::OrphanedRightChild].
//!
//! # Versioning
//!
//! [Tree::put_version_tag] names the current state across every level and
//! [Tree::rollback_to] restores a named state, level by level. Neither is atomic
//! across levels: both stop at the first failing level and surface its index, which
//! can leave the tree partially updated (check [Tree::consistent] and roll back to a
//! shared tag to repair).
//!
//! # Example
//!
//! ```rust
//! use commonware_cryptography::Sha256;
//! use versioned_merkle::store::mem;
//! use versioned_merkle::tree::{Builder, Change};
//!
//! // Bootstrap a tree over four elements.
//! let mut builder = Builder::<Sha256, _>::new(mem::Factory, 4);
//! for element in [&b"a"[..], b"b", b"c", b"d"] {
//!     builder.add(element);
//! }
//! let mut tree = builder.build().unwrap();
//! assert_eq!(tree.height(), 2);
//! let initial = tree.root().unwrap();
//!
//! // Tag, mutate, roll back.
//! tree.put_version_tag("v1".into()).unwrap();
//! tree.batch_update(vec![Change::remove(3)]).unwrap();
//! assert_ne!(tree.root().unwrap(), initial);
//! tree.rollback_to(&"v1".into()).unwrap();
//! assert_eq!(tree.root().unwrap(), initial);
//! tree.close().unwrap();
//! ```

use thiserror::Error;

mod hasher;
mod storage;
pub use storage::{Builder, Tree};

/// Errors that can occur when interacting with a [Tree].
#[derive(Error, Debug)]
pub enum Error {
    #[error("store failure at level {level}: {source}")]
    Store {
        level: u32,
        source: crate::store::Error,
    },
    #[error("levels disagree on their latest version")]
    Inconsistent,
    #[error("tree is poisoned by a prior consistency violation")]
    Poisoned,
    #[error("right child at position {0} set after left sibling removal")]
    OrphanedRightChild(u64),
    #[error("position {position} exceeds the width of level {level}")]
    PositionOverflow { position: u64, level: u32 },
    #[error("tree is not empty")]
    NotEmpty,
}

/// A single change to one position of a level: `Some` sets or updates the digest,
/// `None` removes it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change<D> {
    pub position: u64,
    pub digest: Option<D>,
}

impl<D> Change<D> {
    /// Set or update the digest at `position`.
    pub fn update(position: u64, digest: D) -> Self {
        Self {
            position,
            digest: Some(digest),
        }
    }

    /// Remove the digest at `position`.
    pub fn remove(position: u64) -> Self {
        Self {
            position,
            digest: None,
        }
    }
}
