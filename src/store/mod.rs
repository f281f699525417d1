//! Versioned storage for a single tree level.
//!
//! A [Store] is a sparse mapping from node position to digest, backed by a history of
//! committed versions. Mutations accumulate in a pending batch that is visible to reads
//! but not persisted until [Store::commit_and_mark] folds it into a new version. Every
//! version is named by a [VersionTag]; [Store::rollback_to] restores a prior version and
//! discards everything after it.
//!
//! The tree materializes one store per level through a [Factory], seeding each new
//! level's history with the last version of the level immediately below so that all
//! levels share a historical point from the moment they exist.

use commonware_cryptography::Digest;
use std::fmt;
use thiserror::Error;

pub mod mem;

/// Errors that can occur when interacting with a [Store].
#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown version: {0}")]
    UnknownVersion(VersionTag),
    #[error("duplicate version: {0}")]
    DuplicateVersion(VersionTag),
    #[error("store is closed")]
    Closed,
    #[error("backend error: {0}")]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

/// Opaque identifier naming a committed version of a [Store].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionTag(String);

impl VersionTag {
    /// Create a new tag from anything string-like.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VersionTag {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

impl From<String> for VersionTag {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

/// A versioned, sparse mapping from position to digest backing one tree level.
///
/// Pending mutations made with [Store::set]/[Store::unset] must be visible to
/// subsequent [Store::get] calls before they are committed. [Store::commit_and_mark]
/// is the only operation that advances [Store::last_version], and
/// [Store::rollback_to] is all-or-nothing for the level it is called on.
pub trait Store<D: Digest> {
    /// Return the digest stored at `position`, if any, including pending mutations.
    fn get(&self, position: u64) -> Result<Option<D>, Error>;

    /// Stage `digest` at `position`.
    fn set(&mut self, position: u64, digest: D) -> Result<(), Error>;

    /// Stage the removal of `position`.
    fn unset(&mut self, position: u64) -> Result<(), Error>;

    /// Return the number of positions with a digest, pending mutations included.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist pending mutations as a new version named `tag`, or by an
    /// auto-generated tag when `None`, and return the new last version. Fails with
    /// [Error::DuplicateVersion] if `tag` already names a version in the history.
    fn commit_and_mark(&mut self, tag: Option<VersionTag>) -> Result<VersionTag, Error>;

    /// Restore the version named `tag`, discarding pending mutations and every
    /// version committed after it. Fails with [Error::UnknownVersion] if `tag` does
    /// not name a version in the history.
    fn rollback_to(&mut self, tag: &VersionTag) -> Result<(), Error>;

    /// Return every version tag in commit order, oldest first.
    fn all_versions(&self) -> Vec<VersionTag>;

    /// Return the tag of the most recently committed version, if any.
    fn last_version(&self) -> Option<VersionTag>;

    /// Return every (position, digest) row in position order, pending mutations
    /// included.
    fn rows(&self) -> Result<Vec<(u64, D)>, Error>;

    /// Release the store's backend resources. Subsequent operations fail with
    /// [Error::Closed].
    fn close(&mut self) -> Result<(), Error>;
}

/// Materializes the [Store] backing a tree level.
pub trait Factory<D: Digest> {
    type Store: Store<D>;

    /// Construct the store for `level`. `initial_version` is the last version of the
    /// level immediately below; a fresh store's history begins with that tag so the
    /// new level starts at the same historical point as its neighbor.
    fn construct(
        &mut self,
        level: u32,
        initial_version: Option<&VersionTag>,
    ) -> Result<Self::Store, Error>;
}
