//! A versioned level store where all versions are held in memory.

use super::{Error, Store, VersionTag};
use commonware_cryptography::Digest;
use std::collections::BTreeMap;

/// Implementation of [Store] backed by in-memory snapshots.
///
/// Committed versions are full snapshots of the level's rows. Pending mutations are
/// kept in a diff over the latest snapshot: `Some` marks a position as created or
/// updated, `None` marks it as deleted. We use a [BTreeMap] for the diff and the
/// snapshots to allow for a deterministic iteration order.
pub struct Mem<D: Digest> {
    versions: Vec<(VersionTag, BTreeMap<u64, D>)>,
    diff: BTreeMap<u64, Option<D>>,
    closed: bool,
}

impl<D: Digest> Mem<D> {
    /// Return a new (empty) `Mem` with no version history.
    pub fn new() -> Self {
        Self {
            versions: Vec::new(),
            diff: BTreeMap::new(),
            closed: false,
        }
    }

    /// Return a new `Mem` whose history starts at `initial_version` with no rows.
    pub fn seeded(initial_version: VersionTag) -> Self {
        Self {
            versions: vec![(initial_version, BTreeMap::new())],
            diff: BTreeMap::new(),
            closed: false,
        }
    }

    fn open(&self) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn committed(&self) -> Option<&BTreeMap<u64, D>> {
        self.versions.last().map(|(_, snapshot)| snapshot)
    }
}

impl<D: Digest> Default for Mem<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Digest> Store<D> for Mem<D> {
    fn get(&self, position: u64) -> Result<Option<D>, Error> {
        self.open()?;
        if let Some(change) = self.diff.get(&position) {
            return Ok(*change);
        }
        Ok(self
            .committed()
            .and_then(|snapshot| snapshot.get(&position).copied()))
    }

    fn set(&mut self, position: u64, digest: D) -> Result<(), Error> {
        self.open()?;
        self.diff.insert(position, Some(digest));
        Ok(())
    }

    fn unset(&mut self, position: u64) -> Result<(), Error> {
        self.open()?;
        self.diff.insert(position, None);
        Ok(())
    }

    fn len(&self) -> usize {
        let mut len = self.committed().map_or(0, BTreeMap::len);
        for (position, change) in &self.diff {
            let stored = self
                .committed()
                .is_some_and(|snapshot| snapshot.contains_key(position));
            match (stored, change) {
                (false, Some(_)) => len += 1,
                (true, None) => len -= 1,
                _ => {}
            }
        }
        len
    }

    fn commit_and_mark(&mut self, tag: Option<VersionTag>) -> Result<VersionTag, Error> {
        self.open()?;
        let tag = tag.unwrap_or_else(|| VersionTag::new(self.versions.len().to_string()));
        if self.versions.iter().any(|(existing, _)| existing == &tag) {
            return Err(Error::DuplicateVersion(tag));
        }
        let mut snapshot = self.committed().cloned().unwrap_or_default();
        for (position, change) in std::mem::take(&mut self.diff) {
            match change {
                Some(digest) => snapshot.insert(position, digest),
                None => snapshot.remove(&position),
            };
        }
        self.versions.push((tag.clone(), snapshot));
        Ok(tag)
    }

    fn rollback_to(&mut self, tag: &VersionTag) -> Result<(), Error> {
        self.open()?;
        let Some(index) = self
            .versions
            .iter()
            .position(|(existing, _)| existing == tag)
        else {
            return Err(Error::UnknownVersion(tag.clone()));
        };
        self.versions.truncate(index + 1);
        self.diff.clear();
        Ok(())
    }

    fn all_versions(&self) -> Vec<VersionTag> {
        self.versions.iter().map(|(tag, _)| tag.clone()).collect()
    }

    fn last_version(&self) -> Option<VersionTag> {
        self.versions.last().map(|(tag, _)| tag.clone())
    }

    fn rows(&self) -> Result<Vec<(u64, D)>, Error> {
        self.open()?;
        let mut rows = self.committed().cloned().unwrap_or_default();
        for (position, change) in &self.diff {
            match change {
                Some(digest) => rows.insert(*position, *digest),
                None => rows.remove(position),
            };
        }
        Ok(rows.into_iter().collect())
    }

    fn close(&mut self) -> Result<(), Error> {
        self.open()?;
        self.versions.clear();
        self.diff.clear();
        self.closed = true;
        Ok(())
    }
}

/// A [super::Factory] handing out fresh [Mem] stores.
#[derive(Clone, Debug, Default)]
pub struct Factory;

impl<D: Digest> super::Factory<D> for Factory {
    type Store = Mem<D>;

    fn construct(
        &mut self,
        _level: u32,
        initial_version: Option<&VersionTag>,
    ) -> Result<Self::Store, Error> {
        Ok(match initial_version {
            Some(tag) => Mem::seeded(tag.clone()),
            None => Mem::new(),
        })
    }
}
