use super::{
    hasher::{empty_digests, Hasher},
    Change, Error,
};
use crate::store::{Factory, Store, VersionTag};
use commonware_cryptography::Hasher as CHasher;
use commonware_utils::hex;
use std::collections::{btree_map::Entry, BTreeMap};
use tracing::{debug, warn};

/// The resolution of one sibling pair during a batch update: both digests known, or
/// the pair (and with it the parent position) removed.
enum Pair<D> {
    Resolved(D, D),
    Removed,
}

/// A binary Merkle tree whose levels are persisted in independently versioned stores.
///
/// Levels are materialized lazily through the [Factory]: a level's store is
/// constructed on first touch, seeded with the last version of the level below it.
/// All mutating operations take `&mut self`; callers must serialize writers (one
/// tree instance, one writer at a time).
pub struct Tree<H: CHasher, F: Factory<H::Digest>> {
    factory: F,
    levels: Vec<F::Store>,
    height: u32,
    empty: Vec<H::Digest>,
    hasher: H,
    poisoned: bool,
}

impl<H: CHasher, F: Factory<H::Digest>> std::fmt::Debug for Tree<H, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("height", &self.height)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

impl<H: CHasher, F: Factory<H::Digest>> Tree<H, F> {
    /// Return a new `Tree` of the given height with no materialized levels.
    ///
    /// A tree of height `h` spans levels `0..=h`, with up to `1 << h` leaves at
    /// level 0 and the root at level `h`.
    pub fn init(factory: F, height: u32) -> Self {
        assert!(height < 64, "height must fit u64 positions");
        let mut hasher = H::new();
        let empty = empty_digests(&mut hasher, height);
        Self {
            factory,
            levels: Vec::new(),
            height,
            empty,
            hasher,
            poisoned: false,
        }
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Return the number of positions a level can hold.
    fn width(&self, level: u32) -> u64 {
        1u64 << (self.height - level)
    }

    /// Materialize every level up to and including `level`. A freshly constructed
    /// level is seeded with the last version of the level below it so both share a
    /// historical point.
    pub(super) fn ensure_level(&mut self, level: u32) -> Result<(), Error> {
        while self.levels.len() <= level as usize {
            let next = self.levels.len() as u32;
            let seed = self.levels.last().and_then(|below| below.last_version());
            let store = self
                .factory
                .construct(next, seed.as_ref())
                .map_err(|source| Error::Store {
                    level: next,
                    source,
                })?;
            debug!(level = next, "materialized level");
            self.levels.push(store);
        }
        Ok(())
    }

    /// Apply a sparse set of leaf changes and propagate recomputed digests to the
    /// root, committing every level under one version tag. Returns `self` so calls
    /// can be chained.
    ///
    /// A change set holds at most one change per position; when a position appears
    /// more than once, the last entry wins.
    pub fn batch_update(
        &mut self,
        changes: Vec<Change<H::Digest>>,
    ) -> Result<&mut Self, Error> {
        self.batch_update_at(changes, 0)
    }

    /// [Tree::batch_update], starting from an arbitrary level.
    ///
    /// On [Error::OrphanedRightChild] the batch is abandoned mid-level: applied but
    /// uncommitted mutations remain pending in the touched stores. Roll back to the
    /// last committed tag to discard them.
    pub fn batch_update_at(
        &mut self,
        changes: Vec<Change<H::Digest>>,
        level: u32,
    ) -> Result<&mut Self, Error> {
        assert!(level <= self.height, "level exceeds tree height");
        if self.poisoned {
            return Err(Error::Poisoned);
        }
        let height = self.height;

        // Normalize to at most one change per position. BTreeMap iteration is
        // ascending, so an even position is always visited before its odd sibling
        // and pair reconciliation is order-independent.
        let width = self.width(level);
        let mut pending: BTreeMap<u64, Option<H::Digest>> = BTreeMap::new();
        for change in changes {
            if change.position >= width {
                return Err(Error::PositionOverflow {
                    position: change.position,
                    level,
                });
            }
            pending.insert(change.position, change.digest);
        }

        let mut level = level;
        loop {
            self.ensure_level(level)?;
            let Self {
                levels,
                hasher,
                empty,
                ..
            } = self;
            let store = &mut levels[level as usize];

            // Apply every change to this level's store. Later reads during pair
            // reconciliation observe these uncommitted mutations.
            for (&position, digest) in &pending {
                match digest {
                    Some(digest) => store.set(position, *digest),
                    None => store.unset(position),
                }
                .map_err(|source| Error::Store { level, source })?;
            }

            if level == height {
                break;
            }

            // Reconcile each changed position with its sibling. Entries are keyed
            // by the even (left) position of the pair.
            let pad = empty[level as usize];
            let mut hasher = Hasher::new(hasher);
            let mut pairs: BTreeMap<u64, Pair<H::Digest>> = BTreeMap::new();
            for (&position, digest) in &pending {
                if position % 2 == 0 {
                    let pair = match digest {
                        Some(digest) => {
                            let sibling = store
                                .get(position + 1)
                                .map_err(|source| Error::Store { level, source })?
                                .unwrap_or(pad);
                            Pair::Resolved(*digest, sibling)
                        }
                        None => Pair::Removed,
                    };
                    pairs.insert(position, pair);
                } else {
                    match pairs.entry(position - 1) {
                        Entry::Occupied(mut entry) => match entry.get_mut() {
                            Pair::Resolved(_, right) => *right = (*digest).unwrap_or(pad),
                            Pair::Removed => {
                                if digest.is_some() {
                                    return Err(Error::OrphanedRightChild(position));
                                }
                            }
                        },
                        Entry::Vacant(entry) => {
                            let left = store
                                .get(position - 1)
                                .map_err(|source| Error::Store { level, source })?
                                .unwrap_or(pad);
                            entry.insert(Pair::Resolved(left, (*digest).unwrap_or(pad)));
                        }
                    }
                }
            }

            // Project each pair onto the parent level: a resolved pair becomes the
            // parent's new digest, a removed pair removes the parent.
            let mut parent = BTreeMap::new();
            for (position, pair) in pairs {
                let digest = match pair {
                    Pair::Resolved(left, right) => Some(hasher.node_digest(&left, &right)),
                    Pair::Removed => None,
                };
                parent.insert(position / 2, digest);
            }
            pending = parent;
            level += 1;
        }

        self.commit()?;
        self.verify_consistent()?;
        Ok(self)
    }

    /// Commit every materialized level under a single freshly generated version tag.
    pub fn commit(&mut self) -> Result<(), Error> {
        if self.poisoned {
            return Err(Error::Poisoned);
        }
        self.ensure_level(0)?;
        let tag = self.next_tag();
        for (level, store) in self.levels.iter_mut().enumerate() {
            store
                .commit_and_mark(Some(tag.clone()))
                .map_err(|source| Error::Store {
                    level: level as u32,
                    source,
                })?;
        }
        debug!(tag = %tag, levels = self.levels.len(), "committed all levels");
        Ok(())
    }

    /// Generate a tag for the next commit from level 0's history, skipping any name
    /// an explicit tag already took.
    fn next_tag(&self) -> VersionTag {
        let history = self.levels[0].all_versions();
        let mut next = history.len();
        loop {
            let tag = VersionTag::new(next.to_string());
            if !history.contains(&tag) {
                return tag;
            }
            next += 1;
        }
    }

    /// Name the current state of every level `tag`, in level order.
    ///
    /// Stops at the first failing level without untagging earlier levels; the error
    /// carries the failing level's index.
    pub fn put_version_tag(&mut self, tag: VersionTag) -> Result<(), Error> {
        if self.poisoned {
            return Err(Error::Poisoned);
        }
        self.ensure_level(0)?;
        for (level, store) in self.levels.iter_mut().enumerate() {
            store
                .commit_and_mark(Some(tag.clone()))
                .map_err(|source| Error::Store {
                    level: level as u32,
                    source,
                })?;
        }
        debug!(tag = %tag, "tagged all levels");
        Ok(())
    }

    /// Restore the state named `tag` on every level, in level order.
    ///
    /// Not atomic across levels: a failure aborts immediately, leaving earlier
    /// levels already rolled back. The error carries the failing level's index;
    /// check [Tree::consistent] and retry with a tag every level shares to repair.
    /// A successful rollback clears write poisoning.
    pub fn rollback_to(&mut self, tag: &VersionTag) -> Result<&mut Self, Error> {
        for (level, store) in self.levels.iter_mut().enumerate() {
            store.rollback_to(tag).map_err(|source| Error::Store {
                level: level as u32,
                source,
            })?;
        }
        self.poisoned = false;
        debug!(tag = %tag, "rolled back all levels");
        Ok(self)
    }

    /// Return the version history as recorded at level 0, representative for the
    /// whole tree.
    pub fn all_versions(&self) -> Vec<VersionTag> {
        self.levels
            .first()
            .map(|store| store.all_versions())
            .unwrap_or_default()
    }

    /// Return whether every materialized level agrees on its latest version.
    pub fn consistent(&self) -> bool {
        let mut versions = self.levels.iter().map(|store| store.last_version());
        let Some(expected) = versions.next() else {
            return true;
        };
        for (index, version) in versions.enumerate() {
            if version != expected {
                warn!(level = index + 1, "levels disagree on their latest version");
                return false;
            }
        }
        true
    }

    /// Fail and poison the tree if the levels disagree on their latest version.
    /// Poisoning blocks further writes until a successful [Tree::rollback_to].
    fn verify_consistent(&mut self) -> Result<(), Error> {
        if self.consistent() {
            return Ok(());
        }
        self.poisoned = true;
        Err(Error::Inconsistent)
    }

    /// Return the root digest: the stored digest at the root level, or the root
    /// level's empty-subtree digest if nothing was ever stored there.
    pub fn root(&self) -> Result<H::Digest, Error> {
        let level = self.height as usize;
        let Some(store) = self.levels.get(level) else {
            return Ok(self.empty[level]);
        };
        let root = store.get(0).map_err(|source| Error::Store {
            level: self.height,
            source,
        })?;
        Ok(root.unwrap_or(self.empty[level]))
    }

    /// Return the digest stored at (`level`, `position`), if any.
    pub fn get(&self, level: u32, position: u64) -> Result<Option<H::Digest>, Error> {
        let Some(store) = self.levels.get(level as usize) else {
            return Ok(None);
        };
        store
            .get(position)
            .map_err(|source| Error::Store { level, source })
    }

    /// Render every materialized level as one line of `position=digest` entries,
    /// digests in hexadecimal.
    ///
    /// Assumes a readable, consistent state; check [Tree::consistent] first after
    /// any partial failure.
    pub fn dump(&self) -> Result<String, Error> {
        let mut out = String::new();
        for (level, store) in self.levels.iter().enumerate() {
            let rows = store.rows().map_err(|source| Error::Store {
                level: level as u32,
                source,
            })?;
            out.push_str(&format!("level {level}:"));
            for (position, digest) in rows {
                out.push_str(&format!(" {position}={}", hex(&digest)));
            }
            out.push('\n');
        }
        Ok(out)
    }

    /// Commit, then release every level's backend resources.
    pub fn close(mut self) -> Result<(), Error> {
        self.commit()?;
        for (level, store) in self.levels.iter_mut().enumerate() {
            store.close().map_err(|source| Error::Store {
                level: level as u32,
                source,
            })?;
        }
        Ok(())
    }
}

/// Bootstrap a [Tree] from a flat sequence of elements.
///
/// The tree's height is derived from the element count, and the whole tree is
/// initialized (and committed once) by a single batch update spanning positions
/// `0..n-1`.
pub struct Builder<H: CHasher, F: Factory<H::Digest>> {
    factory: F,
    hasher: H,
    leaves: Vec<Option<H::Digest>>,
}

impl<H: CHasher, F: Factory<H::Digest>> Builder<H, F> {
    /// Creates a new [Builder] expecting `expected` elements.
    pub fn new(factory: F, expected: usize) -> Self {
        Self {
            factory,
            hasher: H::new(),
            leaves: Vec::with_capacity(expected),
        }
    }

    /// Queue the digest of the next element.
    pub fn add(&mut self, element: &[u8]) -> &mut Self {
        let digest = Hasher::new(&mut self.hasher).leaf_digest(element);
        self.leaves.push(Some(digest));
        self
    }

    /// Queue an already-computed digest for the next element.
    pub fn add_digest(&mut self, digest: H::Digest) -> &mut Self {
        self.leaves.push(Some(digest));
        self
    }

    /// Queue an absent entry: the corresponding leaf position stays empty.
    pub fn add_empty(&mut self) -> &mut Self {
        self.leaves.push(None);
        self
    }

    /// Construct the tree. Fails with [Error::NotEmpty] if the backing level 0
    /// store already holds rows.
    pub fn build(self) -> Result<Tree<H, F>, Error> {
        let mut tree = Tree::init(self.factory, height_for(self.leaves.len()));
        tree.ensure_level(0)?;
        if !tree.levels[0].is_empty() {
            return Err(Error::NotEmpty);
        }
        let changes: Vec<_> = self
            .leaves
            .into_iter()
            .enumerate()
            .map(|(position, digest)| Change {
                position: position as u64,
                digest,
            })
            .collect();
        tree.batch_update(changes)?;
        Ok(tree)
    }
}

/// Height of the smallest tree able to hold `leaves` leaf positions.
fn height_for(leaves: usize) -> u32 {
    if leaves <= 1 {
        return 0;
    }
    (leaves - 1).ilog2() + 1
}
