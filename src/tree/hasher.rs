//! Decorator for a cryptographic hasher that implements the tree-specific hashing logic.

use commonware_cryptography::Hasher as CHasher;

/// Computes the leaf and node digests of a tree.
pub struct Hasher<'a, H: CHasher> {
    hasher: &'a mut H,
}

impl<'a, H: CHasher> Hasher<'a, H> {
    /// Creates a new [Hasher].
    pub fn new(hasher: &'a mut H) -> Self {
        Self { hasher }
    }

    /// Computes the digest of a parent node from the digests of its two children.
    pub fn node_digest(&mut self, left: &H::Digest, right: &H::Digest) -> H::Digest {
        self.hasher.update(left.as_ref());
        self.hasher.update(right.as_ref());
        self.hasher.finalize()
    }

    /// Computes the digest of a leaf element.
    pub fn leaf_digest(&mut self, element: &[u8]) -> H::Digest {
        self.hasher.update(element);
        self.hasher.finalize()
    }
}

/// Precompute the empty-subtree digest for every level of a tree of the given height.
///
/// Entry 0 is the digest of empty input, and entry `l + 1` is the digest of the
/// level-`l` entry paired with itself. Entry `l` substitutes for an absent sibling at
/// level `l` when a parent digest is computed.
pub(crate) fn empty_digests<H: CHasher>(hasher: &mut H, height: u32) -> Vec<H::Digest> {
    let mut digests = Vec::with_capacity(height as usize + 1);
    let mut below = H::empty();
    digests.push(below);
    for _ in 0..height {
        below = Hasher::new(hasher).node_digest(&below, &below);
        digests.push(below);
    }
    digests
}
