use std::cmp::Ordering;

/// Monoidal summary of a subtree
///
/// Every node caches the summary of its subtree,
/// `left ⊕ head ⊕ right`, from which positional and weighted
/// lookups are answered.
///
/// It is assumed that the combine operation has the following properties:
/// - Associativity: `(a ⊕ b) ⊕ c == a ⊕ (b ⊕ c)`
/// - Has an [identity element]: [Summary::identity]
///
/// Commutativity is *not* assumed: summaries are always combined in
/// tree order, left to right. Nor is invertibility: the tree never
/// subtracts a summary, it recomputes from children instead.
///
/// [identity element]: https://en.wikipedia.org/wiki/Identity_element
pub trait Summary: Copy + Eq {
    /// `true` when the summary carries no information at all
    ///
    /// Summary maintenance is skipped entirely for trivial summaries,
    /// turning every summary walk into an O(1) no-op. The canonical
    /// trivial summary is `()`.
    const TRIVIAL: bool = false;

    /// Returns the identity element of this summary, typically zero(es)
    fn identity() -> Self;

    /// Appends another summary to this one: `self = self ⊕ other`
    fn add_assign(&mut self, other: &Self);
}

/// The per-node datum from which summaries are built
///
/// A node stores a head and a payload; it never stores a key. Keys are
/// derived on the fly from `(prefix, head)` where `prefix` is the
/// summary of everything before the node in tree order.
pub trait Summed {
    /// The [Summary] type aggregated over subtrees
    type S: Summary;

    /// Returns the summary contribution of this head alone
    fn summarize(&self) -> Self::S;
}

/// A lookup key over heads of type `H`
///
/// Several key types may share one summary monoid; each search entry
/// point is generic over the key type, so the dispatch is static.
pub trait SearchKey<H: Summed> {
    /// Orders this key against the derived key `(prefix, head)` of a node
    ///
    /// `prefix` is the combined summary of everything strictly before
    /// the node. `Less` means the key lies in the left subtree,
    /// `Greater` in the right, `Equal` that the node matches.
    fn compare(&self, prefix: &H::S, head: &H) -> Ordering;
}

/// A key that can be synthesized from a node's position
///
/// Sequence generation and [key_at] use this to report the key a node
/// currently has.
///
/// [key_at]: crate::tree::SumTree::key_at
pub trait DerivedKey<H: Summed>: SearchKey<H> + Sized {
    /// Builds the derived key of a node from its prefix summary and head
    fn synthesize(prefix: &H::S, head: &H) -> Self;
}

/// A key that keyed insertion accepts
///
/// Since nodes store no key, insertion recovers the head to store from
/// the key itself.
pub trait InsertionKey<H: Summed>: DerivedKey<H> {
    /// Converts this key into the head the new node will carry
    fn into_head(self) -> H;
}

impl Summary for () {
    const TRIVIAL: bool = true;

    fn identity() -> Self {}

    fn add_assign(&mut self, _other: &Self) {}
}

impl Summary for usize {
    fn identity() -> Self {
        0
    }

    fn add_assign(&mut self, other: &Self) {
        *self = self.wrapping_add(*other);
    }
}
