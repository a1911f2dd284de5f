use crate::arena::{Handle, RIGHT};
use crate::scheme::{DerivedKey, Summary, Summed};
use crate::tree::SumTree;
use std::marker::PhantomData;

/// In-order iterator over `(key, payload)` pairs
///
/// Keys are synthesized on the fly by summing heads along the walk, so
/// a full traversal is O(n). The iterator borrows the tree; structural
/// mutation is impossible while one is live.
pub struct Pairs<'a, H: Summed, P, K> {
    tree: &'a SumTree<H, P>,
    node: Option<Handle>,
    prefix: H::S,
    _key: PhantomData<K>,
}

impl<'a, H: Summed, P, K> Pairs<'a, H, P, K> {
    pub(crate) fn new(tree: &'a SumTree<H, P>, node: Option<Handle>) -> Self {
        Self {
            tree,
            node,
            prefix: H::S::identity(),
            _key: PhantomData,
        }
    }

    /// The handle the next call to [Iterator::next] will read, if any
    pub fn peek_handle(&self) -> Option<Handle> {
        self.node
    }
}

impl<'a, H, P, K> Iterator for Pairs<'a, H, P, K>
where
    H: Summed,
    K: DerivedKey<H>,
{
    type Item = (K, &'a P);

    fn next(&mut self) -> Option<Self::Item> {
        let tree = self.tree;
        let x = self.node?;
        let node = &tree.arena[x];
        let key = K::synthesize(&self.prefix, &node.head);
        self.prefix.add_assign(&node.head.summarize());
        self.node = tree.step(x, RIGHT);
        Some((key, &node.payload))
    }
}

impl<H: Summed, P> SumTree<H, P> {
    /// Iterates the whole tree in order, yielding `(key, payload)` pairs
    pub fn generate<K: DerivedKey<H>>(&self) -> Pairs<'_, H, P, K> {
        Pairs::new(self, self.leftmost)
    }

    /// Iterates in order starting at `h`
    ///
    /// The running prefix starts at the identity, so yielded keys are
    /// relative to the suffix. Callers that need absolute keys should
    /// compose with [SumTree::summary_before].
    pub fn generate_from<K: DerivedKey<H>>(&self, h: Handle) -> Pairs<'_, H, P, K> {
        Pairs::new(self, Some(h))
    }
}
