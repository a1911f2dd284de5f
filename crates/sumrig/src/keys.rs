//! Ready-made key schemes for the three common shapes of lookup:
//! intrinsic keys, positions, and weighted positions.

use crate::scheme::{DerivedKey, InsertionKey, SearchKey, Summed};
use std::cmp::Ordering;

/// Intrinsic-key head: the head *is* the ordering key
///
/// Summaries carry nothing, so this is the classic ordered map. Any
/// `K: Ord` value is its own search and insertion key.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Plain<K>(pub K);

impl<K> Summed for Plain<K> {
    type S = ();

    fn summarize(&self) -> Self::S {}
}

impl<K: Ord> SearchKey<Plain<K>> for K {
    fn compare(&self, _prefix: &(), head: &Plain<K>) -> Ordering {
        self.cmp(&head.0)
    }
}

impl<K: Ord + Clone> DerivedKey<Plain<K>> for K {
    fn synthesize(_prefix: &(), head: &Plain<K>) -> Self {
        head.0.clone()
    }
}

impl<K: Ord + Clone> InsertionKey<Plain<K>> for K {
    fn into_head(self) -> Plain<K> {
        Plain(self)
    }
}

/// Unit head counted by position (order-statistic mode)
///
/// Every node contributes 1 to the summary, so a node's prefix summary
/// is its zero-based rank.
#[derive(Copy, Clone, Default, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct One;

impl Summed for One {
    type S = usize;

    fn summarize(&self) -> usize {
        1
    }
}

/// Zero-based position key over [One] heads
///
/// A rank equal to an existing position matches that node; on
/// insertion it lands just after it, like any duplicate.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Rank(pub usize);

impl SearchKey<One> for Rank {
    fn compare(&self, prefix: &usize, _head: &One) -> Ordering {
        self.0.cmp(prefix)
    }
}

impl DerivedKey<One> for Rank {
    fn synthesize(prefix: &usize, _head: &One) -> Self {
        Rank(*prefix)
    }
}

impl InsertionKey<One> for Rank {
    fn into_head(self) -> One {
        One
    }
}

/// Weighted head covering `width` summary units
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Span(pub usize);

impl Summed for Span {
    type S = usize;

    fn summarize(&self) -> usize {
        self.0
    }
}

/// Weighted-position key over [Span] heads
///
/// Matches the node whose half-open span `[prefix, prefix + width)`
/// contains the offset. Zero-width spans contain nothing and are
/// stepped over.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Offset(pub usize);

impl SearchKey<Span> for Offset {
    fn compare(&self, prefix: &usize, head: &Span) -> Ordering {
        if self.0 < *prefix {
            Ordering::Less
        } else if self.0 < prefix + head.0 {
            Ordering::Equal
        } else {
            Ordering::Greater
        }
    }
}

impl DerivedKey<Span> for Offset {
    fn synthesize(prefix: &usize, _head: &Span) -> Self {
        Offset(*prefix)
    }
}

/// Insertion key for [Span] heads: a span of `width` starting at `offset`
///
/// Ordered by start offset alone, so zero-width spans chain after one
/// another like duplicates.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Placed {
    /// Weighted position at which the span begins
    pub offset: usize,
    /// Width of the span in summary units
    pub width: usize,
}

impl SearchKey<Span> for Placed {
    fn compare(&self, prefix: &usize, _head: &Span) -> Ordering {
        self.offset.cmp(prefix)
    }
}

impl DerivedKey<Span> for Placed {
    fn synthesize(prefix: &usize, head: &Span) -> Self {
        Placed {
            offset: *prefix,
            width: head.0,
        }
    }
}

impl InsertionKey<Span> for Placed {
    fn into_head(self) -> Span {
        Span(self.width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::SumTree;

    #[test]
    fn test_offset_containment() {
        let span = Span(4);
        assert_eq!(Offset(2).compare(&3, &span), Ordering::Less);
        assert_eq!(Offset(3).compare(&3, &span), Ordering::Equal);
        assert_eq!(Offset(6).compare(&3, &span), Ordering::Equal);
        assert_eq!(Offset(7).compare(&3, &span), Ordering::Greater);
        // zero-width spans contain no offset
        assert_eq!(Offset(3).compare(&3, &Span(0)), Ordering::Greater);
    }

    #[test]
    fn test_span_lookup() {
        // pieces of width 3, 1, 4 covering offsets 0..8
        let mut tree: SumTree<Span, &str> = SumTree::new();
        for (width, name) in [(3, "alpha"), (1, "beta"), (4, "gamma")] {
            let tail = tree.rightmost();
            let offset = tree.summary_under(tree.root());
            tree.insert_after(name, Placed { offset, width }, tail);
        }

        assert_eq!(*tree.payload_at(tree.find(&Offset(0)).unwrap()), "alpha");
        assert_eq!(*tree.payload_at(tree.find(&Offset(2)).unwrap()), "alpha");
        assert_eq!(*tree.payload_at(tree.find(&Offset(3)).unwrap()), "beta");
        assert_eq!(*tree.payload_at(tree.find(&Offset(7)).unwrap()), "gamma");
        assert_eq!(tree.find(&Offset(8)), None);
        assert_eq!(tree.summary_under(tree.root()), 8);
    }
}
