//! Order-statistic and weighted-position scenarios, plus the summary
//! laws that tie prefixes, heads, and suffixes together.

use sumrig::SumTree;
use sumrig::keys::{Offset, One, Placed, Rank, Span};

fn rank_list(len: usize) -> (SumTree<One, usize>, Vec<sumrig::Handle>) {
    let mut tree = SumTree::new();
    let mut handles = Vec::with_capacity(len);
    for k in 0..len {
        let tail = tree.rightmost();
        handles.push(tree.insert_after(k, Rank(tree.len()), tail));
    }
    (tree, handles)
}

#[test]
fn test_rank_prefixes() {
    let (tree, handles) = rank_list(100);
    assert_eq!(tree.len(), 100);
    for (k, &h) in handles.iter().enumerate() {
        assert_eq!(tree.summary_before(h), k);
        assert_eq!(tree.summary_after(h), 99 - k);
        assert_eq!(tree.key_at::<Rank>(h), Rank(k));
    }
    assert_eq!(tree.summary_under(tree.root()), 100);
}

#[test]
fn test_rank_removal_shifts_suffix() {
    let (mut tree, handles) = rank_list(100);
    let (next, payload) = tree.remove_returning_successor(handles[50]);
    assert_eq!(payload, 50);

    let next = next.expect("element 50 was not the last");
    assert_eq!(*tree.payload_at(next), 51);
    assert_eq!(tree.summary_before(next), 50);
    assert_eq!(tree.len(), 99);

    // ranks are contiguous again
    let ranks: Vec<usize> = tree.generate::<Rank>().map(|(Rank(i), _)| i).collect();
    assert_eq!(ranks, (0..99).collect::<Vec<_>>());
}

#[test]
fn test_rank_lookup() {
    let (tree, _) = rank_list(10);
    for k in 0..10 {
        let h = tree.find(&Rank(k)).unwrap();
        assert_eq!(*tree.payload_at(h), k);
    }
    assert_eq!(tree.find(&Rank(10)), None);
    assert_eq!(
        tree.rightmost_before(&Rank(4)).map(|h| *tree.payload_at(h)),
        Some(3)
    );
    assert_eq!(
        tree.leftmost_after(&Rank(4)).map(|h| *tree.payload_at(h)),
        Some(5)
    );
}

#[test]
fn test_rank_insert_by_key() {
    // Rank(len) is the append key
    let mut tree: SumTree<One, usize> = SumTree::new();
    for k in 0..50 {
        tree.insert(k, Rank(tree.len()));
    }
    let payloads: Vec<usize> = tree.generate::<Rank>().map(|(_, &p)| p).collect();
    assert_eq!(payloads, (0..50).collect::<Vec<_>>());
}

fn span_tree(widths: &[usize]) -> SumTree<Span, usize> {
    let mut tree = SumTree::new();
    for (i, &width) in widths.iter().enumerate() {
        let tail = tree.rightmost();
        let offset = tree.summary_under(tree.root());
        tree.insert_after(i, Placed { offset, width }, tail);
    }
    tree
}

#[test]
fn test_weighted_lookup() {
    // spans of widths 3, 1, 4, 1, 5 covering offsets 0..14
    let tree = span_tree(&[3, 1, 4, 1, 5]);
    let expected = [0, 0, 0, 1, 2, 2, 2, 2, 3, 4, 4, 4, 4, 4];
    for (offset, &piece) in expected.iter().enumerate() {
        let h = tree.find(&Offset(offset)).unwrap();
        assert_eq!(*tree.payload_at(h), piece, "offset {offset}");
    }
    assert_eq!(tree.find(&Offset(14)), None);
}

#[test]
fn test_summary_partition_law() {
    // prefix ⊕ head ⊕ suffix equals the whole tree's summary
    let tree = span_tree(&[2, 7, 1, 8, 2, 8, 1, 8]);
    let total = tree.summary_under(tree.root());

    let mut node = tree.leftmost();
    while let Some(h) = node {
        let mut sum = tree.summary_before(h);
        sum += tree.head_at(h).0;
        sum += tree.summary_after(h);
        assert_eq!(sum, total);
        node = tree.successor(h);
    }
}

#[test]
fn test_prefix_accumulates_heads() {
    let widths = [5, 0, 3, 9, 1];
    let tree = span_tree(&widths);

    let mut node = tree.leftmost();
    let mut acc = 0;
    while let Some(h) = node {
        assert_eq!(tree.summary_before(h), acc);
        acc += tree.head_at(h).0;
        node = tree.successor(h);
    }
    assert_eq!(acc, tree.summary_under(tree.root()));
}

#[test]
fn test_step_round_trip() {
    let tree = span_tree(&[1, 2, 3, 4, 5, 6]);
    let mut node = tree.leftmost();
    while let Some(h) = node {
        if let Some(prev) = tree.predecessor(h) {
            assert_eq!(tree.successor(prev), Some(h));
        }
        node = tree.successor(h);
    }
}

#[test]
fn test_resize_span_in_place() {
    let mut tree = span_tree(&[2, 3, 4]);
    let beta = tree.find(&Offset(2)).unwrap();

    // shrinking a span keeps its own start offset, shifting only what
    // follows
    tree.set_head_at::<Offset>(beta, Span(1));
    assert_eq!(tree.summary_under(tree.root()), 7);
    assert_eq!(*tree.payload_at(tree.find(&Offset(2)).unwrap()), 1);
    assert_eq!(*tree.payload_at(tree.find(&Offset(3)).unwrap()), 2);
    assert_eq!(tree.find(&Offset(7)), None);
}

#[test]
fn test_generate_from_weighted() {
    let tree = span_tree(&[4, 2, 6]);
    let second = tree.find(&Offset(4)).unwrap();

    let suffix: Vec<(usize, usize)> = tree
        .generate_from::<Placed>(second)
        .map(|(placed, &p)| (placed.offset, p))
        .collect();
    // suffix-relative: offsets restart at zero
    assert_eq!(suffix, vec![(0, 1), (2, 2)]);
    assert_eq!(tree.summary_before(second), 4);
}
