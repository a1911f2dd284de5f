use crate::arena::{Arena, Handle, LEFT, Node, RIGHT, Ref, SENTINEL};
use crate::scheme::{DerivedKey, InsertionKey, SearchKey, Summary, Summed};
use std::cmp::Ordering;
use std::mem;

/// A location where a node may hang
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Slot {
    /// The tree's root slot
    Root,
    /// The `dir` child slot of a node
    Toward(usize, Handle),
}

/// An arena-backed red-black tree with monoidal subtree summaries
///
/// Nodes carry a head (see [Summed]) and a payload; ordering keys are
/// derived on demand from `(prefix summary, head)` by the key scheme,
/// so one container answers intrinsic-key, positional, and weighted
/// lookups alike. All operations are O(log n) unless noted.
///
/// The tree has value semantics: a clone is logically independent.
/// Handles remain valid across insertions but are invalidated by any
/// removal (the arena stays dense by moving its last node into the
/// freed slot); use [SumTree::remove_returning_successor] to keep a
/// position across a removal.
#[derive(Clone)]
pub struct SumTree<H: Summed, P> {
    pub(crate) arena: Arena<H, P>,
    pub(crate) root: Ref,
    pub(crate) leftmost: Ref,
    pub(crate) rightmost: Ref,
}

impl<H: Summed, P> Default for SumTree<H, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Summed, P> SumTree<H, P> {
    /// Creates an empty tree
    pub fn new() -> Self {
        Self {
            arena: Arena::new(),
            root: SENTINEL,
            leftmost: SENTINEL,
            rightmost: SENTINEL,
        }
    }

    /// Builds a tree from `(key, payload)` pairs already in key order
    ///
    /// Each element is attached at the rightmost slot; the ordering
    /// precondition is checked in debug builds only.
    pub fn from_ordered<K, I>(iter: I) -> Self
    where
        K: InsertionKey<H>,
        I: IntoIterator<Item = (K, P)>,
    {
        let mut tree = Self::new();
        for (key, payload) in iter {
            debug_assert!(
                tree.fits_between(&key, tree.rightmost, SENTINEL),
                "from_ordered input out of order"
            );
            let tail = tree.rightmost;
            tree.attach(tail, RIGHT, key.into_head(), payload);
        }
        tree
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Whether the tree holds no nodes
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Pre-allocates room for `additional` more nodes
    pub fn reserve_capacity(&mut self, additional: usize) {
        self.arena.reserve(additional);
    }

    /// Removes every node
    ///
    /// With `keep_capacity` the arena's allocation is retained for
    /// reuse; otherwise it is released.
    pub fn clear(&mut self, keep_capacity: bool) {
        self.arena.clear(keep_capacity);
        self.root = SENTINEL;
        self.leftmost = SENTINEL;
        self.rightmost = SENTINEL;
    }

    /// The root node, if any
    pub fn root(&self) -> Option<Handle> {
        self.root
    }

    /// The first node in tree order, if any
    pub fn leftmost(&self) -> Option<Handle> {
        self.leftmost
    }

    /// The last node in tree order, if any
    pub fn rightmost(&self) -> Option<Handle> {
        self.rightmost
    }

    /// Payload of a node
    pub fn payload_at(&self, h: Handle) -> &P {
        &self.arena[h].payload
    }

    /// Mutable payload of a node
    pub fn payload_at_mut(&mut self, h: Handle) -> &mut P {
        &mut self.arena[h].payload
    }

    /// Head of a node
    pub fn head_at(&self, h: Handle) -> &H {
        &self.arena[h].head
    }

    /// Head and payload of a node
    pub fn element_at(&self, h: Handle) -> (&H, &P) {
        let node = &self.arena[h];
        (&node.head, &node.payload)
    }

    /// The key a node currently derives from its position
    pub fn key_at<K: DerivedKey<H>>(&self, h: Handle) -> K {
        K::synthesize(&self.summary_before(h), &self.arena[h].head)
    }

    /// Replaces the payload of a node, returning the previous one
    pub fn set_payload_at(&mut self, h: Handle, payload: P) -> P {
        mem::replace(&mut self.arena[h].payload, payload)
    }

    /// Replaces the head of a node
    ///
    /// The new head must not change the node's derived key relative to
    /// its current prefix (checked in debug builds); it may change the
    /// keys of everything after the node, which is what makes
    /// count-like summaries cheap to adjust.
    pub fn set_head_at<K: DerivedKey<H>>(&mut self, h: Handle, head: H) {
        #[cfg(debug_assertions)]
        {
            let prefix = self.summary_before(h);
            let old: K = K::synthesize(&prefix, &self.arena[h].head);
            assert!(
                old.compare(&prefix, &head) == Ordering::Equal,
                "set_head_at must not change the derived key"
            );
        }
        self.arena[h].head = head;
        self.update_summaries_at_and_above(h);
    }

    fn in_order(&self) -> impl Iterator<Item = (&H, &P)> {
        let mut node = self.leftmost;
        std::iter::from_fn(move || {
            let x = node?;
            let n = &self.arena[x];
            node = self.step(x, RIGHT);
            Some((&n.head, &n.payload))
        })
    }
}

// Navigation.
impl<H: Summed, P> SumTree<H, P> {
    /// In-order neighbor of `h` in direction `dir`
    ///
    /// O(log n) worst case, O(1) amortized over a full walk.
    pub fn step(&self, h: Handle, dir: usize) -> Option<Handle> {
        if let Some(child) = self.arena[h].links.children[dir] {
            return Some(self.furthest_under(child, dir ^ 1));
        }
        let mut x = h;
        let mut parent = self.arena[x].links.parent;
        while let Some(p) = parent
            && self.arena[p].links.children[dir] == Some(x)
        {
            x = p;
            parent = self.arena[p].links.parent;
        }
        parent
    }

    /// In-order successor of `h`
    pub fn successor(&self, h: Handle) -> Option<Handle> {
        self.step(h, RIGHT)
    }

    /// In-order predecessor of `h`
    pub fn predecessor(&self, h: Handle) -> Option<Handle> {
        self.step(h, LEFT)
    }

    /// Last node on the `dir` child chain starting at `h`
    pub fn furthest_under(&self, mut h: Handle, dir: usize) -> Handle {
        while let Some(child) = self.arena[h].links.children[dir] {
            h = child;
        }
        h
    }

    /// The extremal node in direction `dir`, if any. O(1).
    pub fn furthest_toward(&self, dir: usize) -> Option<Handle> {
        if dir == LEFT { self.leftmost } else { self.rightmost }
    }

    /// The slot `h` currently occupies
    pub fn slot_of(&self, h: Handle) -> Slot {
        match self.arena[h].links.parent {
            None => Slot::Root,
            Some(p) => {
                let dir = if self.arena[p].links.children[LEFT] == Some(h) {
                    LEFT
                } else {
                    RIGHT
                };
                Slot::Toward(dir, p)
            }
        }
    }
}

// Summary queries and maintenance.
impl<H: Summed, P> SumTree<H, P> {
    /// Summary of the subtree under `h`, identity when absent. O(1).
    pub fn summary_under(&self, h: Option<Handle>) -> H::S {
        self.arena.summary_under(h)
    }

    /// Combined summary of everything strictly before `h` in tree order
    pub fn summary_before(&self, h: Handle) -> H::S {
        if H::S::TRIVIAL {
            return H::S::identity();
        }
        let mut acc = self.summary_under(self.arena[h].links.children[LEFT]);
        let mut x = h;
        while let Some(p) = self.arena[x].links.parent {
            if self.arena[p].links.children[RIGHT] == Some(x) {
                // emerged from a right link: everything under the
                // parent's left side comes before the accumulator
                let mut pre = self.summary_under(self.arena[p].links.children[LEFT]);
                pre.add_assign(&self.arena[p].head.summarize());
                pre.add_assign(&acc);
                acc = pre;
            }
            x = p;
        }
        acc
    }

    /// Combined summary of everything strictly after `h` in tree order
    pub fn summary_after(&self, h: Handle) -> H::S {
        if H::S::TRIVIAL {
            return H::S::identity();
        }
        let mut acc = self.summary_under(self.arena[h].links.children[RIGHT]);
        let mut x = h;
        while let Some(p) = self.arena[x].links.parent {
            if self.arena[p].links.children[LEFT] == Some(x) {
                acc.add_assign(&self.arena[p].head.summarize());
                acc.add_assign(&self.summary_under(self.arena[p].links.children[RIGHT]));
            }
            x = p;
        }
        acc
    }

    /// Recomputes the cached summary of `h` from its children and head
    fn update_summary_at(&mut self, h: Handle) {
        if H::S::TRIVIAL {
            return;
        }
        let mut sum = self.summary_under(self.arena[h].links.children[LEFT]);
        sum.add_assign(&self.arena[h].head.summarize());
        sum.add_assign(&self.summary_under(self.arena[h].links.children[RIGHT]));
        self.arena[h].summary = sum;
    }

    /// Recomputes cached summaries from `h` up to the root
    ///
    /// Must run after any change to heads, children, or subtree
    /// structure below `h`.
    fn update_summaries_at_and_above(&mut self, h: Handle) {
        if H::S::TRIVIAL {
            return;
        }
        let mut x = Some(h);
        while let Some(i) = x {
            self.update_summary_at(i);
            x = self.arena[i].links.parent;
        }
    }
}

// Search.
impl<H: Summed, P> SumTree<H, P> {
    /// Generic descent driving every lookup
    ///
    /// `visit` sees the comparison of `key` against each node's derived
    /// key and answers with the direction to continue, or `None` to
    /// stop. The running prefix grows by `left.summary ⊕ head` on every
    /// rightward turn.
    fn descend<K, F>(&self, key: &K, mut visit: F)
    where
        K: SearchKey<H>,
        F: FnMut(Ordering, Handle) -> Option<usize>,
    {
        let mut prefix = H::S::identity();
        let mut cur = self.root;
        while let Some(x) = cur {
            let node = &self.arena[x];
            let left = node.links.children[LEFT];
            let mut at = prefix;
            at.add_assign(&self.summary_under(left));
            match visit(key.compare(&at, &node.head), x) {
                None => return,
                Some(LEFT) => cur = left,
                Some(_) => {
                    at.add_assign(&node.head.summarize());
                    prefix = at;
                    cur = node.links.children[RIGHT];
                }
            }
        }
    }

    /// Topmost node matching `key`, if any
    pub fn find<K: SearchKey<H>>(&self, key: &K) -> Option<Handle> {
        let mut found = None;
        self.descend(key, |ord, x| match ord {
            Ordering::Less => Some(LEFT),
            Ordering::Greater => Some(RIGHT),
            Ordering::Equal => {
                found = Some(x);
                None
            }
        });
        found
    }

    /// Alias for [SumTree::find]
    pub fn topmost_matching<K: SearchKey<H>>(&self, key: &K) -> Option<Handle> {
        self.find(key)
    }

    /// First node in tree order matching `key`, if any
    pub fn leftmost_matching<K: SearchKey<H>>(&self, key: &K) -> Option<Handle> {
        let mut found = None;
        self.descend(key, |ord, x| match ord {
            Ordering::Less => Some(LEFT),
            Ordering::Greater => Some(RIGHT),
            Ordering::Equal => {
                found = Some(x);
                Some(LEFT)
            }
        });
        found
    }

    /// Last node in tree order matching `key`, if any
    pub fn rightmost_matching<K: SearchKey<H>>(&self, key: &K) -> Option<Handle> {
        let mut found = None;
        self.descend(key, |ord, x| match ord {
            Ordering::Less => Some(LEFT),
            Ordering::Greater => Some(RIGHT),
            Ordering::Equal => {
                found = Some(x);
                Some(RIGHT)
            }
        });
        found
    }

    /// Last node whose derived key is strictly before `key`, if any
    pub fn rightmost_before<K: SearchKey<H>>(&self, key: &K) -> Option<Handle> {
        let mut found = None;
        self.descend(key, |ord, x| match ord {
            Ordering::Greater => {
                found = Some(x);
                Some(RIGHT)
            }
            _ => Some(LEFT),
        });
        found
    }

    /// First node whose derived key is strictly after `key`, if any
    pub fn leftmost_after<K: SearchKey<H>>(&self, key: &K) -> Option<Handle> {
        let mut found = None;
        self.descend(key, |ord, x| match ord {
            Ordering::Less => {
                found = Some(x);
                Some(LEFT)
            }
            _ => Some(RIGHT),
        });
        found
    }
}

// Insertion.
impl<H: Summed, P> SumTree<H, P> {
    /// Inserts a node, placing it by `key`; returns its handle
    ///
    /// A key equal to existing keys lands to the right of them.
    pub fn insert<K: InsertionKey<H>>(&mut self, payload: P, key: K) -> Handle {
        let mut slot: (Ref, usize) = (SENTINEL, LEFT);
        let mut prefix = H::S::identity();
        let mut cur = self.root;
        while let Some(x) = cur {
            let node = &self.arena[x];
            let left = node.links.children[LEFT];
            let mut at = prefix;
            at.add_assign(&self.summary_under(left));
            match key.compare(&at, &node.head) {
                Ordering::Less => {
                    slot = (Some(x), LEFT);
                    cur = left;
                }
                _ => {
                    at.add_assign(&node.head.summarize());
                    prefix = at;
                    slot = (Some(x), RIGHT);
                    cur = node.links.children[RIGHT];
                }
            }
        }
        self.link_new(slot.0, slot.1, key.into_head(), payload)
    }

    /// Inserts a node immediately after `after`
    ///
    /// `after` must be the last node before `key` (or share its key);
    /// `None` means "insert at the leftmost slot". The key is only used
    /// to produce the head and to check the precondition in debug
    /// builds; the position comes from the handle, in O(log n) with no
    /// key comparisons.
    pub fn insert_after<K: InsertionKey<H>>(
        &mut self,
        payload: P,
        key: K,
        after: Option<Handle>,
    ) -> Handle {
        debug_assert!(
            self.fits_between(
                &key,
                after,
                after.map_or(self.leftmost, |a| self.step(a, RIGHT)),
            ),
            "insert_after anchor is not the key's predecessor"
        );
        match after {
            Some(a) => self.attach(Some(a), RIGHT, key.into_head(), payload),
            None => {
                let anchor = self.furthest_toward(LEFT);
                self.attach(anchor, LEFT, key.into_head(), payload)
            }
        }
    }

    /// Inserts a node immediately before `before`
    ///
    /// Mirror of [SumTree::insert_after]; `None` means "insert at the
    /// rightmost slot".
    pub fn insert_before<K: InsertionKey<H>>(
        &mut self,
        payload: P,
        key: K,
        before: Option<Handle>,
    ) -> Handle {
        debug_assert!(
            self.fits_between(
                &key,
                before.map_or(self.rightmost, |b| self.step(b, LEFT)),
                before,
            ),
            "insert_before anchor is not the key's successor"
        );
        match before {
            Some(b) => self.attach(Some(b), LEFT, key.into_head(), payload),
            None => {
                let anchor = self.furthest_toward(RIGHT);
                self.attach(anchor, RIGHT, key.into_head(), payload)
            }
        }
    }

    /// Overwrites the payload at `key`, inserting when absent
    ///
    /// Returns the previous payload on a match.
    pub fn set_payload_of<K: InsertionKey<H>>(&mut self, key: K, payload: P) -> Option<P> {
        match self.find(&key) {
            Some(h) => Some(mem::replace(&mut self.arena[h].payload, payload)),
            None => {
                self.insert(payload, key);
                None
            }
        }
    }

    /// Whether `key` may sit between the nodes `pred` and `succ`.
    fn fits_between<K: SearchKey<H>>(&self, key: &K, pred: Ref, succ: Ref) -> bool {
        let after_pred = pred.is_none_or(|p| {
            key.compare(&self.summary_before(p), &self.arena[p].head) != Ordering::Less
        });
        let before_succ = succ.is_none_or(|s| {
            key.compare(&self.summary_before(s), &self.arena[s].head) != Ordering::Greater
        });
        after_pred && before_succ
    }

    /// Inserts a node as the in-order neighbor of `anchor` on side `dir`.
    fn attach(&mut self, anchor: Ref, dir: usize, head: H, payload: P) -> Handle {
        match anchor {
            None => {
                debug_assert!(self.is_empty());
                self.link_new(SENTINEL, LEFT, head, payload)
            }
            Some(a) => match self.arena[a].links.children[dir] {
                // the neighboring slot is the near end of the subtree
                // on the anchor's `dir` side
                Some(child) => {
                    let slot_parent = self.furthest_under(child, dir ^ 1);
                    self.link_new(Some(slot_parent), dir ^ 1, head, payload)
                }
                None => self.link_new(Some(a), dir, head, payload),
            },
        }
    }

    /// Links a fresh red node into a null slot, then restores the
    /// invariants: extremal caches, summaries up the spine, and the
    /// insertion fix-up.
    fn link_new(&mut self, parent: Ref, dir: usize, head: H, payload: P) -> Handle {
        let z = self.arena.push(Node::new(head, payload));
        match parent {
            None => {
                debug_assert!(self.root.is_none());
                self.root = Some(z);
                self.leftmost = Some(z);
                self.rightmost = Some(z);
                self.arena[z].links.red = false;
            }
            Some(p) => {
                debug_assert!(self.arena[p].links.children[dir].is_none());
                self.arena[p].links.children[dir] = Some(z);
                self.arena[z].links.parent = Some(p);
                if dir == LEFT && self.leftmost == Some(p) {
                    self.leftmost = Some(z);
                }
                if dir == RIGHT && self.rightmost == Some(p) {
                    self.rightmost = Some(z);
                }
                self.update_summaries_at_and_above(p);
                self.fix_insert(z);
            }
        }
        z
    }

    fn fix_insert(&mut self, mut z: Handle) {
        while let Some(p) = self.arena[z].links.parent
            && self.arena[p].links.red
        {
            // a red parent is never the root, so the grandparent exists
            let Some(gp) = self.arena[p].links.parent else {
                unreachable!()
            };
            let pdir = if self.arena[gp].links.children[LEFT] == Some(p) {
                LEFT
            } else {
                RIGHT
            };
            let aunt = self.arena[gp].links.children[pdir ^ 1];
            if self.arena.is_red(aunt) {
                let Some(aunt) = aunt else { unreachable!() };
                self.arena[p].links.red = false;
                self.arena[aunt].links.red = false;
                self.arena[gp].links.red = true;
                z = gp;
            } else {
                let p = if self.arena[p].links.children[pdir ^ 1] == Some(z) {
                    // inner child: straighten into the outer case first
                    self.rotate(p, pdir);
                    z
                } else {
                    p
                };
                self.arena[p].links.red = false;
                self.arena[gp].links.red = true;
                self.rotate(gp, pdir ^ 1);
                break;
            }
        }
        if let Some(root) = self.root {
            self.arena[root].links.red = false;
        }
    }
}

// Rotation.
impl<H: Summed, P> SumTree<H, P> {
    /// Rotates `x` toward `dir`, promoting its `dir ^ 1` child
    ///
    /// The demoted node's summary is refreshed before the promoted
    /// one's, which depends on it. Extremal caches are unaffected.
    fn rotate(&mut self, x: Handle, dir: usize) {
        let Some(y) = self.arena[x].links.children[dir ^ 1] else {
            unreachable!("rotation requires the promoted child")
        };
        let inner = self.arena[y].links.children[dir];
        self.arena[x].links.children[dir ^ 1] = inner;
        if let Some(c) = inner {
            self.arena[c].links.parent = Some(x);
        }
        self.replace_child(x, Some(y));
        self.arena[y].links.children[dir] = Some(x);
        self.arena[x].links.parent = Some(y);
        self.update_summary_at(x);
        self.update_summary_at(y);
    }

    /// Makes `y` occupy `x`'s slot (parent link or root).
    fn replace_child(&mut self, x: Handle, y: Ref) {
        let parent = self.arena[x].links.parent;
        if let Some(yi) = y {
            self.arena[yi].links.parent = parent;
        }
        match parent {
            None => self.root = y,
            Some(p) => {
                let dir = if self.arena[p].links.children[LEFT] == Some(x) {
                    LEFT
                } else {
                    RIGHT
                };
                self.arena[p].links.children[dir] = y;
            }
        }
    }
}

// Removal.
impl<H: Summed, P> SumTree<H, P> {
    /// Removes the node at `h`, returning its payload
    ///
    /// Every other handle is invalidated: the arena stays dense by
    /// moving its last node into the freed slot.
    pub fn remove(&mut self, h: Handle) -> P {
        self.remove_inner(h, SENTINEL).1
    }

    /// Removes the node at `h`, returning its in-order successor's
    /// post-removal handle along with the payload
    ///
    /// The returned handle is the one handle guaranteed valid after the
    /// removal; it is `None` when `h` was the rightmost node.
    pub fn remove_returning_successor(&mut self, h: Handle) -> (Option<Handle>, P) {
        let next = self.step(h, RIGHT);
        self.remove_inner(h, next)
    }

    fn remove_inner(&mut self, h: Handle, mut marker: Ref) -> (Ref, P) {
        // Step A: reduce to at most one child by splicing the in-order
        // successor's element into `h`'s slot and removing the
        // successor instead. Order is intact because the successor is
        // immediately after `h`.
        let mut victim = h;
        if let [Some(_), Some(right)] = self.arena[h].links.children {
            let s = self.furthest_under(right, LEFT);
            let (hn, sn) = self.arena.get2_mut(h, s);
            mem::swap(&mut hn.head, &mut sn.head);
            mem::swap(&mut hn.payload, &mut sn.payload);
            if marker == Some(s) {
                marker = Some(h);
            }
            victim = s;
        }

        // Step B: excise the victim, which has at most one child.
        let child = {
            let links = &self.arena[victim].links;
            links.children[LEFT].or(links.children[RIGHT])
        };
        let mut rebalance = !self.arena[victim].links.red;
        if rebalance && self.arena.is_red(child) {
            // a red child absorbs the missing black
            let Some(c) = child else { unreachable!() };
            self.arena[c].links.red = false;
            rebalance = false;
        }
        let slot = self.slot_of(victim);
        self.replace_child(victim, child);
        if self.leftmost == Some(victim) {
            self.leftmost = child.or(self.arena[victim].links.parent);
        }
        if self.rightmost == Some(victim) {
            self.rightmost = child.or(self.arena[victim].links.parent);
        }
        if let Slot::Toward(dir, parent) = slot {
            self.update_summaries_at_and_above(parent);
            // Step C: rebalance starting at the now-empty slot.
            if rebalance {
                self.fix_remove(dir, parent);
            }
        }

        // Step D: keep the arena dense.
        let node = self.compact(victim, &mut marker);
        (marker, node.payload)
    }

    /// CLRS deletion fix-up, driven by the slot `(dir, parent)` that is
    /// one black short.
    fn fix_remove(&mut self, mut dir: usize, mut parent: Handle) {
        loop {
            let Some(mut sibling) = self.arena[parent].links.children[dir ^ 1] else {
                unreachable!("black fix-up slot has a sibling")
            };
            if self.arena[sibling].links.red {
                // Case 1: red sibling; bring a black sibling over
                self.arena[sibling].links.red = false;
                self.arena[parent].links.red = true;
                self.rotate(parent, dir);
                let Some(s) = self.arena[parent].links.children[dir ^ 1] else {
                    unreachable!()
                };
                sibling = s;
            }
            let close = self.arena[sibling].links.children[dir];
            let far = self.arena[sibling].links.children[dir ^ 1];
            if !self.arena.is_red(close) && !self.arena.is_red(far) {
                // Case 2: push the missing black up
                self.arena[sibling].links.red = true;
                if self.arena[parent].links.red {
                    self.arena[parent].links.red = false;
                    return;
                }
                match self.slot_of(parent) {
                    Slot::Root => return,
                    Slot::Toward(d, p) => {
                        dir = d;
                        parent = p;
                    }
                }
            } else if self.arena.is_red(far) {
                // Case 4: red far nephew
                let Some(far) = far else { unreachable!() };
                self.arena[sibling].links.red = self.arena[parent].links.red;
                self.arena[parent].links.red = false;
                self.arena[far].links.red = false;
                self.rotate(parent, dir);
                return;
            } else {
                // Case 3: red close nephew, black far nephew; the close
                // nephew ends up in the parent's place with its color
                let Some(close) = close else { unreachable!() };
                let parent_red = self.arena[parent].links.red;
                self.rotate(sibling, dir ^ 1);
                self.rotate(parent, dir);
                self.arena[close].links.red = parent_red;
                self.arena[parent].links.red = false;
                return;
            }
        }
    }

    /// Moves the last arena node into `victim`'s slot and shrinks the
    /// arena, re-pointing every reference to the old last index.
    fn compact(&mut self, victim: Handle, marker: &mut Ref) -> Node<H, P> {
        let last = Handle::new(self.arena.len() - 1);
        let node = self.arena.swap_remove(victim);
        if victim != last {
            let moved = victim;
            let links = self.arena[moved].links;
            match links.parent {
                None => self.root = Some(moved),
                Some(p) => {
                    let dir = if self.arena[p].links.children[LEFT] == Some(last) {
                        LEFT
                    } else {
                        RIGHT
                    };
                    self.arena[p].links.children[dir] = Some(moved);
                }
            }
            for side in [LEFT, RIGHT] {
                if let Some(c) = links.children[side] {
                    self.arena[c].links.parent = Some(moved);
                }
            }
            if self.leftmost == Some(last) {
                self.leftmost = Some(moved);
            }
            if self.rightmost == Some(last) {
                self.rightmost = Some(moved);
            }
            if *marker == Some(last) {
                *marker = Some(moved);
            }
        }
        node
    }
}

// Bulk operations.
impl<H: Summed + Clone, P: Clone> SumTree<H, P> {
    /// Concatenates `other` after `self`
    ///
    /// Every key of `self` must be at most every key of `other`
    /// (debug-asserted). Elements are appended positionally, one by
    /// one, so `other` is left untouched. O(n log n).
    pub fn append<K: DerivedKey<H>>(&mut self, other: &Self) {
        debug_assert!(
            self.ordered_for_append::<K>(other),
            "append requires self's keys to end before other's begin"
        );
        self.reserve_capacity(other.len());
        for (head, payload) in other.in_order() {
            let tail = self.rightmost;
            self.attach(tail, RIGHT, head.clone(), payload.clone());
        }
    }

    /// Re-inserts every element of `other` by its key. O((n+m) log(n+m)).
    pub fn merge<K: InsertionKey<H>>(&mut self, other: &Self) {
        self.reserve_capacity(other.len());
        for (key, payload) in other.generate::<K>() {
            self.insert(payload.clone(), key);
        }
    }

    fn ordered_for_append<K: DerivedKey<H>>(&self, other: &Self) -> bool {
        let (Some(tail), Some(first)) = (self.rightmost, other.leftmost) else {
            return true;
        };
        let max_key: K = self.key_at(tail);
        // in the concatenation, other's first element is prefixed by
        // the whole of self
        let total = self.summary_under(self.root);
        max_key.compare(&total, &other.arena[first].head) != Ordering::Greater
    }
}

impl<H, P> PartialEq for SumTree<H, P>
where
    H: Summed + PartialEq,
    P: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.in_order().eq(other.in_order())
    }
}

impl<H: Summed + Eq, P: Eq> Eq for SumTree<H, P> {}

impl<H, P> std::fmt::Debug for SumTree<H, P>
where
    H: Summed + std::fmt::Debug,
    P: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SumTree(")?;
        f.debug_list().entries(self.in_order()).finish()?;
        write!(f, ")")
    }
}

#[cfg(feature = "serde")]
mod tree_serde {
    use super::SumTree;
    use crate::arena::RIGHT;
    use crate::scheme::Summed;
    use serde::de::{Deserialize, SeqAccess, Visitor};
    use std::fmt;
    use std::marker::PhantomData;

    pub(super) struct SumTreeVisitor<H: Summed, P> {
        marker: PhantomData<fn() -> SumTree<H, P>>,
    }

    impl<H: Summed, P> SumTreeVisitor<H, P> {
        pub fn new() -> Self {
            SumTreeVisitor {
                marker: PhantomData,
            }
        }
    }

    impl<'de, H, P> Visitor<'de> for SumTreeVisitor<H, P>
    where
        H: Summed + Deserialize<'de>,
        P: Deserialize<'de>,
    {
        type Value = SumTree<H, P>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("an in-order sequence of (head, payload) pairs")
        }

        fn visit_seq<M>(self, mut access: M) -> Result<Self::Value, M::Error>
        where
            M: SeqAccess<'de>,
        {
            let mut tree = SumTree::new();
            if let Some(hint) = access.size_hint() {
                tree.reserve_capacity(hint);
            }
            while let Some((head, payload)) = access.next_element::<(H, P)>()? {
                let tail = tree.rightmost;
                tree.attach(tail, RIGHT, head, payload);
            }
            Ok(tree)
        }
    }
}

#[cfg(feature = "serde")]
impl<H, P> serde::ser::Serialize for SumTree<H, P>
where
    H: Summed + serde::ser::Serialize,
    P: serde::ser::Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        use serde::ser::SerializeSeq;

        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for pair in self.in_order() {
            seq.serialize_element(&pair)?;
        }
        seq.end()
    }
}

#[cfg(feature = "serde")]
impl<'de, H, P> serde::de::Deserialize<'de> for SumTree<H, P>
where
    H: Summed + serde::de::Deserialize<'de>,
    P: serde::de::Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        deserializer.deserialize_seq(self::tree_serde::SumTreeVisitor::new())
    }
}

#[cfg(test)]
impl<H: Summed, P> SumTree<H, P> {
    /// Asserts every structural invariant; panics on the first breach.
    pub(crate) fn is_valid<K: DerivedKey<H>>(&self) {
        fn verify<H: Summed, P>(
            tree: &SumTree<H, P>,
            node: Ref,
            parent: Ref,
        ) -> (usize, usize, H::S) {
            let Some(x) = node else {
                return (1, 0, H::S::identity());
            };
            let n = &tree.arena[x];
            assert!(n.links.parent == parent, "parent link out of sync");
            if n.links.red {
                assert!(
                    !tree.arena.is_red(n.links.children[LEFT])
                        && !tree.arena.is_red(n.links.children[RIGHT]),
                    "red node has a red child"
                );
            }
            let (lh, lc, ls) = verify(tree, n.links.children[LEFT], node);
            let (rh, rc, rs) = verify(tree, n.links.children[RIGHT], node);
            assert_eq!(lh, rh, "black height mismatch");
            let mut sum = ls;
            sum.add_assign(&n.head.summarize());
            sum.add_assign(&rs);
            if !H::S::TRIVIAL {
                assert!(sum == n.summary, "cached summary out of sync");
            }
            (lh + usize::from(!n.links.red), lc + rc + 1, sum)
        }

        assert!(!self.arena.is_red(self.root), "root must be black");
        let (_, count, _) = verify(self, self.root, SENTINEL);
        assert_eq!(count, self.arena.len(), "arena holds stale slots");
        assert_eq!(
            self.leftmost,
            self.root.map(|r| self.furthest_under(r, LEFT)),
            "leftmost cache out of sync"
        );
        assert_eq!(
            self.rightmost,
            self.root.map(|r| self.furthest_under(r, RIGHT)),
            "rightmost cache out of sync"
        );

        let mut prev: Option<K> = None;
        let mut prefix = H::S::identity();
        let mut node = self.leftmost;
        while let Some(x) = node {
            let n = &self.arena[x];
            if let Some(p) = &prev {
                assert!(
                    p.compare(&prefix, &n.head) != Ordering::Greater,
                    "in-order keys out of order"
                );
            }
            prev = Some(K::synthesize(&prefix, &n.head));
            prefix.add_assign(&n.head.summarize());
            node = self.step(x, RIGHT);
        }
    }
}
