// Copyright 2023 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! The name tree over segment-allocated nodes.
//!
//! A [`ZoneTree`] mirrors the DNS hierarchy: one [`ZoneNode`] per owner
//! name at or below the tree's origin, with each node holding one label
//! and a link to its parent. The children of a node form a treap
//! ordered by case-insensitive label comparison, so lookups and
//! insertions stay logarithmic per level regardless of insertion
//! order.
//!
//! Every link is a byte offset within the owning segment. Nodes never
//! move once allocated, but the segment base may, so no resolved
//! reference is held across an allocation.

use std::cmp::Ordering;

use crate::name::{label_cmp, Name};
use crate::segment::{get_u16, get_u32, get_u64, put_u16, put_u32, put_u64};
use crate::segment::{Segment, SegmentError};

use super::rdataset::{self, RdataSet};

// Node field offsets. The name fragment (a single label, or the full
// origin name for a tree's root node) follows the fixed header.
const N_LEFT: u64 = 0;
const N_RIGHT: u64 = 8;
const N_PARENT: u64 = 16;
const N_CHILD: u64 = 24;
const N_DATA: u64 = 32;
const N_PRIORITY: u64 = 40;
const N_FLAGS: u64 = 44;
const N_NAME_LEN: u64 = 46;
const N_NAME: u64 = 48;
const NODE_HEADER_LEN: usize = 48;

////////////////////////////////////////////////////////////////////////
// NODE FLAGS                                                         //
////////////////////////////////////////////////////////////////////////

/// The per-node flag set.
///
/// Exactly two facts are recorded, and the predicates that set them are
/// deliberately narrow:
///
/// * [`WILDCARD`](NodeFlags::WILDCARD) — this node has a direct child
///   whose label is `*`. The flag is set (on the parent) whenever data
///   is added at a wildcard owner name, plain or signature-only, and is
///   what lookup code consults when it needs a source of synthesis.
/// * [`CALLBACK`](NodeFlags::CALLBACK) — the search algorithm must
///   stop and take special action when it crosses this node. Set only
///   when *plain* NS data is added at a non-origin name (a delegation)
///   or plain DNAME data is added anywhere. A signature-only addition
///   never sets it: an RRSIG covering NS is not a delegation.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct NodeFlags(u16);

impl NodeFlags {
    /// This node has a direct `*` child.
    pub const WILDCARD: NodeFlags = NodeFlags(0x0001);

    /// Lookups crossing this node require special handling.
    pub const CALLBACK: NodeFlags = NodeFlags(0x0002);

    /// Returns the empty flag set.
    pub fn empty() -> Self {
        Self(0)
    }

    /// Returns whether all flags in `other` are set in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl std::fmt::Debug for NodeFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut set = f.debug_set();
        if self.contains(Self::WILDCARD) {
            set.entry(&"WILDCARD");
        }
        if self.contains(Self::CALLBACK) {
            set.entry(&"CALLBACK");
        }
        set.finish()
    }
}

////////////////////////////////////////////////////////////////////////
// NODES                                                              //
////////////////////////////////////////////////////////////////////////

/// A handle to one entry of a [`ZoneTree`]: the address of a
/// segment-resident node. Handles stay valid as long as the node is in
/// the tree; all state is read through the owning segment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ZoneNode(u64);

impl ZoneNode {
    /// Returns this node's flag set.
    pub fn flags(self, seg: &dyn Segment) -> NodeFlags {
        NodeFlags(get_u16(seg, self.0 + N_FLAGS))
    }

    pub(crate) fn set_flag(self, seg: &mut dyn Segment, flag: NodeFlags) {
        let mut flags = self.flags(seg);
        flags.insert(flag);
        put_u16(seg, self.0 + N_FLAGS, flags.0);
    }

    /// Returns the head of this node's record-set chain, or [`None`]
    /// for an empty node (e.g. an empty non-terminal).
    pub fn data(self, seg: &dyn Segment) -> Option<RdataSet> {
        match get_u64(seg, self.0 + N_DATA) {
            0 => None,
            addr => Some(RdataSet::from_addr(addr)),
        }
    }

    pub(crate) fn data_head(self, seg: &dyn Segment) -> u64 {
        get_u64(seg, self.0 + N_DATA)
    }

    pub(crate) fn set_data_head(self, seg: &mut dyn Segment, head: u64) {
        put_u64(seg, self.0 + N_DATA, head);
    }
}

////////////////////////////////////////////////////////////////////////
// THE TREE                                                           //
////////////////////////////////////////////////////////////////////////

/// The result of a [`ZoneTree::find`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FindResult {
    /// The name is present; here is its node.
    Exact(ZoneNode),

    /// The name is absent, but an ancestor is present; here is the
    /// closest encloser.
    Partial(ZoneNode),

    /// The name is not at or below the tree's origin.
    NoMatch,
}

/// A name tree rooted at an origin name.
///
/// The handle is the address of the tree's root node, which holds the
/// full origin name as its name fragment; interior nodes hold a single
/// label each.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ZoneTree(u64);

impl ZoneTree {
    /// Creates a tree containing only its origin node.
    pub(crate) fn create(
        seg: &mut dyn Segment,
        origin: &Name,
    ) -> Result<Self, SegmentError> {
        let root = alloc_node(seg, origin.wire_repr(), 0)?;
        Ok(Self(root))
    }

    pub(crate) fn root_addr(self) -> u64 {
        self.0
    }

    pub(crate) fn from_root_addr(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the tree's origin node.
    pub fn root(self) -> ZoneNode {
        ZoneNode(self.0)
    }

    /// Returns the tree's origin name.
    pub fn origin(self, seg: &dyn Segment) -> Name {
        Name::try_from_wire(node_fragment(seg, self.0)).unwrap()
    }

    /// Looks up `name`, per the three-way contract of [`FindResult`].
    pub fn find(self, seg: &dyn Segment, name: &Name) -> FindResult {
        let origin = self.origin(seg);
        if !name.eq_or_subdomain_of(&origin) {
            return FindResult::NoMatch;
        }
        let depth = name.label_count() - origin.label_count();
        let mut node = self.0;
        for k in (0..depth).rev() {
            match treap_find(seg, get_u64(seg, node + N_CHILD), name.label(k)) {
                Some(child) => node = child,
                None => return FindResult::Partial(ZoneNode(node)),
            }
        }
        FindResult::Exact(ZoneNode(node))
    }

    /// Locates the node for `name`, creating it (and any missing
    /// ancestors) if necessary. Returns the node and whether it was
    /// newly created. A name is present at most once.
    ///
    /// # Panics
    ///
    /// Panics if `name` is not at or below the tree's origin.
    pub fn insert(
        self,
        seg: &mut dyn Segment,
        name: &Name,
    ) -> Result<(ZoneNode, bool), SegmentError> {
        let origin = self.origin(seg);
        assert!(
            name.eq_or_subdomain_of(&origin),
            "name {} is outside the tree origin {}",
            name,
            origin
        );
        let depth = name.label_count() - origin.label_count();
        let mut node = self.0;
        let mut created = false;
        for k in (0..depth).rev() {
            match treap_find(seg, get_u64(seg, node + N_CHILD), name.label(k)) {
                Some(child) => node = child,
                None => {
                    let new = alloc_node(seg, name.label(k), node)?;
                    let child_root = get_u64(seg, node + N_CHILD);
                    let new_root = treap_insert(seg, child_root, new);
                    put_u64(seg, node + N_CHILD, new_root);
                    node = new;
                    created = true;
                }
            }
        }
        Ok((ZoneNode(node), created))
    }

    /// Reconstructs the owner name of `node`.
    pub fn name_of(self, seg: &dyn Segment, node: ZoneNode) -> Name {
        let mut wire = Vec::new();
        let mut cur = node.0;
        while cur != self.0 {
            let label = node_fragment(seg, cur);
            wire.push(label.len() as u8);
            wire.extend_from_slice(label);
            cur = get_u64(seg, cur + N_PARENT);
        }
        wire.extend_from_slice(node_fragment(seg, self.0));
        Name::try_from_wire(&wire).unwrap()
    }

    /// Unlinks `node` if it has no data and no children, releasing its
    /// storage, and walks up doing the same for ancestors emptied by
    /// the removal. The origin node is never removed.
    pub(crate) fn remove_if_empty(self, seg: &mut dyn Segment, node: ZoneNode) {
        let mut cur = node.0;
        while cur != self.0 {
            if get_u64(seg, cur + N_DATA) != 0 || get_u64(seg, cur + N_CHILD) != 0 {
                break;
            }
            let parent = get_u64(seg, cur + N_PARENT);
            let label = node_fragment(seg, cur).to_vec();
            let child_root = get_u64(seg, parent + N_CHILD);
            let (new_root, removed) = treap_remove(seg, child_root, &label);
            put_u64(seg, parent + N_CHILD, new_root);
            debug_assert_eq!(removed, Some(cur));
            free_node(seg, cur);
            cur = parent;
        }
    }

    /// Tears the whole tree down, releasing every node and every
    /// record set chained from one.
    pub(crate) fn destroy(self, seg: &mut dyn Segment) {
        let mut stack = vec![self.0];
        while let Some(node) = stack.pop() {
            for link in [N_LEFT, N_RIGHT, N_CHILD] {
                let target = get_u64(seg, node + link);
                if target != 0 {
                    stack.push(target);
                }
            }
            let data = get_u64(seg, node + N_DATA);
            if data != 0 {
                rdataset::destroy_chain(seg, data);
            }
            free_node(seg, node);
        }
    }
}

////////////////////////////////////////////////////////////////////////
// NODE STORAGE                                                       //
////////////////////////////////////////////////////////////////////////

fn alloc_node(
    seg: &mut dyn Segment,
    fragment: &[u8],
    parent: u64,
) -> Result<u64, SegmentError> {
    let addr = seg.allocate(NODE_HEADER_LEN + fragment.len())?.get();
    put_u64(seg, addr + N_PARENT, parent);
    put_u32(seg, addr + N_PRIORITY, rand::random::<u32>());
    put_u16(seg, addr + N_NAME_LEN, fragment.len() as u16);
    seg.bytes_mut((addr + N_NAME).into(), fragment.len())
        .copy_from_slice(fragment);
    Ok(addr)
}

fn free_node(seg: &mut dyn Segment, node: u64) {
    let fragment_len = get_u16(seg, node + N_NAME_LEN) as usize;
    seg.deallocate(node.into(), NODE_HEADER_LEN + fragment_len);
}

fn node_fragment(seg: &dyn Segment, node: u64) -> &[u8] {
    let len = get_u16(seg, node + N_NAME_LEN) as usize;
    seg.bytes((node + N_NAME).into(), len)
}

////////////////////////////////////////////////////////////////////////
// CHILD TREAPS                                                       //
////////////////////////////////////////////////////////////////////////

fn treap_find(seg: &dyn Segment, mut cur: u64, label: &[u8]) -> Option<u64> {
    while cur != 0 {
        match label_cmp(label, node_fragment(seg, cur)) {
            Ordering::Less => cur = get_u64(seg, cur + N_LEFT),
            Ordering::Greater => cur = get_u64(seg, cur + N_RIGHT),
            Ordering::Equal => return Some(cur),
        }
    }
    None
}

/// Inserts `node` into the treap rooted at `root`, returning the new
/// root. The node's label must not already be present.
fn treap_insert(seg: &mut dyn Segment, root: u64, node: u64) -> u64 {
    if root == 0 {
        return node;
    }
    match label_cmp(node_fragment(seg, node), node_fragment(seg, root)) {
        Ordering::Less => {
            let left = get_u64(seg, root + N_LEFT);
            let new_left = treap_insert(seg, left, node);
            put_u64(seg, root + N_LEFT, new_left);
            if get_u32(seg, new_left + N_PRIORITY) > get_u32(seg, root + N_PRIORITY) {
                rotate_right(seg, root)
            } else {
                root
            }
        }
        Ordering::Greater => {
            let right = get_u64(seg, root + N_RIGHT);
            let new_right = treap_insert(seg, right, node);
            put_u64(seg, root + N_RIGHT, new_right);
            if get_u32(seg, new_right + N_PRIORITY) > get_u32(seg, root + N_PRIORITY) {
                rotate_left(seg, root)
            } else {
                root
            }
        }
        Ordering::Equal => unreachable!("duplicate label inserted into a child treap"),
    }
}

/// Removes the node with `label` from the treap rooted at `root`.
/// Returns the new root and the removed node, if any.
fn treap_remove(seg: &mut dyn Segment, root: u64, label: &[u8]) -> (u64, Option<u64>) {
    if root == 0 {
        return (0, None);
    }
    match label_cmp(label, node_fragment(seg, root)) {
        Ordering::Less => {
            let left = get_u64(seg, root + N_LEFT);
            let (new_left, removed) = treap_remove(seg, left, label);
            put_u64(seg, root + N_LEFT, new_left);
            (root, removed)
        }
        Ordering::Greater => {
            let right = get_u64(seg, root + N_RIGHT);
            let (new_right, removed) = treap_remove(seg, right, label);
            put_u64(seg, root + N_RIGHT, new_right);
            (root, removed)
        }
        Ordering::Equal => {
            let left = get_u64(seg, root + N_LEFT);
            let right = get_u64(seg, root + N_RIGHT);
            let merged = treap_merge(seg, left, right);
            put_u64(seg, root + N_LEFT, 0);
            put_u64(seg, root + N_RIGHT, 0);
            (merged, Some(root))
        }
    }
}

fn treap_merge(seg: &mut dyn Segment, left: u64, right: u64) -> u64 {
    if left == 0 {
        return right;
    }
    if right == 0 {
        return left;
    }
    if get_u32(seg, left + N_PRIORITY) > get_u32(seg, right + N_PRIORITY) {
        let left_right = get_u64(seg, left + N_RIGHT);
        let merged = treap_merge(seg, left_right, right);
        put_u64(seg, left + N_RIGHT, merged);
        left
    } else {
        let right_left = get_u64(seg, right + N_LEFT);
        let merged = treap_merge(seg, left, right_left);
        put_u64(seg, right + N_LEFT, merged);
        right
    }
}

fn rotate_right(seg: &mut dyn Segment, node: u64) -> u64 {
    let pivot = get_u64(seg, node + N_LEFT);
    let moved = get_u64(seg, pivot + N_RIGHT);
    put_u64(seg, node + N_LEFT, moved);
    put_u64(seg, pivot + N_RIGHT, node);
    pivot
}

fn rotate_left(seg: &mut dyn Segment, node: u64) -> u64 {
    let pivot = get_u64(seg, node + N_RIGHT);
    let moved = get_u64(seg, pivot + N_LEFT);
    put_u64(seg, node + N_RIGHT, moved);
    put_u64(seg, pivot + N_LEFT, node);
    pivot
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::MockSegment;

    fn name(text: &str) -> Name {
        text.parse().unwrap()
    }

    fn new_tree(seg: &mut dyn Segment) -> ZoneTree {
        ZoneTree::create(seg, &name("example.org.")).unwrap()
    }

    #[test]
    fn insert_and_find_exact() {
        let mut seg = MockSegment::new();
        let tree = new_tree(&mut seg);

        let (node, created) = tree.insert(&mut seg, &name("www.example.org.")).unwrap();
        assert!(created);
        let (again, created) = tree.insert(&mut seg, &name("WWW.example.org.")).unwrap();
        assert!(!created);
        assert_eq!(node, again);

        match tree.find(&seg, &name("www.example.org.")) {
            FindResult::Exact(found) => assert_eq!(found, node),
            other => panic!("unexpected result {:?}", other),
        }
        tree.destroy(&mut seg);
        assert!(seg.all_memory_deallocated());
    }

    #[test]
    fn find_reports_the_closest_encloser() {
        let mut seg = MockSegment::new();
        let tree = new_tree(&mut seg);
        let (b_node, _) = tree.insert(&mut seg, &name("b.example.org.")).unwrap();

        // A name below b: the closest encloser is b.
        match tree.find(&seg, &name("a.b.example.org.")) {
            FindResult::Partial(found) => assert_eq!(found, b_node),
            other => panic!("unexpected result {:?}", other),
        }

        // A sibling of b: the closest encloser is the origin.
        match tree.find(&seg, &name("c.example.org.")) {
            FindResult::Partial(found) => assert_eq!(found, tree.root()),
            other => panic!("unexpected result {:?}", other),
        }

        // Out of zone entirely.
        assert_eq!(tree.find(&seg, &name("example.com.")), FindResult::NoMatch);
        tree.destroy(&mut seg);
    }

    #[test]
    fn intermediate_nodes_are_created() {
        let mut seg = MockSegment::new();
        let tree = new_tree(&mut seg);
        tree.insert(&mut seg, &name("a.b.c.example.org.")).unwrap();

        // The empty non-terminals exist as nodes.
        assert!(matches!(
            tree.find(&seg, &name("b.c.example.org.")),
            FindResult::Exact(_)
        ));
        assert!(matches!(
            tree.find(&seg, &name("c.example.org.")),
            FindResult::Exact(_)
        ));
        tree.destroy(&mut seg);
    }

    #[test]
    fn name_of_round_trips() {
        let mut seg = MockSegment::new();
        let tree = new_tree(&mut seg);
        let owner = name("a.b.example.org.");
        let (node, _) = tree.insert(&mut seg, &owner).unwrap();
        assert_eq!(tree.name_of(&seg, node), owner);
        assert_eq!(tree.name_of(&seg, tree.root()), name("example.org."));
        tree.destroy(&mut seg);
    }

    #[test]
    fn removal_cascades_through_empty_ancestors() {
        let mut seg = MockSegment::new();
        let tree = new_tree(&mut seg);
        let (node, _) = tree.insert(&mut seg, &name("a.b.c.example.org.")).unwrap();
        let (keep, _) = tree.insert(&mut seg, &name("d.c.example.org.")).unwrap();

        tree.remove_if_empty(&mut seg, node);
        // a and b are gone; c survives because d hangs off it.
        assert!(matches!(
            tree.find(&seg, &name("a.b.c.example.org.")),
            FindResult::Partial(found) if found != tree.root()
        ));
        assert!(matches!(
            tree.find(&seg, &name("b.c.example.org.")),
            FindResult::Partial(_)
        ));
        assert!(matches!(
            tree.find(&seg, &name("c.example.org.")),
            FindResult::Exact(_)
        ));

        tree.remove_if_empty(&mut seg, keep);
        // Now the whole branch unwinds to the origin.
        match tree.find(&seg, &name("c.example.org.")) {
            FindResult::Partial(found) => assert_eq!(found, tree.root()),
            other => panic!("unexpected result {:?}", other),
        }
        tree.destroy(&mut seg);
        assert!(seg.all_memory_deallocated());
    }

    #[test]
    fn many_siblings_stay_findable() {
        let mut seg = MockSegment::new();
        let tree = new_tree(&mut seg);
        for i in 0..500 {
            tree.insert(&mut seg, &name(&format!("h{}.example.org.", i)))
                .unwrap();
        }
        for i in 0..500 {
            assert!(matches!(
                tree.find(&seg, &name(&format!("h{}.example.org.", i))),
                FindResult::Exact(_)
            ));
        }
        tree.destroy(&mut seg);
        assert!(seg.all_memory_deallocated());
    }

    #[test]
    #[should_panic(expected = "outside the tree origin")]
    fn insert_outside_the_origin_panics() {
        let mut seg = MockSegment::new();
        let tree = new_tree(&mut seg);
        let _ = tree.insert(&mut seg, &name("example.com."));
    }
}
