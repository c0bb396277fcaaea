//! The mutable OPE (mOPE) tree (spec §4.4): a balanced B-tree that assigns each inserted key a
//! mutable integer position, rewritten in place whenever a split changes what "in place" means.
//!
//! Unlike [`PopeTree`](crate::PopeTree), which reveals order lazily through buffered comparisons,
//! mOPE commits to one well-defined integer per key at all times -- the tradeoff is that an
//! insertion can force a burst of rewrites along a root-to-leaf path, each one a leak of the
//! *relative* order between the rewritten key and its neighbors (spec §4.4).
//!
//! Nodes live in an arena, same rationale as [`PopeTree`](crate::PopeTree): Rust doesn't allow a
//! node to both own its children and be referenced back by them.

use std::collections::HashMap;

use log::debug;

use crate::{invariant, Backend, Cipher, Error, Oracle};

/// An OPE encoding before it has been folded into a single integer: one component per level of
/// the tree, from the root down.
type Tuple = Vec<u32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NodeId(usize);

#[derive(Debug)]
struct LeafData {
    parent: Option<NodeId>,
    parind: usize,
    prefix: Tuple,
    keys: Vec<Vec<u8>>,
    encodings: Vec<Option<Tuple>>,
}

#[derive(Debug)]
struct InternalData {
    parent: Option<NodeId>,
    parind: usize,
    prefix: Tuple,
    /// Leaves always have an empty suffix; only internal nodes carry one, and it is always all
    /// zeros, so only its length needs to be stored (spec §9 Design Notes).
    suffix_len: usize,
    keys: Vec<Vec<u8>>,
    encodings: Vec<Option<Tuple>>,
    children: Vec<NodeId>,
}

#[derive(Debug)]
enum MopeNode {
    Leaf(LeafData),
    Internal(InternalData),
}

/// The mOPE tree itself, plus the process-level sorted index of every encoding currently in use
/// and the key/value pairs stored under each one.
pub struct MopeTree<C: Cipher> {
    oracle: Oracle<C>,
    maxlen: usize,
    nodes: Vec<MopeNode>,
    root: NodeId,
    encodings: Vec<u64>,
    data: HashMap<u64, Vec<(Vec<u8>, Vec<u8>)>>,
}

impl<C: Cipher> MopeTree<C> {
    /// Create a new, empty mOPE tree backed by `oracle`, with at most `maxlen` keys per node
    /// before it splits.
    pub fn new(oracle: Oracle<C>, maxlen: usize) -> MopeTree<C> {
        MopeTree {
            oracle,
            maxlen,
            nodes: vec![MopeNode::Leaf(LeafData {
                parent: None,
                parind: 0,
                prefix: Vec::new(),
                keys: Vec::new(),
                encodings: Vec::new(),
            })],
            root: NodeId(0),
            encodings: Vec::new(),
            data: HashMap::new(),
        }
    }

    /// Read-only access to the oracle, e.g. to inspect its instrumentation counters.
    pub fn oracle(&self) -> &Oracle<C> {
        &self.oracle
    }

    /// Insert `(key, value)`, assigning `key` a fresh encoding if it isn't already present
    /// (spec §4.4). Duplicate keys are permitted.
    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), Error> {
        let (encoding, _ind, _found) = self.encode(&key, true)?;
        self.data.entry(encoding).or_default().push((key, value));
        Ok(())
    }

    /// Look up the value stored for `key`, or `None` if absent. For a key inserted more than
    /// once, returns the first value inserted under it.
    pub fn lookup(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let (ekey, _ind, found) = self.encode(key, false)?;
        if !found {
            return Ok(None);
        }
        Ok(self.data.get(&ekey).and_then(|v| v.first()).map(|(_, val)| val.clone()))
    }

    /// All `(key, value)` pairs with `key1 <= key < key2` by decrypted plaintext order.
    pub fn range_search(&mut self, key1: &[u8], key2: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        let (_, ind1, _) = self.encode(key1, false)?;
        let (_, ind2, _) = self.encode(key2, false)?;
        let mut out = Vec::new();
        for ii in ind1..ind2 {
            if let Some(vals) = self.encodings.get(ii).and_then(|enc| self.data.get(enc)) {
                out.extend(vals.iter().cloned());
            }
        }
        Ok(out)
    }

    /// The total number of `(key, value)` pairs stored, counting duplicates.
    pub fn size(&self) -> usize {
        self.data.values().map(Vec::len).sum()
    }

    /// All `(key, value)` pairs, in ascending plaintext order.
    pub fn traverse(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        for enc in &self.encodings {
            if let Some(vals) = self.data.get(enc) {
                out.extend(vals.iter().cloned());
            }
        }
        out
    }

    /// The tree's height: 0 for a single leaf.
    pub fn height(&self) -> usize {
        self.height_of(self.root)
    }

    /// The total number of nodes in the tree (leaves and internal nodes).
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Validate the tree's shape and encoding invariants (spec §8). A no-op in release builds.
    pub fn check(&self) {
        #[cfg(debug_assertions)]
        {
            let tree_encodings = self.traverse_tree_encodings(self.root);
            if let Some(first) = tree_encodings.first() {
                invariant!(
                    tree_encodings.iter().all(|enc| enc.len() == first.len()),
                    "every encoding in the tree must have the same tuple length"
                );
            }
            let computed: Vec<u64> = tree_encodings
                .iter()
                .map(|t| self.tuptoval(t).expect("an already-assigned encoding must not overflow"))
                .collect();
            invariant!(
                computed == self.encodings,
                "the tree's leaf-order encodings must match the process-level sorted index"
            );
            for enc in &self.encodings {
                invariant!(
                    self.data.get(enc).is_some_and(|v| !v.is_empty()),
                    "every encoding in the sorted index must have at least one stored value"
                );
            }
            for (enc, values) in &self.data {
                invariant!(
                    values.is_empty() || self.encodings.contains(enc),
                    "every key with stored values must appear in the sorted index"
                );
            }
        }
    }

    /// Compute the OPE encoding for `key` (spec §4.4).
    ///
    /// When `insert` is `true` and `key` is absent, it is added and every existing encoding
    /// disturbed by the resulting split is rewritten. When `insert` is `false`, nothing is
    /// mutated: the returned encoding is `key`'s existing one if present, or the position it
    /// would occupy if inserted.
    ///
    /// If an ancestor separator already equals `key`, the walk stops there without descending
    /// into `key`'s actual leaf. `found` is `true` in that case too, so a caller cannot
    /// distinguish "matched at an ancestor" from "matched at the leaf" -- this is intentional
    /// (spec §9 Open Questions): the encoding returned is correct either way, and nothing in
    /// this crate depends on knowing which node produced it.
    fn encode(&mut self, key: &[u8], insert: bool) -> Result<(u64, usize, bool), Error> {
        let mut updates: Vec<(Tuple, Tuple)> = Vec::new();
        let root = self.root;
        let (restup, found) = self.node_encode(root, key, insert, &mut updates)?;
        let res = self.tuptoval(&restup)?;

        let ind = if insert && !found {
            let upencs = updates
                .iter()
                .map(|(old, new)| Ok((self.tuptoval(old)?, self.tuptoval(new)?)))
                .collect::<Result<Vec<(u64, u64)>, Error>>()?;
            let upinds: Vec<usize> = upencs
                .iter()
                .map(|(old, _)| self.encodings.binary_search(old).unwrap_or_else(|i| i))
                .collect();
            let mut updata: Vec<(u64, Vec<(Vec<u8>, Vec<u8>)>)> = Vec::new();
            for (&upind, &(old, new)) in upinds.iter().zip(upencs.iter()) {
                invariant!(
                    upind < self.encodings.len() && self.encodings[upind] == old,
                    "a rewrite must target an encoding that is actually present in the sorted index"
                );
                self.encodings[upind] = new;
                let values = self
                    .data
                    .remove(&old)
                    .expect("a rewritten encoding must already have stored data");
                updata.push((new, values));
            }
            for (new, values) in updata {
                self.data.insert(new, values);
            }
            let ind = self.encodings.binary_search(&res).unwrap_or_else(|i| i);
            invariant!(
                ind == self.encodings.len() || self.encodings[ind] != res,
                "a freshly inserted encoding must not already be present"
            );
            self.encodings.insert(ind, res);
            ind
        } else {
            let ind = self.encodings.binary_search(&res).unwrap_or_else(|i| i);
            invariant!(updates.is_empty(), "a non-inserting encode must never produce rewrites");
            invariant!(
                !found || self.encodings[ind] == res,
                "a found key's encoding must already be present in the sorted index"
            );
            ind
        };
        Ok((res, ind, found))
    }

    fn node_encode(
        &mut self,
        node: NodeId,
        key: &[u8],
        insert: bool,
        updates: &mut Vec<(Tuple, Tuple)>,
    ) -> Result<(Tuple, bool), Error> {
        if matches!(self.nodes[node.0], MopeNode::Leaf(_)) {
            self.leaf_encode(node, key, insert, updates)
        } else {
            self.internal_encode(node, key, insert, updates)
        }
    }

    fn internal_encode(
        &mut self,
        node: NodeId,
        key: &[u8],
        insert: bool,
        updates: &mut Vec<(Tuple, Tuple)>,
    ) -> Result<(Tuple, bool), Error> {
        let (ind, found) = self.node_find(node, key)?;
        if found {
            let enc = match &self.nodes[node.0] {
                MopeNode::Internal(i) => i.encodings[ind]
                    .clone()
                    .expect("a matched separator slot must already be encoded"),
                MopeNode::Leaf(_) => unreachable!(),
            };
            Ok((enc, true))
        } else {
            let child = match &self.nodes[node.0] {
                MopeNode::Internal(i) => i.children[ind],
                MopeNode::Leaf(_) => unreachable!(),
            };
            self.node_encode(child, key, insert, updates)
        }
    }

    fn leaf_encode(
        &mut self,
        node: NodeId,
        key: &[u8],
        insert: bool,
        updates: &mut Vec<(Tuple, Tuple)>,
    ) -> Result<(Tuple, bool), Error> {
        let (ind, found) = self.node_find(node, key)?;

        let enc = if insert && !found {
            match &mut self.nodes[node.0] {
                MopeNode::Leaf(l) => {
                    l.keys.insert(ind, key.to_vec());
                    l.encodings.insert(ind, None);
                }
                MopeNode::Internal(_) => unreachable!(),
            }
            let over = match &self.nodes[node.0] {
                MopeNode::Leaf(l) => l.keys.len() > self.maxlen,
                MopeNode::Internal(_) => unreachable!(),
            };
            if over {
                let split = self.maxlen / 2;
                let (promoted_key, promoted_enc, sib_keys, sib_encs) = match &mut self.nodes[node.0] {
                    MopeNode::Leaf(l) => {
                        let promoted_key = l.keys[split].clone();
                        let promoted_enc = l.encodings[split]
                            .clone()
                            .expect("the key being promoted out of a leaf must already be encoded");
                        let sib_keys = l.keys.split_off(split + 1);
                        let sib_encs = l.encodings.split_off(split + 1);
                        l.keys.truncate(split);
                        l.encodings.truncate(split);
                        (promoted_key, promoted_enc, sib_keys, sib_encs)
                    }
                    MopeNode::Internal(_) => unreachable!(),
                };
                let parent = self.make_parent(node);
                let newsib = self.new_leaf(parent, sib_keys, sib_encs);
                let parind = self.parind_of(node);
                self.internal_add(parent, parind, promoted_key, promoted_enc, newsib, updates)?
            } else {
                self.redo_encs(node, ind, updates)
                    .expect("inserting into a non-overflowing leaf must produce a fresh encoding")
            }
        } else {
            let len = match &self.nodes[node.0] {
                MopeNode::Leaf(l) => l.encodings.len(),
                MopeNode::Internal(_) => unreachable!(),
            };
            if ind < len {
                match &self.nodes[node.0] {
                    MopeNode::Leaf(l) => l.encodings[ind]
                        .clone()
                        .expect("an existing leaf slot must already be encoded"),
                    MopeNode::Internal(_) => unreachable!(),
                }
            } else {
                match &self.nodes[node.0] {
                    MopeNode::Leaf(l) => {
                        // Past the end of this leaf's keys (including the case where the leaf,
                        // and so the whole tree, is empty): the right-neighbor encoding is this
                        // node's own prefix with a final component of `maxlen+1` (spec §4.4),
                        // independent of whether any slot here has actually been encoded yet.
                        let mut succ = l.prefix.clone();
                        succ.push((self.maxlen + 1) as u32);
                        succ
                    }
                    MopeNode::Internal(_) => unreachable!(),
                }
            }
        };
        Ok((enc, found))
    }

    fn node_find(&mut self, node: NodeId, key: &[u8]) -> Result<(usize, bool), Error> {
        let keys: Vec<Vec<u8>> = match &self.nodes[node.0] {
            MopeNode::Leaf(l) => l.keys.clone(),
            MopeNode::Internal(i) => i.keys.clone(),
        };
        let needle = [key.to_vec()];
        let result = self
            .oracle
            .find(&needle, &keys, |k: &Vec<u8>| k.as_slice(), |k: &Vec<u8>| k.as_slice())?;
        let idx = result[0];
        Ok(if idx >= 0 { (idx as usize, true) } else { ((-1 - idx) as usize, false) })
    }

    fn internal_add(
        &mut self,
        node: NodeId,
        ind: usize,
        promoted_key: Vec<u8>,
        promoted_enc: Tuple,
        new_child: NodeId,
        updates: &mut Vec<(Tuple, Tuple)>,
    ) -> Result<Tuple, Error> {
        match &mut self.nodes[node.0] {
            MopeNode::Internal(i) => {
                i.keys.insert(ind, promoted_key);
                i.encodings.insert(ind, Some(promoted_enc));
                i.children.insert(ind + 1, new_child);
            }
            MopeNode::Leaf(_) => unreachable!("internal_add called on a leaf"),
        }
        self.set_parent(new_child, Some(node));

        let over = match &self.nodes[node.0] {
            MopeNode::Internal(i) => i.keys.len() > self.maxlen,
            MopeNode::Leaf(_) => unreachable!(),
        };
        let inserted = if over {
            let split = self.maxlen / 2;
            let (my_key, my_enc, suffix_len, sib_keys, sib_encs, sib_children) = match &mut self.nodes[node.0] {
                MopeNode::Internal(i) => {
                    let my_key = i.keys[split].clone();
                    let my_enc = i.encodings[split]
                        .clone()
                        .expect("the separator being promoted must already be encoded");
                    let suffix_len = i.suffix_len;
                    let sib_keys = i.keys.split_off(split + 1);
                    let sib_encs = i.encodings.split_off(split + 1);
                    let sib_children = i.children.split_off(split + 1);
                    i.keys.truncate(split);
                    i.encodings.truncate(split);
                    (my_key, my_enc, suffix_len, sib_keys, sib_encs, sib_children)
                }
                MopeNode::Leaf(_) => unreachable!(),
            };
            let parent = self.make_parent(node);
            let newsib = self.new_internal(parent, suffix_len, sib_keys, sib_encs, sib_children);
            let parind = self.parind_of(node);
            self.internal_add(parent, parind, my_key, my_enc, newsib, updates)?
        } else {
            self.redo_encs_children(node, ind, updates)
                .expect("adding to a non-overflowing internal node must produce a fresh encoding")
        };
        Ok(inserted)
    }

    /// Recompute the encodings of `node`'s own slots starting at `start`, recording
    /// `(old, new)` for every slot that already had one. Returns the encoding assigned to the
    /// one slot that didn't (the just-inserted key), if any of the rewritten slots were it.
    fn redo_encs(&mut self, node: NodeId, start: usize, updates: &mut Vec<(Tuple, Tuple)>) -> Option<Tuple> {
        let (prefix, suffix_len, len) = match &self.nodes[node.0] {
            MopeNode::Leaf(l) => (l.prefix.clone(), 0usize, l.encodings.len()),
            MopeNode::Internal(i) => (i.prefix.clone(), i.suffix_len, i.encodings.len()),
        };
        let mut inserted = None;
        for ind in start..len {
            let mut newenc = prefix.clone();
            newenc.push((ind + 1) as u32);
            newenc.extend(std::iter::repeat(0u32).take(suffix_len));

            let old = match &self.nodes[node.0] {
                MopeNode::Leaf(l) => l.encodings[ind].clone(),
                MopeNode::Internal(i) => i.encodings[ind].clone(),
            };
            match old {
                None => {
                    invariant!(
                        inserted.is_none(),
                        "at most one slot per redo_encs pass may be a fresh insertion"
                    );
                    inserted = Some(newenc.clone());
                }
                Some(old_enc) => updates.push((old_enc, newenc.clone())),
            }
            match &mut self.nodes[node.0] {
                MopeNode::Leaf(l) => l.encodings[ind] = Some(newenc),
                MopeNode::Internal(i) => i.encodings[ind] = Some(newenc),
            }
        }
        inserted
    }

    fn redo_encs_children(&mut self, node: NodeId, start: usize, updates: &mut Vec<(Tuple, Tuple)>) -> Option<Tuple> {
        let mut inserted = self.redo_encs(node, start, updates);
        let (prefix, children) = match &self.nodes[node.0] {
            MopeNode::Internal(i) => (i.prefix.clone(), i.children.clone()),
            MopeNode::Leaf(_) => unreachable!("redo_encs_children called on a leaf"),
        };
        for (ii, &child) in children.iter().enumerate().skip(start) {
            self.set_parent(child, Some(node));
            let mut child_prefix = prefix.clone();
            child_prefix.push(ii as u32);
            self.set_prefix(child, child_prefix);
            self.set_parind(child, ii);
            let cins = self.redo_all(child, updates);
            if cins.is_some() {
                invariant!(
                    inserted.is_none(),
                    "at most one descendant subtree may contain a newly inserted key"
                );
                inserted = cins;
            }
        }
        inserted
    }

    fn redo_all(&mut self, node: NodeId, updates: &mut Vec<(Tuple, Tuple)>) -> Option<Tuple> {
        if matches!(self.nodes[node.0], MopeNode::Leaf(_)) {
            self.redo_encs(node, 0, updates)
        } else {
            self.redo_encs_children(node, 0, updates)
        }
    }

    /// Grow a new root above `node` if it doesn't already have a parent, returning the parent
    /// either way.
    fn make_parent(&mut self, node: NodeId) -> NodeId {
        if let Some(parent) = self.parent_of(node) {
            return parent;
        }
        let suffix_len = self.suffix_len_of(node) + 1;
        let new_root = NodeId(self.nodes.len());
        self.nodes.push(MopeNode::Internal(InternalData {
            parent: None,
            parind: 0,
            prefix: Vec::new(),
            suffix_len,
            keys: Vec::new(),
            encodings: Vec::new(),
            children: vec![node],
        }));
        self.set_parent(node, Some(new_root));
        self.set_parind(node, 0);
        self.set_prefix(node, vec![0]);
        self.root = new_root;
        debug!("mope: grew new root, height is now {}", self.height());
        new_root
    }

    fn new_leaf(&mut self, parent: NodeId, keys: Vec<Vec<u8>>, encodings: Vec<Option<Tuple>>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(MopeNode::Leaf(LeafData {
            parent: Some(parent),
            parind: 0,
            prefix: Vec::new(),
            keys,
            encodings,
        }));
        id
    }

    fn new_internal(
        &mut self,
        parent: NodeId,
        suffix_len: usize,
        keys: Vec<Vec<u8>>,
        encodings: Vec<Option<Tuple>>,
        children: Vec<NodeId>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(MopeNode::Internal(InternalData {
            parent: Some(parent),
            parind: 0,
            prefix: Vec::new(),
            suffix_len,
            keys,
            encodings,
            children,
        }));
        id
    }

    fn parent_of(&self, node: NodeId) -> Option<NodeId> {
        match &self.nodes[node.0] {
            MopeNode::Leaf(l) => l.parent,
            MopeNode::Internal(i) => i.parent,
        }
    }

    fn parind_of(&self, node: NodeId) -> usize {
        match &self.nodes[node.0] {
            MopeNode::Leaf(l) => l.parind,
            MopeNode::Internal(i) => i.parind,
        }
    }

    fn suffix_len_of(&self, node: NodeId) -> usize {
        match &self.nodes[node.0] {
            MopeNode::Leaf(_) => 0,
            MopeNode::Internal(i) => i.suffix_len,
        }
    }

    fn set_parent(&mut self, node: NodeId, parent: Option<NodeId>) {
        match &mut self.nodes[node.0] {
            MopeNode::Leaf(l) => l.parent = parent,
            MopeNode::Internal(i) => i.parent = parent,
        }
    }

    fn set_parind(&mut self, node: NodeId, parind: usize) {
        match &mut self.nodes[node.0] {
            MopeNode::Leaf(l) => l.parind = parind,
            MopeNode::Internal(i) => i.parind = parind,
        }
    }

    fn set_prefix(&mut self, node: NodeId, prefix: Tuple) {
        match &mut self.nodes[node.0] {
            MopeNode::Leaf(l) => l.prefix = prefix,
            MopeNode::Internal(i) => i.prefix = prefix,
        }
    }

    fn height_of(&self, node: NodeId) -> usize {
        match &self.nodes[node.0] {
            MopeNode::Leaf(_) => 0,
            MopeNode::Internal(i) => 1 + self.height_of(i.children[0]),
        }
    }

    #[cfg(debug_assertions)]
    fn traverse_tree_encodings(&self, node: NodeId) -> Vec<Tuple> {
        let mut out = Vec::new();
        self.traverse_encodings_into(node, &mut out);
        out
    }

    #[cfg(debug_assertions)]
    fn traverse_encodings_into(&self, node: NodeId, out: &mut Vec<Tuple>) {
        match &self.nodes[node.0] {
            MopeNode::Leaf(l) => {
                for enc in &l.encodings {
                    out.push(
                        enc.clone()
                            .expect("leaf encoding must be assigned between encode() calls"),
                    );
                }
            }
            MopeNode::Internal(i) => {
                for (ii, &child) in i.children.iter().enumerate() {
                    self.traverse_encodings_into(child, out);
                    if ii < i.encodings.len() {
                        out.push(
                            i.encodings[ii]
                                .clone()
                                .expect("internal encoding must be assigned between encode() calls"),
                        );
                    }
                }
            }
        }
    }

    /// Fold an encoding tuple into a single comparable integer (spec §4.4): the Horner-style fold
    /// `v <- 0; for each x: v <- v * (maxlen+1) + x`, reproduced in exactly this order (most
    /// significant component first) since the integer order must equal the lexicographic order
    /// on equal-length tuples (spec §9 Design Notes).
    fn tuptoval(&self, tup: &[u32]) -> Result<u64, Error> {
        let base = (self.maxlen + 1) as u64;
        let mut res: u64 = 0;
        for &x in tup {
            res = res
                .checked_mul(base)
                .ok_or_else(|| Error::OverflowError("mOPE encoding exceeded 64 bits".to_string()))?;
            res = res
                .checked_add(u64::from(x))
                .ok_or_else(|| Error::OverflowError("mOPE encoding exceeded 64 bits".to_string()))?;
        }
        Ok(res)
    }
}

impl<C: Cipher> Backend for MopeTree<C> {
    fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), Error> {
        MopeTree::insert(self, key, value)
    }

    fn lookup(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        MopeTree::lookup(self, key)
    }

    fn range_search(&mut self, key1: &[u8], key2: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        MopeTree::range_search(self, key1, key2)
    }

    fn size(&self) -> usize {
        MopeTree::size(self)
    }

    fn traverse(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        MopeTree::traverse(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::tests::ReversingCipher;

    fn tree(maxlen: usize) -> MopeTree<ReversingCipher> {
        let cipher = ReversingCipher::new(b"|v1");
        let oracle = Oracle::new(cipher, maxlen).unwrap();
        MopeTree::new(oracle, maxlen)
    }

    fn enc(s: &str) -> Vec<u8> {
        ReversingCipher::new(b"|v1").encode(s.as_bytes()).unwrap()
    }

    #[test]
    fn insert_then_lookup_round_trips() {
        let mut t = tree(4);
        t.insert(enc("apple"), enc("apple-value")).unwrap();
        t.insert(enc("banana"), enc("banana-value")).unwrap();
        assert_eq!(t.lookup(&enc("apple")).unwrap(), Some(enc("apple-value")));
        assert_eq!(t.lookup(&enc("banana")).unwrap(), Some(enc("banana-value")));
        assert_eq!(t.lookup(&enc("cherry")).unwrap(), None);
    }

    #[test]
    fn monotone_inserts_keep_increasing_order() {
        // spec §8 scenario 3
        let mut t = tree(4);
        let words = ["aa", "bb", "cc", "dd", "ee", "ff", "gg", "hh", "ii", "jj", "kk", "ll"];
        for w in words {
            t.insert(enc(w), enc(&format!("{w}v"))).unwrap();
            t.check();
        }
        let traversed: Vec<String> = t
            .traverse()
            .into_iter()
            .map(|(k, _)| String::from_utf8(ReversingCipher::new(b"|v1").decode(&k).unwrap()).unwrap())
            .collect();
        let mut expected: Vec<String> = words.iter().map(|s| s.to_string()).collect();
        expected.sort();
        assert_eq!(traversed, expected);
    }

    #[test]
    fn range_search_respects_plaintext_order() {
        let mut t = tree(4);
        for w in ["m", "a", "z", "c", "k", "q"] {
            t.insert(enc(w), enc(&format!("{w}v"))).unwrap();
        }
        let got: Vec<String> = t
            .range_search(&enc("c"), &enc("q"))
            .unwrap()
            .into_iter()
            .map(|(k, _)| String::from_utf8(ReversingCipher::new(b"|v1").decode(&k).unwrap()).unwrap())
            .collect();
        assert_eq!(got, vec!["c", "k", "m"]);
    }

    #[test]
    fn empty_range_when_bounds_coincide() {
        let mut t = tree(4);
        t.insert(enc("m"), enc("mv")).unwrap();
        let result = t.range_search(&enc("z"), &enc("z")).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn duplicate_key_keeps_both_values() {
        let mut t = tree(4);
        t.insert(enc("k"), enc("v1")).unwrap();
        t.insert(enc("k"), enc("v2")).unwrap();
        let all: Vec<Vec<u8>> = t.traverse().into_iter().map(|(_, v)| v).collect();
        assert_eq!(all.len(), 2);
        assert!(all.contains(&enc("v1")));
        assert!(all.contains(&enc("v2")));
    }

    #[test]
    fn lookup_and_range_search_on_an_empty_tree_do_not_panic() {
        let mut t = tree(4);
        assert_eq!(t.lookup(&enc("m")).unwrap(), None);
        assert_eq!(t.range_search(&enc("a"), &enc("z")).unwrap(), Vec::new());
    }

    #[test]
    fn tuptoval_does_not_overflow_for_deep_trees() {
        // maxlen=4 keeps nodes tiny, so inserting enough distinct keys forces several levels of
        // splitting; tuptoval must still fold every live encoding into a u64 without overflowing.
        let mut t = tree(4);
        for i in 0..2000u32 {
            let k = format!("{i:08}");
            t.insert(enc(&k), enc(&format!("v{i}"))).unwrap();
        }
        t.check();
        assert_eq!(t.size(), 2000);
    }

    #[test]
    fn splits_grow_the_tree_past_one_level() {
        let mut t = tree(3);
        for i in 0..80u32 {
            let k = format!("{i:06}");
            t.insert(enc(&k), enc(&format!("v{i}"))).unwrap();
        }
        t.check();
        assert!(t.height() >= 1);
        assert_eq!(t.size(), 80);
        for i in 0..80u32 {
            let k = format!("{i:06}");
            assert_eq!(t.lookup(&enc(&k)).unwrap(), Some(enc(&format!("v{i}"))));
        }
    }
}
