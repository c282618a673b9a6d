//! B+Tree Index (spec.md §4.2): an ordered mapping `RowId -> PageId`.
//!
//! Kept behind the narrow `put`/`get`/`delete`/`range` surface spec.md §9
//! calls for, so a simpler ordered map could stand in during early
//! development; this crate implements the real tree since spec.md §8 makes
//! node-occupancy and leaf-ordering testable invariants.

use crate::codec::{write_u64, Cursor};
use crate::page::{PageId, RowId};

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        keys: Vec<u64>,
        vals: Vec<u64>,
        next: Option<usize>,
    },
    Internal {
        keys: Vec<u64>,
        children: Vec<usize>,
    },
}

/// An order-preserving `RowId -> PageId` map, backed by a B+Tree of fixed
/// minimum degree `t`. Serializes to a single blob (nodes in depth-first
/// order, leaves implicitly linked left to right).
pub struct BPlusTree {
    t: usize,
    nodes: Vec<Node>,
    root: usize,
}

impl BPlusTree {
    pub fn new(t: usize) -> Self {
        assert!(t >= 2, "B+Tree minimum degree must be at least 2");
        let nodes = vec![Node::Leaf {
            keys: Vec::new(),
            vals: Vec::new(),
            next: None,
        }];
        Self { t, nodes, root: 0 }
    }

    pub fn get(&self, row_id: RowId) -> Option<PageId> {
        let mut idx = self.root;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { keys, vals, .. } => {
                    return keys
                        .iter()
                        .position(|&k| k == row_id.0)
                        .map(|i| PageId(vals[i]));
                }
                Node::Internal { keys, children } => {
                    idx = children[child_index(keys, row_id.0)];
                }
            }
        }
    }

    pub fn put(&mut self, row_id: RowId, page_id: PageId) {
        if let Some(median_and_sibling) = self.insert_into(self.root, row_id.0, page_id.0) {
            let (median, right) = median_and_sibling;
            let left = self.root;
            let new_root = Node::Internal {
                keys: vec![median],
                children: vec![left, right],
            };
            self.nodes.push(new_root);
            self.root = self.nodes.len() - 1;
        }
    }

    /// Inserts into the subtree rooted at `idx`. Returns `Some((median_key,
    /// new_right_sibling_idx))` if `idx` split and the caller (its parent,
    /// or `put` for the root) must absorb the new separator.
    fn insert_into(&mut self, idx: usize, key: u64, val: u64) -> Option<(u64, usize)> {
        match self.nodes[idx].clone() {
            Node::Leaf { mut keys, mut vals, next } => {
                match keys.binary_search(&key) {
                    Ok(pos) => vals[pos] = val,
                    Err(pos) => {
                        keys.insert(pos, key);
                        vals.insert(pos, val);
                    }
                }

                if keys.len() <= 2 * self.t - 1 {
                    self.nodes[idx] = Node::Leaf { keys, vals, next };
                    None
                } else {
                    let split_at = keys.len() / 2;
                    let right_keys = keys.split_off(split_at);
                    let right_vals = vals.split_off(split_at);
                    let median = right_keys[0];

                    let right_node = Node::Leaf {
                        keys: right_keys,
                        vals: right_vals,
                        next,
                    };
                    self.nodes.push(right_node);
                    let right_idx = self.nodes.len() - 1;

                    self.nodes[idx] = Node::Leaf {
                        keys,
                        vals,
                        next: Some(right_idx),
                    };
                    Some((median, right_idx))
                }
            }
            Node::Internal { mut keys, mut children } => {
                let pos = child_index(&keys, key);
                let child_idx = children[pos];

                if let Some((median, right_child)) = self.insert_into(child_idx, key, val) {
                    keys.insert(pos, median);
                    children.insert(pos + 1, right_child);
                }

                if keys.len() <= 2 * self.t - 1 {
                    self.nodes[idx] = Node::Internal { keys, children };
                    None
                } else {
                    let split_at = keys.len() / 2;
                    let median = keys[split_at];
                    let right_keys = keys.split_off(split_at + 1);
                    keys.truncate(split_at);
                    let right_children = children.split_off(split_at + 1);

                    let right_node = Node::Internal {
                        keys: right_keys,
                        children: right_children,
                    };
                    self.nodes.push(right_node);
                    let right_idx = self.nodes.len() - 1;

                    self.nodes[idx] = Node::Internal { keys, children };
                    Some((median, right_idx))
                }
            }
        }
    }

    pub fn delete(&mut self, row_id: RowId) {
        self.delete_from(self.root, row_id.0);

        // Collapse a root that became a pass-through internal node with a
        // single child (the only imbalance this crate tolerates above the
        // leaf level, resolved by lifting the lone child up).
        if let Node::Internal { keys, children } = &self.nodes[self.root] {
            if keys.is_empty() && children.len() == 1 {
                self.root = children[0];
            }
        }
    }

    fn delete_from(&mut self, idx: usize, key: u64) {
        match self.nodes[idx].clone() {
            Node::Leaf { mut keys, mut vals, next } => {
                if let Ok(pos) = keys.binary_search(&key) {
                    keys.remove(pos);
                    vals.remove(pos);
                }
                self.nodes[idx] = Node::Leaf { keys, vals, next };
            }
            Node::Internal { keys, children } => {
                let pos = child_index(&keys, key);
                let child_idx = children[pos];
                self.delete_from(child_idx, key);
                self.rebalance_child(idx, pos);
            }
        }
    }

    /// After a recursive delete, restores the minimum occupancy of
    /// `children[pos]` if it underflowed, by borrowing from an adjacent
    /// sibling or merging with one.
    fn rebalance_child(&mut self, idx: usize, pos: usize) {
        let min_keys = self.t - 1;
        let (keys, children) = match &self.nodes[idx] {
            Node::Internal { keys, children } => (keys.clone(), children.clone()),
            Node::Leaf { .. } => return,
        };

        let child_idx = children[pos];
        if node_key_count(&self.nodes[child_idx]) >= min_keys {
            return;
        }

        let left_sibling = pos.checked_sub(1).map(|p| children[p]);
        let right_sibling = children.get(pos + 1).copied();

        if let Some(left_idx) = left_sibling {
            if node_key_count(&self.nodes[left_idx]) > min_keys {
                self.borrow_from_left(idx, pos, left_idx, child_idx);
                return;
            }
        }
        if let Some(right_idx) = right_sibling {
            if node_key_count(&self.nodes[right_idx]) > min_keys {
                self.borrow_from_right(idx, pos, child_idx, right_idx);
                return;
            }
        }

        if let Some(left_idx) = left_sibling {
            self.merge(idx, pos - 1, left_idx, child_idx);
        } else if let Some(right_idx) = right_sibling {
            self.merge(idx, pos, child_idx, right_idx);
        }
        let _ = keys;
    }

    fn borrow_from_left(&mut self, parent: usize, pos: usize, left_idx: usize, child_idx: usize) {
        let Node::Internal { keys: pkeys, .. } = &mut self.nodes[parent] else { return };
        let separator = pkeys[pos - 1];

        match (self.nodes[left_idx].clone(), self.nodes[child_idx].clone()) {
            (Node::Leaf { keys: mut lk, vals: mut lv, next: lnext }, Node::Leaf { mut keys, mut vals, next }) => {
                let k = lk.pop().unwrap();
                let v = lv.pop().unwrap();
                keys.insert(0, k);
                vals.insert(0, v);
                self.nodes[left_idx] = Node::Leaf { keys: lk, vals: lv, next: lnext };
                self.nodes[child_idx] = Node::Leaf { keys: keys.clone(), vals, next };
                if let Node::Internal { keys: pkeys, .. } = &mut self.nodes[parent] {
                    pkeys[pos - 1] = keys[0];
                }
            }
            (Node::Internal { keys: mut lk, children: mut lc }, Node::Internal { mut keys, mut children }) => {
                let moved_key = lk.pop().unwrap();
                let moved_child = lc.pop().unwrap();
                keys.insert(0, separator);
                children.insert(0, moved_child);
                self.nodes[left_idx] = Node::Internal { keys: lk, children: lc };
                self.nodes[child_idx] = Node::Internal { keys, children };
                if let Node::Internal { keys: pkeys, .. } = &mut self.nodes[parent] {
                    pkeys[pos - 1] = moved_key;
                }
            }
            _ => unreachable!("siblings at the same depth have the same node kind"),
        }
    }

    fn borrow_from_right(&mut self, parent: usize, pos: usize, child_idx: usize, right_idx: usize) {
        match (self.nodes[child_idx].clone(), self.nodes[right_idx].clone()) {
            (Node::Leaf { mut keys, mut vals, next }, Node::Leaf { keys: mut rk, vals: mut rv, next: rnext }) => {
                let k = rk.remove(0);
                let v = rv.remove(0);
                keys.push(k);
                vals.push(v);
                self.nodes[child_idx] = Node::Leaf { keys, vals, next };
                self.nodes[right_idx] = Node::Leaf { keys: rk.clone(), vals: rv, next: rnext };
                if let Node::Internal { keys: pkeys, .. } = &mut self.nodes[parent] {
                    pkeys[pos] = if rk.is_empty() { pkeys[pos] } else { rk[0] };
                }
            }
            (Node::Internal { mut keys, mut children }, Node::Internal { keys: mut rk, children: mut rc }) => {
                let separator = if let Node::Internal { keys: pkeys, .. } = &self.nodes[parent] {
                    pkeys[pos]
                } else {
                    unreachable!()
                };
                let moved_child = rc.remove(0);
                let moved_key = rk.remove(0);
                keys.push(separator);
                children.push(moved_child);
                self.nodes[child_idx] = Node::Internal { keys, children };
                self.nodes[right_idx] = Node::Internal { keys: rk, children: rc };
                if let Node::Internal { keys: pkeys, .. } = &mut self.nodes[parent] {
                    pkeys[pos] = moved_key;
                }
            }
            _ => unreachable!("siblings at the same depth have the same node kind"),
        }
    }

    /// Merges `children[left_pos]` and `children[left_pos + 1]` (the node at
    /// `right_idx`) into the left node, dropping the separator key at
    /// `left_pos` from `parent`.
    fn merge(&mut self, parent: usize, left_pos: usize, left_idx: usize, right_idx: usize) {
        let separator = match &self.nodes[parent] {
            Node::Internal { keys, .. } => keys[left_pos],
            Node::Leaf { .. } => return,
        };

        let merged = match (self.nodes[left_idx].clone(), self.nodes[right_idx].clone()) {
            (Node::Leaf { mut keys, mut vals, .. }, Node::Leaf { keys: rk, vals: rv, next: rnext }) => {
                keys.extend(rk);
                vals.extend(rv);
                Node::Leaf { keys, vals, next: rnext }
            }
            (Node::Internal { mut keys, mut children }, Node::Internal { keys: rk, children: rc }) => {
                keys.push(separator);
                keys.extend(rk);
                children.extend(rc);
                Node::Internal { keys, children }
            }
            _ => unreachable!("siblings at the same depth have the same node kind"),
        };
        self.nodes[left_idx] = merged;

        if let Node::Internal { keys, children } = &mut self.nodes[parent] {
            keys.remove(left_pos);
            children.remove(left_pos + 1);
        }
        // `right_idx` is now unreachable garbage in the arena; it is simply
        // never visited again and is dropped by the depth-first serializer.
    }

    /// Ascending `(RowId, PageId)` pairs with `lo <= row_id <= hi`.
    pub fn range(&self, lo: RowId, hi: RowId) -> RangeIter<'_> {
        let mut idx = self.root;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { .. } => break,
                Node::Internal { keys, children } => {
                    idx = children[child_index(keys, lo.0)];
                }
            }
        }
        RangeIter {
            tree: self,
            leaf: Some(idx),
            pos: 0,
            hi: hi.0,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_u64(&mut buf, self.t as u64);
        self.encode_node(self.root, &mut buf);
        buf
    }

    fn encode_node(&self, idx: usize, buf: &mut Vec<u8>) {
        match &self.nodes[idx] {
            Node::Leaf { keys, vals, .. } => {
                buf.push(0);
                write_u64(buf, keys.len() as u64);
                for (k, v) in keys.iter().zip(vals.iter()) {
                    write_u64(buf, *k);
                    write_u64(buf, *v);
                }
            }
            Node::Internal { keys, children } => {
                buf.push(1);
                write_u64(buf, keys.len() as u64);
                for k in keys {
                    write_u64(buf, *k);
                }
                for &child in children {
                    self.encode_node(child, buf);
                }
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let mut cur = Cursor::new(bytes);
        let t = cur.read_u64()? as usize;
        let mut nodes = Vec::new();
        let mut leaves_in_order = Vec::new();
        let root = decode_node(&mut cur, &mut nodes, &mut leaves_in_order)?;

        for pair in leaves_in_order.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if let Node::Leaf { next, .. } = &mut nodes[a] {
                *next = Some(b);
            }
        }
        if let Some(&last) = leaves_in_order.last() {
            if let Node::Leaf { next, .. } = &mut nodes[last] {
                *next = None;
            }
        }

        Some(Self { t, nodes, root })
    }
}

fn decode_node(cur: &mut Cursor, nodes: &mut Vec<Node>, leaves: &mut Vec<usize>) -> Option<usize> {
    let tag = cur.read_u8()?;
    if tag == 0 {
        let n = cur.read_u64()? as usize;
        let mut keys = Vec::with_capacity(n);
        let mut vals = Vec::with_capacity(n);
        for _ in 0..n {
            keys.push(cur.read_u64()?);
            vals.push(cur.read_u64()?);
        }
        nodes.push(Node::Leaf { keys, vals, next: None });
        let idx = nodes.len() - 1;
        leaves.push(idx);
        Some(idx)
    } else {
        let k = cur.read_u64()? as usize;
        let mut keys = Vec::with_capacity(k);
        for _ in 0..k {
            keys.push(cur.read_u64()?);
        }
        let mut children = Vec::with_capacity(k + 1);
        for _ in 0..=k {
            children.push(decode_node(cur, nodes, leaves)?);
        }
        nodes.push(Node::Internal { keys, children });
        Some(nodes.len() - 1)
    }
}

fn node_key_count(node: &Node) -> usize {
    match node {
        Node::Leaf { keys, .. } => keys.len(),
        Node::Internal { keys, .. } => keys.len(),
    }
}

/// `children[i]` holds keys in `[keys[i-1], keys[i])`; this finds `i`.
fn child_index(keys: &[u64], key: u64) -> usize {
    keys.iter().position(|&k| key < k).unwrap_or(keys.len())
}

pub struct RangeIter<'a> {
    tree: &'a BPlusTree,
    leaf: Option<usize>,
    pos: usize,
    hi: u64,
}

impl<'a> Iterator for RangeIter<'a> {
    type Item = (RowId, PageId);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let leaf_idx = self.leaf?;
            let (keys, vals, next) = match &self.tree.nodes[leaf_idx] {
                Node::Leaf { keys, vals, next } => (keys, vals, *next),
                Node::Internal { .. } => unreachable!("range iterator only walks leaves"),
            };

            if self.pos >= keys.len() {
                self.leaf = next;
                self.pos = 0;
                continue;
            }

            let (k, v) = (keys[self.pos], vals[self.pos]);
            if k > self.hi {
                self.leaf = None;
                return None;
            }
            self.pos += 1;
            return Some((RowId(k), PageId(v)));
        }
    }
}
