use std::cmp::Ordering;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{debug, trace};

use crate::disk::codec::{DataTypeTag, Value};
use crate::error::EngineError;
use crate::index::KeyCodec;
use crate::util;

pub const DEFAULT_ORDER: usize = 4;

/// Absent node id on disk and in memory.
const NIL: u32 = u32::MAX;

// root_id, node_count, height, record_count, key_tag, key_max_len
const HEADER_SIZE: usize = 24;
// is_leaf, key_count, parent_id
const NODE_HEADER_SIZE: usize = 12;
const POINTER_SIZE: usize = 4;

#[derive(Debug, Clone)]
struct TreeNode {
    is_leaf: bool,
    parent_id: u32,
    keys: Vec<Vec<u8>>,  // encoded keys, sorted
    positions: Vec<u32>, // leaf: parallel heap positions
    children: Vec<u32>,  // internal: keys.len() + 1 child ids
    next_leaf: u32,      // leaf: NIL-terminated sibling chain
}

impl TreeNode {
    fn leaf(parent_id: u32) -> Self {
        Self {
            is_leaf: true,
            parent_id,
            keys: Vec::new(),
            positions: Vec::new(),
            children: Vec::new(),
            next_leaf: NIL,
        }
    }

    fn internal(parent_id: u32) -> Self {
        Self {
            is_leaf: false,
            parent_id,
            keys: Vec::new(),
            positions: Vec::new(),
            children: Vec::new(),
            next_leaf: NIL,
        }
    }
}

/// B+ tree over a flat array of fixed-size node slots. Leaves carry
/// parallel position arrays and a sibling chain for ordered scans;
/// deletion only collapses the root, never merges siblings.
#[derive(Debug)]
pub struct BPlusTreeFile {
    path: PathBuf,
    file: File,
    key: KeyCodec,
    order: usize,
    max_keys: usize,
    min_keys: usize,
    node_size: usize,
    root_id: u32,
    node_count: u32,
    height: u32,
    record_count: u32,
}

impl BPlusTreeFile {
    pub fn open(path: &Path, key: KeyCodec, order: usize) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        let len = file.metadata()?.len() as usize;

        let max_keys = order - 1;
        let key_width = key.width();
        let internal_size = NODE_HEADER_SIZE + max_keys * key_width + order * POINTER_SIZE;
        let leaf_size = NODE_HEADER_SIZE + max_keys * key_width + (max_keys + 1) * POINTER_SIZE;

        let mut tree = Self {
            path: path.to_path_buf(),
            file,
            key,
            order,
            max_keys,
            min_keys: 1.max((order - 1) / 2),
            node_size: internal_size.max(leaf_size),
            root_id: NIL,
            node_count: 0,
            height: 0,
            record_count: 0,
        };
        if len == 0 {
            tree.save_header()?;
        } else {
            tree.load_header()?;
        }
        Ok(tree)
    }

    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn save_header(&mut self) -> Result<()> {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.root_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.node_count.to_le_bytes());
        buf[8..12].copy_from_slice(&self.height.to_le_bytes());
        buf[12..16].copy_from_slice(&self.record_count.to_le_bytes());
        buf[16..20].copy_from_slice(&(self.key.tag as u32).to_le_bytes());
        buf[20..24].copy_from_slice(&(self.key.max_len as u32).to_le_bytes());
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&buf)?;
        Ok(())
    }

    fn load_header(&mut self) -> Result<()> {
        let mut buf = [0u8; HEADER_SIZE];
        self.file.seek(SeekFrom::Start(0))?;
        self.file
            .read_exact(&mut buf)
            .map_err(|_| EngineError::TruncatedHeader(self.path.display().to_string()))?;
        self.root_id = util::u32_val(&buf, 0);
        self.node_count = util::u32_val(&buf, 4);
        self.height = util::u32_val(&buf, 8);
        self.record_count = util::u32_val(&buf, 12);
        let tag = DataTypeTag::try_from(util::u32_val(&buf, 16) as u8)
            .map_err(|_| EngineError::TruncatedHeader(self.path.display().to_string()))?;
        self.key = KeyCodec::new(tag, util::u32_val(&buf, 20) as usize);
        Ok(())
    }

    fn node_position(&self, node_id: u32) -> u64 {
        (HEADER_SIZE + node_id as usize * self.node_size) as u64
    }

    fn read_node(&mut self, node_id: u32) -> Result<TreeNode> {
        self.file.seek(SeekFrom::Start(self.node_position(node_id)))?;
        let mut buf = vec![0u8; self.node_size];
        self.file
            .read_exact(&mut buf)
            .map_err(|_| EngineError::CorruptNode(format!("node {} of {:?}", node_id, self.path)))?;

        let is_leaf = util::u32_val(&buf, 0) != 0;
        let key_count = util::u32_val(&buf, 4) as usize;
        let parent_id = util::u32_val(&buf, 8);
        if key_count > self.max_keys {
            return Err(EngineError::CorruptNode(format!(
                "node {} declares {} keys, capacity {}",
                node_id, key_count, self.max_keys
            ))
            .into());
        }

        let key_width = self.key.width();
        let keys = (0..key_count)
            .map(|i| buf[NODE_HEADER_SIZE + i * key_width..NODE_HEADER_SIZE + (i + 1) * key_width].to_vec())
            .collect();

        let pointer_area = NODE_HEADER_SIZE + self.max_keys * key_width;
        let mut node = TreeNode {
            is_leaf,
            parent_id,
            keys,
            positions: Vec::new(),
            children: Vec::new(),
            next_leaf: NIL,
        };
        if is_leaf {
            node.positions = (0..key_count)
                .map(|i| util::u32_val(&buf, pointer_area + i * POINTER_SIZE))
                .collect();
            node.next_leaf = util::u32_val(&buf, pointer_area + self.max_keys * POINTER_SIZE);
        } else {
            node.children = (0..key_count + 1)
                .map(|i| util::u32_val(&buf, pointer_area + i * POINTER_SIZE))
                .collect();
        }
        Ok(node)
    }

    fn write_node(&mut self, node_id: u32, node: &TreeNode) -> Result<()> {
        let mut buf = vec![0u8; self.node_size];
        buf[0..4].copy_from_slice(&(node.is_leaf as u32).to_le_bytes());
        buf[4..8].copy_from_slice(&(node.keys.len() as u32).to_le_bytes());
        buf[8..12].copy_from_slice(&node.parent_id.to_le_bytes());

        let key_width = self.key.width();
        for (i, key_bytes) in node.keys.iter().enumerate() {
            let base = NODE_HEADER_SIZE + i * key_width;
            buf[base..base + key_width].copy_from_slice(key_bytes);
        }

        let pointer_area = NODE_HEADER_SIZE + self.max_keys * key_width;
        if node.is_leaf {
            for (i, pos) in node.positions.iter().enumerate() {
                let base = pointer_area + i * POINTER_SIZE;
                buf[base..base + POINTER_SIZE].copy_from_slice(&pos.to_le_bytes());
            }
            let base = pointer_area + self.max_keys * POINTER_SIZE;
            buf[base..base + POINTER_SIZE].copy_from_slice(&node.next_leaf.to_le_bytes());
        } else {
            for (i, child) in node.children.iter().enumerate() {
                let base = pointer_area + i * POINTER_SIZE;
                buf[base..base + POINTER_SIZE].copy_from_slice(&child.to_le_bytes());
            }
        }

        self.file.seek(SeekFrom::Start(self.node_position(node_id)))?;
        self.file.write_all(&buf)?;
        Ok(())
    }

    fn allocate_node(&mut self) -> u32 {
        let id = self.node_count;
        self.node_count += 1;
        id
    }

    /// First index whose key is strictly greater than `search`; ties
    /// descend right, where a split left the promoted separator.
    fn upper_bound(&self, keys: &[Vec<u8>], search: &Value) -> Result<usize> {
        for (i, key_bytes) in keys.iter().enumerate() {
            let key = self.key.decode(key_bytes)?;
            if search.key_cmp(&key) == Ordering::Less {
                return Ok(i);
            }
        }
        Ok(keys.len())
    }

    fn find_leaf(&mut self, search: &Value) -> Result<u32> {
        let mut current = self.root_id;
        loop {
            let node = self.read_node(current)?;
            if node.is_leaf {
                return Ok(current);
            }
            let child_index = self.upper_bound(&node.keys, search)?;
            current = node.children[child_index];
        }
    }

    pub fn insert(&mut self, key: &Value, position: u32) -> Result<()> {
        let key_bytes = self.key.encode(key)?;

        if self.root_id == NIL {
            let mut root = TreeNode::leaf(NIL);
            root.keys.push(key_bytes);
            root.positions.push(position);
            self.root_id = self.allocate_node();
            self.height = 1;
            self.record_count = 1;
            let root_id = self.root_id;
            self.write_node(root_id, &root)?;
            return self.save_header();
        }

        let leaf_id = self.find_leaf(key)?;
        let mut leaf = self.read_node(leaf_id)?;

        if let Some(i) = leaf.keys.iter().position(|k| *k == key_bytes) {
            leaf.positions[i] = position;
            return self.write_node(leaf_id, &leaf);
        }

        let at = self.upper_bound(&leaf.keys, key)?;
        leaf.keys.insert(at, key_bytes);
        leaf.positions.insert(at, position);
        self.record_count += 1;

        if leaf.keys.len() <= self.max_keys {
            self.write_node(leaf_id, &leaf)?;
        } else {
            self.split_leaf(leaf_id, leaf)?;
        }
        self.save_header()
    }

    fn split_leaf(&mut self, node_id: u32, mut node: TreeNode) -> Result<()> {
        let mid = node.keys.len() / 2;
        let mut right = TreeNode::leaf(node.parent_id);
        right.keys = node.keys.split_off(mid);
        right.positions = node.positions.split_off(mid);
        right.next_leaf = node.next_leaf;

        let right_id = self.allocate_node();
        node.next_leaf = right_id;
        let promoted = right.keys[0].clone();
        trace!("split leaf {} -> {} of {:?}", node_id, right_id, self.path);

        self.write_node(node_id, &node)?;
        self.write_node(right_id, &right)?;
        self.insert_into_parent(node_id, promoted, right_id)
    }

    fn split_internal(&mut self, node_id: u32, mut node: TreeNode) -> Result<()> {
        let mid = node.keys.len() / 2;
        let middle_key = node.keys[mid].clone();

        let mut right = TreeNode::internal(node.parent_id);
        right.keys = node.keys.split_off(mid + 1);
        right.children = node.children.split_off(mid + 1);
        node.keys.truncate(mid);

        let right_id = self.allocate_node();
        for &child_id in &right.children {
            let mut child = self.read_node(child_id)?;
            child.parent_id = right_id;
            self.write_node(child_id, &child)?;
        }

        self.write_node(node_id, &node)?;
        self.write_node(right_id, &right)?;
        self.insert_into_parent(node_id, middle_key, right_id)
    }

    fn insert_into_parent(&mut self, left_id: u32, key_bytes: Vec<u8>, right_id: u32) -> Result<()> {
        let left = self.read_node(left_id)?;

        if left.parent_id == NIL {
            let mut root = TreeNode::internal(NIL);
            root.keys.push(key_bytes);
            root.children.push(left_id);
            root.children.push(right_id);

            let root_id = self.allocate_node();
            self.root_id = root_id;
            self.height += 1;
            debug!("new root {} of {:?}, height {}", root_id, self.path, self.height);

            for child_id in [left_id, right_id] {
                let mut child = self.read_node(child_id)?;
                child.parent_id = root_id;
                self.write_node(child_id, &child)?;
            }
            return self.write_node(root_id, &root);
        }

        let parent_id = left.parent_id;
        let mut parent = self.read_node(parent_id)?;
        let separator = self.key.decode(&key_bytes)?;
        let at = self.upper_bound(&parent.keys, &separator)?;
        parent.keys.insert(at, key_bytes);
        parent.children.insert(at + 1, right_id);

        let mut right = self.read_node(right_id)?;
        right.parent_id = parent_id;
        self.write_node(right_id, &right)?;

        if parent.keys.len() <= self.max_keys {
            self.write_node(parent_id, &parent)
        } else {
            self.split_internal(parent_id, parent)
        }
    }

    pub fn search(&mut self, key: &Value) -> Result<Option<u32>> {
        if self.root_id == NIL {
            return Ok(None);
        }
        let key_bytes = self.key.encode(key)?;
        let leaf_id = self.find_leaf(key)?;
        let leaf = self.read_node(leaf_id)?;
        Ok(leaf
            .keys
            .iter()
            .position(|k| *k == key_bytes)
            .map(|i| leaf.positions[i]))
    }

    pub fn delete(&mut self, key: &Value) -> Result<bool> {
        if self.root_id == NIL {
            return Ok(false);
        }
        let key_bytes = self.key.encode(key)?;
        let leaf_id = self.find_leaf(key)?;
        let mut leaf = self.read_node(leaf_id)?;

        let at = match leaf.keys.iter().position(|k| *k == key_bytes) {
            Some(i) => i,
            None => return Ok(false),
        };
        leaf.keys.remove(at);
        leaf.positions.remove(at);
        self.record_count -= 1;
        self.write_node(leaf_id, &leaf)?;

        if leaf.keys.len() < self.min_keys {
            self.collapse_root()?;
        }
        self.save_header()?;
        Ok(true)
    }

    /// The only rebalance performed on delete: an internal root left with
    /// zero keys hands the tree to its unique child.
    fn collapse_root(&mut self) -> Result<()> {
        let root = self.read_node(self.root_id)?;
        if root.is_leaf || !root.keys.is_empty() {
            return Ok(());
        }
        self.root_id = root.children[0];
        self.height -= 1;
        let root_id = self.root_id;
        let mut new_root = self.read_node(root_id)?;
        new_root.parent_id = NIL;
        self.write_node(root_id, &new_root)?;
        debug!("root collapsed to {} of {:?}", root_id, self.path);
        Ok(())
    }

    fn first_leaf(&mut self) -> Result<Option<u32>> {
        if self.root_id == NIL {
            return Ok(None);
        }
        let mut current = self.root_id;
        loop {
            let node = self.read_node(current)?;
            if node.is_leaf {
                return Ok(Some(current));
            }
            current = node.children[0];
        }
    }

    /// Every live `(key, position)` pair in ascending key order, walking
    /// the sibling chain from the first leaf.
    pub fn all_tuples(&mut self) -> Result<Vec<(Value, u32)>> {
        let mut out = Vec::with_capacity(self.record_count as usize);
        let mut current = match self.first_leaf()? {
            Some(id) => id,
            None => return Ok(out),
        };
        let mut hops = 0u32;
        loop {
            let node = self.read_node(current)?;
            for (key_bytes, &pos) in node.keys.iter().zip(&node.positions) {
                out.push((self.key.decode(key_bytes)?, pos));
            }
            if node.next_leaf == NIL {
                return Ok(out);
            }
            hops += 1;
            if hops > self.node_count {
                return Err(EngineError::CorruptNode(format!(
                    "leaf chain of {:?} exceeds node count",
                    self.path
                ))
                .into());
            }
            current = node.next_leaf;
        }
    }

    /// Ordered scan restricted to `lo <= key <= hi`.
    pub fn all_tuples_range(&mut self, lo: &Value, hi: &Value) -> Result<Vec<(Value, u32)>> {
        let mut out = Vec::new();
        if self.root_id == NIL {
            return Ok(out);
        }
        let mut current = self.find_leaf(lo)?;
        let mut hops = 0u32;
        loop {
            let node = self.read_node(current)?;
            for (key_bytes, &pos) in node.keys.iter().zip(&node.positions) {
                let key = self.key.decode(key_bytes)?;
                if key.key_cmp(lo) == Ordering::Less {
                    continue;
                }
                if key.key_cmp(hi) == Ordering::Greater {
                    return Ok(out);
                }
                out.push((key, pos));
            }
            if node.next_leaf == NIL {
                return Ok(out);
            }
            hops += 1;
            if hops > self.node_count {
                return Err(EngineError::CorruptNode(format!(
                    "leaf chain of {:?} exceeds node count",
                    self.path
                ))
                .into());
            }
            current = node.next_leaf;
        }
    }
}

#[cfg(test)]
mod btree_tests {

    use std::env::set_var;

    use tempfile::TempDir;

    use super::*;
    use crate::util;

    fn setup() {
        set_var("RUST_LOG", "info");
        util::init();
    }

    fn int_tree(dir: &TempDir) -> BPlusTreeFile {
        let path = dir.path().join("idx_pk.dat");
        BPlusTreeFile::open(&path, KeyCodec::new(DataTypeTag::Int, 0), DEFAULT_ORDER).unwrap()
    }

    #[test]
    fn ordered_scan_after_sequential_inserts() {
        setup();
        let dir = TempDir::new().unwrap();
        let mut tree = int_tree(&dir);
        for id in 1..=60 {
            tree.insert(&Value::Int(id), id as u32).unwrap();
        }
        assert_eq!(tree.record_count(), 60);
        assert!(tree.height() > 1);

        let all = tree.all_tuples().unwrap();
        assert_eq!(all.len(), 60);
        for (i, (key, pos)) in all.iter().enumerate() {
            assert_eq!(*key, Value::Int(i as i32 + 1));
            assert_eq!(*pos, i as u32 + 1);
        }
    }

    #[test]
    fn range_scan_is_inclusive_and_ordered() {
        setup();
        let dir = TempDir::new().unwrap();
        let mut tree = int_tree(&dir);
        for id in 1..=60 {
            tree.insert(&Value::Int(id), id as u32).unwrap();
        }
        let hits = tree.all_tuples_range(&Value::Int(5), &Value::Int(20)).unwrap();
        assert_eq!(hits.len(), 16);
        assert_eq!(hits.first().unwrap().0, Value::Int(5));
        assert_eq!(hits.last().unwrap().0, Value::Int(20));
    }

    #[test]
    fn search_returns_last_inserted_position() {
        setup();
        let dir = TempDir::new().unwrap();
        let mut tree = int_tree(&dir);
        for id in [9, 3, 27, 1, 14, 6, 40, 2] {
            tree.insert(&Value::Int(id), id as u32 * 10).unwrap();
        }
        assert_eq!(tree.search(&Value::Int(14)).unwrap(), Some(140));
        assert_eq!(tree.search(&Value::Int(5)).unwrap(), None);

        tree.insert(&Value::Int(14), 999).unwrap();
        assert_eq!(tree.search(&Value::Int(14)).unwrap(), Some(999));
        assert_eq!(tree.record_count(), 8);
    }

    #[test]
    fn delete_removes_single_key() {
        setup();
        let dir = TempDir::new().unwrap();
        let mut tree = int_tree(&dir);
        for id in 1..=20 {
            tree.insert(&Value::Int(id), id as u32).unwrap();
        }
        assert!(tree.delete(&Value::Int(7)).unwrap());
        assert!(!tree.delete(&Value::Int(7)).unwrap());
        assert_eq!(tree.search(&Value::Int(7)).unwrap(), None);
        assert_eq!(tree.search(&Value::Int(8)).unwrap(), Some(8));
        assert_eq!(tree.all_tuples().unwrap().len(), 19);
    }

    #[test]
    fn text_keys_sort_lexicographically() {
        setup();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("idx_name.dat");
        let mut tree =
            BPlusTreeFile::open(&path, KeyCodec::new(DataTypeTag::Varchar, 16), DEFAULT_ORDER).unwrap();
        for (i, name) in ["pear", "apple", "fig", "mango", "kiwi", "plum", "date"].iter().enumerate() {
            tree.insert(&Value::Varchar(name.to_string()), i as u32).unwrap();
        }
        let keys: Vec<String> = tree
            .all_tuples()
            .unwrap()
            .into_iter()
            .map(|(k, _)| k.to_string())
            .collect();
        assert_eq!(keys, vec!["apple", "date", "fig", "kiwi", "mango", "pear", "plum"]);
    }

    #[test]
    fn tree_survives_reopen() {
        setup();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("idx_pk.dat");
        let key = KeyCodec::new(DataTypeTag::Int, 0);
        {
            let mut tree = BPlusTreeFile::open(&path, key, DEFAULT_ORDER).unwrap();
            for id in 1..=30 {
                tree.insert(&Value::Int(id), id as u32).unwrap();
            }
        }
        let mut tree = BPlusTreeFile::open(&path, key, DEFAULT_ORDER).unwrap();
        assert_eq!(tree.record_count(), 30);
        assert_eq!(tree.search(&Value::Int(23)).unwrap(), Some(23));
        assert_eq!(tree.all_tuples().unwrap().len(), 30);
    }
}
