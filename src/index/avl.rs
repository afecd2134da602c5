use std::cmp::Ordering;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::debug;

use crate::disk::codec::Value;
use crate::error::EngineError;
use crate::index::KeyCodec;
use crate::util;

// root_id, node_count, max_key_size
const HEADER_SIZE: usize = 12;
const NIL: i32 = -1;

#[derive(Debug, Clone)]
struct AvlNode {
    key: Vec<u8>, // encoded key, fixed width
    left: i32,
    right: i32,
    height: i32,
    position: u32,
}

/// AVL tree stored node-per-slot in a file. Nodes are allocated by append
/// and never reclaimed; the root id moves as rotations change the tree.
#[derive(Debug)]
pub struct AvlFile {
    path: PathBuf,
    file: File,
    key: KeyCodec,
    root_id: i32,
    node_count: u32,
}

impl AvlFile {
    pub fn open(path: &Path, key: KeyCodec) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        let len = file.metadata()?.len() as usize;

        let mut avl = Self {
            path: path.to_path_buf(),
            file,
            key,
            root_id: NIL,
            node_count: 0,
        };
        if len == 0 {
            avl.save_header()?;
        } else {
            avl.load_header()?;
        }
        Ok(avl)
    }

    fn node_size(&self) -> usize {
        self.key.width() + 16
    }

    fn node_position(&self, node_id: i32) -> u64 {
        (HEADER_SIZE + node_id as usize * self.node_size()) as u64
    }

    fn save_header(&mut self) -> Result<()> {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.root_id.to_le_bytes());
        buf[4..8].copy_from_slice(&(self.node_count as i32).to_le_bytes());
        buf[8..12].copy_from_slice(&(self.key.width() as i32).to_le_bytes());
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
        self.root_id = util::i32_val(&buf, 0);
        self.node_count = util::i32_val(&buf, 4) as u32;
        let stored_width = util::i32_val(&buf, 8) as usize;
        if stored_width != self.key.width() {
            return Err(EngineError::CorruptNode(format!(
                "{:?} stores {}-byte keys, bound column packs {}",
                self.path,
                stored_width,
                self.key.width()
            ))
            .into());
        }
        Ok(())
    }

    fn read_node(&mut self, node_id: i32) -> Result<AvlNode> {
        self.file.seek(SeekFrom::Start(self.node_position(node_id)))?;
        let mut buf = vec![0u8; self.node_size()];
        self.file
            .read_exact(&mut buf)
            .map_err(|_| EngineError::CorruptNode(format!("node {} of {:?}", node_id, self.path)))?;
        let w = self.key.width();
        Ok(AvlNode {
            key: buf[..w].to_vec(),
            left: util::i32_val(&buf, w),
            right: util::i32_val(&buf, w + 4),
            height: util::i32_val(&buf, w + 8),
            position: util::u32_val(&buf, w + 12),
        })
    }

    fn write_node(&mut self, node_id: i32, node: &AvlNode) -> Result<()> {
        let mut buf = Vec::with_capacity(self.node_size());
        buf.extend(&node.key);
        buf.extend(node.left.to_le_bytes());
        buf.extend(node.right.to_le_bytes());
        buf.extend(node.height.to_le_bytes());
        buf.extend(node.position.to_le_bytes());
        self.file.seek(SeekFrom::Start(self.node_position(node_id)))?;
        self.file.write_all(&buf)?;
        Ok(())
    }

    fn allocate_node(&mut self, key: Vec<u8>, position: u32) -> Result<i32> {
        let node_id = self.node_count as i32;
        self.write_node(
            node_id,
            &AvlNode {
                key,
                left: NIL,
                right: NIL,
                height: 1,
                position,
            },
        )?;
        self.node_count += 1;
        self.save_header()?;
        Ok(node_id)
    }

    fn height_of(&mut self, node_id: i32) -> Result<i32> {
        if node_id == NIL {
            return Ok(0);
        }
        Ok(self.read_node(node_id)?.height)
    }

    fn update_height(&mut self, node_id: i32) -> Result<()> {
        let mut node = self.read_node(node_id)?;
        let lh = self.height_of(node.left)?;
        let rh = self.height_of(node.right)?;
        node.height = 1 + lh.max(rh);
        self.write_node(node_id, &node)
    }

    fn balance_of(&mut self, node_id: i32) -> Result<i32> {
        if node_id == NIL {
            return Ok(0);
        }
        let node = self.read_node(node_id)?;
        Ok(self.height_of(node.left)? - self.height_of(node.right)?)
    }

    fn rotate_left(&mut self, x_id: i32) -> Result<i32> {
        let mut x = self.read_node(x_id)?;
        let y_id = x.right;
        let mut y = self.read_node(y_id)?;

        x.right = y.left;
        self.write_node(x_id, &x)?;
        self.update_height(x_id)?;

        y.left = x_id;
        self.write_node(y_id, &y)?;
        self.update_height(y_id)?;
        Ok(y_id)
    }

    fn rotate_right(&mut self, y_id: i32) -> Result<i32> {
        let mut y = self.read_node(y_id)?;
        let x_id = y.left;
        let mut x = self.read_node(x_id)?;

        y.left = x.right;
        self.write_node(y_id, &y)?;
        self.update_height(y_id)?;

        x.right = y_id;
        self.write_node(x_id, &x)?;
        self.update_height(x_id)?;
        Ok(x_id)
    }

    pub fn insert(&mut self, key: &Value, position: u32) -> Result<()> {
        let key_bytes = self.key.encode(key)?;
        if self.root_id == NIL {
            self.root_id = self.allocate_node(key_bytes, position)?;
        } else {
            let root_id = self.root_id;
            self.root_id = self.insert_rec(root_id, key, key_bytes, position)?;
        }
        self.save_header()
    }

    fn insert_rec(&mut self, node_id: i32, key: &Value, key_bytes: Vec<u8>, position: u32) -> Result<i32> {
        let mut node = self.read_node(node_id)?;
        let node_key = self.key.decode(&node.key)?;

        match key.key_cmp(&node_key) {
            Ordering::Equal => {
                node.position = position;
                self.write_node(node_id, &node)?;
                return Ok(node_id);
            }
            Ordering::Less => {
                node.left = if node.left == NIL {
                    self.allocate_node(key_bytes, position)?
                } else {
                    self.insert_rec(node.left, key, key_bytes, position)?
                };
            }
            Ordering::Greater => {
                node.right = if node.right == NIL {
                    self.allocate_node(key_bytes, position)?
                } else {
                    self.insert_rec(node.right, key, key_bytes, position)?
                };
            }
        }
        self.write_node(node_id, &node)?;
        self.update_height(node_id)?;
        node = self.read_node(node_id)?;

        let balance = self.balance_of(node_id)?;
        if balance > 1 {
            let left = self.read_node(node.left)?;
            let left_key = self.key.decode(&left.key)?;
            if key.key_cmp(&left_key) == Ordering::Less {
                return self.rotate_right(node_id); // LL
            }
            node.left = self.rotate_left(node.left)?; // LR
            self.write_node(node_id, &node)?;
            return self.rotate_right(node_id);
        }
        if balance < -1 {
            let right = self.read_node(node.right)?;
            let right_key = self.key.decode(&right.key)?;
            if key.key_cmp(&right_key) == Ordering::Greater {
                return self.rotate_left(node_id); // RR
            }
            node.right = self.rotate_right(node.right)?; // RL
            self.write_node(node_id, &node)?;
            return self.rotate_left(node_id);
        }
        Ok(node_id)
    }

    pub fn search(&mut self, key: &Value) -> Result<Option<u32>> {
        let mut current = self.root_id;
        while current != NIL {
            let node = self.read_node(current)?;
            let node_key = self.key.decode(&node.key)?;
            match key.key_cmp(&node_key) {
                Ordering::Equal => return Ok(Some(node.position)),
                Ordering::Less => current = node.left,
                Ordering::Greater => current = node.right,
            }
        }
        Ok(None)
    }

    /// Pruned in-order traversal over `[lo, hi]`, keys ascending.
    pub fn range_search(&mut self, lo: &Value, hi: &Value) -> Result<Vec<(Value, u32)>> {
        let mut out = Vec::new();
        let root_id = self.root_id;
        self.range_rec(root_id, lo, hi, &mut out)?;
        Ok(out)
    }

    fn range_rec(&mut self, node_id: i32, lo: &Value, hi: &Value, out: &mut Vec<(Value, u32)>) -> Result<()> {
        if node_id == NIL {
            return Ok(());
        }
        let node = self.read_node(node_id)?;
        let key = self.key.decode(&node.key)?;

        if key.key_cmp(lo) == Ordering::Greater {
            self.range_rec(node.left, lo, hi, out)?;
        }
        if key.key_cmp(lo) != Ordering::Less && key.key_cmp(hi) != Ordering::Greater {
            out.push((key.clone(), node.position));
        }
        if key.key_cmp(hi) == Ordering::Less {
            self.range_rec(node.right, lo, hi, out)?;
        }
        Ok(())
    }

    pub fn delete(&mut self, key: &Value) -> Result<bool> {
        if self.root_id == NIL {
            return Ok(false);
        }
        let root_id = self.root_id;
        let (new_root, deleted) = self.delete_rec(root_id, key)?;
        if deleted {
            self.root_id = new_root;
            self.save_header()?;
            debug!("deleted key from {:?}, root now {}", self.path, new_root);
        }
        Ok(deleted)
    }

    fn delete_rec(&mut self, node_id: i32, key: &Value) -> Result<(i32, bool)> {
        if node_id == NIL {
            return Ok((NIL, false));
        }
        let mut node = self.read_node(node_id)?;
        let node_key = self.key.decode(&node.key)?;

        let deleted = match key.key_cmp(&node_key) {
            Ordering::Less => {
                let (new_left, deleted) = self.delete_rec(node.left, key)?;
                node.left = new_left;
                deleted
            }
            Ordering::Greater => {
                let (new_right, deleted) = self.delete_rec(node.right, key)?;
                node.right = new_right;
                deleted
            }
            Ordering::Equal => {
                if node.left == NIL {
                    return Ok((node.right, true));
                }
                if node.right == NIL {
                    return Ok((node.left, true));
                }
                // two children: substitute the in-order successor
                let (successor_key, successor_pos) = self.min_of(node.right)?;
                let successor = self.key.decode(&successor_key)?;
                node.key = successor_key;
                node.position = successor_pos;
                let (new_right, _) = self.delete_rec(node.right, &successor)?;
                node.right = new_right;
                true
            }
        };

        let lh = self.height_of(node.left)?;
        let rh = self.height_of(node.right)?;
        node.height = 1 + lh.max(rh);
        self.write_node(node_id, &node)?;

        let balance = lh - rh;
        if balance > 1 {
            if self.balance_of(node.left)? >= 0 {
                return Ok((self.rotate_right(node_id)?, deleted));
            }
            node.left = self.rotate_left(node.left)?;
            self.write_node(node_id, &node)?;
            return Ok((self.rotate_right(node_id)?, deleted));
        }
        if balance < -1 {
            if self.balance_of(node.right)? <= 0 {
                return Ok((self.rotate_left(node_id)?, deleted));
            }
            node.right = self.rotate_right(node.right)?;
            self.write_node(node_id, &node)?;
            return Ok((self.rotate_left(node_id)?, deleted));
        }
        Ok((node_id, deleted))
    }

    fn min_of(&mut self, node_id: i32) -> Result<(Vec<u8>, u32)> {
        let mut current = node_id;
        loop {
            let node = self.read_node(current)?;
            if node.left == NIL {
                return Ok((node.key, node.position));
            }
            current = node.left;
        }
    }

    pub fn node_count(&self) -> u32 {
        self.node_count
    }
}

#[cfg(test)]
mod avl_tests {

    use std::env::set_var;

    use tempfile::TempDir;

    use super::*;
    use crate::disk::codec::DataTypeTag;
    use crate::util;

    fn setup() {
        set_var("RUST_LOG", "info");
        util::init();
    }

    fn text_avl(dir: &TempDir) -> AvlFile {
        let path = dir.path().join("idx_avl.dat");
        AvlFile::open(&path, KeyCodec::new(DataTypeTag::Varchar, 20)).unwrap()
    }

    #[test]
    fn range_after_insert_and_delete() {
        setup();
        let dir = TempDir::new().unwrap();
        let mut avl = text_avl(&dir);
        for i in 1..=5 {
            avl.insert(&Value::Varchar(i.to_string()), i as u32).unwrap();
        }

        let keys: Vec<String> = avl
            .range_search(&Value::Varchar("2".into()), &Value::Varchar("4".into()))
            .unwrap()
            .into_iter()
            .map(|(k, _)| k.to_string())
            .collect();
        assert_eq!(keys, vec!["2", "3", "4"]);

        assert!(avl.delete(&Value::Varchar("2".into())).unwrap());
        let keys: Vec<String> = avl
            .range_search(&Value::Varchar("1".into()), &Value::Varchar("5".into()))
            .unwrap()
            .into_iter()
            .map(|(k, _)| k.to_string())
            .collect();
        assert_eq!(keys, vec!["1", "3", "4", "5"]);
    }

    #[test]
    fn sequential_inserts_stay_searchable() {
        setup();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("idx_avl.dat");
        let mut avl = AvlFile::open(&path, KeyCodec::new(DataTypeTag::Int, 0)).unwrap();

        // ascending input forces every left-rotation case
        for i in 1..=128 {
            avl.insert(&Value::Int(i), i as u32).unwrap();
        }
        for i in 1..=128 {
            assert_eq!(avl.search(&Value::Int(i)).unwrap(), Some(i as u32));
        }
        let all = avl.range_search(&Value::Int(1), &Value::Int(128)).unwrap();
        assert_eq!(all.len(), 128);
        for window in all.windows(2) {
            assert_eq!(window[0].0.key_cmp(&window[1].0), std::cmp::Ordering::Less);
        }
    }

    #[test]
    fn duplicate_insert_overwrites_position() {
        setup();
        let dir = TempDir::new().unwrap();
        let mut avl = text_avl(&dir);
        avl.insert(&Value::Varchar("cusco".into()), 1).unwrap();
        avl.insert(&Value::Varchar("cusco".into()), 8).unwrap();
        assert_eq!(avl.search(&Value::Varchar("cusco".into())).unwrap(), Some(8));
        assert_eq!(avl.node_count(), 1);
    }

    #[test]
    fn delete_two_child_node_keeps_order() {
        setup();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("idx_avl.dat");
        let mut avl = AvlFile::open(&path, KeyCodec::new(DataTypeTag::Int, 0)).unwrap();
        for i in [50, 30, 70, 20, 40, 60, 80] {
            avl.insert(&Value::Int(i), i as u32).unwrap();
        }
        assert!(avl.delete(&Value::Int(50)).unwrap());
        assert_eq!(avl.search(&Value::Int(50)).unwrap(), None);
        let keys: Vec<i32> = avl
            .range_search(&Value::Int(0), &Value::Int(100))
            .unwrap()
            .into_iter()
            .map(|(k, _)| match k {
                Value::Int(v) => v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(keys, vec![20, 30, 40, 60, 70, 80]);
    }

    #[test]
    fn oversized_key_is_rejected() {
        setup();
        let dir = TempDir::new().unwrap();
        let mut avl = text_avl(&dir);
        let long = "x".repeat(40);
        assert!(avl.insert(&Value::Varchar(long), 1).is_err());
    }

    #[test]
    fn tree_survives_reopen() {
        setup();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("idx_avl.dat");
        {
            let mut avl = AvlFile::open(&path, KeyCodec::new(DataTypeTag::Int, 0)).unwrap();
            for i in 1..=40 {
                avl.insert(&Value::Int(i), i as u32).unwrap();
            }
        }
        let mut avl = AvlFile::open(&path, KeyCodec::new(DataTypeTag::Int, 0)).unwrap();
        assert_eq!(avl.search(&Value::Int(33)).unwrap(), Some(33));
        assert_eq!(avl.node_count(), 40);
    }
}
