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

pub const DEFAULT_LEVELS: u32 = 2;
pub const DEFAULT_BLOCK_FACTOR: u32 = 10;

const NIL: u32 = u32::MAX;

// levels, block_factor, key_tag, key_max_len, total_blocks, root_blocks, reserved
const HEADER_SIZE: usize = 28;
// level, record_count, next_overflow
const BLOCK_HEADER_SIZE: usize = 12;

/// One `(key, pointer)` slot. A `None` key is the all-zero fallthrough
/// entry index levels use as their upper sentinel.
#[derive(Debug, Clone)]
struct Entry {
    key: Option<Vec<u8>>,
    pointer: u32,
}

/// Static-depth ISAM index. The upper levels are laid out once and never
/// rebalanced; leaves that fill up grow singly-linked overflow chains.
#[derive(Debug)]
pub struct IsamFile {
    path: PathBuf,
    file: File,
    key: KeyCodec,
    levels: u32,
    block_factor: u32,
    total_blocks: u32,
    root_blocks: u32,
}

impl IsamFile {
    pub fn open(path: &Path, key: KeyCodec, levels: u32, block_factor: u32) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        let len = file.metadata()?.len() as usize;

        let mut isam = Self {
            path: path.to_path_buf(),
            file,
            key,
            levels,
            block_factor,
            total_blocks: 0,
            root_blocks: 0,
        };
        if len == 0 {
            isam.initialize()?;
        } else {
            isam.load_header()?;
        }
        Ok(isam)
    }

    fn entry_size(&self) -> usize {
        self.key.width() + 4
    }

    fn block_size(&self) -> usize {
        BLOCK_HEADER_SIZE + self.block_factor as usize * self.entry_size()
    }

    fn block_position(&self, block_id: u32) -> u64 {
        (HEADER_SIZE + block_id as usize * self.block_size()) as u64
    }

    /// Static skeleton: one single-entry index block per upper level, each
    /// falling through to the next, then one empty leaf.
    fn initialize(&mut self) -> Result<()> {
        self.total_blocks = self.levels;
        self.root_blocks = 1;
        self.save_header()?;

        let leaf_level = self.levels - 1;
        for level in 0..leaf_level {
            let fallthrough = Entry {
                key: None,
                pointer: level + 1,
            };
            self.write_block(level, level, &[fallthrough], NIL)?;
        }
        self.write_block(leaf_level, leaf_level, &[], NIL)?;
        debug!("initialized isam index {:?}, levels={}", self.path, self.levels);
        Ok(())
    }

    fn save_header(&mut self) -> Result<()> {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.levels.to_le_bytes());
        buf[4..8].copy_from_slice(&self.block_factor.to_le_bytes());
        buf[8..12].copy_from_slice(&(self.key.tag as u32).to_le_bytes());
        buf[12..16].copy_from_slice(&(self.key.max_len as u32).to_le_bytes());
        buf[16..20].copy_from_slice(&self.total_blocks.to_le_bytes());
        buf[20..24].copy_from_slice(&self.root_blocks.to_le_bytes());
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
        self.levels = util::u32_val(&buf, 0);
        self.block_factor = util::u32_val(&buf, 4);
        let tag = DataTypeTag::try_from(util::u32_val(&buf, 8) as u8)
            .map_err(|_| EngineError::TruncatedHeader(self.path.display().to_string()))?;
        self.key = KeyCodec::new(tag, util::u32_val(&buf, 12) as usize);
        self.total_blocks = util::u32_val(&buf, 16);
        self.root_blocks = util::u32_val(&buf, 20);
        Ok(())
    }

    fn read_block(&mut self, block_id: u32) -> Result<(u32, Vec<Entry>, u32)> {
        self.file.seek(SeekFrom::Start(self.block_position(block_id)))?;
        let mut buf = vec![0u8; self.block_size()];
        self.file.read_exact(&mut buf).map_err(|_| EngineError::ShortBlock {
            expected: self.block_size(),
            got: 0,
        })?;

        let level = util::u32_val(&buf, 0);
        let record_count = util::u32_val(&buf, 4) as usize;
        let next_overflow = util::u32_val(&buf, 8);

        let entry_size = self.entry_size();
        let key_width = self.key.width();
        let mut entries = Vec::with_capacity(record_count);
        for i in 0..record_count.min(self.block_factor as usize) {
            let base = BLOCK_HEADER_SIZE + i * entry_size;
            let key_bytes = &buf[base..base + key_width];
            let pointer = util::u32_val(&buf, base + key_width);
            let key = if util::is_all_zero(key_bytes) {
                None
            } else {
                Some(key_bytes.to_vec())
            };
            entries.push(Entry { key, pointer });
        }
        Ok((level, entries, next_overflow))
    }

    fn write_block(&mut self, block_id: u32, level: u32, entries: &[Entry], next_overflow: u32) -> Result<()> {
        let key_width = self.key.width();
        let mut buf = Vec::with_capacity(self.block_size());
        buf.extend(level.to_le_bytes());
        buf.extend((entries.len() as u32).to_le_bytes());
        buf.extend(next_overflow.to_le_bytes());
        for entry in entries {
            match &entry.key {
                Some(key_bytes) => buf.extend(key_bytes),
                None => buf.extend(vec![0u8; key_width]),
            }
            buf.extend(entry.pointer.to_le_bytes());
        }
        buf.resize(self.block_size(), 0);
        self.file.seek(SeekFrom::Start(self.block_position(block_id)))?;
        self.file.write_all(&buf)?;
        Ok(())
    }

    fn allocate_leaf(&mut self) -> Result<u32> {
        let block_id = self.total_blocks;
        self.total_blocks += 1;
        self.save_header()?;
        let leaf_level = self.levels - 1;
        self.write_block(block_id, leaf_level, &[], NIL)?;
        Ok(block_id)
    }

    /// Nulls compare as the upper sentinel; everything else in key domain.
    fn cmp_entry_keys(&self, a: &Option<Value>, b: &Option<Value>) -> Ordering {
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => x.key_cmp(y),
        }
    }

    fn sort_entries(&self, entries: &mut Vec<Entry>) -> Result<()> {
        let mut decorated = Vec::with_capacity(entries.len());
        for entry in entries.drain(..) {
            let decoded = match &entry.key {
                Some(bytes) => Some(self.key.decode(bytes)?),
                None => None,
            };
            decorated.push((decoded, entry));
        }
        decorated.sort_by(|a, b| self.cmp_entry_keys(&a.0, &b.0));
        entries.extend(decorated.into_iter().map(|(_, e)| e));
        Ok(())
    }

    fn find_child(&mut self, block_id: u32, search: &Value) -> Result<u32> {
        let (_, entries, _) = self.read_block(block_id)?;
        if entries.is_empty() {
            return Ok(block_id + 1);
        }
        for entry in &entries {
            match &entry.key {
                None => return Ok(entry.pointer),
                Some(bytes) => {
                    let key = self.key.decode(bytes)?;
                    if search.key_cmp(&key) != Ordering::Greater {
                        return Ok(entry.pointer);
                    }
                }
            }
        }
        Ok(entries[entries.len() - 1].pointer)
    }

    fn find_leaf(&mut self, search: &Value) -> Result<u32> {
        let mut current = 0u32;
        for _ in 0..self.levels - 1 {
            current = self.find_child(current, search)?;
        }
        Ok(current)
    }

    pub fn insert(&mut self, key: &Value, position: u32) -> Result<()> {
        let key_bytes = self.key.encode(key)?;
        let leaf_id = self.find_leaf(key)?;
        let leaf_level = self.levels - 1;

        let (_, mut entries, next_overflow) = self.read_block(leaf_id)?;
        if let Some(entry) = entries.iter_mut().find(|e| e.key.as_deref() == Some(key_bytes.as_slice())) {
            entry.pointer = position;
            return self.write_block(leaf_id, leaf_level, &entries, next_overflow);
        }
        if entries.len() < self.block_factor as usize {
            entries.push(Entry {
                key: Some(key_bytes),
                pointer: position,
            });
            self.sort_entries(&mut entries)?;
            return self.write_block(leaf_id, leaf_level, &entries, next_overflow);
        }

        // full leaf: splice into the overflow chain
        let first_overflow = if next_overflow == NIL {
            let overflow_id = self.allocate_leaf()?;
            self.write_block(leaf_id, leaf_level, &entries, overflow_id)?;
            trace!("leaf {} of {:?} grew overflow {}", leaf_id, self.path, overflow_id);
            overflow_id
        } else {
            next_overflow
        };
        self.insert_in_chain(first_overflow, key_bytes, position)
    }

    fn insert_in_chain(&mut self, chain_head: u32, key_bytes: Vec<u8>, position: u32) -> Result<()> {
        let leaf_level = self.levels - 1;
        let mut current = chain_head;
        loop {
            let (_, mut entries, next_overflow) = self.read_block(current)?;

            if let Some(entry) = entries.iter_mut().find(|e| e.key.as_deref() == Some(key_bytes.as_slice())) {
                entry.pointer = position;
                return self.write_block(current, leaf_level, &entries, next_overflow);
            }
            if entries.len() < self.block_factor as usize {
                entries.push(Entry {
                    key: Some(key_bytes),
                    pointer: position,
                });
                self.sort_entries(&mut entries)?;
                return self.write_block(current, leaf_level, &entries, next_overflow);
            }
            if next_overflow == NIL {
                let overflow_id = self.allocate_leaf()?;
                self.write_block(current, leaf_level, &entries, overflow_id)?;
                let only = Entry {
                    key: Some(key_bytes),
                    pointer: position,
                };
                return self.write_block(overflow_id, leaf_level, &[only], NIL);
            }
            current = next_overflow;
        }
    }

    pub fn search(&mut self, key: &Value) -> Result<Option<u32>> {
        let key_bytes = self.key.encode(key)?;
        let leaf_id = self.find_leaf(key)?;

        let mut current = leaf_id;
        while current != NIL {
            let (_, entries, next_overflow) = self.read_block(current)?;
            if let Some(entry) = entries.iter().find(|e| e.key.as_deref() == Some(key_bytes.as_slice())) {
                return Ok(Some(entry.pointer));
            }
            current = next_overflow;
        }
        Ok(None)
    }

    pub fn delete(&mut self, key: &Value) -> Result<bool> {
        let key_bytes = self.key.encode(key)?;
        let leaf_id = self.find_leaf(key)?;
        let leaf_level = self.levels - 1;

        let mut current = leaf_id;
        while current != NIL {
            let (_, mut entries, next_overflow) = self.read_block(current)?;
            if let Some(i) = entries.iter().position(|e| e.key.as_deref() == Some(key_bytes.as_slice())) {
                entries.remove(i);
                self.write_block(current, leaf_level, &entries, next_overflow)?;
                return Ok(true);
            }
            current = next_overflow;
        }
        Ok(false)
    }

    /// Sorted bulk load, used by index backfill. Entries beyond what the
    /// static levels can address degrade into the last leaf's overflow
    /// chain.
    pub fn build(&mut self, sorted: &[(Value, u32)]) -> Result<()> {
        let bf = self.block_factor as usize;
        let addressable_leaves = bf.pow(self.levels - 1);

        let wanted_leaves = sorted.len().div_ceil(bf).max(1);
        let leaf_count = wanted_leaves.min(addressable_leaves);
        let direct = sorted.len().min(leaf_count * bf);
        let (direct_entries, spill) = sorted.split_at(direct);

        // level sizes bottom-up, root forced to one block
        let leaf_level = (self.levels - 1) as usize;
        let mut level_sizes = vec![0usize; self.levels as usize];
        level_sizes[leaf_level] = leaf_count;
        for level in (0..leaf_level).rev() {
            level_sizes[level] = level_sizes[level + 1].div_ceil(bf).max(1);
        }
        level_sizes[0] = 1;

        let mut first_id = vec![0u32; self.levels as usize];
        for level in 1..=leaf_level {
            first_id[level] = first_id[level - 1] + level_sizes[level - 1] as u32;
        }
        self.total_blocks = level_sizes.iter().sum::<usize>() as u32;
        self.root_blocks = 1;
        self.file.set_len(0)?;
        self.save_header()?;

        // leaves, remembering each block's max key for the level above
        let mut child_max: Vec<Option<Vec<u8>>> = Vec::with_capacity(leaf_count);
        for (i, chunk) in direct_entries.chunks(bf).enumerate() {
            let entries: Vec<Entry> = chunk
                .iter()
                .map(|(key, pos)| {
                    Ok(Entry {
                        key: Some(self.key.encode(key)?),
                        pointer: *pos,
                    })
                })
                .collect::<Result<_>>()?;
            child_max.push(entries.last().and_then(|e| e.key.clone()));
            self.write_block(first_id[leaf_level] + i as u32, leaf_level as u32, &entries, NIL)?;
        }
        for i in direct_entries.chunks(bf).len()..leaf_count {
            child_max.push(None);
            self.write_block(first_id[leaf_level] + i as u32, leaf_level as u32, &[], NIL)?;
        }

        // index levels bottom-up: each entry routes keys <= child max, the
        // last child of a block is the null fallthrough
        for level in (0..leaf_level).rev() {
            let child_first = first_id[level + 1];
            let mut next_max: Vec<Option<Vec<u8>>> = Vec::new();
            for (i, group) in child_max.chunks(bf).enumerate() {
                let mut entries = Vec::with_capacity(group.len());
                for (j, max_key) in group.iter().enumerate() {
                    let child_id = child_first + (i * bf + j) as u32;
                    let last = j == group.len() - 1;
                    entries.push(Entry {
                        key: if last { None } else { max_key.clone() },
                        pointer: child_id,
                    });
                }
                next_max.push(group.last().cloned().flatten());
                self.write_block(first_id[level] + i as u32, level as u32, &entries, NIL)?;
            }
            child_max = next_max;
        }

        debug!(
            "bulk built isam {:?}: {} entries, {} leaves, {} spill",
            self.path,
            direct,
            leaf_count,
            spill.len()
        );
        for (key, pos) in spill {
            self.insert(key, *pos)?;
        }
        Ok(())
    }

    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    pub fn levels(&self) -> u32 {
        self.levels
    }
}
