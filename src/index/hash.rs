use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{debug, trace};
use twox_hash::XxHash64;

use crate::disk::codec::{DataTypeTag, Value};
use crate::error::EngineError;
use crate::index::KeyCodec;
use crate::util;

pub const DEFAULT_BUCKET_SIZE: u32 = 4;

// global_depth, directory_size, bucket_count, key_tag, key_max_len
const HEADER_SIZE: usize = 20;
const DIR_ENTRY_SIZE: usize = 4;
// local_depth, capacity, record_count
const BUCKET_HEADER_SIZE: usize = 12;

/// Extendible hashing over a single file: fixed header, directory of
/// `2^global_depth` bucket ids, then a dense bucket array. Buckets never
/// shrink; the directory only grows.
#[derive(Debug)]
pub struct ExtendibleHashFile {
    path: PathBuf,
    file: File,
    key: KeyCodec,
    bucket_size: u32,
    global_depth: u32,
    directory_size: u32,
    bucket_count: u32,
}

type BucketEntry = (Vec<u8>, u32);

impl ExtendibleHashFile {
    pub fn open(path: &Path, key: KeyCodec, bucket_size: u32) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        let len = file.metadata()?.len() as usize;

        let mut hash = Self {
            path: path.to_path_buf(),
            file,
            key,
            bucket_size,
            global_depth: 0,
            directory_size: 1,
            bucket_count: 1,
        };
        if len == 0 {
            hash.initialize()?;
        } else {
            hash.load_header()?;
        }
        Ok(hash)
    }

    fn entry_size(&self) -> usize {
        self.key.width() + 4
    }

    fn bucket_bytes(&self) -> usize {
        BUCKET_HEADER_SIZE + self.bucket_size as usize * self.entry_size()
    }

    fn bucket_position(&self, bucket_id: u32) -> u64 {
        let dir_bytes = self.directory_size as usize * DIR_ENTRY_SIZE;
        (HEADER_SIZE + dir_bytes + bucket_id as usize * self.bucket_bytes()) as u64
    }

    fn initialize(&mut self) -> Result<()> {
        self.save_header()?;
        self.write_directory(&[0])?;
        self.write_bucket(0, 0, &[])?;
        debug!("initialized hash index {:?}", self.path);
        Ok(())
    }

    fn save_header(&mut self) -> Result<()> {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.global_depth.to_le_bytes());
        buf[4..8].copy_from_slice(&self.directory_size.to_le_bytes());
        buf[8..12].copy_from_slice(&self.bucket_count.to_le_bytes());
        buf[12..16].copy_from_slice(&(self.key.tag as u32).to_le_bytes());
        buf[16..20].copy_from_slice(&(self.key.max_len as u32).to_le_bytes());
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
        self.global_depth = util::u32_val(&buf, 0);
        self.directory_size = util::u32_val(&buf, 4);
        self.bucket_count = util::u32_val(&buf, 8);
        let tag = DataTypeTag::try_from(util::u32_val(&buf, 12) as u8)
            .map_err(|_| EngineError::TruncatedHeader(self.path.display().to_string()))?;
        self.key = KeyCodec::new(tag, util::u32_val(&buf, 16) as usize);
        Ok(())
    }

    fn read_directory(&mut self) -> Result<Vec<u32>> {
        self.file.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
        let mut buf = vec![0u8; self.directory_size as usize * DIR_ENTRY_SIZE];
        self.file.read_exact(&mut buf)?;
        Ok((0..self.directory_size as usize)
            .map(|i| util::u32_val(&buf, i * DIR_ENTRY_SIZE))
            .collect())
    }

    fn write_directory(&mut self, directory: &[u32]) -> Result<()> {
        self.file.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
        let mut buf = Vec::with_capacity(directory.len() * DIR_ENTRY_SIZE);
        for id in directory {
            buf.extend(id.to_le_bytes());
        }
        self.file.write_all(&buf)?;
        Ok(())
    }

    fn read_bucket(&mut self, bucket_id: u32) -> Result<(u32, Vec<BucketEntry>)> {
        self.file.seek(SeekFrom::Start(self.bucket_position(bucket_id)))?;
        let mut buf = vec![0u8; self.bucket_bytes()];
        self.file.read_exact(&mut buf).map_err(|_| EngineError::ShortBlock {
            expected: self.bucket_bytes(),
            got: 0,
        })?;

        let local_depth = util::u32_val(&buf, 0);
        let record_count = util::u32_val(&buf, 8) as usize;
        let entry_size = self.entry_size();
        let key_width = self.key.width();

        let mut entries = Vec::with_capacity(record_count);
        for i in 0..record_count.min(self.bucket_size as usize) {
            let base = BUCKET_HEADER_SIZE + i * entry_size;
            let key_bytes = buf[base..base + key_width].to_vec();
            let position = util::u32_val(&buf, base + key_width);
            entries.push((key_bytes, position));
        }
        Ok((local_depth, entries))
    }

    fn write_bucket(&mut self, bucket_id: u32, local_depth: u32, entries: &[BucketEntry]) -> Result<()> {
        let mut buf = Vec::with_capacity(self.bucket_bytes());
        buf.extend(local_depth.to_le_bytes());
        buf.extend(self.bucket_size.to_le_bytes());
        buf.extend((entries.len() as u32).to_le_bytes());
        for (key_bytes, position) in entries {
            buf.extend(key_bytes);
            buf.extend(position.to_le_bytes());
        }
        buf.resize(self.bucket_bytes(), 0);
        self.file.seek(SeekFrom::Start(self.bucket_position(bucket_id)))?;
        self.file.write_all(&buf)?;
        Ok(())
    }

    fn hash_bytes(key_bytes: &[u8]) -> u64 {
        XxHash64::oneshot(0, key_bytes)
    }

    fn dir_index(&self, key_bytes: &[u8]) -> usize {
        let mask = (1u64 << self.global_depth) - 1;
        (Self::hash_bytes(key_bytes) & mask) as usize
    }

    pub fn insert(&mut self, key: &Value, position: u32) -> Result<()> {
        let key_bytes = self.key.encode(key)?;

        loop {
            let directory = self.read_directory()?;
            let bucket_id = directory[self.dir_index(&key_bytes)];
            let (local_depth, mut entries) = self.read_bucket(bucket_id)?;

            if let Some(entry) = entries.iter_mut().find(|e| e.0 == key_bytes) {
                entry.1 = position;
                return self.write_bucket(bucket_id, local_depth, &entries);
            }

            if entries.len() < self.bucket_size as usize {
                entries.push((key_bytes, position));
                return self.write_bucket(bucket_id, local_depth, &entries);
            }

            if local_depth == self.global_depth {
                self.expand_directory()?;
                continue;
            }

            // split: partition by bit `local_depth` of the key hash
            let new_local_depth = local_depth + 1;
            let (keep, moved): (Vec<BucketEntry>, Vec<BucketEntry>) = entries
                .into_iter()
                .partition(|e| (Self::hash_bytes(&e.0) >> local_depth) & 1 == 0);

            let new_bucket_id = self.bucket_count;
            self.bucket_count += 1;
            self.save_header()?;

            self.write_bucket(bucket_id, new_local_depth, &keep)?;
            self.write_bucket(new_bucket_id, new_local_depth, &moved)?;
            self.redirect_after_split(bucket_id, new_bucket_id, new_local_depth)?;
            trace!(
                "split bucket {} -> {} at depth {}",
                bucket_id,
                new_bucket_id,
                new_local_depth
            );
        }
    }

    pub fn search(&mut self, key: &Value) -> Result<Option<u32>> {
        let key_bytes = self.key.encode(key)?;
        let directory = self.read_directory()?;
        let bucket_id = directory[self.dir_index(&key_bytes)];
        let (_, entries) = self.read_bucket(bucket_id)?;
        Ok(entries.iter().find(|e| e.0 == key_bytes).map(|e| e.1))
    }

    pub fn delete(&mut self, key: &Value) -> Result<bool> {
        let key_bytes = self.key.encode(key)?;
        let directory = self.read_directory()?;
        let bucket_id = directory[self.dir_index(&key_bytes)];
        let (local_depth, mut entries) = self.read_bucket(bucket_id)?;

        match entries.iter().position(|e| e.0 == key_bytes) {
            Some(i) => {
                entries.remove(i);
                self.write_bucket(bucket_id, local_depth, &entries)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Double the directory by modular duplication, then rewrite the file:
    /// the bucket region moves because it sits behind the directory.
    fn expand_directory(&mut self) -> Result<()> {
        let old_directory = self.read_directory()?;
        let mut buckets = Vec::with_capacity(self.bucket_count as usize);
        for id in 0..self.bucket_count {
            buckets.push(self.read_bucket(id)?);
        }

        self.global_depth += 1;
        self.directory_size = 1 << self.global_depth;
        let directory: Vec<u32> = (0..self.directory_size as usize)
            .map(|i| old_directory[i % old_directory.len()])
            .collect();
        debug!(
            "expand directory of {:?} to depth {} ({} slots)",
            self.path, self.global_depth, self.directory_size
        );

        self.file.set_len(0)?;
        self.save_header()?;
        self.write_directory(&directory)?;
        for (id, (local_depth, entries)) in buckets.iter().enumerate() {
            self.write_bucket(id as u32, *local_depth, entries)?;
        }
        Ok(())
    }

    fn redirect_after_split(&mut self, old_id: u32, new_id: u32, local_depth: u32) -> Result<()> {
        let mut directory = self.read_directory()?;
        let high_bit = 1usize << (local_depth - 1);
        for (i, slot) in directory.iter_mut().enumerate() {
            if *slot == old_id && i & high_bit != 0 {
                *slot = new_id;
            }
        }
        self.write_directory(&directory)
    }

    pub fn global_depth(&self) -> u32 {
        self.global_depth
    }

    pub fn bucket_count(&self) -> u32 {
        self.bucket_count
    }
}

#[cfg(test)]
mod hash_tests {

    use std::env::set_var;

    use tempfile::TempDir;

    use super::*;
    use crate::util;

    fn setup() {
        set_var("RUST_LOG", "info");
        util::init();
    }

    fn varchar_index(dir: &TempDir) -> ExtendibleHashFile {
        let path = dir.path().join("idx_hash.dat");
        let key = KeyCodec::new(DataTypeTag::Varchar, 24);
        ExtendibleHashFile::open(&path, key, DEFAULT_BUCKET_SIZE).unwrap()
    }

    #[test]
    fn insert_search_across_splits() {
        setup();
        let dir = TempDir::new().unwrap();
        let mut hash = varchar_index(&dir);

        for i in 0..200 {
            hash.insert(&Value::Varchar(format!("product-{:03}", i)), i).unwrap();
        }
        assert!(hash.global_depth() > 0);
        for i in 0..200 {
            let hit = hash.search(&Value::Varchar(format!("product-{:03}", i))).unwrap();
            assert_eq!(hit, Some(i));
        }
        assert_eq!(hash.search(&Value::Varchar("missing".into())).unwrap(), None);
    }

    #[test]
    fn duplicate_key_overwrites_position() {
        setup();
        let dir = TempDir::new().unwrap();
        let mut hash = varchar_index(&dir);

        hash.insert(&Value::Varchar("gouda".into()), 3).unwrap();
        hash.insert(&Value::Varchar("gouda".into()), 9).unwrap();
        assert_eq!(hash.search(&Value::Varchar("gouda".into())).unwrap(), Some(9));
    }

    #[test]
    fn delete_leaves_other_keys_alone() {
        setup();
        let dir = TempDir::new().unwrap();
        let mut hash = varchar_index(&dir);

        for i in 0..20 {
            hash.insert(&Value::Varchar(format!("k{}", i)), i).unwrap();
        }
        assert!(hash.delete(&Value::Varchar("k7".into())).unwrap());
        assert!(!hash.delete(&Value::Varchar("k7".into())).unwrap());
        assert_eq!(hash.search(&Value::Varchar("k7".into())).unwrap(), None);
        assert_eq!(hash.search(&Value::Varchar("k8".into())).unwrap(), Some(8));
    }

    #[test]
    fn directory_slots_agree_with_bucket_hashes() {
        setup();
        let dir = TempDir::new().unwrap();
        let mut hash = varchar_index(&dir);
        for i in 0..100 {
            hash.insert(&Value::Varchar(format!("entry-{}", i)), i).unwrap();
        }

        let directory = hash.read_directory().unwrap();
        assert_eq!(directory.len(), 1 << hash.global_depth());
        for (slot, &bucket_id) in directory.iter().enumerate() {
            let (local_depth, entries) = hash.read_bucket(bucket_id).unwrap();
            assert!(local_depth <= hash.global_depth());
            let local_mask = (1u64 << local_depth) - 1;
            for (key_bytes, _) in &entries {
                let h = ExtendibleHashFile::hash_bytes(key_bytes);
                assert_eq!(h & local_mask, (slot as u64) & local_mask);
            }
        }
    }

    #[test]
    fn header_survives_reopen() {
        setup();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("idx_hash.dat");
        let key = KeyCodec::new(DataTypeTag::Int, 0);
        {
            let mut hash = ExtendibleHashFile::open(&path, key, DEFAULT_BUCKET_SIZE).unwrap();
            for i in 1..=50 {
                hash.insert(&Value::Int(i), i as u32).unwrap();
            }
        }
        let mut hash = ExtendibleHashFile::open(&path, key, DEFAULT_BUCKET_SIZE).unwrap();
        assert_eq!(hash.search(&Value::Int(17)).unwrap(), Some(17));
        assert_eq!(hash.search(&Value::Int(51)).unwrap(), None);
    }
}
