pub mod avl;
pub mod btree;
pub mod hash;
pub mod isam;
pub mod rtree;

use std::path::Path;

use anyhow::Result;
use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::disk::codec::{self, DataTypeTag, Value};
use crate::error::EngineError;

use avl::AvlFile;
use btree::BPlusTreeFile;
use hash::ExtendibleHashFile;
use isam::IsamFile;
use rtree::SpatialFile;

/// Index family tags; the discriminant is the value persisted in catalog
/// blobs and accepted in `CREATE INDEX ... USING <kind>`.
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, TryFromPrimitive,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum IndexKind {
    Sequential = 0,
    Avl = 1,
    Isam = 2,
    Hash = 3,
    BTree = 4,
    RTree = 5,
}

/// Key encoding shared by the four key indexes: keys are codec-serialized
/// fixed-width bytes of the bound column's tag, compared in the column's
/// key domain.
#[derive(Debug, Clone, Copy)]
pub struct KeyCodec {
    pub tag: DataTypeTag,
    pub max_len: usize,
}

impl KeyCodec {
    pub fn new(tag: DataTypeTag, max_len: usize) -> Self {
        Self { tag, max_len }
    }

    pub fn width(&self) -> usize {
        codec::type_size(self.tag, self.max_len)
    }

    pub fn encode(&self, key: &Value) -> Result<Vec<u8>> {
        codec::serialize(key, self.tag, self.max_len)
    }

    pub fn decode(&self, data: &[u8]) -> Result<Value> {
        codec::deserialize(data, self.tag, self.max_len)
    }
}

/// One open index backing file, dispatched by kind. The spatial variant
/// does not answer key lookups; the operator layer drives it through
/// [`SpatialFile`] directly.
#[derive(Debug)]
pub enum IndexFile {
    BTree(BPlusTreeFile),
    Hash(ExtendibleHashFile),
    Isam(IsamFile),
    Avl(AvlFile),
    Spatial(SpatialFile),
}

impl IndexFile {
    pub fn open(kind: IndexKind, path: &Path, key: KeyCodec) -> Result<Self> {
        let file = match kind {
            IndexKind::BTree => IndexFile::BTree(BPlusTreeFile::open(path, key, btree::DEFAULT_ORDER)?),
            IndexKind::Hash => IndexFile::Hash(ExtendibleHashFile::open(path, key, hash::DEFAULT_BUCKET_SIZE)?),
            IndexKind::Isam => IndexFile::Isam(IsamFile::open(
                path,
                key,
                isam::DEFAULT_LEVELS,
                isam::DEFAULT_BLOCK_FACTOR,
            )?),
            IndexKind::Avl => IndexFile::Avl(AvlFile::open(path, key)?),
            IndexKind::RTree => IndexFile::Spatial(SpatialFile::open(path)?),
            IndexKind::Sequential => {
                return Err(EngineError::UnsupportedStatement(
                    "SEQUENTIAL indexes are not implemented".into(),
                )
                .into())
            }
        };
        Ok(file)
    }

    pub fn insert(&mut self, key: &Value, position: u32) -> Result<()> {
        match self {
            IndexFile::BTree(f) => f.insert(key, position),
            IndexFile::Hash(f) => f.insert(key, position),
            IndexFile::Isam(f) => f.insert(key, position),
            IndexFile::Avl(f) => f.insert(key, position),
            IndexFile::Spatial(_) => Err(EngineError::UnsupportedStatement(
                "spatial indexes take rectangles, not scalar keys".into(),
            )
            .into()),
        }
    }

    pub fn search(&mut self, key: &Value) -> Result<Option<u32>> {
        match self {
            IndexFile::BTree(f) => f.search(key),
            IndexFile::Hash(f) => f.search(key),
            IndexFile::Isam(f) => f.search(key),
            IndexFile::Avl(f) => f.search(key),
            IndexFile::Spatial(_) => Ok(None),
        }
    }

    pub fn delete(&mut self, key: &Value) -> Result<bool> {
        match self {
            IndexFile::BTree(f) => f.delete(key),
            IndexFile::Hash(f) => f.delete(key),
            IndexFile::Isam(f) => f.delete(key),
            IndexFile::Avl(f) => f.delete(key),
            IndexFile::Spatial(_) => Ok(false),
        }
    }

    /// Ordered `[lo, hi]` scan; only the ordered indexes answer it.
    pub fn range_search(&mut self, lo: &Value, hi: &Value) -> Result<Vec<(Value, u32)>> {
        match self {
            IndexFile::BTree(f) => f.all_tuples_range(lo, hi),
            IndexFile::Avl(f) => f.range_search(lo, hi),
            _ => Err(EngineError::UnsupportedPredicate(
                "range predicate over an unordered index".into(),
            )
            .into()),
        }
    }

    pub fn supports_range(&self) -> bool {
        matches!(self, IndexFile::BTree(_) | IndexFile::Avl(_))
    }

    pub fn as_btree_mut(&mut self) -> Option<&mut BPlusTreeFile> {
        match self {
            IndexFile::BTree(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_spatial_mut(&mut self) -> Option<&mut SpatialFile> {
        match self {
            IndexFile::Spatial(f) => Some(f),
            _ => None,
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        match self {
            IndexFile::Spatial(f) => f.flush(),
            _ => Ok(()),
        }
    }
}

/// Callback-table entry: everything the operator layer needs to mirror a
/// heap mutation into one attached index.
#[derive(Debug)]
pub struct IndexCallback {
    pub idx_id: u32,
    pub kind: IndexKind,
    pub key_col: usize,
    pub file: IndexFile,
}
