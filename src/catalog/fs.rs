use std::fs::{self, File};
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::catalog::def::{Database, GlobalCatalog, Schema, Table};
use crate::error::EngineError;

/// `"RDB1"` little-endian.
const BLOB_MAGIC: u32 = 0x3142_4452;
const BLOB_FORMAT_VERSION: u32 = 1;

/// Versioned tagged envelope every metadata blob is wrapped in, so a blob
/// identifies its own kind and format revision when read back.
#[derive(Debug, Serialize, Deserialize)]
struct BlobEnvelope {
    magic: u32,
    version: u32,
    body: BlobBody,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum BlobBody {
    Catalog(GlobalCatalog),
    Database(Database),
    Schema(Schema),
    Table(Table),
}

/// Blob and directory plumbing for the catalog tree.
#[derive(Debug, Clone)]
pub struct FileManager;

impl FileManager {
    pub fn create_dir(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    pub fn create_file(&self, path: &Path) -> Result<()> {
        File::create(path)?;
        Ok(())
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    pub fn write_blob(&self, path: &Path, body: BlobBody) -> Result<()> {
        let envelope = BlobEnvelope {
            magic: BLOB_MAGIC,
            version: BLOB_FORMAT_VERSION,
            body,
        };
        fs::write(path, bincode::serialize(&envelope)?)?;
        Ok(())
    }

    pub fn read_blob(&self, path: &Path) -> Result<BlobBody> {
        if !path.exists() {
            return Err(EngineError::MissingBackingFile(path.display().to_string()).into());
        }
        let raw = fs::read(path)?;
        let envelope: BlobEnvelope = bincode::deserialize(&raw)
            .map_err(|_| EngineError::TruncatedHeader(path.display().to_string()))?;
        if envelope.magic != BLOB_MAGIC || envelope.version != BLOB_FORMAT_VERSION {
            return Err(EngineError::TruncatedHeader(path.display().to_string()).into());
        }
        Ok(envelope.body)
    }

    pub fn read_catalog(&self, path: &Path) -> Result<GlobalCatalog> {
        match self.read_blob(path)? {
            BlobBody::Catalog(catalog) => Ok(catalog),
            _ => Err(EngineError::TruncatedHeader(path.display().to_string()).into()),
        }
    }

    pub fn read_schema(&self, path: &Path) -> Result<Schema> {
        match self.read_blob(path)? {
            BlobBody::Schema(schema) => Ok(schema),
            _ => Err(EngineError::TruncatedHeader(path.display().to_string()).into()),
        }
    }

    pub fn read_table(&self, path: &Path) -> Result<Table> {
        match self.read_blob(path)? {
            BlobBody::Table(table) => Ok(table),
            _ => Err(EngineError::TruncatedHeader(path.display().to_string()).into()),
        }
    }
}
