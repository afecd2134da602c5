use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{debug, warn};

use crate::catalog::def::Table;
use crate::disk::codec::Value;
use crate::disk::layout::RecordLayout;
use crate::error::EngineError;

/// Tombstoned fixed-record store over a single file. Records are addressed
/// by zero-based ordinal; deletion rewrites the slot with the liveness flag
/// cleared and never reclaims bytes.
#[derive(Debug)]
pub struct HeapFile {
    path: PathBuf,
    layout: RecordLayout,
    columns: Vec<String>,
    reader: BufReader<File>,
    writer: BufWriter<File>,
    record_count: u32,
    dirty: bool,
}

impl HeapFile {
    pub fn open(table: &Table, path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(EngineError::MissingBackingFile(path.display().to_string()).into());
        }
        let layout = RecordLayout::for_table(table);
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len() as usize;
        let record_count = (len / layout.record_size()) as u32;
        debug!(
            "open heap {:?}, record_size={}, record_count={}",
            path,
            layout.record_size(),
            record_count
        );

        let reader = BufReader::new(file.try_clone()?);
        let writer = BufWriter::new(file);
        Ok(Self {
            path: path.to_path_buf(),
            columns: table.tab_columns.iter().map(|c| c.col_name.clone()).collect(),
            layout,
            reader,
            writer,
            record_count,
            dirty: false,
        })
    }

    pub fn record_size(&self) -> usize {
        self.layout.record_size()
    }

    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    /// Append a tuple with the liveness flag set; returns its ordinal.
    pub fn insert(&mut self, tuple: &[Value]) -> Result<u32> {
        let image = self.layout.pack(tuple, true)?;
        self.writer.seek(SeekFrom::End(0))?;
        self.writer.write_all(&image)?;
        self.dirty = true;

        let position = self.record_count;
        self.record_count += 1;
        Ok(position)
    }

    /// Read the record at `position`; `None` past end-of-file.
    pub fn read(&mut self, position: u32) -> Result<Option<(Vec<Value>, bool)>> {
        if position >= self.record_count {
            return Ok(None);
        }
        if self.dirty {
            self.writer.flush()?;
            self.dirty = false;
        }
        let size = self.layout.record_size();
        self.reader
            .seek(SeekFrom::Start(position as u64 * size as u64))?;
        let mut buf = vec![0u8; size];
        self.reader.read_exact(&mut buf)?;
        Ok(Some(self.layout.unpack(&buf)?))
    }

    /// Column name -> value mapping for a live record; `None` if the
    /// position is out of range or tombstoned.
    pub fn read_as_map(&mut self, position: u32) -> Result<Option<BTreeMap<String, Value>>> {
        match self.read(position)? {
            Some((tuple, true)) => {
                let map = self.columns.iter().cloned().zip(tuple).collect();
                Ok(Some(map))
            }
            _ => Ok(None),
        }
    }

    /// Materialize the live tuples behind a position list, in list order.
    pub fn scan(&mut self, positions: &[u32]) -> Result<Vec<Vec<Value>>> {
        let mut rows = Vec::with_capacity(positions.len());
        for &pos in positions {
            if let Some((tuple, true)) = self.read(pos)? {
                rows.push(tuple);
            }
        }
        Ok(rows)
    }

    /// Rewrite the record in place with the liveness flag cleared. Returns
    /// false when the slot was already dead or out of range.
    pub fn delete(&mut self, position: u32) -> Result<bool> {
        let (tuple, active) = match self.read(position)? {
            Some(rec) => rec,
            None => return Ok(false),
        };
        if !active {
            return Ok(false);
        }
        let image = self.layout.pack(&tuple, false)?;
        let size = self.layout.record_size();
        self.writer
            .seek(SeekFrom::Start(position as u64 * size as u64))?;
        self.writer.write_all(&image)?;
        self.dirty = true;
        Ok(true)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.dirty = false;
        Ok(())
    }
}

impl Drop for HeapFile {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!("flush heap {:?} failed on close: {}", self.path, e);
        }
    }
}

#[cfg(test)]
mod heap_tests {

    use std::env::set_var;
    use std::fs::File;

    use tempfile::TempDir;

    use super::*;
    use crate::catalog::def::{Column, Table};
    use crate::disk::codec::DataTypeTag;
    use crate::util;

    fn setup() {
        set_var("RUST_LOG", "info");
        util::init();
    }

    fn fixture(dir: &TempDir) -> (Table, std::path::PathBuf) {
        let table = Table::new(
            1,
            "t",
            1,
            vec![
                Column::new("id", DataTypeTag::Int, 4, false, false),
                Column::new("name", DataTypeTag::Varchar, 20, false, false),
            ],
        );
        let path = dir.path().join("data.dat");
        File::create(&path).unwrap();
        (table, path)
    }

    #[test]
    fn insert_then_read_roundtrip() {
        setup();
        let dir = TempDir::new().unwrap();
        let (table, path) = fixture(&dir);
        let mut heap = HeapFile::open(&table, &path).unwrap();

        let p0 = heap.insert(&[Value::Int(1), Value::Varchar("Ana".into())]).unwrap();
        let p1 = heap.insert(&[Value::Int(2), Value::Varchar("Bob".into())]).unwrap();
        assert_eq!((p0, p1), (0, 1));

        let (tuple, active) = heap.read(0).unwrap().unwrap();
        assert!(active);
        assert_eq!(tuple, vec![Value::Int(1), Value::Varchar("Ana".into())]);

        let (tuple, active) = heap.read(1).unwrap().unwrap();
        assert!(active);
        assert_eq!(tuple[0], Value::Int(2));
    }

    #[test]
    fn read_past_end_is_none() {
        setup();
        let dir = TempDir::new().unwrap();
        let (table, path) = fixture(&dir);
        let mut heap = HeapFile::open(&table, &path).unwrap();
        assert!(heap.read(0).unwrap().is_none());
    }

    #[test]
    fn delete_tombstones_in_place() {
        setup();
        let dir = TempDir::new().unwrap();
        let (table, path) = fixture(&dir);
        let mut heap = HeapFile::open(&table, &path).unwrap();

        heap.insert(&[Value::Int(1), Value::Varchar("Ana".into())]).unwrap();
        heap.insert(&[Value::Int(2), Value::Varchar("Bob".into())]).unwrap();

        assert!(heap.delete(0).unwrap());
        let (_, active) = heap.read(0).unwrap().unwrap();
        assert!(!active);
        let (_, active) = heap.read(1).unwrap().unwrap();
        assert!(active);

        // positions are stable, nothing was compacted
        assert_eq!(heap.record_count(), 2);
        assert!(!heap.delete(0).unwrap());
    }

    #[test]
    fn read_as_map_skips_tombstones() {
        setup();
        let dir = TempDir::new().unwrap();
        let (table, path) = fixture(&dir);
        let mut heap = HeapFile::open(&table, &path).unwrap();

        heap.insert(&[Value::Int(1), Value::Varchar("Ana".into())]).unwrap();
        let map = heap.read_as_map(0).unwrap().unwrap();
        assert_eq!(map["id"], Value::Int(1));
        assert_eq!(map["name"], Value::Varchar("Ana".into()));

        heap.delete(0).unwrap();
        assert!(heap.read_as_map(0).unwrap().is_none());
    }

    #[test]
    fn records_survive_reopen() {
        setup();
        let dir = TempDir::new().unwrap();
        let (table, path) = fixture(&dir);
        {
            let mut heap = HeapFile::open(&table, &path).unwrap();
            heap.insert(&[Value::Int(9), Value::Varchar("Zoe".into())]).unwrap();
        }
        let mut heap = HeapFile::open(&table, &path).unwrap();
        assert_eq!(heap.record_count(), 1);
        let (tuple, active) = heap.read(0).unwrap().unwrap();
        assert!(active);
        assert_eq!(tuple[1], Value::Varchar("Zoe".into()));
    }

    #[test]
    fn scan_materializes_live_positions() {
        setup();
        let dir = TempDir::new().unwrap();
        let (table, path) = fixture(&dir);
        let mut heap = HeapFile::open(&table, &path).unwrap();
        for i in 1..=4 {
            heap.insert(&[Value::Int(i), Value::Varchar(format!("n{}", i))]).unwrap();
        }
        heap.delete(2).unwrap();
        let rows = heap.scan(&[0, 2, 3]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], Value::Int(1));
        assert_eq!(rows[1][0], Value::Int(4));
    }
}
