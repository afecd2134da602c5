use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{debug, warn};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};

/// `(xmin, ymin, xmax, ymax)`.
pub type Rect = (f64, f64, f64, f64);

type SpatialEntry = GeomWithData<Rectangle<[f64; 2]>, u32>;

/// Two-dimensional spatial index. The tree itself is the external
/// library's; this wrapper only owns persistence, one bincode blob per
/// backing file.
#[derive(Debug)]
pub struct SpatialFile {
    path: PathBuf,
    tree: RTree<SpatialEntry>,
    dirty: bool,
}

impl SpatialFile {
    pub fn open(path: &Path) -> Result<Self> {
        let tree = if path.exists() && fs::metadata(path)?.len() > 0 {
            bincode::deserialize(&fs::read(path)?)?
        } else {
            RTree::new()
        };
        debug!("open spatial index {:?}, {} entries", path, tree.size());
        Ok(Self {
            path: path.to_path_buf(),
            tree,
            dirty: false,
        })
    }

    fn entry(id: u32, rect: Rect) -> SpatialEntry {
        let (xmin, ymin, xmax, ymax) = rect;
        GeomWithData::new(Rectangle::from_corners([xmin, ymin], [xmax, ymax]), id)
    }

    pub fn insert(&mut self, id: u32, rect: Rect) {
        self.tree.insert(Self::entry(id, rect));
        self.dirty = true;
    }

    /// A point is a degenerate rectangle.
    pub fn insert_point(&mut self, id: u32, x: f64, y: f64) {
        self.insert(id, (x, y, x, y));
    }

    pub fn remove(&mut self, id: u32, rect: Rect) -> bool {
        let removed = self.tree.remove(&Self::entry(id, rect)).is_some();
        self.dirty |= removed;
        removed
    }

    pub fn remove_point(&mut self, id: u32, x: f64, y: f64) -> bool {
        self.remove(id, (x, y, x, y))
    }

    /// Ids of every entry intersecting the query rectangle.
    pub fn range_query(&self, rect: Rect) -> Vec<u32> {
        let (xmin, ymin, xmax, ymax) = rect;
        let envelope = AABB::from_corners([xmin, ymin], [xmax, ymax]);
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|e| e.data)
            .collect()
    }

    /// Ids of the `k` entries nearest to the query point.
    pub fn knn_query(&self, x: f64, y: f64, k: usize) -> Vec<u32> {
        self.tree
            .nearest_neighbor_iter(&[x, y])
            .take(k)
            .map(|e| e.data)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.dirty {
            fs::write(&self.path, bincode::serialize(&self.tree)?)?;
            self.dirty = false;
        }
        Ok(())
    }
}

impl Drop for SpatialFile {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("flush spatial index {:?} failed on close: {}", self.path, e);
        }
    }
}
