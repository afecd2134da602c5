//! A small relational storage engine: a catalog of databases, schemas and
//! tables over fixed-length heap files, with a pluggable family of
//! disk-backed secondary indexes (extendible hash, B+ tree, ISAM, AVL and
//! an R-tree for spatial predicates). SQL statements are parsed with
//! `sqlparser` and dispatched to operators that keep the heap and every
//! attached index consistent per row.

pub mod app;
pub mod catalog;
pub mod disk;
pub mod error;
pub mod exec;
pub mod index;
pub mod sql;
pub mod util;
