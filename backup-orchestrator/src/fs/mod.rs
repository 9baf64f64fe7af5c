//! File system helpers: tree walking and metadata preservation.

pub mod metadata;
pub mod walker;
