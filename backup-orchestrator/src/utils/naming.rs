//! Filesystem-safe names for snapshot destinations.
//!
//! Source paths are mapped component by component into the snapshot tree.
//! Each component is encoded so that it can never escape its parent or
//! collide with shell/reserved characters.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

const RESERVED: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Encode a single path component.
///
/// Whitespace, control and reserved characters become `_`. The special
/// components `.` and `..` (and the empty string) become `_` as well.
pub fn sanitize_component(name: &str) -> String {
    let encoded: String = name
        .chars()
        .map(|c| {
            if c.is_whitespace() || c.is_control() || RESERVED.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    match encoded.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => encoded,
    }
}

/// Lexically normalize a path: drop `.` components and resolve `..`
/// against the preceding component. Symlinks are not resolved.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Relative destination for a mirrored source directory.
///
/// `/data/my projects` becomes `data/my_projects`.
pub fn mirror_relative_path(source: &Path) -> PathBuf {
    normalize(source)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(sanitize_component(&part.to_string_lossy())),
            _ => None,
        })
        .collect()
}

/// Base name (without the `.git` suffix) used for a repository mirror.
pub fn repository_base_name(source: &Path) -> String {
    let normalized = normalize(source);
    let raw = normalized
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = raw.strip_suffix(".git").unwrap_or(&raw);
    sanitize_component(stem)
}

/// Hands out unique mirror names, suffixing `_2`, `_3`, ... on collision.
#[derive(Debug, Default)]
pub struct NameAllocator {
    taken: HashSet<String>,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, base: &str) -> String {
        if self.taken.insert(base.to_string()) {
            return base.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}_{}", base, n);
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}
