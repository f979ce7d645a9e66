//! Working-tree scan: enumerate the object files under the configured
//! subdirectory.

use std::path::PathBuf;

use walkdir::WalkDir;

use gitplane_core::{Error, Result};

pub(crate) struct Scanner {
    root: PathBuf,
}

impl Scanner {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Depth-first walk collecting `.yaml`/`.yml` files (case-insensitive),
    /// following symlinks. A missing root is an empty tree; any other walk
    /// error is surfaced.
    pub fn scan(&self) -> Result<Vec<PathBuf>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(true) {
            let entry = entry.map_err(|e| Error::Internal(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_lowercase();
            if name.ends_with(".yaml") || name.ends_with(".yml") {
                paths.push(entry.into_path());
            }
        }
        Ok(paths)
    }
}
