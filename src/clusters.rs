//! NetBeans cluster discovery
//!
//! Sibling editor extensions can contribute NetBeans module clusters by
//! shipping an `nbcode/<cluster>` directory. A directory only counts as a
//! cluster when it contains a `config/Modules` directory, which is how the
//! platform marks an enabled cluster. The discovered set is sorted so two
//! scans can be compared to decide whether the server must be restarted.

use std::path::{Path, PathBuf};
use tracing::trace;
use walkdir::WalkDir;

/// Subdirectory of an extension that holds contributed clusters
const CLUSTER_DIR: &str = "nbcode";

/// Scan extension installation directories for module clusters.
///
/// `own_path` is the bridge's own installation directory; it hosts the base
/// clusters that are always passed to the launcher separately, so it is
/// skipped here.
pub fn find_clusters(extension_roots: &[PathBuf], own_path: &Path) -> Vec<PathBuf> {
    let mut clusters = Vec::new();

    for root in extension_roots {
        if root == own_path {
            continue;
        }

        let dir = root.join(CLUSTER_DIR);
        if !dir.is_dir() {
            continue;
        }

        for entry in WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let cluster = entry.path();
            if cluster.join("config").join("Modules").is_dir() {
                trace!("Found cluster: {}", cluster.display());
                clusters.push(cluster.to_path_buf());
            }
        }
    }

    clusters.sort();
    clusters
}

/// Compare two sorted cluster sets
pub fn clusters_changed(previous: &[PathBuf], current: &[PathBuf]) -> bool {
    previous != current
}
