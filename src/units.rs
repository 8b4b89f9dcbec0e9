//! Collection unit test support.
//!
//! Unit tests inside a distronode collection import the collection by its
//! fully qualified name, which only resolves when the collection sits under
//! `<root>/distronode_collections/<namespace>/<name>` and `<root>` is on the
//! engine's collections path. [`inject`] arranges that for a checkout
//! wherever it lives.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Error, ErrorContext, Result};

/// Environment variable holding the engine's collections search path.
pub const COLLECTIONS_PATH_ENV: &str = "DISTRONODE_COLLECTIONS_PATH";

/// Directory name the engine expects above namespace directories.
pub const COLLECTIONS_DIR: &str = "distronode_collections";

const GALAXY_FILE: &str = "galaxy.yml";

#[derive(Debug, Deserialize)]
struct GalaxyMeta {
    namespace: String,
    name: String,
}

/// Where a collection was made importable from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRoot {
    /// Directory to add to the collections path
    pub path: PathBuf,
    /// `namespace.name`
    pub fqcn: String,
}

/// Find `galaxy.yml` in `start` or any parent directory.
pub fn find_galaxy(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(GALAXY_FILE))
        .find(|candidate| candidate.is_file())
}

/// Make the collection containing `start` importable.
///
/// When the checkout already sits at `.../distronode_collections/NS/NAME`
/// the directory above `distronode_collections` is used as is. Otherwise a
/// symlink `START/collections/distronode_collections/NS/NAME` pointing at
/// the checkout is created and `START/collections` is used.
pub fn inject(start: &Path) -> Result<Option<CollectionRoot>> {
    let Some(galaxy) = find_galaxy(start) else {
        debug!(start = %start.display(), "No galaxy.yml found, skipping collection injection");
        return Ok(None);
    };
    let collection_dir = galaxy.parent().unwrap_or(start).to_path_buf();

    let content = std::fs::read_to_string(&galaxy)?;
    let meta: GalaxyMeta = serde_yaml::from_str(&content).map_err(|e| Error::Descriptor {
        path: galaxy.clone(),
        message: e.to_string(),
    })?;
    let fqcn = format!("{}.{}", meta.namespace, meta.name);

    if let Some(root) = installed_root(&collection_dir, &meta) {
        info!(%fqcn, path = %root.display(), "Collection already in a collections tree");
        return Ok(Some(CollectionRoot { path: root, fqcn }));
    }

    let root = start.join("collections");
    let namespace_dir = root.join(COLLECTIONS_DIR).join(&meta.namespace);
    let link = namespace_dir.join(&meta.name);
    std::fs::create_dir_all(&namespace_dir)?;

    if link.symlink_metadata().is_err() {
        create_symlink(&collection_dir, &link).with_context(|| {
            format!("Unable to link {} to {}", collection_dir.display(), link.display())
        })?;
        info!(%fqcn, link = %link.display(), "Linked collection into collections tree");
    }

    Ok(Some(CollectionRoot { path: root, fqcn }))
}

/// Plural spelling some engine releases read instead.
pub const COLLECTIONS_PATHS_ENV: &str = "DISTRONODE_COLLECTIONS_PATHS";

/// Existing collections path entries that hold a `distronode_collections`
/// directory, for `--distronode-unit-inject-only`.
pub fn inject_only() -> Vec<PathBuf> {
    let raw = [COLLECTIONS_PATH_ENV, COLLECTIONS_PATHS_ENV]
        .iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
    let Some(raw) = raw else {
        warn!("{} is not set, nothing to inject", COLLECTIONS_PATH_ENV);
        return Vec::new();
    };

    std::env::split_paths(&raw)
        .filter(|path| {
            let usable = path.join(COLLECTIONS_DIR).is_dir();
            if !usable {
                debug!(path = %path.display(), "Skipping collections path entry without {}", COLLECTIONS_DIR);
            }
            usable
        })
        .collect()
}

/// Collections path with `roots` placed before any existing entries.
pub fn collections_path_value(roots: &[PathBuf]) -> Option<String> {
    let mut paths: Vec<PathBuf> = roots.to_vec();
    if let Ok(existing) = std::env::var(COLLECTIONS_PATH_ENV) {
        for path in std::env::split_paths(&existing) {
            if !path.as_os_str().is_empty() && !paths.contains(&path) {
                paths.push(path);
            }
        }
    }
    if paths.is_empty() {
        return None;
    }
    std::env::join_paths(paths)
        .ok()
        .map(|joined| joined.to_string_lossy().into_owned())
}

fn installed_root(collection_dir: &Path, meta: &GalaxyMeta) -> Option<PathBuf> {
    let name = collection_dir.file_name()?;
    let namespace_dir = collection_dir.parent()?;
    let collections_dir = namespace_dir.parent()?;

    if name == meta.name.as_str()
        && namespace_dir.file_name()? == meta.namespace.as_str()
        && collections_dir.file_name()? == COLLECTIONS_DIR
    {
        collections_dir.parent().map(Path::to_path_buf)
    } else {
        None
    }
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}
