//! Directory snapshots and replaying snapshots onto a lineage tip.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use strata_tree::{LayeredTree, TreeResult};
#[cfg(test)]
use strata_tree::TreeError;
use strata_types::{ChangeKind, Depth, EqualityComparator, TreePath};

use crate::config::ScanConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Symlink,
}

/// Payload of a file or symlink node. Directories carry no payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub kind: EntryKind,
    pub size: u64,
    /// CRC32 of the contents, or of the link target for symlinks.
    pub crc32: u32,
}

/// Walk `dir` and build a frozen tree of its contents.
///
/// Entries whose names are not valid UTF-8 are skipped together with
/// everything below them.
pub fn scan_dir(dir: &Path, config: &ScanConfig) -> anyhow::Result<LayeredTree<FileEntry>> {
    let mut tree = LayeredTree::new();
    let mut walker = WalkDir::new(dir)
        .follow_links(config.follow_links)
        .sort_by_file_name()
        .min_depth(1)
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = entry.with_context(|| format!("walking {}", dir.display()))?;
        let Some(name) = entry.file_name().to_str() else {
            warn!(path = %entry.path().display(), "skipping entry with a non UTF-8 name");
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            continue;
        };
        if !config.include_hidden && name.starts_with('.') {
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            continue;
        }

        let relative = entry.path().strip_prefix(dir)?;
        let parent = tree_path(relative.parent().unwrap_or(Path::new("")))?;
        let data = if entry.file_type().is_dir() {
            None
        } else if entry.path_is_symlink() && !config.follow_links {
            let target = std::fs::read_link(entry.path())?;
            let target = target.to_string_lossy();
            Some(FileEntry {
                kind: EntryKind::Symlink,
                size: target.len() as u64,
                crc32: crc32fast::hash(target.as_bytes()),
            })
        } else {
            let bytes = std::fs::read(entry.path())
                .with_context(|| format!("reading {}", entry.path().display()))?;
            Some(FileEntry {
                kind: EntryKind::File,
                size: bytes.len() as u64,
                crc32: crc32fast::hash(&bytes),
            })
        };
        tree.create_child(&parent, name, data)?;
    }

    tree.freeze()?;
    debug!(dir = %dir.display(), nodes = count_nodes(&tree, &TreePath::root())?, "scanned directory");
    Ok(tree)
}

/// Tree path of a path relative to the snapshot root.
fn tree_path(relative: &Path) -> anyhow::Result<TreePath> {
    let segments = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned());
    Ok(TreePath::new(segments)?)
}

/// Nodes in the subtree at `path`, the node itself included.
pub fn count_nodes<T>(tree: &LayeredTree<T>, path: &TreePath) -> TreeResult<usize> {
    let mut count = 0;
    tree.visit(path, Depth::Unbounded, &mut |_, _| {
        count += 1;
        true
    })?;
    Ok(count)
}

enum Edit<T> {
    Add(TreePath),
    Remove(TreePath),
    Set(TreePath, Option<T>),
}

/// Make `tip` hold the same content as `target` with the fewest edits.
/// Returns the number of edits applied.
pub fn replay<T: Clone + PartialEq>(tip: &mut LayeredTree<T>, target: &LayeredTree<T>) -> TreeResult<usize> {
    let root = TreePath::root();
    let comparison = tip.compare_with(target, &EqualityComparator)?;

    let mut edits = Vec::new();
    comparison.visit(&root, Depth::Unbounded, &mut |path, node| {
        let Some(node) = node else {
            return true;
        };
        match node.kind() {
            ChangeKind::NoChange => true,
            ChangeKind::Changed => {
                edits.push(Edit::Set(path.clone(), node.new_data().cloned()));
                true
            }
            ChangeKind::Added => {
                edits.push(Edit::Add(path.clone()));
                false
            }
            ChangeKind::Removed => {
                edits.push(Edit::Remove(path.clone()));
                false
            }
        }
    })?;

    for edit in &edits {
        match edit {
            Edit::Set(path, data) => tip.set_data(path, data.clone())?,
            Edit::Add(path) => tip.create_subtree(path, &target.copy_complete_subtree(path)?)?,
            Edit::Remove(path) => {
                if let Some((parent, name)) = path.parent().zip(path.last_segment()) {
                    tip.delete_child(&parent, name)?;
                }
            }
        }
    }
    Ok(edits.len())
}
