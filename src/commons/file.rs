//! Helpers for reading files and walking directory trees.

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use log::{debug, trace, warn};

use crate::commons::error::IoError;


//------------ CrawlOptions --------------------------------------------------

/// Controls which files a crawl hands to its visitor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CrawlOptions {
    /// Descend into sub-directories.
    pub recursive: bool,

    /// Visit files and directories whose name starts with a dot.
    pub include_hidden: bool,

    /// Files larger than this are skipped.
    pub max_file_size: u64,
}


//------------ Crawling ------------------------------------------------------

/// Recurses a path on disk and hands every file found to `visit`.
///
/// If `root` is a file, only that file is visited. Entries of a directory
/// are visited in name order. Symbolic links to directories are not
/// followed. Only regular files, or links to them, are ever visited:
/// named pipes, sockets and device nodes are skipped since opening them
/// may block forever. Problems with individual entries below the root are logged
/// and skipped; only a root that cannot be accessed at all is an error.
///
/// The visitor returns `false` to stop the crawl early, in which case
/// this function returns `Ok(false)`.
pub fn crawl(
    root: &Path,
    options: CrawlOptions,
    visit: &mut dyn FnMut(&Path) -> bool,
) -> Result<bool, IoError> {
    let meta = fs::metadata(root).map_err(|e| {
        IoError::new(
            format!("could not access: {}", root.to_string_lossy()),
            e,
        )
    })?;

    if meta.is_dir() {
        crawl_dir(root, options, visit)
    } else if !meta.is_file() {
        debug!("Skipping {}: not a regular file", root.display());
        Ok(true)
    } else if meta.len() > options.max_file_size {
        debug!(
            "Skipping {}: larger than {} bytes",
            root.display(),
            options.max_file_size
        );
        Ok(true)
    } else {
        Ok(visit(root))
    }
}

fn crawl_dir(
    dir: &Path,
    options: CrawlOptions,
    visit: &mut dyn FnMut(&Path) -> bool,
) -> Result<bool, IoError> {
    let mut entries = fs::read_dir(dir)
        .map_err(|e| {
            IoError::new(
                format!("could not read dir: {}", dir.to_string_lossy()),
                e,
            )
        })?
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping entry in {}: {}", dir.display(), e);
                None
            }
        })
        .collect::<Vec<_>>();
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        if !options.include_hidden && is_hidden(&path) {
            trace!("Skipping hidden entry {}", path.display());
            continue;
        }

        // file_type() does not traverse symlinks, so linked directories
        // show up as symlinks and are never descended into.
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };

        if file_type.is_dir() {
            if options.recursive {
                match crawl_dir(&path, options, visit) {
                    Ok(true) => {}
                    Ok(false) => return Ok(false),
                    Err(e) => warn!("Skipping directory: {e}"),
                }
            }
            continue;
        }

        // Follows a link to see what it points to.
        match fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => {
                trace!("Not following linked directory {}", path.display());
            }
            Ok(meta) if !meta.is_file() => {
                debug!("Skipping {}: not a regular file", path.display());
            }
            Ok(meta) if meta.len() > options.max_file_size => {
                debug!(
                    "Skipping {}: larger than {} bytes",
                    path.display(),
                    options.max_file_size
                );
            }
            Ok(_) => {
                if !visit(&path) {
                    return Ok(false);
                }
            }
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }

    Ok(true)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}


//------------ Reading -------------------------------------------------------

/// Reads a file to a vec.
pub fn read(path: &Path) -> Result<Vec<u8>, IoError> {
    let mut f = File::open(path).map_err(|e| {
        IoError::new(
            format!("could not open file: {}", path.to_string_lossy()),
            e,
        )
    })?;
    let mut bytes = Vec::new();
    f.read_to_end(&mut bytes).map_err(|e| {
        IoError::new(
            format!("could not read file: {}", path.to_string_lossy()),
            e,
        )
    })?;
    Ok(bytes)
}


//------------ Tests ---------------------------------------------------------
