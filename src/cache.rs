//! Per-task fingerprint cache used for incremental skips.
//!
//! Entries are keyed by normalised source path. The map lives in memory for
//! the whole process and is mirrored to `.cache/gantry/<task>.cbor`, so that
//! separate invocations of the CLI skip unchanged inputs as well.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

use crate::core::Hash32;

#[derive(Debug, Default)]
pub(crate) struct Fingerprints {
    file: Option<Utf8PathBuf>,
    entries: HashMap<Utf8PathBuf, Hash32>,
}

impl Fingerprints {
    /// An in-memory cache that is never persisted.
    pub(crate) fn memory() -> Self {
        Self::default()
    }

    /// Loads the snapshot for `task` from `dir`, starting empty when there is
    /// none or it can't be decoded.
    pub(crate) fn persistent(dir: &Utf8Path, task: &str) -> Self {
        let file = dir.join(format!("{}.cbor", task.replace(':', "-")));

        let entries = File::open(&file)
            .ok()
            .and_then(|f| ciborium::from_reader(BufReader::new(f)).ok())
            .unwrap_or_default();

        Self {
            file: Some(file),
            entries,
        }
    }

    pub(crate) fn is_fresh(&self, path: &Utf8Path, hash: Hash32) -> bool {
        self.entries.get(&normalize_path(path)) == Some(&hash)
    }

    pub(crate) fn record(&mut self, path: &Utf8Path, hash: Hash32) {
        self.entries.insert(normalize_path(path), hash);
    }

    pub(crate) fn forget(&mut self, path: &Utf8Path) {
        self.entries.remove(&normalize_path(path));
    }

    /// Writes the snapshot, if this cache is persistent.
    pub(crate) fn save(&self) -> std::io::Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };

        if let Some(dir) = file.parent() {
            fs::create_dir_all(dir)?;
        }

        let writer = BufWriter::new(File::create(file)?);
        ciborium::into_writer(&self.entries, writer).map_err(std::io::Error::other)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Normalize a path, removing things like `.` and `..`.
///
/// CAUTION: This does not resolve symlinks (unlike [`std::fs::canonicalize`]).
pub(crate) fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut components = path.components().peekable();
    let mut ret = if let Some(c @ Utf8Component::Prefix(..)) = components.peek().cloned() {
        components.next();
        Utf8PathBuf::from(c.as_str())
    } else {
        Utf8PathBuf::new()
    };

    for component in components {
        match component {
            Utf8Component::Prefix(..) => unreachable!(),
            Utf8Component::RootDir => {
                ret.push(Utf8Component::RootDir);
            }
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if ret.ends_with(Utf8Component::ParentDir) {
                    ret.push(Utf8Component::ParentDir);
                } else {
                    let popped = ret.pop();
                    if !popped && !ret.has_root() {
                        ret.push(Utf8Component::ParentDir);
                    }
                }
            }
            Utf8Component::Normal(c) => {
                ret.push(c);
            }
        }
    }
    ret
}
