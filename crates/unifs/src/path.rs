//! Hierarchical paths over a virtual filesystem.
//!
//! A path is a value: an owning filesystem plus a normalized string whose
//! separator is a single `/`. Construction collapses separator runs and
//! rejects NUL; the per-segment offset table is computed lazily on first
//! use. Two paths are equal iff they belong to the same filesystem
//! instance and their normalized strings match.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use crate::fs::FileSystem;
use crate::{Error, Result};

/// The path separator used by every virtual filesystem.
pub const SEPARATOR: char = '/';

/// A hierarchical path bound to a [`FileSystem`].
#[derive(Clone)]
pub struct FsPath {
    fs: FileSystem,
    path: String,
    offsets: OnceLock<Box<[usize]>>,
}

impl FsPath {
    /// Builds a path from a raw string, normalizing separators.
    pub(crate) fn new(fs: FileSystem, raw: &str) -> Result<Self> {
        Ok(FsPath::normalized(fs, normalize_string(raw)?))
    }

    /// Wraps a string that is already in normalized form.
    fn normalized(fs: FileSystem, path: String) -> Self {
        debug_assert_eq!(path, normalize_string(&path).unwrap());
        FsPath {
            fs,
            path,
            offsets: OnceLock::new(),
        }
    }

    /// The filesystem this path belongs to.
    pub fn file_system(&self) -> &FileSystem {
        &self.fs
    }

    /// The normalized string form.
    pub fn as_str(&self) -> &str {
        &self.path
    }

    pub(crate) fn same_file_system(&self, other: &FsPath) -> bool {
        self.fs.same_instance(&other.fs)
    }

    /// Whether the path starts at the filesystem root.
    pub fn is_absolute(&self) -> bool {
        self.path.starts_with(SEPARATOR)
    }

    /// The root path, if this path is absolute.
    pub fn root(&self) -> Option<FsPath> {
        self.is_absolute()
            .then(|| FsPath::normalized(self.fs.clone(), SEPARATOR.to_string()))
    }

    /// The number of name segments. The root path has none.
    pub fn name_count(&self) -> usize {
        self.offsets().len()
    }

    /// The last segment as a relative path, or `None` for the root and the
    /// empty path.
    pub fn file_name(&self) -> Option<FsPath> {
        let count = self.name_count();
        if count == 0 {
            return None;
        }
        Some(self.segment_path(count - 1))
    }

    /// Everything before the last segment: `None` when there is nothing
    /// left, the root for a single-segment absolute path.
    pub fn parent(&self) -> Option<FsPath> {
        let count = self.name_count();
        match count {
            0 => None,
            1 => self.root(),
            _ => {
                let end = self.offsets()[count - 1] - 1;
                let parent = if end == 0 && self.is_absolute() {
                    SEPARATOR.to_string()
                } else {
                    self.path[..end].to_string()
                };
                Some(FsPath::normalized(self.fs.clone(), parent))
            }
        }
    }

    /// The `index`-th name segment as a relative path.
    pub fn name(&self, index: usize) -> Result<FsPath> {
        if index >= self.name_count() {
            return Err(Error::invalid_argument(format!(
                "name index {index} out of bounds for {}",
                self.path
            )));
        }
        Ok(self.segment_path(index))
    }

    /// The relative path made of segments `begin..end`.
    pub fn subpath(&self, begin: usize, end: usize) -> Result<FsPath> {
        let count = self.name_count();
        if begin >= end || end > count {
            return Err(Error::invalid_argument(format!(
                "subpath range {begin}..{end} out of bounds for {}",
                self.path
            )));
        }
        let start = self.offsets()[begin];
        let stop = self.segment_end(end - 1);
        Ok(FsPath::normalized(
            self.fs.clone(),
            self.path[start..stop].to_string(),
        ))
    }

    /// Segment-aligned prefix test within one filesystem.
    pub fn starts_with(&self, other: &FsPath) -> bool {
        if !self.same_file_system(other) || self.is_absolute() != other.is_absolute() {
            return false;
        }
        if other.name_count() == 0 {
            // Zero segments: the root prefixes every absolute path, the
            // empty path only itself.
            return other.is_absolute() || self.path.is_empty();
        }
        if other.name_count() > self.name_count() {
            return false;
        }
        (0..other.name_count()).all(|i| self.segment(i) == other.segment(i))
    }

    /// Segment-aligned suffix test within one filesystem. An absolute
    /// `other` only matches the whole path.
    pub fn ends_with(&self, other: &FsPath) -> bool {
        if !self.same_file_system(other) {
            return false;
        }
        if other.is_absolute() {
            return self.path == other.path;
        }
        let count = self.name_count();
        let other_count = other.name_count();
        if other_count == 0 {
            return self.path.is_empty();
        }
        if other_count > count {
            return false;
        }
        (0..other_count).all(|i| self.segment(count - other_count + i) == other.segment(i))
    }

    /// Removes `.` segments and resolves `..` against preceding segments.
    /// Leading `..` survives on relative paths and is dropped on absolute
    /// ones.
    pub fn normalize(&self) -> FsPath {
        let absolute = self.is_absolute();
        let mut segments: Vec<&str> = Vec::with_capacity(self.name_count());
        for i in 0..self.name_count() {
            match self.segment(i) {
                "." => {}
                ".." => match segments.last() {
                    Some(&last) if last != ".." => {
                        segments.pop();
                    }
                    _ if absolute => {}
                    _ => segments.push(".."),
                },
                segment => segments.push(segment),
            }
        }
        let mut normalized = String::with_capacity(self.path.len());
        if absolute {
            normalized.push(SEPARATOR);
        }
        normalized.push_str(&segments.join("/"));
        FsPath::normalized(self.fs.clone(), normalized)
    }

    /// Resolves `other` against this path: an absolute `other` wins, an
    /// empty receiver yields `other`, anything else concatenates.
    pub fn resolve(&self, other: &FsPath) -> FsPath {
        if other.is_absolute() || self.path.is_empty() {
            return other.clone();
        }
        if other.path.is_empty() {
            return self.clone();
        }
        let mut joined = self.path.clone();
        if !joined.ends_with(SEPARATOR) {
            joined.push(SEPARATOR);
        }
        joined.push_str(&other.path);
        FsPath::normalized(self.fs.clone(), joined)
    }

    /// Resolves a raw string against this path.
    pub fn resolve_str(&self, other: &str) -> Result<FsPath> {
        Ok(self.resolve(&FsPath::new(self.fs.clone(), other)?))
    }

    /// The relative path from this path to `other`. Both must be absolute
    /// or both relative.
    pub fn relativize(&self, other: &FsPath) -> Result<FsPath> {
        if !self.same_file_system(other) {
            return Err(Error::ProviderMismatch);
        }
        if self.is_absolute() != other.is_absolute() {
            return Err(Error::invalid_argument(
                "cannot relativize an absolute and a relative path",
            ));
        }
        if self.path == other.path {
            return Ok(FsPath::normalized(self.fs.clone(), String::new()));
        }
        let count = self.name_count();
        let other_count = other.name_count();
        let common = (0..count.min(other_count))
            .take_while(|&i| self.segment(i) == other.segment(i))
            .count();
        let mut segments: Vec<&str> = Vec::with_capacity(count - common + other_count - common);
        for _ in common..count {
            segments.push("..");
        }
        for i in common..other_count {
            segments.push(other.segment(i));
        }
        Ok(FsPath::normalized(self.fs.clone(), segments.join("/")))
    }

    /// Iterates over the name segments, each as a relative path.
    pub fn iter(&self) -> impl Iterator<Item = FsPath> + '_ {
        (0..self.name_count()).map(|i| self.segment_path(i))
    }

    /// This path joined against the filesystem's default directory.
    pub fn to_absolute_path(&self) -> FsPath {
        self.fs.absolute_path(self)
    }

    /// The canonical absolute path: normalized, verified to exist, with
    /// symbolic links resolved when `follow_links` is set and the backend
    /// supports them.
    pub fn to_real_path(&self, follow_links: bool) -> Result<FsPath> {
        self.fs.real_path(self, follow_links)
    }

    /// Virtual paths have no local filesystem counterpart.
    pub fn to_local_path(&self) -> Result<std::path::PathBuf> {
        Err(Error::unsupported("convert a virtual path to a local path"))
    }

    fn offsets(&self) -> &[usize] {
        self.offsets.get_or_init(|| {
            let bytes = self.path.as_bytes();
            let mut offsets = Vec::new();
            for i in 0..bytes.len() {
                if bytes[i] != SEPARATOR as u8 && (i == 0 || bytes[i - 1] == SEPARATOR as u8) {
                    offsets.push(i);
                }
            }
            offsets.into_boxed_slice()
        })
    }

    fn segment(&self, index: usize) -> &str {
        let start = self.offsets()[index];
        &self.path[start..self.segment_end(index)]
    }

    fn segment_end(&self, index: usize) -> usize {
        self.path[self.offsets()[index]..]
            .find(SEPARATOR)
            .map(|i| self.offsets()[index] + i)
            .unwrap_or(self.path.len())
    }

    fn segment_path(&self, index: usize) -> FsPath {
        FsPath::normalized(self.fs.clone(), self.segment(index).to_string())
    }
}

pub(crate) fn normalize_string(raw: &str) -> Result<String> {
    if raw.contains('\0') {
        return Err(Error::invalid_argument("path contains a NUL character"));
    }
    let mut normalized = String::with_capacity(raw.len());
    let mut last_was_separator = false;
    for c in raw.chars() {
        if c == SEPARATOR {
            if !last_was_separator {
                normalized.push(c);
            }
            last_was_separator = true;
        } else {
            normalized.push(c);
            last_was_separator = false;
        }
    }
    if normalized.len() > 1 && normalized.ends_with(SEPARATOR) {
        normalized.pop();
    }
    Ok(normalized)
}

impl PartialEq for FsPath {
    fn eq(&self, other: &Self) -> bool {
        self.same_file_system(other) && self.path == other.path
    }
}

impl Eq for FsPath {}

impl Hash for FsPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fs.instance_id().hash(state);
        self.path.hash(state);
    }
}

impl PartialOrd for FsPath {
    /// Lexicographic on the normalized string; paths of different
    /// filesystems are unordered.
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.same_file_system(other)
            .then(|| self.path.cmp(&other.path))
    }
}

impl fmt::Display for FsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl fmt::Debug for FsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FsPath({:?})", self.path)
    }
}
