//! Mapping from request paths to the disc images being shared

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Extensions (lower-case) that are eligible for sharing
pub const SERVED_EXTENSIONS: [&str; 2] = [".iso", ".cso"];

/// A single shared file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedFile {
    /// Request path, e.g. `/Foo%20Bar.iso`
    pub url_path: String,
    /// Location on disk
    pub path: PathBuf,
}

impl ServedFile {
    /// Build the entry for `path`, or `None` if its extension is not shared
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        let full = path.to_string_lossy();
        let name = basename(&full);

        let lower = name.to_lowercase();
        if !SERVED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
            return None;
        }

        Some(Self {
            url_path: format!("/{}", name.replace(' ', "%20")),
            path: path.to_path_buf(),
        })
    }
}

/// Text after the last path separator
fn basename(path: &str) -> &str {
    let separators: &[char] = if cfg!(windows) { &['\\', '/'] } else { &['/'] };
    match path.rfind(separators) {
        Some(pos) => &path[pos + 1..],
        None => path,
    }
}

/// The set of files served during one server run
///
/// Cheap to clone; the mapping is shared and never changes after construction.
#[derive(Debug, Clone, Default)]
pub struct ServedFiles {
    files: Arc<HashMap<String, PathBuf>>,
}

impl ServedFiles {
    /// Build the mapping from candidate paths
    ///
    /// Paths whose extension is not shared are dropped. When two paths end in
    /// the same file name, the later one wins.
    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut files = HashMap::new();
        for candidate in paths {
            match ServedFile::from_path(candidate.as_ref()) {
                Some(file) => {
                    if let Some(previous) = files.insert(file.url_path.clone(), file.path) {
                        tracing::debug!(
                            "{} replaces {} for {}",
                            candidate.as_ref().display(),
                            previous.display(),
                            file.url_path
                        );
                    }
                }
                None => {
                    tracing::debug!("Not sharing {}", candidate.as_ref().display());
                }
            }
        }

        Self {
            files: Arc::new(files),
        }
    }

    /// Look up the file behind a request path
    pub fn get(&self, url_path: &str) -> Option<&Path> {
        self.files.get(url_path).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Request paths in sorted order
    pub fn url_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.files.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }
}
