use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Filesystem the preprocessor reads shader sources through.
///
/// The default implementation, [`FileSystemIncludeProvider`], goes to disk.
/// [`MemoryIncludeProvider`] serves a virtual filesystem, which is handy for
/// embedded shader libraries and for tests.
pub trait IncludeProvider {
    /// Turn `path` into the absolute form used for existence checks, reads and cache keys.
    fn absolute(&self, path: &Path) -> PathBuf {
        std::path::absolute(path)
            .map(|p| normalize_path(&p))
            .unwrap_or_else(|_| normalize_path(path))
    }

    fn exists(&self, path: &Path) -> bool;

    fn read_entire_file(&mut self, path: &Path) -> io::Result<String>;
}

/// Reads from the real filesystem, resolving relative paths against the working directory.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileSystemIncludeProvider;

impl IncludeProvider for FileSystemIncludeProvider {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read_entire_file(&mut self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// In-memory virtual filesystem. Paths are compared after lexical normalization
/// and are never made absolute, so `shaders/a.wgsl` stays `shaders/a.wgsl`.
#[derive(Clone, Debug, Default)]
pub struct MemoryIncludeProvider {
    files: HashMap<PathBuf, String>,
    reads: usize,
}

impl MemoryIncludeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, source: impl Into<String>) -> &mut Self {
        self.files
            .insert(normalize_path(path.as_ref()), source.into());
        self
    }

    pub fn with_file(mut self, path: impl AsRef<Path>, source: impl Into<String>) -> Self {
        self.insert(path, source);
        self
    }

    pub fn remove(&mut self, path: impl AsRef<Path>) -> Option<String> {
        self.files.remove(&normalize_path(path.as_ref()))
    }

    /// Number of `read_entire_file` calls made so far, successful or not
    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl IncludeProvider for MemoryIncludeProvider {
    fn absolute(&self, path: &Path) -> PathBuf {
        normalize_path(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(&normalize_path(path))
    }

    fn read_entire_file(&mut self, path: &Path) -> io::Result<String> {
        self.reads += 1;
        self.files.get(&normalize_path(path)).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file: {}", path.display()),
            )
        })
    }
}

/// Lexically drop `.` components and fold `..` into the preceding component.
/// Does not touch the filesystem, so symlinks are not resolved.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }

    out
}
