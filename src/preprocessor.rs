use std::collections::HashMap;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;

use crate::defines::{platform_defines, AdapterInfoSource, DefineTable};
use crate::error::PrepperError;
use crate::expander::{Expander, IncludeResolver, ResolvedInclude};
use crate::include_provider::{FileSystemIncludeProvider, IncludeProvider};

/// Per-call processing options.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ProcessConfig {
    /// Drop comments from the output. Block comments keep their line breaks.
    pub remove_comments: bool,

    /// Collapse every whitespace run into one space and trim the result.
    pub remove_whitespace: bool,

    /// Rewrite `#pragma once` into an include guard derived from the file path.
    pub support_pragma_once: bool,

    /// Path of the source being processed. Quoted includes are looked up next to it first.
    pub path: Option<PathBuf>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            remove_comments: false,
            remove_whitespace: false,
            support_pragma_once: true,
            path: None,
        }
    }
}

/// Places an include path is looked up in, tried in the order of the slice in use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Strategy {
    /// Next to the file being processed
    ConfigRelative,
    /// The path itself, relative to the working directory
    Absolute,
    /// Each registered search path in turn
    SearchPaths,
}

const LOCAL_STRATEGIES: &[Strategy] = &[
    Strategy::ConfigRelative,
    Strategy::Absolute,
    Strategy::SearchPaths,
];

const SYSTEM_STRATEGIES: &[Strategy] = &[
    Strategy::SearchPaths,
    Strategy::ConfigRelative,
    Strategy::Absolute,
];

/// A cached file body. Bodies stored by `process_from_memory_and_cache` already
/// had `#pragma once` rewritten and must not be rewritten again; bodies read while
/// resolving includes are stored as read.
#[derive(Clone, Debug)]
struct CachedFile {
    source: String,
    pragma_once_applied: bool,
}

impl CachedFile {
    /// Text to hand to the expander for `path`.
    fn body(&self, path: &Path, config: &ProcessConfig) -> String {
        if config.support_pragma_once && !self.pragma_once_applied {
            process_pragma_once(&self.source, path)
        } else {
            self.source.clone()
        }
    }
}

/// Expands shader sources: resolves `#include`s, prepends the define table and
/// runs the C-style preprocessor over the result.
///
/// Processed files and every file read while resolving includes are kept in a
/// cache, so processing the same file again does not touch the provider.
/// The cache only grows; use [`ShaderPreprocessor::clear_cache`] to pick up edits.
#[derive(Clone, Debug, Default)]
pub struct ShaderPreprocessor<P = FileSystemIncludeProvider> {
    file_cache: HashMap<PathBuf, CachedFile>,
    search_paths: Vec<PathBuf>,
    defines: DefineTable,
    provider: P,
}

impl ShaderPreprocessor<FileSystemIncludeProvider> {
    pub fn with_file_system() -> Self {
        Self::new(FileSystemIncludeProvider)
    }
}

impl<P: IncludeProvider> ShaderPreprocessor<P> {
    pub fn new(provider: P) -> Self {
        Self {
            file_cache: HashMap::new(),
            search_paths: Vec::new(),
            defines: DefineTable::new(),
            provider,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    /// Add `#define name value` to every processed source. Exact duplicates are ignored.
    pub fn add_define(&mut self, name: &str, value: &str) -> &mut Self {
        self.defines.insert(name, value);
        self
    }

    /// Remove the first define of the macro `name`, if there is one.
    pub fn remove_define(&mut self, name: &str) -> &mut Self {
        if !self.defines.remove(name) {
            log::warn!("remove_define: `{}` is not defined", name);
        }
        self
    }

    pub fn contains_define(&self, name: &str) -> bool {
        self.defines.contains_name(name)
    }

    /// Define lines in the order they are prepended.
    pub fn defines(&self) -> impl Iterator<Item = &str> {
        self.defines.iter()
    }

    /// The block prepended to every source before expansion.
    pub fn defines_text(&self) -> String {
        self.defines.to_text()
    }

    /// Inject the adapter description and the enumeration constants shaders branch on.
    ///
    /// Calling this again with the same adapter changes nothing.
    pub fn initialize_platform_defines(&mut self, adapter: &impl AdapterInfoSource) -> &mut Self {
        let info = adapter.adapter_info();

        if self.contains_define("WGPU_VENDOR") {
            log::warn!("platform defines are already initialized; adding {:?}", info.device);
        }

        for (name, value) in platform_defines(&info) {
            self.defines.insert(name, &value);
        }
        self
    }

    /// Register a directory `<...>` includes are looked up in, and `"..."` includes
    /// fall back to. Returns `false` if it was already registered.
    pub fn add_search_path(&mut self, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        if self.search_paths.contains(&path) {
            return false;
        }

        log::debug!("search path added: {}", path.display());
        self.search_paths.push(path);
        true
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Unexpanded body cached for `path`, as registered or read.
    pub fn cached_file(&self, path: impl AsRef<Path>) -> Option<&str> {
        self.file_cache
            .get(path.as_ref())
            .map(|cached| cached.source.as_str())
    }

    pub fn clear_cache(&mut self) {
        self.file_cache.clear();
    }

    /// Make `source` available to `#include` under the virtual `path`, e.g.
    /// `waylib/core/utility`. Modules may include modules registered before them.
    pub fn register_module(
        &mut self,
        path: impl AsRef<Path>,
        source: &str,
        config: &ProcessConfig,
    ) -> Result<(), PrepperError> {
        let path = path.as_ref();
        self.process_from_memory_and_cache(source, path, config)?;
        log::debug!("registered shader module {}", path.display());
        Ok(())
    }

    /// [`ShaderPreprocessor::register_module`] for each entry in order, stopping at the first failure.
    pub fn register_modules<'s, I, Q>(
        &mut self,
        modules: I,
        config: &ProcessConfig,
    ) -> Result<(), PrepperError>
    where
        I: IntoIterator<Item = (Q, &'s str)>,
        Q: AsRef<Path>,
    {
        for (path, source) in modules {
            self.register_module(path, source, config)?;
        }
        Ok(())
    }

    /// Expand `source` with the define table prepended.
    ///
    /// `config.path`, if set, names the file for quoted include lookup, `__FILE__`
    /// and error reports.
    pub fn process_from_memory(
        &mut self,
        source: &str,
        config: &ProcessConfig,
    ) -> Result<String, PrepperError> {
        let mut input = self.defines.to_text();
        input.push_str(source);
        input.push('\n');

        let file = config.path.as_ref().map(|p| p.display().to_string());

        let mut resolution = Resolution {
            file_cache: &mut self.file_cache,
            search_paths: &self.search_paths,
            provider: &mut self.provider,
            config,
        };

        let output = Expander::new(&mut resolution, config.remove_comments)
            .process(&input, file.as_deref())?;

        Ok(if config.remove_whitespace {
            consolidate_whitespace(&output)
        } else {
            output
        })
    }

    /// Expand `source` as the contents of `path`, then cache it under `path` so
    /// later includes and [`ShaderPreprocessor::process`] calls find it.
    ///
    /// Nothing is cached if expansion fails.
    pub fn process_from_memory_and_cache(
        &mut self,
        source: &str,
        path: impl AsRef<Path>,
        config: &ProcessConfig,
    ) -> Result<String, PrepperError> {
        let path = path.as_ref();
        let source = if config.support_pragma_once {
            process_pragma_once(source, path)
        } else {
            source.to_owned()
        };

        let config = ProcessConfig {
            path: Some(path.to_owned()),
            ..config.clone()
        };

        let output = self.process_from_memory(&source, &config)?;
        self.file_cache.insert(
            path.to_owned(),
            CachedFile {
                source,
                pragma_once_applied: config.support_pragma_once,
            },
        );
        Ok(output)
    }

    /// Expand the file at `path`, reading it through the provider unless it is cached.
    pub fn process(
        &mut self,
        path: impl AsRef<Path>,
        config: &ProcessConfig,
    ) -> Result<String, PrepperError> {
        let path = path.as_ref();

        if let Some(cached) = self.file_cache.get(path) {
            log::debug!("cache hit: {}", path.display());

            let source = cached.body(path, config);
            let config = ProcessConfig {
                path: Some(path.to_owned()),
                ..config.clone()
            };
            return self.process_from_memory(&source, &config);
        }

        let source =
            self.provider
                .read_entire_file(path)
                .map_err(|source| PrepperError::FileOpen {
                    file: path.display().to_string(),
                    source,
                })?;

        self.process_from_memory_and_cache(&source, path, config)
    }
}

/// Include lookup for one `process_from_memory` call.
struct Resolution<'a, P> {
    file_cache: &'a mut HashMap<PathBuf, CachedFile>,
    search_paths: &'a [PathBuf],
    provider: &'a mut P,
    config: &'a ProcessConfig,
}

impl<P: IncludeProvider> Resolution<'_, P> {
    fn candidates(&self, strategy: Strategy, path: &Path) -> Vec<PathBuf> {
        match strategy {
            Strategy::ConfigRelative => match &self.config.path {
                Some(current) => {
                    let dir = current.parent().unwrap_or_else(|| Path::new(""));
                    vec![self.provider.absolute(&dir.join(path))]
                }
                None => Vec::new(),
            },
            Strategy::Absolute => vec![self.provider.absolute(path)],
            Strategy::SearchPaths => self
                .search_paths
                .iter()
                .map(|dir| self.provider.absolute(&dir.join(path)))
                .collect(),
        }
    }

    /// Cached or freshly read `candidate`, or `None` if it does not exist.
    fn load(&mut self, candidate: &Path) -> Result<Option<ResolvedInclude>, PrepperError> {
        if let Some(cached) = self.file_cache.get(candidate) {
            return Ok(Some(self.resolved(candidate, cached)));
        }

        if !self.provider.exists(candidate) {
            log::trace!("include candidate {} does not exist", candidate.display());
            return Ok(None);
        }

        let source =
            self.provider
                .read_entire_file(candidate)
                .map_err(|source| PrepperError::FileOpen {
                    file: candidate.display().to_string(),
                    source,
                })?;

        let cached = CachedFile {
            source,
            pragma_once_applied: false,
        };
        let resolved = self.resolved(candidate, &cached);
        self.file_cache.insert(candidate.to_owned(), cached);
        Ok(Some(resolved))
    }

    fn resolved(&self, path: &Path, cached: &CachedFile) -> ResolvedInclude {
        ResolvedInclude {
            key: path.display().to_string(),
            source: cached.body(path, self.config),
        }
    }
}

impl<P: IncludeProvider> IncludeResolver for Resolution<'_, P> {
    fn resolve_include(
        &mut self,
        path: &str,
        is_system: bool,
    ) -> Result<ResolvedInclude, PrepperError> {
        let literal = Path::new(path);

        if let Some(cached) = self.file_cache.get(literal) {
            log::debug!("include `{}` served from cache", path);
            return Ok(self.resolved(literal, cached));
        }

        let strategies = if is_system {
            SYSTEM_STRATEGIES
        } else {
            LOCAL_STRATEGIES
        };

        for &strategy in strategies {
            for candidate in self.candidates(strategy, literal) {
                if let Some(resolved) = self.load(&candidate)? {
                    log::debug!(
                        "include `{}` resolved to {} ({:?})",
                        path,
                        candidate.display(),
                        strategy
                    );
                    return Ok(resolved);
                }
            }
        }

        Err(PrepperError::IncludeNotFound {
            file: path.to_owned(),
        })
    }
}

/// Include guard macro name used in place of `#pragma once` for `path`.
pub fn pragma_once_guard(path: &Path) -> String {
    // Mangled per byte: a multi-byte character becomes several underscores.
    let mangled: String = path
        .as_os_str()
        .as_encoded_bytes()
        .iter()
        .map(|&b| {
            if b.is_ascii_alphanumeric() {
                b.to_ascii_uppercase() as char
            } else {
                '_'
            }
        })
        .collect();

    format!("__{}_GUARD__", mangled)
}

/// Replace the first `#pragma once` in `source` with an include guard for `path`.
/// Sources without one are returned unchanged.
pub fn process_pragma_once(source: &str, path: &Path) -> String {
    const PRAGMA_ONCE: &str = "#pragma once";

    let pos = match source.find(PRAGMA_ONCE) {
        Some(pos) => pos,
        None => return source.to_owned(),
    };

    let guard = pragma_once_guard(path);

    let mut out = String::with_capacity(source.len() + 3 * guard.len() + 32);
    out.push_str(&source[..pos]);
    out.push_str(&format!("#ifndef {}\n#define {}\n", guard, guard));
    out.push_str(&source[pos + PRAGMA_ONCE.len()..]);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&format!("#endif //{}\n", guard));
    out
}

/// Collapse ASCII whitespace runs to a single space and trim both ends.
/// Other Unicode spaces, such as U+00A0, are left alone.
pub fn consolidate_whitespace(source: &str) -> String {
    lazy_static! {
        static ref WHITESPACE_RE: Regex = Regex::new(r"[ \t\n\r\x0B\x0C]+").unwrap();
    }

    WHITESPACE_RE
        .replace_all(source, " ")
        .trim_matches(' ')
        .to_owned()
}
