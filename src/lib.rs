//! **wgsl-prepper** is a shader preprocessor for WGSL and other languages whose
//! compilers have no notion of files. It turns a tree of sources into the single
//! string the GPU compiler wants.
//!
//! On top of the usual C preprocessor directives (`#define`, `#if`/`#ifdef`,
//! `#include`, `#error`...), the [`ShaderPreprocessor`] provides:
//!
//! * layered include resolution: next to the including file, relative to the
//!   working directory, then through registered search paths. `<...>` includes
//!   try the search paths first,
//! * a define table prepended to every source, which can be seeded with facts
//!   about the GPU adapter via [`ShaderPreprocessor::initialize_platform_defines`],
//! * `#pragma once`, rewritten into an include guard derived from the file path,
//! * a file cache, so embedded shader modules can be registered under virtual
//!   paths and repeated processing never touches the disk,
//! * optional comment removal and whitespace consolidation.
//!
//! Files are read through an [`IncludeProvider`], which can be the real filesystem
//! or an in-memory one.
//!
//! # Example
//!
//! ```rust
//! use wgsl_prepper::{MemoryIncludeProvider, ProcessConfig, ShaderPreprocessor};
//!
//! let provider = MemoryIncludeProvider::new()
//!     .with_file("shaders/common.wgsl", "#pragma once\nconst PI: f32 = 3.14159;")
//!     .with_file("shaders/main.wgsl", "#include \"common.wgsl\"\nconst N: u32 = COUNT;");
//!
//! let mut preprocessor = ShaderPreprocessor::new(provider);
//! preprocessor.add_define("COUNT", "4u");
//!
//! let config = ProcessConfig {
//!     remove_whitespace: true,
//!     ..Default::default()
//! };
//! let output = preprocessor.process("shaders/main.wgsl", &config)?;
//! assert_eq!(output, "const PI: f32 = 3.14159; const N: u32 = 4u;");
//! # Ok::<(), wgsl_prepper::PrepperError>(())
//! ```

mod defines;
mod error;
mod expander;
mod expression;
mod include_provider;
mod macros;
mod preprocessor;
mod scanner;

pub use defines::*;
pub use error::*;
pub use include_provider::*;
pub use preprocessor::*;
