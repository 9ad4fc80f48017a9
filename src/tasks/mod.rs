//! Task bodies of the standard catalog.
//!
//! Each task is a plain struct or function taking the
//! [`Environment`](crate::core::Environment). Settings that depend on the manifest are
//! resolved when the struct is built, never per file.

pub mod clean;
pub mod concat;
pub mod copy;
pub mod images;
mod imports;
pub mod lint;
#[cfg(feature = "pagespeed")]
pub mod pagespeed;
pub mod postcss;
pub mod scripts;
pub mod specs;
pub mod styles;
pub mod sw;

pub use concat::Concat;
pub use images::OptimizeImages;
pub use lint::{EsLint, LintTask, Linter, ScssLint};
pub use scripts::{Esbuild, Minifier, MinifyScripts};
pub use specs::Jasmine;
pub use styles::CompileStyles;
