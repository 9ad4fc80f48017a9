//! Pipeline streams.
//!
//! A [`Pipeline`] is a finite, ordered stream of [`SourceFile`]s pushed
//! through a stage function. Each item yields a `Result`; failures go to the
//! environment's [`Policy`](crate::policy::Policy) and the item is dropped,
//! successes are collected into a [`Report`] in enumeration order.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::Environment;
use crate::error::{ItemFailure, TaskError};
use crate::globs::Selector;

/// A file flowing through a pipeline.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the project root.
    pub path: Utf8PathBuf,
    /// Root of the category this file was selected from.
    pub base: Utf8PathBuf,
    pub data: Vec<u8>,
}

impl SourceFile {
    pub fn text(&self) -> anyhow::Result<&str> {
        Ok(std::str::from_utf8(&self.data)?)
    }

    /// Path relative to [`SourceFile::base`].
    pub fn relative(&self) -> &Utf8Path {
        self.path.strip_prefix(&self.base).unwrap_or(&self.path)
    }
}

/// What a stage did with an item.
#[derive(Debug)]
pub enum Step<T> {
    /// The item produced an output.
    Emit(T),
    /// The item was up to date and left alone.
    Skip,
}

/// Outcome of a whole pipeline run.
#[derive(Debug)]
pub struct Report<T> {
    pub outputs: Vec<T>,
    pub skipped: usize,
    pub failed: usize,
}

impl<T> Report<T> {
    /// Number of items that produced an output.
    pub fn written(&self) -> usize {
        self.outputs.len()
    }
}

pub struct Pipeline<'a> {
    env: &'a Environment,
    title: &'static str,
    base: Utf8PathBuf,
    files: Vec<Utf8PathBuf>,
}

impl<'a> Pipeline<'a> {
    /// Enumerates the files picked by `selector` under the project root.
    pub fn from_selector(
        env: &'a Environment,
        title: &'static str,
        selector: &Selector,
    ) -> Result<Self, TaskError> {
        Ok(Self {
            env,
            title,
            base: selector.root.clone(),
            files: selector.resolve(&env.root)?,
        })
    }

    /// A pipeline over an explicit list of project relative paths.
    pub fn from_paths(
        env: &'a Environment,
        title: &'static str,
        base: impl Into<Utf8PathBuf>,
        files: Vec<Utf8PathBuf>,
    ) -> Self {
        Self {
            env,
            title,
            base: base.into(),
            files,
        }
    }

    pub fn filter(mut self, keep: impl Fn(&Utf8Path) -> bool) -> Self {
        self.files.retain(|path| keep(path));
        self
    }

    /// Reads every file and runs `stage` on it.
    pub fn run<T, F>(self, stage: F) -> Report<T>
    where
        T: Send,
        F: Fn(SourceFile) -> anyhow::Result<Step<T>> + Send + Sync,
    {
        let span = tracing::info_span!("pipeline", title = self.title);
        span.pb_set_style(&crate::io::PROGRESS_STYLE);
        span.pb_set_length(self.files.len() as u64);
        span.pb_set_message(self.title);
        let _enter = span.enter();

        let root = &self.env.root;
        let base = &self.base;

        let results: Vec<Result<Step<T>, ItemFailure>> = self
            .files
            .into_par_iter()
            .map(|path| {
                let result = fs::read(root.join(&path))
                    .map_err(anyhow::Error::from)
                    .and_then(|data| {
                        stage(SourceFile {
                            path: path.clone(),
                            base: base.clone(),
                            data,
                        })
                    })
                    .map_err(|e| ItemFailure::new(path, e));

                span.pb_inc(1);
                result
            })
            .collect();

        let mut report = Report {
            outputs: Vec::new(),
            skipped: 0,
            failed: 0,
        };

        for result in results {
            match result {
                Ok(Step::Emit(output)) => report.outputs.push(output),
                Ok(Step::Skip) => report.skipped += 1,
                Err(failure) => {
                    report.failed += 1;
                    self.env.policy.on_error(failure);
                }
            }
        }

        tracing::debug!(
            title = self.title,
            written = report.written(),
            skipped = report.skipped,
            failed = report.failed,
            "pipeline finished"
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;
    use crate::policy::{ConsoleSink, Policy};

    #[test]
    fn test_failures_are_dropped_and_order_kept() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        for name in ["a.txt", "b.txt", "c.txt"] {
            fs::write(root.join(name), name).unwrap();
        }

        let env = Environment::new(root, Manifest::default()).with_policy(Policy::new(ConsoleSink));
        let files = vec!["a.txt".into(), "missing.txt".into(), "b.txt".into(), "c.txt".into()];

        let report = Pipeline::from_paths(&env, "test", "", files).run(|file| {
            if file.path == "b.txt" {
                return Ok(Step::Skip);
            }
            Ok(Step::Emit(file.text()?.to_string()))
        });

        assert_eq!(report.outputs, vec!["a.txt", "c.txt"]);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(env.policy.error_count(), 1);
    }
}
