use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::cache::Fingerprints;
use crate::core::{Blake3Hasher, Environment, Hash32};
use crate::error::TaskError;
use crate::globs::Category;
use crate::pipeline::{Pipeline, Report, SourceFile, Step};

/// Errors that can occur when minifying scripts.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// An I/O error occurred during process execution.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The Esbuild process returned a non-zero exit code.
    #[error("Esbuild execution failed: {0}")]
    Esbuild(String),
}

/// Turns a script into its minified form.
pub trait Minifier: Send + Sync {
    /// `path` is only used for diagnostics and source maps.
    fn minify(&self, path: &Utf8Path, source: &[u8]) -> Result<Vec<u8>, ScriptError>;

    /// Identifies the minifier configuration in fingerprints.
    fn describe(&self) -> String;
}

/// Minifies through the `esbuild` binary, which must be on the `PATH`.
#[derive(Debug, Clone, Default)]
pub struct Esbuild {
    /// Append an inline source map.
    pub debug: bool,
}

impl Esbuild {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    fn command(&self, path: &Utf8Path) -> Command {
        let mut cmd = Command::new("esbuild");
        cmd.arg("--minify")
            .arg("--target=es2015")
            .arg("--legal-comments=inline")
            .arg("--loader=js")
            .arg(format!("--sourcefile={path}"));

        if self.debug {
            cmd.arg("--sourcemap=inline");
        }

        cmd
    }
}

impl Minifier for Esbuild {
    fn minify(&self, path: &Utf8Path, source: &[u8]) -> Result<Vec<u8>, ScriptError> {
        let mut child = self
            .command(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        {
            let stdin = child
                .stdin
                .as_mut()
                .ok_or_else(|| ScriptError::Esbuild("stdin not piped".into()))?;
            stdin.write_all(source)?;
            stdin.flush()?;
        }

        let output = child.wait_with_output()?;

        if !output.status.success() {
            return Err(ScriptError::Esbuild(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(output.stdout)
    }

    fn describe(&self) -> String {
        format!("esbuild es2015 debug={}", self.debug)
    }
}

/// Path of the minified sibling, `menu.js` → `menu.min.js`.
pub(crate) fn minified_path(path: &Utf8Path) -> Utf8PathBuf {
    path.with_extension("min.js")
}

/// Minifies every script to a `.min.js` sibling.
pub struct MinifyScripts {
    minifier: Arc<dyn Minifier>,
    production: bool,
    cache: Mutex<Fingerprints>,
}

impl MinifyScripts {
    pub fn new(env: &Environment, minifier: Arc<dyn Minifier>) -> Self {
        Self {
            minifier,
            production: env.manifest.production,
            cache: Mutex::new(Fingerprints::persistent(&env.cache_dir(), "jsmin")),
        }
    }

    pub fn run(&self, env: &Environment) -> Result<Report<usize>, TaskError> {
        let report = Pipeline::from_selector(env, "scripts", env.globs.get(Category::Scripts))?
            .run(|file| self.minify(env, file));

        if let Err(e) = self.cache().save() {
            tracing::warn!("couldn't save script fingerprints: {e}");
        }

        if self.production {
            crate::io::report_size("scripts", report.outputs.iter().map(|&n| n as u64).sum());
        }

        Ok(report)
    }

    fn cache(&self) -> MutexGuard<'_, Fingerprints> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn minify(&self, env: &Environment, file: SourceFile) -> anyhow::Result<Step<usize>> {
        let target = env.path(minified_path(&file.path));

        let mut hasher = Blake3Hasher::default();
        hasher.chunk(self.minifier.describe()).chunk(&file.data);
        let hash = Hash32::from(hasher);

        if target.exists() && self.cache().is_fresh(&file.path, hash) {
            return Ok(Step::Skip);
        }

        let output = self.minifier.minify(&file.path, &file.data)?;
        crate::io::write_file(&target, &output)?;
        self.cache().record(&file.path, hash);

        Ok(Step::Emit(output.len()))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::manifest::Manifest;
    use crate::policy::{ConsoleSink, Policy};

    /// Strips whitespace, counting calls.
    #[derive(Default)]
    struct Squash(AtomicUsize);

    impl Minifier for Squash {
        fn minify(&self, _: &Utf8Path, source: &[u8]) -> Result<Vec<u8>, ScriptError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            if source.starts_with(b"syntax error") {
                return Err(ScriptError::Esbuild("Unexpected \"error\"".into()));
            }
            Ok(source.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect())
        }

        fn describe(&self) -> String {
            "squash".into()
        }
    }

    #[test]
    fn test_minified_path() {
        assert_eq!(
            minified_path(Utf8Path::new("app/js/menu.js")),
            Utf8Path::new("app/js/menu.min.js")
        );
    }

    #[test]
    fn test_minify_incremental() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let env = Environment::new(root, Manifest::default()).with_policy(Policy::new(ConsoleSink));
        let scripts = env.path("app/javascript/watercherry/modules");
        fs::create_dir_all(&scripts).unwrap();
        fs::write(scripts.join("menu.js"), "var a = 1;\nvar b = 2;").unwrap();
        fs::write(scripts.join("broken.js"), "syntax error").unwrap();

        let squash = Arc::new(Squash::default());
        let task = MinifyScripts::new(&env, squash.clone());

        let report = task.run(&env).unwrap();
        assert_eq!(report.written(), 1);
        assert_eq!(report.failed, 1);
        assert_eq!(
            fs::read_to_string(scripts.join("menu.min.js")).unwrap(),
            "vara=1;varb=2;"
        );

        // the .min.js output is not picked up as a source
        let report = task.run(&env).unwrap();
        assert_eq!(report.written(), 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(squash.0.load(Ordering::SeqCst), 3);
    }
}
