use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};

use crate::cache::Fingerprints;
use crate::core::Environment;
use crate::error::TaskError;
use crate::globs::{Category, is_partial};
use crate::pipeline::{Pipeline, Report, SourceFile, Step};
use crate::profile::StyleOutput;
use crate::tasks::imports::ImportResolver;
use crate::tasks::postcss::{self, Targets};

/// Settings fixed when the task is built.
#[derive(Debug, Clone)]
pub struct StyleSettings {
    pub output: StyleOutput,
    pub production: bool,
    pub targets: Targets,
    /// Absolute directories searched for imports.
    pub load_paths: Vec<Utf8PathBuf>,
}

impl StyleSettings {
    pub fn from_env(env: &Environment) -> Self {
        let profile = &env.profile;
        let load_paths = std::iter::once(&profile.style_root)
            .chain(&profile.vendor_roots)
            .map(|path| env.path(path))
            .collect();

        Self {
            output: profile.style_output,
            production: env.manifest.production,
            targets: Targets::parse(&profile.browser_targets),
            load_paths,
        }
    }

    /// Bytes mixed into every fingerprint, so that changing a setting
    /// invalidates the outputs.
    fn fingerprint(&self) -> Vec<u8> {
        format!(
            "{}|{}|{}",
            self.output.as_str(),
            self.production,
            self.targets.describe()
        )
        .into_bytes()
    }
}

/// A stylesheet written by the task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compiled {
    /// Project relative path of the written `.css` file.
    pub path: Utf8PathBuf,
    pub size: usize,
}

/// Compiles every non-partial Sass entry to a `.css` file beside it.
pub struct CompileStyles {
    settings: StyleSettings,
    key: Vec<u8>,
    resolver: ImportResolver,
    cache: Mutex<Fingerprints>,
}

impl CompileStyles {
    pub fn new(env: &Environment) -> Self {
        Self::with_settings(env, StyleSettings::from_env(env))
    }

    pub fn with_settings(env: &Environment, settings: StyleSettings) -> Self {
        Self {
            key: settings.fingerprint(),
            resolver: ImportResolver::new(settings.load_paths.clone()),
            cache: Mutex::new(Fingerprints::persistent(&env.cache_dir(), "sass")),
            settings,
        }
    }

    pub fn run(&self, env: &Environment) -> Result<Report<Compiled>, TaskError> {
        let report = Pipeline::from_selector(env, "styles", env.globs.get(Category::Styles))?
            .filter(|path| !is_partial(path))
            .run(|file| self.compile(env, file));

        if let Err(e) = self.cache().save() {
            tracing::warn!("couldn't save style fingerprints: {e}");
        }

        if self.settings.production {
            let total = report.outputs.iter().map(|c| c.size as u64).sum();
            crate::io::report_size("styles", total);
        }

        Ok(report)
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, Fingerprints> {
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn compile(&self, env: &Environment, file: SourceFile) -> anyhow::Result<Step<Compiled>> {
        if file.path.extension() == Some("sass") {
            anyhow::bail!("indented Sass syntax is not supported, convert the file to SCSS");
        }

        let source = env.path(&file.path);
        let target = source.with_extension("css");

        let hash = self.resolver.fingerprint(&source, &self.key)?;
        if target.exists() && self.cache().is_fresh(&file.path, hash) {
            return Ok(Step::Skip);
        }

        let css = self.render(&source)?;
        crate::io::write_file(&target, &css)?;
        self.cache().record(&file.path, hash);

        Ok(Step::Emit(Compiled {
            path: file.path.with_extension("css"),
            size: css.len(),
        }))
    }

    fn render(&self, source: &Utf8Path) -> anyhow::Result<String> {
        let options = grass::Options::default()
            .style(self.settings.output.to_grass())
            .load_paths(&self.settings.load_paths);

        let css = grass::from_path(source, &options).map_err(|e| anyhow::anyhow!("{e}"))?;

        let compact = matches!(self.settings.output.to_grass(), grass::OutputStyle::Compressed);
        let css = postcss::pack_media_queries(&css, compact);
        let css = postcss::autoprefix(&css, &self.settings.targets);

        if !self.settings.production {
            return Ok(css);
        }

        let css = postcss::strip_comments(&css);
        let minified = grass::from_string(
            css,
            &grass::Options::default().style(grass::OutputStyle::Compressed),
        )
        .map_err(|e| anyhow::anyhow!("{e}"))?;

        Ok(minified)
    }
}
