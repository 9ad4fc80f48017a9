//! Build blocks in markup.
//!
//! A block lists the assets a page loads one by one:
//!
//! ```html
//! <!-- build:js scripts/main.min.js -->
//! <script src="scripts/a.js"></script>
//! <script src="scripts/b.js"></script>
//! <!-- endbuild -->
//! ```
//!
//! The referenced assets are concatenated and minified into one bundle under
//! the dist root, and the block is replaced by a single reference to it.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use regex::{Captures, Regex};

use crate::core::Environment;
use crate::error::TaskError;
use crate::globs::Category;
use crate::pipeline::{Pipeline, Report, Step};
use crate::tasks::scripts::Minifier;

static RE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--\s*build:(css|js)\s+(\S+)\s*-->(.*?)<!--\s*endbuild\s*-->")
        .expect("invalid build block regex")
});

static RE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:href|src)\s*=\s*["']([^"']+)["']"#).expect("invalid asset reference regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Css,
    Js,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Block {
    kind: Kind,
    /// Bundle path relative to the dist root.
    target: String,
    /// Asset paths relative to the app root.
    assets: Vec<Utf8PathBuf>,
}

impl Block {
    fn reference(&self) -> String {
        match self.kind {
            Kind::Css => format!(r#"<link rel="stylesheet" href="{}">"#, self.target),
            Kind::Js => format!(r#"<script src="{}"></script>"#, self.target),
        }
    }
}

fn parse_block(caps: &Captures) -> Block {
    let kind = match &caps[1] {
        "css" => Kind::Css,
        _ => Kind::Js,
    };

    let assets = RE_REF
        .captures_iter(&caps[3])
        .map(|c| Utf8PathBuf::from(c[1].trim_start_matches('/')))
        .collect();

    Block {
        kind,
        target: caps[2].to_string(),
        assets,
    }
}

/// Rewrites markup, calling `bundle` once per block found.
fn rewrite(markup: &str, mut bundle: impl FnMut(&Block)) -> String {
    RE_BLOCK
        .replace_all(markup, |caps: &Captures| {
            let block = parse_block(caps);
            bundle(&block);
            block.reference()
        })
        .into_owned()
}

/// Copies markup to the dist root, bundling the assets of its build blocks.
pub struct Concat {
    minifier: Arc<dyn Minifier>,
}

impl Concat {
    pub fn new(minifier: Arc<dyn Minifier>) -> Self {
        Self { minifier }
    }

    pub fn run(&self, env: &Environment) -> Result<Report<Utf8PathBuf>, TaskError> {
        let dist = &env.profile.dist_root;
        // Bundle outcome per target, shared by every page referencing it.
        let built: Mutex<HashMap<String, Result<(), String>>> = Mutex::new(HashMap::new());

        let report = Pipeline::from_selector(env, "concat", env.globs.get(Category::Markup))?
            .run(|file| {
                let mut blocks = Vec::new();
                let markup = rewrite(file.text()?, |block| blocks.push(block.clone()));

                for block in blocks {
                    let mut built = built.lock().unwrap_or_else(PoisonError::into_inner);
                    let outcome = built.entry(block.target.clone()).or_insert_with(|| {
                        self.bundle(env, &block).map_err(|e| format!("{e:#}"))
                    });

                    if let Err(e) = outcome {
                        anyhow::bail!("bundle {} failed: {e}", block.target);
                    }
                }

                let target = dist.join(file.relative());
                crate::io::write_file(&env.path(&target), markup)?;
                Ok(Step::Emit(target))
            });

        Ok(report)
    }

    fn bundle(&self, env: &Environment, block: &Block) -> anyhow::Result<()> {
        let app = &env.profile.app_root;
        let mut joined = Vec::new();

        for asset in &block.assets {
            let data = std::fs::read(env.path(app.join(asset)))
                .map_err(|e| anyhow::anyhow!("{asset}: {e}"))?;
            joined.extend_from_slice(&data);
            joined.push(b'\n');
        }

        let output = match block.kind {
            Kind::Css => grass::from_string(
                String::from_utf8(joined)?,
                &grass::Options::default().style(grass::OutputStyle::Compressed),
            )
            .map_err(|e| anyhow::anyhow!("{}: {e}", block.target))?
            .into_bytes(),
            Kind::Js => self
                .minifier
                .minify(Utf8Path::new(&block.target), &joined)?,
        };

        let target = env.path(env.profile.dist_root.join(&block.target));
        crate::io::write_file(&target, &output)?;

        tracing::debug!(bundle = %block.target, assets = block.assets.len(), "bundled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::manifest::Manifest;
    use crate::policy::{ConsoleSink, Policy};
    use crate::tasks::scripts::ScriptError;

    struct Join;

    impl Minifier for Join {
        fn minify(&self, _: &Utf8Path, source: &[u8]) -> Result<Vec<u8>, ScriptError> {
            Ok(source.iter().copied().filter(|&b| b != b'\n').collect())
        }

        fn describe(&self) -> String {
            "join".into()
        }
    }

    const PAGE: &str = r#"<head>
<!-- build:css styles/main.css -->
<link rel="stylesheet" href="css/a.css">
<link rel="stylesheet" href="/css/b.css">
<!-- endbuild -->
</head>
<body>
<!-- build:js scripts/main.min.js -->
<script src="js/a.js"></script>
<script src="js/b.js"></script>
<!-- endbuild -->
</body>"#;

    #[test]
    fn test_rewrite() {
        let mut seen = Vec::new();
        let out = rewrite(PAGE, |b| seen.push(b.clone()));

        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].kind, Kind::Css);
        assert_eq!(
            seen[0].assets,
            vec![Utf8PathBuf::from("css/a.css"), Utf8PathBuf::from("css/b.css")]
        );
        assert!(out.contains(r#"<link rel="stylesheet" href="styles/main.css">"#));
        assert!(out.contains(r#"<script src="scripts/main.min.js"></script>"#));
        assert!(!out.contains("build:"));
    }

    #[test]
    fn test_bundles_written_to_dist() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        for (path, body) in [
            ("app/index.html", PAGE),
            ("app/about.html", PAGE),
            ("app/css/a.css", "a { color: red; }"),
            ("app/css/b.css", "b { color: blue; }"),
            ("app/js/a.js", "var a;"),
            ("app/js/b.js", "var b;"),
        ] {
            fs::create_dir_all(root.join(path).parent().unwrap()).unwrap();
            fs::write(root.join(path), body).unwrap();
        }

        let env = Environment::new(root, Manifest::default()).with_policy(Policy::new(ConsoleSink));
        let report = Concat::new(Arc::new(Join)).run(&env).unwrap();

        assert_eq!(report.written(), 2);
        assert_eq!(
            fs::read_to_string(root.join("dist/scripts/main.min.js")).unwrap(),
            "var a;var b;"
        );
        let css = fs::read_to_string(root.join("dist/styles/main.css")).unwrap();
        assert!(css.contains("a{color:red}"));
        assert!(css.contains("b{color:blue}"));
        assert!(root.join("dist/about.html").exists());
    }

    #[test]
    fn test_missing_asset_fails_the_page() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        fs::create_dir_all(root.join("app")).unwrap();
        fs::write(root.join("app/index.html"), PAGE).unwrap();

        let env = Environment::new(root, Manifest::default()).with_policy(Policy::new(ConsoleSink));
        let report = Concat::new(Arc::new(Join)).run(&env).unwrap();

        assert_eq!(report.failed, 1);
        assert!(!root.join("dist/index.html").exists());
    }

    #[test]
    fn test_failed_bundle_fails_every_page() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let page = "<body>\n<!-- build:js scripts/main.js -->\n<script src=\"js/gone.js\"></script>\n<!-- endbuild -->\n</body>";
        fs::create_dir_all(root.join("app")).unwrap();
        fs::write(root.join("app/a.html"), page).unwrap();
        fs::write(root.join("app/b.html"), page).unwrap();

        let env = Environment::new(root, Manifest::default()).with_policy(Policy::new(ConsoleSink));
        let report = Concat::new(Arc::new(Join)).run(&env).unwrap();

        assert_eq!(report.written(), 0);
        assert_eq!(report.failed, 2);
        assert!(!root.join("dist/scripts/main.js").exists());
        assert!(!root.join("dist/a.html").exists());
        assert!(!root.join("dist/b.html").exists());
    }
}
