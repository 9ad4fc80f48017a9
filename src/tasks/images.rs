use std::io::Cursor;
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ImageEncoder, ImageFormat};
use regex::Regex;

use crate::cache::Fingerprints;
use crate::core::{Environment, Hash32};
use crate::error::TaskError;
use crate::globs::Category;
use crate::pipeline::{Pipeline, Report, SourceFile, Step};

static RE_SVG_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("invalid svg comment regex"));

/// Whitespace between tags that spans a line break. Same-line gaps may be
/// rendered text, as between `<tspan>` siblings.
static RE_SVG_GAP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">[ \t]*\r?\n\s*<").expect("invalid svg whitespace regex"));

#[derive(Debug, Clone, Copy)]
struct Quality {
    png: CompressionType,
    jpeg: u8,
}

impl Quality {
    fn new(production: bool) -> Self {
        if production {
            Self {
                png: CompressionType::Best,
                jpeg: 82,
            }
        } else {
            Self {
                png: CompressionType::Default,
                jpeg: 90,
            }
        }
    }
}

/// Bytes saved on one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Saved {
    pub before: usize,
    pub after: usize,
}

/// Recompresses images in place.
pub struct OptimizeImages {
    quality: Quality,
    production: bool,
    cache: Mutex<Fingerprints>,
}

impl OptimizeImages {
    pub fn new(env: &Environment) -> Self {
        Self {
            quality: Quality::new(env.manifest.production),
            production: env.manifest.production,
            cache: Mutex::new(Fingerprints::persistent(&env.cache_dir(), "images")),
        }
    }

    fn cache(&self) -> MutexGuard<'_, Fingerprints> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn run(&self, env: &Environment) -> Result<Report<Saved>, TaskError> {
        let report = Pipeline::from_selector(env, "images", env.globs.get(Category::Images))?
            .run(|file| self.optimize(env, file));

        if let Err(e) = self.cache().save() {
            tracing::warn!("couldn't save image fingerprints: {e}");
        }

        if self.production {
            crate::io::report_size("images", report.outputs.iter().map(|s| s.after as u64).sum());
        }

        Ok(report)
    }

    fn optimize(&self, env: &Environment, file: SourceFile) -> anyhow::Result<Step<Saved>> {
        if self.cache().is_fresh(&file.path, Hash32::hash(&file.data)) {
            return Ok(Step::Skip);
        }

        let smaller = match file.path.extension().map(str::to_ascii_lowercase).as_deref() {
            Some("png") => self.png(&file.data)?,
            Some("jpg" | "jpeg") => self.jpeg(&file.data)?,
            Some("svg") => svg(file.text()?).into_bytes(),
            _ => file.data.clone(),
        };

        let before = file.data.len();

        let kept = if smaller.len() < before {
            crate::io::write_file(&env.path(&file.path), &smaller)?;
            &smaller
        } else {
            &file.data
        };

        self.cache().record(&file.path, Hash32::hash(kept));

        Ok(Step::Emit(Saved {
            before,
            after: kept.len(),
        }))
    }

    fn png(&self, data: &[u8]) -> anyhow::Result<Vec<u8>> {
        let img = image::load_from_memory_with_format(data, ImageFormat::Png)?;
        let mut out = Vec::new();

        PngEncoder::new_with_quality(&mut out, self.quality.png, FilterType::Adaptive).write_image(
            img.as_bytes(),
            img.width(),
            img.height(),
            img.color().into(),
        )?;

        Ok(out)
    }

    fn jpeg(&self, data: &[u8]) -> anyhow::Result<Vec<u8>> {
        let img = image::load_from_memory_with_format(data, ImageFormat::Jpeg)?.to_rgb8();
        let mut out = Cursor::new(Vec::new());

        JpegEncoder::new_with_quality(&mut out, self.quality.jpeg).write_image(
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::Rgb8,
        )?;

        Ok(out.into_inner())
    }
}

/// Drops comments and whitespace between tags.
fn svg(text: &str) -> String {
    let text = RE_SVG_COMMENT.replace_all(text, "");
    RE_SVG_GAP.replace_all(&text, "><").trim().to_string()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use camino::Utf8Path;
    use image::RgbImage;

    use super::*;
    use crate::manifest::Manifest;
    use crate::policy::{ConsoleSink, Policy};

    fn project() -> (tempfile::TempDir, Environment) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_owned();
        fs::create_dir_all(root.join("app/images")).unwrap();

        let env = Environment::new(root, Manifest::default()).with_policy(Policy::new(ConsoleSink));
        (dir, env)
    }

    #[test]
    fn test_svg() {
        let source = r#"<!-- Generator: Sketch -->
<svg viewBox="0 0 10 10">
    <g>
        <path d="M0 0h10v10z"/>
    </g>
</svg>
"#;
        assert_eq!(
            svg(source),
            r#"<svg viewBox="0 0 10 10"><g><path d="M0 0h10v10z"/></g></svg>"#
        );

        let label = "<text>\n  <tspan>Hello</tspan> <tspan>world</tspan>\n</text>";
        assert_eq!(svg(label), "<text><tspan>Hello</tspan> <tspan>world</tspan></text>");
    }

    #[test]
    fn test_images_shrink_once() {
        let (_dir, env) = project();
        fs::write(
            env.path("app/images/logo.svg"),
            "<svg>\n  <!-- x -->\n  <rect/>\n</svg>\n",
        )
        .unwrap();
        fs::write(env.path("app/images/spinner.gif"), b"GIF89a").unwrap();

        let mut png = Vec::new();
        PngEncoder::new_with_quality(&mut png, CompressionType::Fast, FilterType::NoFilter)
            .write_image(
                RgbImage::from_pixel(64, 64, image::Rgb([200, 40, 40])).as_raw(),
                64,
                64,
                image::ExtendedColorType::Rgb8,
            )
            .unwrap();
        fs::write(env.path("app/images/flat.png"), &png).unwrap();

        let task = OptimizeImages::new(&env);
        let report = task.run(&env).unwrap();

        assert_eq!(report.written(), 3);
        assert!(report.outputs.iter().all(|s| s.after <= s.before));
        assert_eq!(
            fs::read_to_string(env.path("app/images/logo.svg")).unwrap(),
            "<svg><rect/></svg>"
        );
        assert_eq!(fs::read(env.path("app/images/spinner.gif")).unwrap(), b"GIF89a");
        image::open(env.path("app/images/flat.png")).unwrap();

        let report = task.run(&env).unwrap();
        assert_eq!(report.written(), 0);
        assert_eq!(report.skipped, 3);
    }

    #[test]
    fn test_corrupt_image_is_an_item_failure() {
        let (_dir, env) = project();
        fs::write(env.path("app/images/broken.png"), b"not a png").unwrap();
        fs::write(env.path("app/images/ok.svg"), "<svg/>").unwrap();

        let report = OptimizeImages::new(&env).run(&env).unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.written(), 1);
        assert_eq!(env.policy.error_count(), 1);
    }
}
