//! Directory layouts.
//!
//! A [`Profile`] is one of three static bundles of path roots and style
//! settings. Exactly one is active per process; it is picked once from the
//! manifest flags and never changes afterwards.

use camino::{Utf8Path, Utf8PathBuf};

use crate::manifest::Manifest;

/// Which layout a profile describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    Default,
    Magento,
    Websphere,
}

/// Sass output style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StyleOutput {
    Compressed,
    Expanded,
    Nested,
    Compact,
}

impl StyleOutput {
    /// grass only knows two styles, the dense ones map to compressed and the
    /// readable ones to expanded.
    pub(crate) fn to_grass(self) -> grass::OutputStyle {
        match self {
            StyleOutput::Compressed | StyleOutput::Compact => grass::OutputStyle::Compressed,
            StyleOutput::Expanded | StyleOutput::Nested => grass::OutputStyle::Expanded,
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            StyleOutput::Compressed => "compressed",
            StyleOutput::Expanded => "expanded",
            StyleOutput::Nested => "nested",
            StyleOutput::Compact => "compact",
        }
    }
}

/// The manifest flags that take part in profile selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub magento: bool,
    pub websphere: bool,
}

impl From<&Manifest> for Flags {
    fn from(manifest: &Manifest) -> Self {
        Self {
            magento: manifest.magento,
            websphere: manifest.websphere,
        }
    }
}

const BROWSERS: &[&str] = &[
    "last 3 versions",
    "ie >= 8",
    "ie_mob >= 10",
    "ff >= 21",
    "chrome >= 28",
    "safari >= 6",
    "opera >= 11",
    "ios >= 7",
    "android >= 4.4",
    "bb >= 10",
    "> 1%",
];

/// Path roots and style settings for one project layout. All paths are
/// relative to the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub layout: Layout,
    pub app_root: Utf8PathBuf,
    pub style_root: Utf8PathBuf,
    pub script_root: Utf8PathBuf,
    pub image_root: Utf8PathBuf,
    pub test_root: Utf8PathBuf,
    pub font_root: Utf8PathBuf,
    /// Third party package directories, used as Sass load paths.
    pub vendor_roots: Vec<Utf8PathBuf>,
    pub dist_root: Utf8PathBuf,
    pub style_output: StyleOutput,
    pub browser_targets: Vec<String>,
}

impl Profile {
    /// Picks the active profile. Magento takes precedence over Websphere,
    /// and the default layout is used when neither flag is set.
    pub fn select(flags: &Flags) -> Self {
        if flags.magento {
            Self::magento()
        } else if flags.websphere {
            Self::websphere()
        } else {
            Self::default_layout()
        }
    }

    pub fn default_layout() -> Self {
        Self::from_parts(
            Layout::Default,
            "app",
            "app/css",
            "app/javascript/watercherry/modules",
            "app/images",
            "dev/tests/js/jasmine",
            "app/css/font",
            StyleOutput::Compressed,
        )
    }

    pub fn magento() -> Self {
        const BASE: &str = "app/design/frontend/Watercherry/base";

        Self::from_parts(
            Layout::Magento,
            BASE,
            BASE,
            "app/design/frontend/Watercherry/base/web/js",
            "app/design/frontend/Watercherry/base/web/images",
            "dev/tests/js/jasmine",
            "app/design/frontend/Watercherry/base/web/fonts",
            StyleOutput::Compressed,
        )
    }

    pub fn websphere() -> Self {
        const BASE: &str = "CelesioB2BStorefrontAssetStore";

        Self::from_parts(
            Layout::Websphere,
            BASE,
            BASE,
            "CelesioB2BStorefrontAssetStore/javascript/watercherry/modules",
            "CelesioB2BStorefrontAssetStore/images",
            "CelesioB2BStorefrontAssetStore/javascript/tests",
            "CelesioB2BStorefrontAssetStore/css/font",
            StyleOutput::Compact,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn from_parts(
        layout: Layout,
        app: &str,
        style: &str,
        script: &str,
        image: &str,
        test: &str,
        font: &str,
        style_output: StyleOutput,
    ) -> Self {
        Self {
            layout,
            app_root: app.into(),
            style_root: style.into(),
            script_root: script.into(),
            image_root: image.into(),
            test_root: test.into(),
            font_root: font.into(),
            vendor_roots: vec!["bower_components".into(), "node_modules".into()],
            dist_root: "dist".into(),
            style_output,
            browser_targets: BROWSERS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Entry point of the unit test suite.
    pub fn test_entry(&self) -> Utf8PathBuf {
        self.test_root.join("spec_runner/index.js")
    }

    /// The same layout mirrored under the distribution root, with every
    /// app-relative root moved from `app_root` to `dist_root`. Roots outside
    /// the app root are left alone.
    pub fn rebased_on_dist(&self) -> Self {
        let move_root = |path: &Utf8Path| -> Utf8PathBuf {
            match path.strip_prefix(&self.app_root) {
                Ok(rest) if rest.as_str().is_empty() => self.dist_root.clone(),
                Ok(rest) => self.dist_root.join(rest),
                Err(_) => path.to_owned(),
            }
        };

        Self {
            app_root: self.dist_root.clone(),
            style_root: move_root(&self.style_root),
            script_root: move_root(&self.script_root),
            image_root: move_root(&self.image_root),
            font_root: move_root(&self.font_root),
            ..self.clone()
        }
    }
}
