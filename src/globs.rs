//! Glob sets derived from a [`Profile`].
//!
//! Patterns are plain strings here; nothing touches the filesystem until a
//! task calls [`Selector::resolve`].

use std::collections::{BTreeMap, BTreeSet};

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern};

use crate::error::{ConfigError, TaskError};
use crate::profile::Profile;

/// Logical source categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    /// Sass and SCSS sources.
    Styles,
    /// Compiled CSS sitting next to the style sources.
    Stylesheets,
    /// Script sources, minified siblings excluded.
    Scripts,
    Images,
    /// Server side templates and HTML.
    Markup,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Styles,
        Category::Stylesheets,
        Category::Scripts,
        Category::Images,
        Category::Markup,
    ];
}

const STYLE_EXT: &[&str] = &["scss", "sass"];
const IMAGE_EXT: &[&str] = &["gif", "jpg", "png", "svg"];
const MARKUP_EXT: &[&str] = &["php", "jsp", "jspf", "htm*"];

pub(crate) const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Include and exclude patterns anchored at one root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub root: Utf8PathBuf,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Selector {
    fn new(root: &Utf8Path, include: &[&str], exclude: &[&str]) -> Self {
        let anchor = |pattern: &&str| root.join(pattern).into_string();

        Self {
            root: root.to_owned(),
            include: include.iter().map(anchor).collect(),
            exclude: exclude.iter().map(anchor).collect(),
        }
    }

    fn extensions(root: &Utf8Path, extensions: &[&str]) -> Self {
        let include: Vec<_> = extensions.iter().map(|ext| format!("**/*.{ext}")).collect();
        let include: Vec<_> = include.iter().map(String::as_str).collect();
        Self::new(root, &include, &[])
    }

    /// Every file below `root`, dot files included.
    pub fn everything(root: impl AsRef<Utf8Path>) -> Self {
        Self::new(root.as_ref(), &["**/*"], &[])
    }

    /// Every pattern string, includes first.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.include
            .iter()
            .chain(self.exclude.iter())
            .map(String::as_str)
    }

    /// Whether a project relative path is selected.
    pub fn matches(&self, path: &Utf8Path) -> bool {
        let hit = |patterns: &[String]| {
            patterns.iter().any(|p| {
                Pattern::new(p)
                    .map(|p| p.matches_with(path.as_str(), MATCH_OPTIONS))
                    .unwrap_or(false)
            })
        };

        hit(&self.include) && !hit(&self.exclude)
    }

    /// Enumerates the selected files below `base`, sorted and deduplicated.
    /// The returned paths are relative to `base`.
    pub fn resolve(&self, base: &Utf8Path) -> Result<Vec<Utf8PathBuf>, TaskError> {
        let prefix = Pattern::escape(base.as_str());
        let mut found = BTreeSet::new();

        for pattern in &self.include {
            let full = format!("{prefix}/{pattern}");
            let iter = glob::glob_with(&full, MATCH_OPTIONS).map_err(ConfigError::from)?;

            for entry in iter {
                let path = Utf8PathBuf::try_from(entry?)?;
                if !path.is_file() {
                    continue;
                }

                let relative = path.strip_prefix(base).unwrap_or(&path).to_owned();
                if self.matches(&relative) {
                    found.insert(relative);
                }
            }
        }

        Ok(found.into_iter().collect())
    }
}

/// Read-only mapping from [`Category`] to [`Selector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobSet {
    map: BTreeMap<Category, Selector>,
}

impl GlobSet {
    pub fn from_profile(profile: &Profile) -> Self {
        let mut map = BTreeMap::new();

        map.insert(
            Category::Styles,
            Selector::extensions(&profile.style_root, STYLE_EXT),
        );
        map.insert(
            Category::Stylesheets,
            Selector::new(&profile.style_root, &["**/*.css"], &[]),
        );
        map.insert(
            Category::Scripts,
            Selector::new(&profile.script_root, &["**/*.js"], &["**/*.min.js"]),
        );
        map.insert(
            Category::Images,
            Selector::extensions(&profile.image_root, IMAGE_EXT),
        );
        map.insert(
            Category::Markup,
            Selector::extensions(&profile.app_root, MARKUP_EXT),
        );

        Self { map }
    }

    pub fn get(&self, category: Category) -> &Selector {
        // every category is inserted by the only constructor
        &self.map[&category]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, &Selector)> {
        self.map.iter().map(|(k, v)| (*k, v))
    }
}

/// Partials are only compiled through the files that import them.
pub(crate) fn is_partial(path: &Utf8Path) -> bool {
    path.file_name().is_some_and(|name| name.starts_with('_'))
}
