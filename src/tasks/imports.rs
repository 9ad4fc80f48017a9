//! Sass import graph.
//!
//! A stylesheet has to be recompiled when any file it pulls in changes, so
//! the fingerprint of an entry covers the entry itself and everything it
//! imports, transitively.

use std::collections::HashSet;
use std::fs;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

use crate::core::{Blake3Hasher, Hash32};

static RE_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*@(?:import|use|forward)\s*(?:\(\w+\)\s*)?((?:["'][^"']+["']\s*,?\s*)+)"#)
        .expect("invalid import regex")
});

static RE_QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["']([^"']+)["']"#).expect("invalid specifier regex"));

const EXTENSIONS: &[&str] = &["scss", "sass", "css"];

/// Specifiers named by `@import`, `@use` and `@forward` rules, in order.
pub(crate) fn scan(source: &str) -> Vec<&str> {
    RE_IMPORT
        .captures_iter(source)
        .filter_map(|c| c.get(1))
        .flat_map(|list| RE_QUOTED.captures_iter(list.as_str()))
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .filter(|spec| !is_external(spec))
        .collect()
}

/// Built-in modules and remote stylesheets never live on disk.
fn is_external(spec: &str) -> bool {
    spec.starts_with("sass:")
        || spec.starts_with("http://")
        || spec.starts_with("https://")
        || spec.starts_with("//")
        || spec.starts_with("url(")
}

/// Resolves import specifiers to files on disk.
#[derive(Debug, Clone)]
pub(crate) struct ImportResolver {
    /// Searched after the importing file's own directory.
    load_paths: Vec<Utf8PathBuf>,
}

impl ImportResolver {
    pub(crate) fn new(load_paths: Vec<Utf8PathBuf>) -> Self {
        Self { load_paths }
    }

    /// Finds the file an import in `from` refers to.
    pub(crate) fn resolve(&self, from: &Utf8Path, spec: &str) -> Option<Utf8PathBuf> {
        let local = from.parent().map(Utf8Path::to_owned);

        local
            .iter()
            .chain(&self.load_paths)
            .flat_map(|base| candidates(&base.join(spec)))
            .find(|path| path.is_file())
    }

    /// The entry followed by every file it reaches through imports, each
    /// listed once, in discovery order. Unresolvable imports are left for the
    /// compiler to report.
    pub(crate) fn closure(&self, entry: &Utf8Path) -> std::io::Result<Vec<(Utf8PathBuf, Vec<u8>)>> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        let mut stack = vec![entry.to_owned()];

        while let Some(path) = stack.pop() {
            if !seen.insert(path.clone()) {
                continue;
            }

            let data = fs::read(&path)?;
            let text = String::from_utf8_lossy(&data);

            let mut found: Vec<_> = scan(&text)
                .into_iter()
                .filter_map(|spec| self.resolve(&path, spec))
                .collect();

            // visit imports in source order
            found.reverse();
            stack.extend(found);
            files.push((path, data));
        }

        Ok(files)
    }

    /// Hash over an entry, all of its imports and the compiler settings.
    pub(crate) fn fingerprint(&self, entry: &Utf8Path, settings: &[u8]) -> std::io::Result<Hash32> {
        let mut hasher = Blake3Hasher::default();
        hasher.chunk(settings);

        for (path, data) in self.closure(entry)? {
            hasher.chunk(path.as_str()).chunk(&data);
        }

        Ok(hasher.into())
    }
}

/// Candidate files for a path without regard to what exists.
fn candidates(path: &Utf8Path) -> Vec<Utf8PathBuf> {
    let Some(name) = path.file_name() else {
        return Vec::new();
    };
    let dir = path.parent().unwrap_or(Utf8Path::new(""));

    if path
        .extension()
        .is_some_and(|ext| EXTENSIONS.contains(&ext))
    {
        return vec![dir.join(format!("_{name}")), dir.join(name)];
    }

    let mut out = Vec::new();
    for ext in EXTENSIONS {
        out.push(dir.join(format!("_{name}.{ext}")));
        out.push(dir.join(format!("{name}.{ext}")));
    }
    for ext in &EXTENSIONS[..2] {
        out.push(path.join(format!("_index.{ext}")));
        out.push(path.join(format!("index.{ext}")));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan() {
        let source = r#"
@charset "utf-8";
@import "variables", 'mixins';
@import (css) "print";
@use "sass:math";
@use "components/button" as btn;
  @forward "theme";
// @import "commented";
.a { content: "@import 'inline'"; }
@import url(http://fonts.example.com/x.css);
"#;

        assert_eq!(
            scan(source),
            vec!["variables", "mixins", "print", "components/button", "theme"]
        );
    }

    #[test]
    fn test_resolve_partials_and_load_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        fs::create_dir_all(root.join("css/base")).unwrap();
        fs::create_dir_all(root.join("vendor/grid")).unwrap();
        fs::write(root.join("css/main.scss"), "").unwrap();
        fs::write(root.join("css/base/_reset.scss"), "").unwrap();
        fs::write(root.join("vendor/grid/_index.scss"), "").unwrap();

        let resolver = ImportResolver::new(vec![root.join("vendor")]);
        let main = root.join("css/main.scss");

        assert_eq!(
            resolver.resolve(&main, "base/reset"),
            Some(root.join("css/base/_reset.scss"))
        );
        assert_eq!(
            resolver.resolve(&main, "grid"),
            Some(root.join("vendor/grid/_index.scss"))
        );
        assert_eq!(resolver.resolve(&main, "missing"), None);
    }

    #[test]
    fn test_closure_handles_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        fs::write(root.join("main.scss"), "@import 'a';\n@import 'b';").unwrap();
        fs::write(root.join("_a.scss"), "@import 'b';").unwrap();
        fs::write(root.join("_b.scss"), "@import 'a';").unwrap();

        let resolver = ImportResolver::new(vec![]);
        let files: Vec<_> = resolver
            .closure(&root.join("main.scss"))
            .unwrap()
            .into_iter()
            .map(|(p, _)| p.file_name().unwrap().to_string())
            .collect();

        assert_eq!(files, vec!["main.scss", "_a.scss", "_b.scss"]);
    }

    #[test]
    fn test_fingerprint_follows_partials() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        fs::write(root.join("main.scss"), "@import 'vars';").unwrap();
        fs::write(root.join("_vars.scss"), "$c: red;").unwrap();

        let resolver = ImportResolver::new(vec![]);
        let entry = root.join("main.scss");
        let before = resolver.fingerprint(&entry, b"compressed").unwrap();

        assert_eq!(before, resolver.fingerprint(&entry, b"compressed").unwrap());
        assert_ne!(before, resolver.fingerprint(&entry, b"expanded").unwrap());

        fs::write(root.join("_vars.scss"), "$c: blue;").unwrap();
        assert_ne!(before, resolver.fingerprint(&entry, b"compressed").unwrap());
    }
}
