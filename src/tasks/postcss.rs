//! Post-processing of compiled CSS: media query packing, vendor prefixes
//! for the configured browser targets, and comment stripping.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

/// A top level piece of a stylesheet.
#[derive(Debug, PartialEq, Eq)]
enum Node<'a> {
    /// A rule or at-rule with a block. The prelude keeps its surrounding
    /// whitespace and any comment in front of it.
    Block { prelude: &'a str, body: &'a str },
    /// Statements without a block, comments and whitespace.
    Other(&'a str),
}

/// Splits a stylesheet into top level nodes. Concatenating the nodes back
/// yields the input.
fn split_top_level(css: &str) -> Vec<Node<'_>> {
    let bytes = css.as_bytes();
    let mut nodes = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut open = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'"' | b'\'') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = css[i + 2..].find("*/").map_or(bytes.len(), |end| i + 2 + end + 1);
            }
            b'{' => {
                if depth == 0 {
                    open = i;
                }
                depth += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    nodes.push(Node::Block {
                        prelude: &css[start..open],
                        body: &css[open + 1..i],
                    });
                    start = i + 1;
                }
            }
            b';' if depth == 0 => {
                nodes.push(Node::Other(&css[start..=i]));
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }

    if start < css.len() {
        nodes.push(Node::Other(&css[start..]));
    }

    nodes
}

/// Splits a prelude into leading comments/whitespace and the rule itself.
fn split_lead(prelude: &str) -> (&str, &str) {
    let mut rest = prelude;
    loop {
        let trimmed = rest.trim_start();
        match trimmed.strip_prefix("/*").and_then(|t| t.find("*/").map(|e| &t[e + 2..])) {
            Some(after) => rest = after,
            None => {
                let at = prelude.len() - trimmed.len();
                return (&prelude[..at], trimmed);
            }
        }
    }
}

fn normalize_query(prelude: &str) -> String {
    prelude.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Merges `@media` blocks with identical queries and moves them to the end
/// of the stylesheet, in the order their queries first appeared.
pub(crate) fn pack_media_queries(css: &str, compact: bool) -> String {
    let mut out = String::with_capacity(css.len());
    let mut order: Vec<String> = Vec::new();
    let mut bodies: HashMap<String, Vec<&str>> = HashMap::new();

    for node in split_top_level(css) {
        match node {
            Node::Block { prelude, body } => {
                let (lead, rule) = split_lead(prelude);
                match rule.strip_prefix("@media") {
                    Some(query) if query.starts_with(char::is_whitespace) || query.starts_with('(') => {
                        out.push_str(lead.trim_end_matches(char::is_whitespace));
                        let query = normalize_query(query);
                        if !bodies.contains_key(&query) {
                            order.push(query.clone());
                        }
                        bodies.entry(query).or_default().push(body);
                    }
                    _ => {
                        out.push_str(prelude);
                        out.push('{');
                        out.push_str(body);
                        out.push('}');
                    }
                }
            }
            Node::Other(text) => out.push_str(text),
        }
    }

    if order.is_empty() {
        return out;
    }

    if compact {
        for query in &order {
            out.push_str("@media ");
            out.push_str(query);
            out.push('{');
            for body in &bodies[query] {
                out.push_str(body.trim());
            }
            out.push('}');
        }
    } else {
        let trimmed = out.trim_end().len();
        out.truncate(trimmed);
        for query in &order {
            out.push_str("\n\n@media ");
            out.push_str(query);
            out.push_str(" {");
            for body in &bodies[query] {
                out.push_str(body.trim_end());
            }
            out.push_str("\n}");
        }
        out.push('\n');
    }

    out
}

/// Browser engines known to the prefix table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Browser {
    Ie,
    IeMobile,
    Firefox,
    Chrome,
    Safari,
    Opera,
    Ios,
    Android,
    BlackBerry,
}

impl Browser {
    fn parse(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "ie" | "explorer" => Browser::Ie,
            "ie_mob" | "iemobile" => Browser::IeMobile,
            "ff" | "firefox" => Browser::Firefox,
            "chrome" => Browser::Chrome,
            "safari" => Browser::Safari,
            "opera" => Browser::Opera,
            "ios" | "ios_saf" => Browser::Ios,
            "android" => Browser::Android,
            "bb" | "blackberry" => Browser::BlackBerry,
            _ => return None,
        })
    }
}

/// Oldest version to support, per browser.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Targets {
    min: HashMap<Browser, f32>,
}

/// Recent releases per browser, newest first. A snapshot, so that `last N
/// versions` can be answered offline.
const RELEASES: &[(Browser, &[f32])] = &[
    (Browser::Ie, &[11.0, 10.0, 9.0, 8.0]),
    (Browser::IeMobile, &[11.0, 10.0]),
    (Browser::Firefox, &[131.0, 130.0, 129.0, 128.0]),
    (Browser::Chrome, &[130.0, 129.0, 128.0, 127.0]),
    (Browser::Safari, &[18.0, 17.6, 17.5, 17.4]),
    (Browser::Opera, &[114.0, 113.0, 112.0, 111.0]),
    (Browser::Ios, &[18.0, 17.6, 17.5, 17.4]),
    (Browser::Android, &[130.0, 4.4, 4.2, 4.1]),
    (Browser::BlackBerry, &[10.0, 7.0]),
];

static RE_LAST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^last\s+(\d+)\s+(?:(\w+)\s+)?versions?$").expect("invalid browser query regex")
});

/// Oldest of the last `n` releases of `browser`.
fn last_releases(browser: Browser, n: usize) -> Option<f32> {
    let (_, releases) = RELEASES.iter().find(|(b, _)| *b == browser)?;
    releases.get(n.clamp(1, releases.len()) - 1).copied()
}

impl Targets {
    /// Reads `<browser> >= <version>` and `last N [browser] versions`
    /// queries. Usage based queries such as `> 1%` can't be evaluated
    /// offline and are skipped.
    pub fn parse<S: AsRef<str>>(queries: &[S]) -> Self {
        let mut min = HashMap::new();
        let mut lower = |browser: Browser, version: f32| {
            let entry = min.entry(browser).or_insert(version);
            *entry = f32::min(*entry, version);
        };

        for query in queries {
            let query = query.as_ref().trim();

            if let Some(caps) = RE_LAST.captures(query) {
                let n = caps[1].parse().unwrap_or(1);
                match caps.get(2) {
                    Some(name) => match Browser::parse(name.as_str()) {
                        Some(browser) => lower(browser, last_releases(browser, n).unwrap_or(0.0)),
                        None => tracing::debug!(query, "unknown browser in query"),
                    },
                    None => {
                        for &(browser, _) in RELEASES {
                            if let Some(version) = last_releases(browser, n) {
                                lower(browser, version);
                            }
                        }
                    }
                }
                continue;
            }

            let parsed = query.split_once(">=").and_then(|(name, version)| {
                Some((Browser::parse(name.trim())?, version.trim().parse::<f32>().ok()?))
            });

            match parsed {
                Some((browser, version)) => lower(browser, version),
                None => tracing::debug!(query, "browser query skipped"),
            }
        }

        Self { min }
    }

    /// Stable textual form, used in fingerprints.
    pub(crate) fn describe(&self) -> String {
        let mut parts: Vec<_> = self
            .min
            .iter()
            .map(|(browser, version)| format!("{browser:?}>={version}"))
            .collect();
        parts.sort();
        parts.join(",")
    }

    /// Whether any supported version of `browser` is older than `below`.
    fn needs(&self, browser: Browser, below: f32) -> bool {
        self.min.get(&browser).is_some_and(|&v| v < below)
    }

    fn any(&self, support: &[(Browser, f32)]) -> bool {
        support.iter().any(|&(b, below)| self.needs(b, below))
    }
}

/// Versions below which a prefix is required.
struct Prefixed {
    property: &'static str,
    webkit: &'static [(Browser, f32)],
    moz: &'static [(Browser, f32)],
    ms: &'static [(Browser, f32)],
}

use Browser::*;

const PROPERTIES: &[Prefixed] = &[
    Prefixed {
        property: "transform",
        webkit: &[(Chrome, 36.0), (Safari, 9.0), (Ios, 9.0), (Android, 5.0), (Opera, 23.0), (BlackBerry, 11.0)],
        moz: &[(Firefox, 16.0)],
        ms: &[(Ie, 10.0)],
    },
    Prefixed {
        property: "transform-origin",
        webkit: &[(Chrome, 36.0), (Safari, 9.0), (Ios, 9.0), (Android, 5.0), (Opera, 23.0), (BlackBerry, 11.0)],
        moz: &[(Firefox, 16.0)],
        ms: &[(Ie, 10.0)],
    },
    Prefixed {
        property: "transition",
        webkit: &[(Chrome, 26.0), (Safari, 7.0), (Ios, 7.0), (Android, 4.4), (BlackBerry, 10.0)],
        moz: &[(Firefox, 16.0)],
        ms: &[],
    },
    Prefixed {
        property: "animation",
        webkit: &[(Chrome, 43.0), (Safari, 9.0), (Ios, 9.0), (Android, 5.0), (Opera, 30.0), (BlackBerry, 11.0)],
        moz: &[(Firefox, 16.0)],
        ms: &[],
    },
    Prefixed {
        property: "box-sizing",
        webkit: &[(Chrome, 10.0), (Safari, 5.1), (Ios, 5.0), (Android, 4.0)],
        moz: &[(Firefox, 29.0)],
        ms: &[],
    },
    Prefixed {
        property: "user-select",
        webkit: &[(Chrome, 54.0), (Safari, 99.0), (Ios, 99.0), (Android, 99.0), (Opera, 41.0), (BlackBerry, 99.0)],
        moz: &[(Firefox, 69.0)],
        ms: &[(Ie, 12.0), (IeMobile, 12.0)],
    },
    Prefixed {
        property: "appearance",
        webkit: &[(Chrome, 84.0), (Safari, 15.4), (Ios, 15.4), (Android, 99.0), (Opera, 70.0), (BlackBerry, 99.0)],
        moz: &[(Firefox, 80.0)],
        ms: &[],
    },
    Prefixed {
        property: "flex",
        webkit: &[(Chrome, 29.0), (Safari, 9.0), (Ios, 9.0), (Android, 4.4), (Opera, 16.0), (BlackBerry, 11.0)],
        moz: &[],
        ms: &[(Ie, 11.0), (IeMobile, 11.0)],
    },
];

static RE_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    let names: Vec<_> = PROPERTIES.iter().map(|p| regex::escape(p.property)).collect();
    Regex::new(&format!(
        r"([{{;]\s*)({})\s*:\s*([^;{{}}]*)",
        names.join("|")
    ))
    .expect("invalid declaration regex")
});

static RE_DISPLAY_FLEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([{;]\s*)display\s*:\s*(flex|inline-flex)\b").expect("invalid display regex")
});

/// Adds the vendor prefixed variants the targets still need.
pub(crate) fn autoprefix(css: &str, targets: &Targets) -> String {
    let css = RE_DECLARATION.replace_all(css, |caps: &Captures| {
        let (lead, property, value) = (&caps[1], &caps[2], caps[3].trim_end());

        let mut out = String::from(lead);
        if let Some(rule) = PROPERTIES.iter().find(|p| p.property == property) {
            for (prefix, support) in [("-webkit-", rule.webkit), ("-moz-", rule.moz), ("-ms-", rule.ms)] {
                if targets.any(support) {
                    out.push_str(&format!("{prefix}{property}:{value};"));
                }
            }
        }
        out.push_str(&format!("{property}:{value}"));
        out
    });

    let css = RE_DISPLAY_FLEX.replace_all(&css, |caps: &Captures| {
        let (lead, value) = (&caps[1], &caps[2]);
        let mut out = String::from(lead);

        if targets.any(&[(Chrome, 29.0), (Safari, 9.0), (Ios, 9.0), (Android, 4.4)]) {
            out.push_str(&format!("display:-webkit-{value};"));
        }
        if targets.any(&[(Ie, 11.0)]) {
            let legacy = if value == "flex" { "-ms-flexbox" } else { "-ms-inline-flexbox" };
            out.push_str(&format!("display:{legacy};"));
        }
        out.push_str(&format!("display:{value}"));
        out
    });

    prefix_keyframes(&css, targets)
}

/// Duplicates `@keyframes` blocks for engines that only know the prefixed
/// at-rule.
fn prefix_keyframes(css: &str, targets: &Targets) -> String {
    let webkit = PROPERTIES
        .iter()
        .find(|p| p.property == "animation")
        .is_some_and(|p| targets.any(p.webkit));

    if !webkit || !css.contains("@keyframes") {
        return css.to_string();
    }

    let mut out = String::with_capacity(css.len() * 2);
    for node in split_top_level(css) {
        match node {
            Node::Block { prelude, body } => {
                let (lead, rule) = split_lead(prelude);
                if let Some(rest) = rule.strip_prefix("@keyframes") {
                    out.push_str(lead);
                    out.push_str("@-webkit-keyframes");
                    out.push_str(rest);
                    out.push('{');
                    out.push_str(body);
                    out.push('}');
                }
                out.push_str(prelude);
                out.push('{');
                out.push_str(body);
                out.push('}');
            }
            Node::Other(text) => out.push_str(text),
        }
    }
    out
}

/// Removes every comment, `/*! ... */` included.
pub(crate) fn strip_comments(css: &str) -> String {
    let bytes = css.as_bytes();
    let mut out = String::with_capacity(css.len());
    let mut last = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'"' | b'\'') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                out.push_str(&css[last..i]);
                i = css[i + 2..].find("*/").map_or(bytes.len(), |end| i + 2 + end + 2);
                last = i;
            }
            _ => i += 1,
        }
    }

    if last < css.len() {
        out.push_str(&css[last..]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_round_trips() {
        let css = "@charset \"utf-8\";a{color:red}@media (x){b{c:d}}/* }{ */e{content:\"}\"}";
        let rebuilt: String = split_top_level(css)
            .into_iter()
            .map(|n| match n {
                Node::Block { prelude, body } => format!("{prelude}{{{body}}}"),
                Node::Other(t) => t.to_string(),
            })
            .collect();

        assert_eq!(rebuilt, css);
        assert_eq!(split_top_level(css).len(), 4);
    }

    #[test]
    fn test_pack_compact() {
        let css = "a{x:1}@media (max-width:10px){a{y:2}}b{x:3}@media print{b{z:4}}@media (max-width: 10px){b{y:5}}";

        assert_eq!(
            pack_media_queries(css, true),
            "a{x:1}b{x:3}@media (max-width:10px){a{y:2}}@media print{b{z:4}}@media (max-width: 10px){b{y:5}}"
        );

        let css = "a{x:1}@media print{a{y:2}}b{x:3}@media print{b{y:5}}";
        assert_eq!(
            pack_media_queries(css, true),
            "a{x:1}b{x:3}@media print{a{y:2}b{y:5}}"
        );
    }

    #[test]
    fn test_pack_expanded() {
        let css = "a {\n  x: 1;\n}\n\n@media print {\n  a {\n    y: 2;\n  }\n}\n\nb {\n  x: 3;\n}\n\n@media print {\n  b {\n    y: 5;\n  }\n}\n";
        let packed = pack_media_queries(css, false);

        assert_eq!(packed.matches("@media").count(), 1);
        assert!(packed.find("b {").unwrap() < packed.find("@media").unwrap());
        assert!(packed.contains("y: 2;"));
        assert!(packed.contains("y: 5;"));
    }

    #[test]
    fn test_targets() {
        let targets = Targets::parse(&["ie >= 8", "android >= 4.4", "> 1%"]);

        assert!(targets.needs(Browser::Ie, 10.0));
        assert!(!targets.needs(Browser::Android, 4.4));
        assert!(!targets.needs(Browser::Chrome, 100.0));
    }

    #[test]
    fn test_last_versions() {
        let targets = Targets::parse(&["last 3 versions"]);
        assert!(targets.needs(Browser::Ie, 10.0));
        assert!(!targets.needs(Browser::Ie, 9.0));
        assert!(targets.needs(Browser::Android, 5.0));
        assert!(targets.needs(Browser::Safari, 17.6));

        let chrome = Targets::parse(&["last 2 Chrome versions", "> 1%"]);
        assert!(chrome.needs(Browser::Chrome, 130.0));
        assert!(!chrome.needs(Browser::Firefox, 200.0));

        let out = autoprefix("a{flex:1}", &Targets::parse(&["last 4 versions"]));
        assert!(out.contains("-ms-flex:1;"));
    }

    #[test]
    fn test_autoprefix() {
        let targets = Targets::parse(&["ie >= 9", "safari >= 6"]);
        let out = autoprefix("a{transform:scale(2);color:red}b{display:flex}", &targets);

        assert_eq!(
            out,
            "a{-webkit-transform:scale(2);-ms-transform:scale(2);transform:scale(2);color:red}\
             b{display:-webkit-flex;display:-ms-flexbox;display:flex}"
        );

        let modern = Targets::parse(&["chrome >= 100"]);
        assert_eq!(autoprefix("a{transform:none}", &modern), "a{transform:none}");
    }

    #[test]
    fn test_keyframes() {
        let targets = Targets::parse(&["safari >= 6"]);
        let out = autoprefix("@keyframes spin{to{transform:rotate(1turn)}}", &targets);

        assert!(out.starts_with("@-webkit-keyframes spin{"));
        assert!(out.contains("}@keyframes spin{"));
    }

    #[test]
    fn test_strip_comments() {
        assert_eq!(
            strip_comments("/*! keep? no */a{b:c}/* x */d{content:\"/* not */\"}"),
            "a{b:c}d{content:\"/* not */\"}"
        );
    }
}
