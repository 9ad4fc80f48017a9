//! Service worker precache manifest.
//!
//! Only generated for the dist root. Serving the app root with a caching
//! worker installed would break live reload.

use camino::Utf8Path;

use crate::core::{Environment, Hash32};
use crate::error::{ConfigError, ItemFailure, TaskError};
use crate::globs::{Category, GlobSet};

/// Worker output, relative to the dist root.
pub const WORKER_PATH: &str = "scripts/service-worker.js";

const IMPORT_SCRIPTS: [&str; 2] = ["sw-toolbox.js", "runtime-caching.js"];

const SOURCES: [(&str, &str); 2] = [
    ("node_modules/sw-toolbox/sw-toolbox.js", "scripts/sw-toolbox.js"),
    ("runtime-caching.js", "scripts/runtime-caching.js"),
];

/// A precached URL and the revision of its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub url: String,
    pub revision: String,
}

/// Copies the scripts imported by the worker into `<dist>/scripts`. Returns
/// the number of files copied; missing sources go to the policy.
pub fn copy_sw_scripts(env: &Environment) -> Result<usize, TaskError> {
    let copied = SOURCES
        .iter()
        .filter(|(src, dst)| {
            crate::tasks::copy::copy_into_dist(env, Utf8Path::new(src), Utf8Path::new(dst))
        })
        .count();

    tracing::debug!(copied, "service worker scripts");
    Ok(copied)
}

/// Writes `<dist>/scripts/service-worker.js` and returns its precache list.
pub fn generate_service_worker(env: &Environment) -> Result<Vec<Entry>, TaskError> {
    let profile = &env.profile;
    let dist = &profile.dist_root;

    if profile.app_root == *dist {
        return Err(ConfigError::LiveRoot(profile.app_root.clone()).into());
    }

    let globs = GlobSet::from_profile(&profile.rebased_on_dist());
    let mut files = Vec::new();
    for category in [
        Category::Images,
        Category::Scripts,
        Category::Stylesheets,
        Category::Markup,
    ] {
        files.extend(globs.get(category).resolve(&env.root)?);
    }
    files.sort();
    files.dedup();

    let worker = dist.join(WORKER_PATH);
    let mut entries = Vec::with_capacity(files.len());

    for path in files.into_iter().filter(|p| *p != worker) {
        match Hash32::hash_file(env.path(&path)) {
            Ok(hash) => entries.push(Entry {
                url: url(dist, &path),
                revision: hash.to_hex(),
            }),
            Err(e) => env.policy.on_error(ItemFailure::new(path, e)),
        }
    }

    let script = render(env.manifest.cache_id(), &entries);
    crate::io::write_file(&env.path(&worker), script)?;

    tracing::info!(entries = entries.len(), path = %worker, "service worker generated");
    Ok(entries)
}

fn url(dist: &Utf8Path, path: &Utf8Path) -> String {
    let relative = path.strip_prefix(dist).unwrap_or(path);
    format!("/{relative}")
}

/// The worker source for a cache id and precache list.
pub(crate) fn render(cache_id: &str, entries: &[Entry]) -> String {
    let precache: Vec<[&str; 2]> = entries
        .iter()
        .map(|e| [e.url.as_str(), e.revision.as_str()])
        .collect();

    // serde_json output is a valid JS literal
    let precache = serde_json::to_string_pretty(&precache).unwrap_or_else(|_| "[]".into());
    let cache_id = serde_json::Value::from(cache_id).to_string();
    let imports = IMPORT_SCRIPTS
        .iter()
        .map(|s| format!("'{s}'"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"'use strict';

var precacheConfig = {precache};
var cacheName = 'sw-precache-v1-' + {cache_id} + '-' + (self.registration ? self.registration.scope : '');

importScripts({imports});

function revisionedUrl(entry) {{
  var url = new URL(entry[0], self.location);
  url.searchParams.set('_sw-precache', entry[1]);
  return url.toString();
}}

var urlsToCache = new Map(precacheConfig.map(function(entry) {{
  return [new URL(entry[0], self.location).toString(), revisionedUrl(entry)];
}}));

self.addEventListener('install', function(event) {{
  event.waitUntil(
    caches.open(cacheName).then(function(cache) {{
      return cache.keys().then(function(requests) {{
        var cached = new Set(requests.map(function(request) {{ return request.url; }}));
        return Promise.all(Array.from(urlsToCache.values()).filter(function(url) {{
          return !cached.has(url);
        }}).map(function(url) {{
          return fetch(new Request(url, {{credentials: 'same-origin'}})).then(function(response) {{
            if (!response.ok) {{
              throw new Error('Request for ' + url + ' returned ' + response.status);
            }}
            return cache.put(url, response);
          }});
        }}));
      }});
    }}).then(function() {{
      return self.skipWaiting();
    }})
  );
}});

self.addEventListener('activate', function(event) {{
  var expected = new Set(urlsToCache.values());
  event.waitUntil(
    caches.open(cacheName).then(function(cache) {{
      return cache.keys().then(function(requests) {{
        return Promise.all(requests.filter(function(request) {{
          return !expected.has(request.url);
        }}).map(function(request) {{
          return cache.delete(request);
        }}));
      }});
    }}).then(function() {{
      return self.clients.claim();
    }})
  );
}});

self.addEventListener('fetch', function(event) {{
  if (event.request.method !== 'GET') {{
    return;
  }}
  var url = new URL(event.request.url);
  url.hash = '';
  var key = urlsToCache.get(url.toString());
  if (!key && url.pathname.endsWith('/')) {{
    key = urlsToCache.get(url.toString() + 'index.html');
  }}
  if (key) {{
    event.respondWith(
      caches.open(cacheName).then(function(cache) {{
        return cache.match(key).then(function(response) {{
          return response || fetch(event.request);
        }});
      }})
    );
  }}
}});
"#
    )
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::manifest::Manifest;
    use crate::policy::{ConsoleSink, Policy};
    use crate::profile::Profile;

    fn env_at(root: &Utf8Path, name: Option<&str>) -> Environment {
        let manifest = Manifest {
            name: name.map(str::to_string),
            ..Default::default()
        };
        Environment::new(root, manifest).with_policy(Policy::new(ConsoleSink))
    }

    #[test]
    fn test_render() {
        let entries = vec![Entry {
            url: "/index.html".into(),
            revision: "abc".into(),
        }];
        let js = render("shop", &entries);

        assert!(js.contains(r#""/index.html","#));
        assert!(js.contains(r#""abc""#));
        assert!(js.contains(r#"'sw-precache-v1-' + "shop""#));
        assert!(js.contains("importScripts('sw-toolbox.js', 'runtime-caching.js');"));
        for event in ["install", "activate", "fetch"] {
            assert!(js.contains(&format!("addEventListener('{event}'")));
        }
    }

    #[test]
    fn test_generate_from_dist() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        for path in [
            "dist/index.html",
            "dist/css/main.css",
            "dist/images/logo.svg",
            "dist/javascript/watercherry/modules/menu.js",
            "app/index.html",
        ] {
            fs::create_dir_all(root.join(path).parent().unwrap()).unwrap();
            fs::write(root.join(path), path).unwrap();
        }

        let env = env_at(root, Some("shop"));
        let entries = generate_service_worker(&env).unwrap();
        let urls: Vec<_> = entries.iter().map(|e| e.url.as_str()).collect();

        assert_eq!(
            urls,
            vec![
                "/css/main.css",
                "/images/logo.svg",
                "/index.html",
                "/javascript/watercherry/modules/menu.js",
            ]
        );
        assert_eq!(
            entries[0].revision,
            Hash32::hash("dist/css/main.css").to_hex()
        );
        assert!(root.join("dist/scripts/service-worker.js").exists());
    }

    #[test]
    fn test_refuses_live_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let profile = Profile {
            dist_root: "app".into(),
            ..Profile::default_layout()
        };
        let env = Environment::with_profile(root, Manifest::default(), profile);

        let err = generate_service_worker(&env).unwrap_err();
        assert!(matches!(err, TaskError::Config(ConfigError::LiveRoot(_))));
    }

    #[test]
    fn test_copy_sw_scripts_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        fs::write(root.join("runtime-caching.js"), "toolbox.router.get('/', toolbox.fastest);")
            .unwrap();

        let env = env_at(root, None);

        assert_eq!(copy_sw_scripts(&env).unwrap(), 1);
        assert!(root.join("dist/scripts/runtime-caching.js").exists());
        assert_eq!(env.policy.error_count(), 1);
    }
}
