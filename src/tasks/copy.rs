use camino::Utf8Path;

use crate::core::Environment;
use crate::error::{ConfigError, TaskError};
use crate::globs::{Category, Selector};
use crate::pipeline::{Pipeline, Report, Step};

const HTACCESS: &str = "node_modules/apache-server-configs/dist/.htaccess";

/// Copies the app root into the dist root, leaving out style sources, source
/// maps, markup and any `Magento` directory one level below the project
/// root. Markup reaches dist through the concat task.
pub fn copy_to_dist(env: &Environment) -> Result<Report<u64>, TaskError> {
    let profile = &env.profile;
    let dist = &profile.dist_root;

    if profile.app_root == *dist {
        tracing::warn!(%dist, "app root is the dist root, nothing to copy");
        return Ok(Report {
            outputs: Vec::new(),
            skipped: 0,
            failed: 0,
        });
    }

    if !env.path(&profile.app_root).is_dir() {
        return Err(ConfigError::MissingPath(profile.app_root.clone()).into());
    }

    let styles = env.globs.get(Category::Styles);
    let markup = env.globs.get(Category::Markup);

    let files = Selector::everything(&profile.app_root)
        .resolve(&env.root)?
        .into_iter()
        .filter(|path| {
            !(styles.matches(path)
                || markup.matches(path)
                || path.as_str().ends_with(".css.map")
                || is_magento_tree(path)
                || path.starts_with(dist))
        })
        .collect();

    let report = Pipeline::from_paths(env, "copy", &profile.app_root, files).run(|file| {
        let target = env.path(dist.join(file.relative()));
        crate::io::write_file(&target, &file.data)?;
        Ok(Step::Emit(file.data.len() as u64))
    });

    let htaccess = env.path(HTACCESS);
    if htaccess.is_file() {
        crate::io::copy_file(&htaccess, &env.path(dist.join(".htaccess")))?;
    }

    crate::io::report_size("copy", report.outputs.iter().sum());
    Ok(report)
}

fn is_magento_tree(path: &Utf8Path) -> bool {
    path.components().nth(1).is_some_and(|c| c.as_str() == "Magento")
}

/// Copies `src` below the dist root, reporting a missing source to the
/// policy instead of failing.
pub(crate) fn copy_into_dist(env: &Environment, src: &Utf8Path, dst: &Utf8Path) -> bool {
    let from = env.path(src);
    let to = env.path(env.profile.dist_root.join(dst));

    match crate::io::copy_file(&from, &to) {
        Ok(_) => true,
        Err(e) => {
            env.policy.on_error(crate::error::ItemFailure::new(src, e));
            false
        }
    }
}
