//! The standard task catalog.
//!
//! | task              | runs                                         |
//! |-------------------|----------------------------------------------|
//! | `default`         | `greet`, then `sass`, then `watchers`        |
//! | `sass`            | compile styles                               |
//! | `jsmin`           | minify scripts                               |
//! | `scsslint`        | lint styles                                  |
//! | `jslint`          | lint scripts                                 |
//! | `images`          | optimize images in place                     |
//! | `jasmine`         | run the unit tests                           |
//! | `serve`           | dev server on 3000 with live reload          |
//! | `serve:dist`      | server on 3001 over the dist root            |
//! | `clean`           | delete `.tmp` and empty the dist root        |
//! | `copy`            | copy the app root to the dist root           |
//! | `concat`          | bundle markup build blocks into dist         |
//! | `gsw`             | generate the service worker                  |
//! | `copy-sw-scripts` | copy the service worker imports              |
//! | `watchers`        | rerun `sass` and `jsmin` on change           |
//! | `lint`            | `jslint`, `scsslint` and `jasmine`           |
//! | `pagespeed`       | PageSpeed Insights score of the manifest url |

use std::sync::Arc;

use crate::core::Environment;
use crate::engine::{Blueprint, TaskContext, Work};
use crate::error::TaskError;
use crate::globs::Category;
use crate::tasks::{
    self, CompileStyles, Concat, EsLint, Esbuild, Jasmine, LintTask, Minifier, MinifyScripts,
    OptimizeImages, ScssLint,
};

#[cfg(feature = "server")]
const SERVE_PORT: u16 = 3000;
#[cfg(feature = "server")]
const SERVE_DIST_PORT: u16 = 3001;

/// Builds the standard blueprint. Task structs are created here, once, so
/// their in-memory caches live as long as the graph.
pub fn blueprint(env: &Environment) -> Blueprint {
    let mut bp = Blueprint::new();
    let minifier: Arc<dyn Minifier> = Arc::new(Esbuild::new(env.manifest.debug));

    bp.task("default")
        .about("Greets, compiles styles, then watches sources")
        .depends_on(["greet"])
        .series(["sass", "watchers"])
        .group();

    bp.task("greet").run(|ctx| {
        tracing::info!(
            "{}",
            console::style(format!(
                "Hello, tasks are initialising for {}",
                ctx.env.manifest.project_name()
            ))
            .green()
        );
        Ok(Work::Done)
    });

    let styles = Arc::new(CompileStyles::new(env));
    bp.task("sass")
        .about("Compiles Sass entries to CSS beside them")
        .run(move |ctx| {
            styles.run(ctx.env)?;
            Ok(Work::Done)
        });

    let scsslint = Arc::new(LintTask::new(
        Arc::new(ScssLint::new(&env.root)),
        Category::Styles,
    ));
    bp.task("scsslint")
        .about("Lints Sass sources with scss-lint")
        .run(move |ctx| {
            scsslint.run(ctx.env)?;
            Ok(Work::Done)
        });

    let scripts = Arc::new(MinifyScripts::new(env, minifier.clone()));
    bp.task("jsmin")
        .about("Minifies scripts to .min.js siblings")
        .run(move |ctx| {
            scripts.run(ctx.env)?;
            Ok(Work::Done)
        });

    let jslint = Arc::new(LintTask::new(
        Arc::new(EsLint::new(env.cache_dir())),
        Category::Scripts,
    ));
    bp.task("jslint")
        .about("Lints scripts with ESLint")
        .run(move |ctx| {
            jslint.run(ctx.env)?;
            Ok(Work::Done)
        });

    let images = Arc::new(OptimizeImages::new(env));
    bp.task("images")
        .about("Recompresses images in place")
        .run(move |ctx| {
            images.run(ctx.env)?;
            Ok(Work::Done)
        });

    bp.task("jasmine").about("Runs the unit tests").run(|ctx| {
        Jasmine::default().run(ctx.env)?;
        Ok(Work::Done)
    });

    bp.task("serve")
        .about("Serves .tmp and the app root on port 3000 with live reload")
        .depends_on(["sass", "jsmin"])
        .run(serve);

    bp.task("serve:dist")
        .about("Serves the dist root on port 3001")
        .depends_on(["default"])
        .run(serve_dist);

    bp.task("clean")
        .about("Deletes .tmp and empties the dist root")
        .run(|ctx| {
            tasks::clean::clean(ctx.env)?;
            Ok(Work::Done)
        });

    bp.task("copy")
        .about("Copies the app root to the dist root")
        .run(|ctx| {
            tasks::copy::copy_to_dist(ctx.env)?;
            Ok(Work::Done)
        });

    let concat = Arc::new(Concat::new(minifier));
    bp.task("concat")
        .about("Bundles build blocks and writes markup to the dist root")
        .run(move |ctx| {
            concat.run(ctx.env)?;
            Ok(Work::Done)
        });

    bp.task("gsw")
        .about("Generates the service worker for the dist root")
        .depends_on(["copy-sw-scripts"])
        .run(|ctx| {
            tasks::sw::generate_service_worker(ctx.env)?;
            Ok(Work::Done)
        });

    bp.task("copy-sw-scripts")
        .about("Copies the service worker imports to the dist root")
        .run(|ctx| {
            tasks::sw::copy_sw_scripts(ctx.env)?;
            Ok(Work::Done)
        });

    bp.task("watchers")
        .about("Recompiles styles and scripts on change")
        .run(watchers);

    bp.task("lint")
        .about("Runs every linter and the unit tests")
        .depends_on(["jslint", "scsslint", "jasmine"])
        .group();

    // depends on itself, so planning rejects it
    bp.task("build")
        .depends_on(["clean", "build", "copy"])
        .group();

    bp.task("pagespeed")
        .about("Prints the PageSpeed Insights score of the manifest url")
        .run(pagespeed);

    bp
}

#[cfg(feature = "live")]
fn watchers(ctx: &TaskContext<'_>) -> Result<Work, TaskError> {
    use crate::engine::WatchRule;

    let globs = &ctx.env.globs;
    let rules = vec![
        WatchRule::run(globs.get(Category::Styles), "sass"),
        WatchRule::run(globs.get(Category::Scripts), "jsmin"),
    ];
    let runner = ctx.runner.clone();

    tracing::info!("{}", console::style("I'm watching").green());

    Ok(Work::daemon(move || {
        crate::engine::watch(&runner, &rules, None)?;
        Ok(())
    }))
}

#[cfg(not(feature = "live"))]
fn watchers(_: &TaskContext<'_>) -> Result<Work, TaskError> {
    tracing::warn!("built without the `live` feature, not watching");
    Ok(Work::Done)
}

#[cfg(feature = "server")]
fn serve(ctx: &TaskContext<'_>) -> Result<Work, TaskError> {
    use crate::engine::{ReloadBridge, Site, WatchRule, http};
    use crate::tasks::clean::TMP_DIR;

    let env = ctx.env;
    env.set_server_active(true);

    let bridge = ReloadBridge::start()?;
    let server = http::start(Site {
        root: env.path(TMP_DIR),
        fallback: Some(env.path(&env.profile.app_root)),
        port: SERVE_PORT,
        reload_script: Some(bridge.script()),
    });

    let rules: Vec<_> = [
        Category::Markup,
        Category::Stylesheets,
        Category::Scripts,
        Category::Images,
    ]
    .into_iter()
    .map(|category| WatchRule::reload(env.globs.get(category)))
    .collect();
    let runner = ctx.runner.clone();

    Ok(Work::daemon(move || {
        let result = crate::engine::watch(&runner, &rules, Some(&bridge));
        if server.is_finished() {
            tracing::warn!("HTTP server is no longer running");
        }
        result?;
        Ok(())
    }))
}

#[cfg(feature = "server")]
fn serve_dist(ctx: &TaskContext<'_>) -> Result<Work, TaskError> {
    use crate::engine::{Site, http};

    let env = ctx.env;
    let server = http::start(Site {
        root: env.path(&env.profile.dist_root),
        fallback: None,
        port: SERVE_DIST_PORT,
        reload_script: None,
    });

    Ok(Work::daemon(move || match server.join() {
        Ok(result) => Ok(result?),
        Err(_) => Err(anyhow::anyhow!("HTTP server thread panicked").into()),
    }))
}

#[cfg(not(feature = "server"))]
fn serve(_: &TaskContext<'_>) -> Result<Work, TaskError> {
    Err(anyhow::anyhow!("built without the `server` feature").into())
}

#[cfg(not(feature = "server"))]
fn serve_dist(ctx: &TaskContext<'_>) -> Result<Work, TaskError> {
    serve(ctx)
}

#[cfg(feature = "pagespeed")]
fn pagespeed(ctx: &TaskContext<'_>) -> Result<Work, TaskError> {
    tasks::pagespeed::pagespeed(ctx.env)?;
    Ok(Work::Done)
}

#[cfg(not(feature = "pagespeed"))]
fn pagespeed(_: &TaskContext<'_>) -> Result<Work, TaskError> {
    Err(anyhow::anyhow!("built without the `pagespeed` feature").into())
}
