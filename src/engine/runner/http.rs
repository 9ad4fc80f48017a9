use std::{net::SocketAddr, thread};

use axum::Router;
use axum::body::Body;
use axum::http::StatusCode;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::middleware::map_response;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use camino::Utf8PathBuf;
use console::style;
use tower_http::services::ServeDir;
use tracing::info;

use super::reload::SCRIPT_PATH;

/// What the dev server serves.
#[derive(Debug, Clone)]
pub(crate) struct Site {
    pub root: Utf8PathBuf,
    /// Searched when a file is missing from `root`.
    pub fallback: Option<Utf8PathBuf>,
    pub port: u16,
    /// Live reload client script, served at a fixed path.
    pub reload_script: Option<String>,
}

pub(crate) fn start(site: Site) -> thread::JoinHandle<Result<(), anyhow::Error>> {
    info!(url = %style(format!("http://localhost:{}/", site.port)).yellow(), "starting a HTTP server");

    thread::spawn(move || {
        let port = site.port;
        let result = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(anyhow::Error::from)
            .and_then(|runtime| runtime.block_on(serve(site)));

        if let Err(e) = &result {
            tracing::error!(port, "HTTP server stopped: {e}");
        }
        result
    })
}

async fn serve(site: Site) -> Result<(), anyhow::Error> {
    let address = SocketAddr::from(([127, 0, 0, 1], site.port));
    let address = tokio::net::TcpListener::bind(address).await?;

    let mut router = Router::new();
    let live = site.reload_script.is_some();

    if let Some(script) = site.reload_script {
        router = router.route(
            SCRIPT_PATH,
            get(move || {
                std::future::ready(([(CONTENT_TYPE, "application/javascript")], script.clone()))
            }),
        );
    }

    let router = match site.fallback {
        Some(fallback) => {
            router.fallback_service(ServeDir::new(site.root).fallback(ServeDir::new(fallback)))
        }
        None => router.fallback_service(ServeDir::new(site.root)),
    };

    let router = if live {
        router.layer(map_response(inject_reload))
    } else {
        router
    };

    axum::serve(address, router).await?;

    Ok(())
}

/// Makes served pages load the reload client.
async fn inject_reload(response: Response) -> Response {
    let html = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/html"));

    if !html || response.status() != StatusCode::OK {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("couldn't read page for reload injection: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    parts.headers.remove(CONTENT_LENGTH);
    let page = with_reload_tag(&String::from_utf8_lossy(&bytes));
    Response::from_parts(parts, Body::from(page))
}

fn with_reload_tag(page: &str) -> String {
    let tag = format!(r#"<script src="{SCRIPT_PATH}"></script>"#);

    match page.rfind("</body>") {
        Some(at) => format!("{}{tag}{}", &page[..at], &page[at..]),
        None => format!("{page}{tag}"),
    }
}
