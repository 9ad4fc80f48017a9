use serde::Deserialize;

use crate::core::Environment;
use crate::error::{ConfigError, TaskError};

const ENDPOINT: &str = "https://www.googleapis.com/pagespeedonline/v5/runPagespeed";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Response {
    lighthouse_result: Lighthouse,
}

#[derive(Debug, Deserialize)]
struct Lighthouse {
    categories: Categories,
}

#[derive(Debug, Deserialize)]
struct Categories {
    performance: Category,
}

#[derive(Debug, Deserialize)]
struct Category {
    score: Option<f64>,
}

/// Performance score on the 0 to 100 scale, if the audit produced one.
fn parse_score(body: &str) -> anyhow::Result<Option<u32>> {
    let response: Response = serde_json::from_str(body)?;
    Ok(response
        .lighthouse_result
        .categories
        .performance
        .score
        .map(|s| (s * 100.0).round() as u32))
}

/// Queries PageSpeed Insights for the manifest `url` with the mobile strategy.
pub fn pagespeed(env: &Environment) -> Result<Option<u32>, TaskError> {
    let url = env
        .manifest
        .url
        .as_deref()
        .ok_or(ConfigError::MissingField("url"))?;

    let request = reqwest::Url::parse_with_params(ENDPOINT, &[("url", url), ("strategy", "mobile")])
        .map_err(anyhow::Error::from)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let body = runtime.block_on(async {
        let response = reqwest::get(request).await?.error_for_status()?;
        response.text().await
    });
    let body = body.map_err(anyhow::Error::from)?;

    let score = parse_score(&body)?;
    match score {
        Some(score) => tracing::info!(
            "{} {}",
            console::style(url).cyan(),
            console::style(format!("performance {score}/100")).bold()
        ),
        None => tracing::warn!(url, "no performance score in the PageSpeed response"),
    }

    Ok(score)
}
