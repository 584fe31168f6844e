use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;

use crate::config::CallbackConfig;
use crate::models::{AsyncSearchRequest, SearchRequest};
use crate::search::SearchService;

/// Runs the whole pipeline out of band and delivers the JSON result to the
/// callback endpoint with basic auth. One delivery attempt only: a non-2xx
/// answer is logged for observability, never retried. The callback's status
/// and body are returned to the job runner.
pub async fn async_search(
    search: &SearchService,
    callback: &CallbackConfig,
    request: &AsyncSearchRequest,
) -> Result<(u16, String)> {
    let outcome = search
        .answer(&SearchRequest {
            query: request.query.clone(),
            category: request.category.clone(),
            engine: request.engine.clone(),
            k: None,
            session_id: None,
        })
        .await?;

    let client = Client::builder()
        .timeout(Duration::from_secs(callback.timeout_secs))
        .build()
        .context("failed to build the callback HTTP client")?;

    let response = client
        .post(&request.callback_url)
        .basic_auth(&callback.username, Some(&callback.password))
        .json(&outcome)
        .send()
        .await
        .with_context(|| format!("failed to deliver result to {}", request.callback_url))?;

    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();

    if !(200..300).contains(&status) {
        tracing::warn!(status, body = %body, "callback endpoint answered non-2xx; not retrying");
    }

    Ok((status, body))
}

/// Fire-and-forget entry point used by the HTTP layer: the job runs on its
/// own task, outcomes only reach the logs.
pub fn schedule(search: SearchService, callback: CallbackConfig, request: AsyncSearchRequest) {
    tokio::spawn(async move {
        match async_search(&search, &callback, &request).await {
            Ok((status, _body)) => {
                tracing::info!(status, url = %request.callback_url, "async search callback delivered");
            }
            Err(err) => {
                tracing::error!("async search failed: {err:#}");
            }
        }
    });
}
