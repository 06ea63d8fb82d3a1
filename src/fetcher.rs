use std::time::Duration;

use reqwest::Client;

use crate::config::{BROWSER_USER_AGENT, FETCH_TIMEOUT_SECS};
use crate::error::{AppError, Result};

/// One shared client for all watchers and the webhook dispatcher. Connection
/// reuse across poll cycles is the only pooling the scanner needs.
pub fn build_client() -> Client {
    Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
        .build()
        .expect("failed to build http client")
}

/// Fetch one listing page. Non-2xx responses are errors so the caller's
/// consecutive-error accounting sees them the same as network failures.
pub async fn fetch_listing_page(client: &Client, url: &str) -> Result<String> {
    let res = client.get(url).send().await?;
    if !res.status().is_success() {
        return Err(AppError::PageStatus(res.status()));
    }
    Ok(res.text().await?)
}
