//! Shared HTTP client construction
//!
//! Page and stream requests go through one client that carries the
//! browser-like headers the content origin expects.

use crate::config::Config;
use crate::error::{Error, Result};
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, REFERER, USER_AGENT};

/// Build the client used by [`HttpPageResolver`](crate::resolver::HttpPageResolver)
/// and [`HttpStreamFetcher`](crate::fetcher::HttpStreamFetcher)
///
/// The request timeout applies per request; a timeout surfaces as a
/// retryable network error.
pub fn build_client(config: &Config) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, header_value("user_agent", &config.fetch.user_agent)?);
    headers.insert(REFERER, header_value("referer", &config.resolver.referer)?);
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"),
    );

    let client = Client::builder()
        .default_headers(headers)
        .timeout(config.fetch.request_timeout)
        .connect_timeout(config.fetch.request_timeout)
        .build()?;
    Ok(client)
}

fn header_value(key: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| Error::Config {
        message: format!("{} is not a valid header value: {}", key, e),
        key: Some(key.to_string()),
    })
}
