//! Page resolution and series expansion
//!
//! [`PageResolver`] turns a content page URL into a [`VideoInfo`]: the page
//! title plus the first video and audio stream candidates from the embedded
//! playback info. [`SeriesExpander`] builds on it to enumerate the parts of a
//! multi-part series.
//!
//! The scraping contract is fragile and owned by the upstream site, so callers
//! should treat [`ResolveError`] as an expected condition that may succeed on a
//! later retry.

mod parse;
mod series;

pub use series::{Series, SeriesExpander, SeriesParts};

use crate::error::ResolveError;
use async_trait::async_trait;
use reqwest::Client;
use url::Url;

/// Query parameters that select a part of a multi-part page
const PART_PARAM: &str = "p";

/// Stream locations for one part of a content page
///
/// At least one of `video_url`/`audio_url` is always present; a page without
/// either fails resolution instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoInfo {
    /// Page title
    pub title: String,
    /// First video-only stream candidate
    pub video_url: Option<String>,
    /// First audio-only stream candidate
    pub audio_url: Option<String>,
    /// 1-based part index taken from the page URL
    pub part_index: u32,
    /// Part count advertised by the page, when it has a marker for it
    pub part_count: Option<u32>,
}

/// Resolves content page URLs into stream URLs
#[async_trait]
pub trait PageResolver: Send + Sync {
    /// Fetch `url` and extract its title and stream candidates
    async fn resolve(&self, url: &str) -> Result<VideoInfo, ResolveError>;
}

/// [`PageResolver`] that scrapes the page over HTTP
#[derive(Clone, Debug)]
pub struct HttpPageResolver {
    client: Client,
}

impl HttpPageResolver {
    /// Resolver using `client` (see [`crate::http::build_client`] for the expected headers)
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageResolver for HttpPageResolver {
    async fn resolve(&self, url: &str) -> Result<VideoInfo, ResolveError> {
        let (page_url, part_index) = normalize_url(url)?;
        tracing::debug!(url = %page_url, part = part_index, "resolving page");

        let response = self
            .client
            .get(page_url.as_str())
            .send()
            .await
            .map_err(|source| ResolveError::Network {
                url: page_url.clone(),
                source,
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ResolveError::HttpStatus {
                url: page_url,
                status: status.as_u16(),
            });
        }

        let html = response
            .text()
            .await
            .map_err(|source| ResolveError::Network {
                url: page_url.clone(),
                source,
            })?;

        let parsed = parse::parse_page(&html)?;
        tracing::debug!(
            url = %page_url,
            title = %parsed.title,
            has_video = parsed.video_url.is_some(),
            has_audio = parsed.audio_url.is_some(),
            "page resolved"
        );

        Ok(VideoInfo {
            title: parsed.title,
            video_url: parsed.video_url,
            audio_url: parsed.audio_url,
            part_index,
            part_count: parsed.part_count,
        })
    }
}

/// Canonical fetch URL and 1-based part index for a page URL
///
/// Tracking and other query parameters are dropped; the part parameter is
/// kept only when it selects a part other than the first.
///
/// # Examples
///
/// ```
/// use dash_dl::resolver::normalize_url;
///
/// let (url, part) = normalize_url("https://host/video/BV1?p=3&spm=abc#reply").unwrap();
/// assert_eq!(url, "https://host/video/BV1?p=3");
/// assert_eq!(part, 3);
///
/// let (url, part) = normalize_url("https://host/video/BV1?p=1").unwrap();
/// assert_eq!(url, "https://host/video/BV1");
/// assert_eq!(part, 1);
/// ```
pub fn normalize_url(url: &str) -> Result<(String, u32), ResolveError> {
    let mut parsed = parse_url(url)?;
    let part = part_index(&parsed);

    parsed.set_fragment(None);
    parsed.set_query(None);
    if part > 1 {
        parsed
            .query_pairs_mut()
            .append_pair(PART_PARAM, &part.to_string());
    }
    Ok((parsed.to_string(), part))
}

/// Page URL with every query parameter removed, used as the series base
pub fn series_base_url(url: &str) -> Result<String, ResolveError> {
    let mut parsed = parse_url(url)?;
    parsed.set_fragment(None);
    parsed.set_query(None);
    Ok(parsed.to_string())
}

/// URL of part `part` of the series rooted at `base`
pub fn part_url(base: &str, part: u32) -> String {
    match Url::parse(base) {
        Ok(mut url) => {
            url.query_pairs_mut()
                .append_pair(PART_PARAM, &part.to_string());
            url.to_string()
        }
        Err(_) => format!("{}?{}={}", base, PART_PARAM, part),
    }
}

fn parse_url(url: &str) -> Result<Url, ResolveError> {
    Url::parse(url.trim()).map_err(|e| ResolveError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

fn part_index(url: &Url) -> u32 {
    url.query_pairs()
        .find(|(k, _)| k == PART_PARAM)
        .and_then(|(_, v)| v.parse::<u32>().ok())
        .filter(|p| *p >= 1)
        .unwrap_or(1)
}
