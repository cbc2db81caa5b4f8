//! Markup scraping for content pages
//!
//! The page contract is owned by the upstream site and changes without notice,
//! so everything pattern-specific lives here behind [`parse_page`].

use crate::error::ResolveError;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

static TITLE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>([^<]+)</title>").unwrap());

static PLAYINFO_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)window\.__playinfo__\s*=\s*(\{.*?\})\s*</script>").unwrap()
});

static PART_COUNT_REGEXES: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(r"共\s*(\d+)\s*[Pp]").unwrap(),
        Regex::new(r"(?i)\b(\d+)\s*parts\b").unwrap(),
    ]
});

/// Title and first stream candidates extracted from one page
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedPage {
    pub title: String,
    pub video_url: Option<String>,
    pub audio_url: Option<String>,
    pub part_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct PlayInfo {
    data: PlayInfoData,
}

#[derive(Debug, Deserialize)]
struct PlayInfoData {
    dash: Dash,
}

#[derive(Debug, Deserialize)]
struct Dash {
    #[serde(default)]
    video: Option<Vec<DashStream>>,
    #[serde(default)]
    audio: Option<Vec<DashStream>>,
}

#[derive(Debug, Deserialize)]
struct DashStream {
    #[serde(rename = "baseUrl", alias = "base_url")]
    base_url: String,
}

#[inline]
fn capture_group_1<'a>(re: &Regex, input: &'a str) -> Option<&'a str> {
    re.captures(input)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Extract title, stream URLs and the optional part-count marker
///
/// Fails unless the page has a title and a playback blob naming at least one
/// stream.
pub(crate) fn parse_page(html: &str) -> Result<ParsedPage, ResolveError> {
    let title = capture_group_1(&TITLE_REGEX, html)
        .map(|t| decode_entities(t.trim()))
        .filter(|t| !t.is_empty())
        .ok_or(ResolveError::MissingTitle)?;

    let raw = capture_group_1(&PLAYINFO_REGEX, html).ok_or(ResolveError::MissingPlayInfo)?;
    let (video_url, audio_url) = parse_play_info(raw)?;

    Ok(ParsedPage {
        title,
        video_url,
        audio_url,
        part_count: parse_part_count(html),
    })
}

/// First video and audio `baseUrl` from a playback-info JSON blob
pub(crate) fn parse_play_info(
    raw: &str,
) -> Result<(Option<String>, Option<String>), ResolveError> {
    let info: PlayInfo =
        serde_json::from_str(raw).map_err(|e| ResolveError::malformed(e.to_string(), raw))?;

    let first = |streams: Option<Vec<DashStream>>| {
        streams
            .and_then(|s| s.into_iter().next())
            .map(|s| s.base_url)
            .filter(|u| !u.is_empty())
    };

    let video = first(info.data.dash.video);
    let audio = first(info.data.dash.audio);

    if video.is_none() && audio.is_none() {
        return Err(ResolveError::NoStreams);
    }
    Ok((video, audio))
}

/// Explicit "N parts" marker, if the page has one
pub(crate) fn parse_part_count(html: &str) -> Option<u32> {
    PART_COUNT_REGEXES
        .iter()
        .find_map(|re| capture_group_1(re, html))
        .and_then(|n| n.parse::<u32>().ok())
        .filter(|n| *n >= 1)
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn page(title: &str, playinfo: &str) -> String {
        format!(
            "<html><head><title data-vue-meta=\"true\">{title}</title></head><body>\
             <script>window.__playinfo__={playinfo}</script></body></html>"
        )
    }

    const BOTH: &str = r#"{"code":0,"data":{"dash":{"video":[{"baseUrl":"https://cdn/v1.m4s"},{"baseUrl":"https://cdn/v2.m4s"}],"audio":[{"baseUrl":"https://cdn/a1.m4s"}]}}}"#;

    #[test]
    fn extracts_title_and_first_candidates() {
        let parsed = parse_page(&page("  Demo &amp; Friends ", BOTH)).unwrap();

        assert_eq!(parsed.title, "Demo & Friends");
        assert_eq!(parsed.video_url.as_deref(), Some("https://cdn/v1.m4s"));
        assert_eq!(parsed.audio_url.as_deref(), Some("https://cdn/a1.m4s"));
        assert_eq!(parsed.part_count, None);
    }

    #[test]
    fn audio_only_playinfo_is_accepted() {
        let parsed = parse_page(&page(
            "Podcast",
            r#"{"data":{"dash":{"audio":[{"baseUrl":"https://cdn/a.m4s"}]}}}"#,
        ))
        .unwrap();

        assert!(parsed.video_url.is_none());
        assert!(parsed.audio_url.is_some());
    }

    #[test]
    fn title_without_playinfo_is_fatal() {
        let html = "<html><title>Only a title</title></html>";
        assert!(matches!(parse_page(html), Err(ResolveError::MissingPlayInfo)));
    }

    #[test]
    fn missing_title_is_fatal() {
        let html = format!("<script>window.__playinfo__={BOTH}</script>");
        assert!(matches!(parse_page(&html), Err(ResolveError::MissingTitle)));
    }

    #[test]
    fn empty_stream_lists_are_fatal() {
        let html = page("Demo", r#"{"data":{"dash":{"video":[],"audio":null}}}"#);
        assert!(matches!(parse_page(&html), Err(ResolveError::NoStreams)));
    }

    #[test]
    fn wrong_shape_is_malformed_with_snippet() {
        let html = page("Demo", r#"{"data":{"durl":[{"url":"x"}]}}"#);
        match parse_page(&html) {
            Err(ResolveError::MalformedPlayInfo { snippet, .. }) => {
                assert!(snippet.contains("durl"))
            }
            other => panic!("expected malformed error, got {other:?}"),
        }
    }

    #[test]
    fn part_count_marker_variants() {
        assert_eq!(parse_part_count("<span>(1/12) 共12P</span>"), Some(12));
        assert_eq!(parse_part_count("共 3 P"), Some(3));
        assert_eq!(parse_part_count("this lecture has 4 parts"), Some(4));
        assert_eq!(parse_part_count("共0P"), None);
        assert_eq!(parse_part_count("no marker here"), None);
    }
}
