//! Mock content site and fake muxer executables

use std::path::{Path, PathBuf};
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Video stream payload served by [`ContentSite`]
pub const VIDEO_BODY: &[u8] = b"VIDEO-STREAM-BYTES-0123456789";

/// Audio stream payload served by [`ContentSite`]
pub const AUDIO_BODY: &[u8] = b"AUDIO-STREAM-BYTES";

/// Page markup with a title, an embedded playback blob and extra body text
pub fn page_html(title: &str, video_url: &str, audio_url: &str, extra: &str) -> String {
    format!(
        r#"<html><head><title data-vue-meta="true">{title}</title></head><body>
<script>window.__playinfo__={{"code":0,"data":{{"dash":{{"video":[{{"baseUrl":"{video_url}"}}],"audio":[{{"baseUrl":"{audio_url}"}}]}}}}}}</script>
<div class="meta">{extra}</div></body></html>"#
    )
}

/// Wiremock server standing in for the content site and its stream CDN
pub struct ContentSite {
    pub server: MockServer,
}

impl ContentSite {
    pub async fn start() -> Self {
        let site = Self {
            server: MockServer::start().await,
        };
        site.mount_streams().await;
        site
    }

    /// Serve the two stream payloads under `/cdn/`
    pub async fn mount_streams(&self) {
        Mock::given(method("GET"))
            .and(path("/cdn/video.m4s"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(VIDEO_BODY))
            .mount(&self.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/cdn/audio.m4s"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(AUDIO_BODY))
            .mount(&self.server)
            .await;
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Public URL of the page at `/video/{bvid}`, first part
    pub fn page_url(&self, bvid: &str) -> String {
        format!("{}/video/{}?p=1", self.uri(), bvid)
    }

    /// Serve a single page whose streams point at the mock CDN
    pub async fn serve_page(&self, bvid: &str, title: &str, extra: &str) {
        let html = page_html(
            title,
            &format!("{}/cdn/video.m4s", self.uri()),
            &format!("{}/cdn/audio.m4s", self.uri()),
            extra,
        );
        Mock::given(method("GET"))
            .and(path(format!("/video/{}", bvid)))
            .respond_with(ResponseTemplate::new(200).set_body_string(html))
            .mount(&self.server)
            .await;
    }

    /// Serve part `part` of a series; takes precedence over [`Self::serve_page`]
    pub async fn serve_part(&self, bvid: &str, part: u32, title: &str) {
        let html = page_html(
            title,
            &format!("{}/cdn/video.m4s", self.uri()),
            &format!("{}/cdn/audio.m4s", self.uri()),
            "",
        );
        Mock::given(method("GET"))
            .and(path(format!("/video/{}", bvid)))
            .and(query_param("p", part.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_string(html))
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Answer every request for the page with `status`
    pub async fn serve_status(&self, bvid: &str, status: u16) {
        Mock::given(method("GET"))
            .and(path(format!("/video/{}", bvid)))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }
}

#[cfg(unix)]
fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Muxer that writes `video || audio` to its last argument
#[cfg(unix)]
pub fn concatenating_muxer(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "fake-ffmpeg",
        r#"for out; do :; done
cat "$2" "$4" > "$out""#,
    )
}

/// Muxer that always exits non-zero
#[cfg(unix)]
pub fn failing_muxer(dir: &Path) -> PathBuf {
    write_script(dir, "broken-ffmpeg", "echo 'codec not supported' >&2\nexit 1")
}

/// Configuration rooted at `dir` that runs `muxer`
pub fn e2e_config(dir: &Path, muxer: PathBuf) -> dash_dl::Config {
    let mut config = dash_dl::Config::default();
    config.download.download_dir = dir.join("downloads");
    config.download.temp_dir = dir.join("temp");
    config.download.max_concurrent_downloads = 2;
    config.fetch.retry_count = 1;
    config.fetch.retry_delay = Duration::from_millis(10);
    config.fetch.request_timeout = Duration::from_secs(5);
    config.resolver.part_delay_min = Duration::ZERO;
    config.resolver.part_delay_max = Duration::ZERO;
    config.tools.muxer_path = Some(muxer);
    config.tools.search_path = false;
    config.persistence.tasks_file = dir.join("data/tasks.json");
    config
}
