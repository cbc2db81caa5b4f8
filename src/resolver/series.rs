//! Multi-part series discovery and part enumeration
//!
//! The first part's page announces the part count; every later part is
//! fetched from the same base URL with a `p=N` query.

use super::{PageResolver, VideoInfo, part_url, series_base_url};
use crate::config::ResolverConfig;
use crate::error::ResolveError;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// A multi-part series discovered from its first part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
    /// Page URL without query parameters
    pub base_url: String,
    /// Title of the first part
    pub title: String,
    /// Number of parts, at least 1
    pub count: u32,
}

impl Series {
    /// `(part index, part URL)` for every part, in order
    ///
    /// Each call starts a fresh iteration.
    pub fn parts(&self) -> SeriesParts<'_> {
        SeriesParts {
            series: self,
            next: 1,
        }
    }
}

/// Iterator returned by [`Series::parts`]
#[derive(Debug, Clone)]
pub struct SeriesParts<'a> {
    series: &'a Series,
    next: u32,
}

impl Iterator for SeriesParts<'_> {
    type Item = (u32, String);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.series.count {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some((index, part_url(&self.series.base_url, index)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.series.count + 1).saturating_sub(self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SeriesParts<'_> {}

/// Discovers how many parts a series has
///
/// The page's own part-count marker wins. Without one, successive `p=N`
/// variants are resolved until one fails (bounded by `max_probe_parts`),
/// pausing a random `part_delay_min..=part_delay_max` between probes.
/// A page with neither signal is a single-part series.
pub struct SeriesExpander {
    resolver: Arc<dyn PageResolver>,
    delay_min: Duration,
    delay_max: Duration,
    max_probe_parts: u32,
}

impl SeriesExpander {
    /// Expander using `resolver` and the probing settings from `config`
    pub fn new(resolver: Arc<dyn PageResolver>, config: &ResolverConfig) -> Self {
        Self {
            resolver,
            delay_min: config.part_delay_min,
            delay_max: config.part_delay_max,
            max_probe_parts: config.max_probe_parts.max(1),
        }
    }

    /// Resolve the first part and determine the part count
    pub async fn expand(&self, first_part_url: &str) -> Result<Series, ResolveError> {
        let base_url = series_base_url(first_part_url)?;
        let first = self.resolver.resolve(&part_url(&base_url, 1)).await?;

        let count = match first.part_count {
            Some(count) => count,
            None => self.probe(&base_url).await,
        };

        tracing::info!(base_url = %base_url, title = %first.title, parts = count, "series expanded");

        Ok(Series {
            base_url,
            title: first.title,
            count,
        })
    }

    /// Resolve one part of an expanded series
    pub async fn resolve_part(&self, series: &Series, part: u32) -> Result<VideoInfo, ResolveError> {
        self.resolver.resolve(&part_url(&series.base_url, part)).await
    }

    async fn probe(&self, base_url: &str) -> u32 {
        let mut count = 1;
        while count < self.max_probe_parts {
            self.politeness_delay().await;
            let candidate = count + 1;
            match self.resolver.resolve(&part_url(base_url, candidate)).await {
                Ok(_) => count = candidate,
                Err(e) => {
                    tracing::debug!(part = candidate, error = %e, "probe stopped");
                    break;
                }
            }
        }
        count
    }

    /// Randomized pause between requests for consecutive parts
    ///
    /// A zero upper bound disables the pause.
    pub async fn politeness_delay(&self) {
        if self.delay_max.is_zero() {
            return;
        }
        let min = self.delay_min.as_millis() as u64;
        let max = (self.delay_max.as_millis() as u64).max(min);
        let millis = rand::thread_rng().gen_range(min..=max);
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}
