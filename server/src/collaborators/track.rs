use std::{collections::HashSet, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use tracing::debug;

use super::TrackResolver;

const CATALOG_TIMEOUT: Duration = Duration::from_secs(5);

/// Asks the catalog service over HTTP: `GET {base}/tracks/{trackId}`.
///
/// Any 2xx means the track exists, 404 means it does not, everything else is a failed lookup.
#[derive(Debug, Clone)]
pub struct HttpTrackResolver {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTrackResolver {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url).context("invalid catalog url")?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("catalog url '{}' cannot be used as a base", base_url);
        }

        let client = reqwest::Client::builder()
            .timeout(CATALOG_TIMEOUT)
            .build()
            .context("could not build the catalog http client")?;

        Ok(HttpTrackResolver { client, base_url })
    }

    fn track_url(&self, track_id: &str) -> anyhow::Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("catalog url cannot be used as a base"))?
            .pop_if_empty()
            .push("tracks")
            .push(track_id);

        Ok(url)
    }
}

#[async_trait]
impl TrackResolver for HttpTrackResolver {
    async fn exists(&self, track_id: &str) -> anyhow::Result<bool> {
        let url = self.track_url(track_id)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("catalog request failed")?;
        let status = response.status();

        debug!(track_id, status = status.as_u16(), "catalog lookup");

        if status.is_success() {
            Ok(true)
        } else if status == StatusCode::NOT_FOUND {
            Ok(false)
        } else {
            Err(anyhow::anyhow!("catalog responded with {}", status))
        }
    }
}

/// A fixed set of known tracks
#[derive(Debug, Clone, Default)]
pub struct StaticTrackResolver {
    track_ids: HashSet<String>,
}

impl StaticTrackResolver {
    pub fn new<I, S>(track_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StaticTrackResolver {
            track_ids: track_ids.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl TrackResolver for StaticTrackResolver {
    async fn exists(&self, track_id: &str) -> anyhow::Result<bool> {
        Ok(self.track_ids.contains(track_id))
    }
}

/// Accepts every non-empty track id, for running without a catalog
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyTrackResolver;

#[async_trait]
impl TrackResolver for AnyTrackResolver {
    async fn exists(&self, track_id: &str) -> anyhow::Result<bool> {
        Ok(!track_id.trim().is_empty())
    }
}
