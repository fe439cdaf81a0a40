//! Narrow interfaces to the services a jam room depends on but does not own.

use async_trait::async_trait;
use axum::http::HeaderMap;

mod identity;
mod track;

pub use self::identity::HeaderIdentityProvider;
pub use self::track::{AnyTrackResolver, HttpTrackResolver, StaticTrackResolver};

/// Confirms that a track exists in the catalog.
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// `Ok(false)` when the catalog does not know the track,
    /// `Err` when the catalog could not be asked.
    async fn exists(&self, track_id: &str) -> anyhow::Result<bool>;
}

/// Resolves the authenticated user of an inbound request.
pub trait IdentityProvider: Send + Sync {
    fn user_from_headers(&self, headers: &HeaderMap) -> Option<String>;
}
