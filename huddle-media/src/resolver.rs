//! Trait definition for pluggable media resolvers.

use crate::error::Result;
use crate::types::TrackInfo;
use async_trait::async_trait;

/// A media lookup backend.
///
/// Both operations are slow (seconds) and usually rate limited upstream;
/// callers are expected to cache results and bound each call with a timeout.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Search for up to `limit` candidate tracks matching `query`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::MediaError`] when the backend fails. An empty result
    /// set is `Ok(vec![])`, not an error.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<TrackInfo>>;

    /// Resolve a platform page URL into a directly playable stream URL.
    ///
    /// # Errors
    ///
    /// Returns [`crate::MediaError`] when the backend fails or yields nothing.
    async fn stream_url(&self, source: &str) -> Result<String>;
}
