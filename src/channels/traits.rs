use crate::error::Result;
use async_trait::async_trait;

/// Text channel contract. Chat-platform adapters only need to implement this trait.
#[async_trait]
pub trait TextChannel: Send + Sync {
    /// Stable channel identifier (platform channel id).
    fn id(&self) -> &str;

    /// Post a message to the channel.
    async fn post(&self, text: &str) -> Result<()>;
}
