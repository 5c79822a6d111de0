//! ChangeSource port - watch/subscription feed of "resource X changed".

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{ChangeEvent, ResourceKey};
use crate::error::SourceError;

/// Notifications are hints. After every (re)connect the consumer calls
/// `list` and treats every key as changed, so missed events are harmless.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Full listing of current keys.
    async fn list(&self) -> Result<Vec<ResourceKey>, SourceError>;

    /// Subscribe to changes. The receiver closing means the subscription
    /// was lost and must be re-established.
    async fn watch(&self) -> Result<mpsc::Receiver<ChangeEvent>, SourceError>;
}
