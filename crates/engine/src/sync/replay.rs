//! Remote side of offline replay

use otakudex_core::{OfflineAction, Result};
use otakudex_networking::{api, BackendClient};
use std::future::Future;

/// Sends one queued mutation to the backend.
///
/// An `Ok` means the backend accepted it and the action can be dropped.
pub trait ActionReplayer: Send + Sync {
    fn replay(&self, action: &OfflineAction) -> impl Future<Output = Result<()>> + Send;
}

impl ActionReplayer for BackendClient {
    async fn replay(&self, action: &OfflineAction) -> Result<()> {
        api::apply_action(self, action).await
    }
}
