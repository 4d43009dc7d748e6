//! List, progress, rating and review mutations

use crate::BackendClient;
use otakudex_core::{OfflineAction, Result};
use tracing::debug;

/// Apply a queued mutation through the remote procedure for its type.
///
/// The payload is sent as the procedure's arguments unchanged, with the
/// action id attached so the backend can log it.
pub async fn apply_action(client: &BackendClient, action: &OfflineAction) -> Result<()> {
    let mut args = action.payload.clone();
    if let Some(map) = args.as_object_mut() {
        map.insert("client_action_id".to_string(), action.id.clone().into());
    }

    debug!("Replaying {} for {}", action.action_type, action.target);
    client.rpc_unit(action.action_type.rpc_name(), &args).await
}
