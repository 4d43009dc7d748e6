//! Reward and ledger remote procedures

use crate::BackendClient;
use otakudex_core::{BoxType, Error, Result, RewardResult, UserRewardState};
use serde_json::json;
use tracing::info;

/// Open a box server-side (`open_loot_box`)
pub async fn open_loot_box(
    client: &BackendClient,
    user_id: &str,
    box_type: BoxType,
) -> Result<RewardResult> {
    let result: RewardResult = client
        .rpc("open_loot_box", &json!({ "user_id": user_id, "box_type": box_type }))
        .await?;

    let result = check_reward(result)?;
    info!("Opened {} box: {} ({})", box_type, result.name, result.tier);
    Ok(result)
}

/// Apply a point delta (`add_user_points`). Returns whether it was applied.
pub async fn add_user_points(client: &BackendClient, user_id: &str, delta: i64) -> Result<bool> {
    client
        .rpc("add_user_points", &json!({ "user_id": user_id, "delta": delta }))
        .await
}

/// Fetch the user's reward summary (`get_user_summary`)
pub async fn get_user_summary(client: &BackendClient, user_id: &str) -> Result<UserRewardState> {
    let state: UserRewardState = client
        .rpc("get_user_summary", &json!({ "user_id": user_id }))
        .await?;
    check_summary(state)
}

fn check_reward(result: RewardResult) -> Result<RewardResult> {
    if result.name.trim().is_empty() {
        return Err(Error::InvalidData("open_loot_box returned an empty name".to_string()));
    }
    Ok(result)
}

fn check_summary(state: UserRewardState) -> Result<UserRewardState> {
    if state.total_points < 0 || state.daily_points < 0 {
        return Err(Error::InvalidData(format!(
            "summary for {} has negative points",
            state.user_id
        )));
    }
    Ok(state)
}
