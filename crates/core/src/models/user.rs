//! Per-user reward state and point-earning activities

use super::reward::{BoxType, RewardTier};
use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Reward state of a single user (mirrors `get_user_summary`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRewardState {
    pub user_id: String,
    pub total_points: i64,
    pub daily_points: i64,
    pub login_streak: u32,
    #[serde(default)]
    pub owned_boxes: BTreeMap<BoxType, u32>,
    pub current_active_name: String,
    pub current_active_tier: RewardTier,
    #[serde(default)]
    pub archived: bool,
}

impl UserRewardState {
    /// Boxes of the given type the user can open
    pub fn boxes(&self, box_type: BoxType) -> u32 {
        self.owned_boxes.get(&box_type).copied().unwrap_or(0)
    }
}

/// Kind of ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    DailyLogin,
    AddToList,
    UpdateProgress,
    RateTitle,
    WriteReview,
    CompleteTitle,
    /// Points spent on a box
    BoxPurchase,
    /// Manual adjustment by an operator
    Adjustment,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::DailyLogin => "daily_login",
            ActivityType::AddToList => "add_to_list",
            ActivityType::UpdateProgress => "update_progress",
            ActivityType::RateTitle => "rate_title",
            ActivityType::WriteReview => "write_review",
            ActivityType::CompleteTitle => "complete_title",
            ActivityType::BoxPurchase => "box_purchase",
            ActivityType::Adjustment => "adjustment",
        }
    }

    /// Points usually granted for this activity
    pub fn default_points(&self) -> i64 {
        match self {
            ActivityType::DailyLogin => 10,
            ActivityType::AddToList => 5,
            ActivityType::UpdateProgress => 1,
            ActivityType::RateTitle => 3,
            ActivityType::WriteReview => 15,
            ActivityType::CompleteTitle => 25,
            ActivityType::BoxPurchase | ActivityType::Adjustment => 0,
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "daily_login" => ActivityType::DailyLogin,
            "add_to_list" => ActivityType::AddToList,
            "update_progress" => ActivityType::UpdateProgress,
            "rate_title" => ActivityType::RateTitle,
            "write_review" => ActivityType::WriteReview,
            "complete_title" => ActivityType::CompleteTitle,
            "box_purchase" => ActivityType::BoxPurchase,
            "adjustment" => ActivityType::Adjustment,
            other => return Err(Error::InvalidData(format!("unknown activity '{}'", other))),
        })
    }
}

/// Result of recording a daily login
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginOutcome {
    pub login_streak: u32,
    /// Zero when the user already logged in today
    pub points_awarded: i64,
}

impl LoginOutcome {
    /// Points for a login that extends the streak to `streak` days
    pub fn points_for_streak(streak: u32) -> i64 {
        ActivityType::DailyLogin.default_points() + 5 * i64::from(streak.min(7))
    }
}
