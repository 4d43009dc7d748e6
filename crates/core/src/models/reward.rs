//! Reward tiers, box types and the collectible catalog

use crate::errors::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Rarity class of a collectible name, rarest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RewardTier {
    God,
    Legendary,
    Epic,
    Rare,
    Uncommon,
    Common,
}

impl RewardTier {
    /// Every tier in the order draws are resolved (rarest first)
    pub const ALL: [RewardTier; 6] = [
        RewardTier::God,
        RewardTier::Legendary,
        RewardTier::Epic,
        RewardTier::Rare,
        RewardTier::Uncommon,
        RewardTier::Common,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RewardTier::God => "GOD",
            RewardTier::Legendary => "LEGENDARY",
            RewardTier::Epic => "EPIC",
            RewardTier::Rare => "RARE",
            RewardTier::Uncommon => "UNCOMMON",
            RewardTier::Common => "COMMON",
        }
    }

    /// Position in `ALL`
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for RewardTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RewardTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        RewardTier::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidData(format!("unknown reward tier '{}'", s)))
    }
}

/// Openable container whose odds depend on its type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxType {
    Standard,
    Premium,
    Ultra,
}

impl BoxType {
    pub const ALL: [BoxType; 3] = [BoxType::Standard, BoxType::Premium, BoxType::Ultra];

    /// Price in points when bought through the ledger
    pub fn cost(&self) -> i64 {
        match self {
            BoxType::Standard => 100,
            BoxType::Premium => 300,
            BoxType::Ultra => 1000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BoxType::Standard => "standard",
            BoxType::Premium => "premium",
            BoxType::Ultra => "ultra",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BoxType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        BoxType::ALL
            .into_iter()
            .find(|b| b.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidData(format!("unknown box type '{}'", s)))
    }
}

/// Where a catalog name comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RewardSource {
    /// A character from a tracked title
    Character {
        anime_title: String,
        character_id: i64,
    },
    /// A name produced by a generator (e.g. "syllable", "wordlist")
    Generated { method: String },
}

impl RewardSource {
    /// Attribution shown next to the name, if any
    pub fn attribution(&self) -> Option<String> {
        match self {
            RewardSource::Character { anime_title, .. } => Some(anime_title.clone()),
            RewardSource::Generated { .. } => None,
        }
    }
}

/// One name in the collectible catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub tier: RewardTier,
    pub source: RewardSource,
}

impl CatalogEntry {
    /// Parse and validate an entry coming from outside the core
    /// (seed files, backend payloads).
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let entry: CatalogEntry = serde_json::from_value(value)?;
        entry.validate()?;
        Ok(entry)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidData("catalog entry has an empty name".to_string()));
        }
        match &self.source {
            RewardSource::Character { anime_title, character_id } => {
                if anime_title.trim().is_empty() {
                    return Err(Error::InvalidData(format!(
                        "character '{}' has no anime title",
                        self.name
                    )));
                }
                if *character_id <= 0 {
                    return Err(Error::InvalidData(format!(
                        "character '{}' has invalid id {}",
                        self.name, character_id
                    )));
                }
            }
            RewardSource::Generated { method } => {
                if method.trim().is_empty() {
                    return Err(Error::InvalidData(format!(
                        "generated name '{}' has no method",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Outcome of opening one box
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardResult {
    pub name: String,
    pub tier: RewardTier,
    #[serde(default)]
    pub source_attribution: Option<String>,
    pub is_first_time_acquisition: bool,
}

/// Row of a user's acquisition history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acquisition {
    pub user_id: String,
    pub name: String,
    pub tier: RewardTier,
    pub source_attribution: Option<String>,
    pub box_type: BoxType,
    pub acquired_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tier_order_is_rarest_first() {
        assert!(RewardTier::God < RewardTier::Legendary);
        assert!(RewardTier::Uncommon < RewardTier::Common);
        assert_eq!(RewardTier::ALL[RewardTier::Rare.index()], RewardTier::Rare);
    }

    #[test]
    fn test_tier_and_box_parse() {
        assert_eq!("legendary".parse::<RewardTier>().unwrap(), RewardTier::Legendary);
        assert_eq!("ULTRA".parse::<BoxType>().unwrap(), BoxType::Ultra);
        assert!("mythic".parse::<RewardTier>().is_err());
        assert_eq!(serde_json::to_value(RewardTier::God).unwrap(), json!("GOD"));
        assert_eq!(serde_json::to_value(BoxType::Premium).unwrap(), json!("premium"));
    }

    #[test]
    fn test_catalog_entry_boundary_validation() {
        let entry = CatalogEntry::from_json(json!({
            "name": "Spike Spiegel",
            "tier": "EPIC",
            "source": { "kind": "character", "anime_title": "Cowboy Bebop", "character_id": 1 }
        }))
        .unwrap();
        assert_eq!(entry.source.attribution().as_deref(), Some("Cowboy Bebop"));

        // Character variant requires its title
        let missing = CatalogEntry::from_json(json!({
            "name": "Nameless",
            "tier": "RARE",
            "source": { "kind": "character", "character_id": 7 }
        }));
        assert!(matches!(missing, Err(Error::InvalidData(_))));

        let blank = CatalogEntry::from_json(json!({
            "name": "  ",
            "tier": "COMMON",
            "source": { "kind": "generated", "method": "syllable" }
        }));
        assert!(blank.is_err());
    }
}
