//! Shared type definitions and newtypes

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of tracked title
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Anime,
    Manga,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Anime => "anime",
            MediaKind::Manga => "manga",
        }
    }
}

impl FromStr for MediaKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "anime" => Ok(MediaKind::Anime),
            "manga" => Ok(MediaKind::Manga),
            other => Err(Error::InvalidData(format!("unknown media kind '{}'", other))),
        }
    }
}

/// Identifier of an anime or manga entry.
///
/// Anime and manga ids come from separate upstream sequences, so the kind is
/// part of the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MediaId {
    pub kind: MediaKind,
    pub id: i64,
}

impl MediaId {
    pub fn anime(id: i64) -> Self {
        MediaId { kind: MediaKind::Anime, id }
    }

    pub fn manga(id: i64) -> Self {
        MediaId { kind: MediaKind::Manga, id }
    }
}

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind.as_str(), self.id)
    }
}

impl FromStr for MediaId {
    type Err = Error;

    /// Parses the `kind/id` form produced by `Display`
    fn from_str(s: &str) -> Result<Self> {
        let (kind, id) = s
            .split_once('/')
            .ok_or_else(|| Error::InvalidData(format!("malformed media id '{}'", s)))?;
        let id = id
            .parse::<i64>()
            .map_err(|e| Error::InvalidData(format!("malformed media id '{}': {}", s, e)))?;
        Ok(MediaId { kind: kind.parse()?, id })
    }
}
