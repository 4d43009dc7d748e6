//! Locally cached anime/manga records

use crate::types::{MediaId, MediaKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Type-specific fields of a cached title
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MediaDetails {
    Anime {
        episodes: Option<u32>,
        status: Option<String>,
    },
    Manga {
        chapters: Option<u32>,
        volumes: Option<u32>,
        status: Option<String>,
    },
}

impl MediaDetails {
    pub fn kind(&self) -> MediaKind {
        match self {
            MediaDetails::Anime { .. } => MediaKind::Anime,
            MediaDetails::Manga { .. } => MediaKind::Manga,
        }
    }
}

/// Detail record kept for offline viewing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedMedia {
    pub id: MediaId,
    pub title: String,
    pub image_url: Option<String>,
    pub synopsis: Option<String>,
    pub score: Option<f64>,
    pub details: MediaDetails,
    /// Set by the store on every put
    pub cached_at: DateTime<Utc>,
}

/// Past search query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchEntry {
    pub query: String,
    pub searched_at: DateTime<Utc>,
}
