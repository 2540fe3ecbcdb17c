//! Cached record shapes
//!
//! Serialized snapshots of domain objects. They are projections of the
//! databases; losing one only costs latency.

use crate::CacheKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two kinds of user content that carry counters, comments and views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Artwork,
    Trend,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Artwork => "artwork",
            ContentKind::Trend => "trend",
        }
    }

    pub fn detail_key(&self, id: &str) -> String {
        match self {
            ContentKind::Artwork => CacheKey::artwork_detail(id),
            ContentKind::Trend => CacheKey::trend_detail(id),
        }
    }

    pub fn count_key(&self, id: &str) -> String {
        match self {
            ContentKind::Artwork => CacheKey::artwork_count(id),
            ContentKind::Trend => CacheKey::trend_count(id),
        }
    }

    pub fn view_key(&self, id: &str) -> String {
        match self {
            ContentKind::Artwork => CacheKey::artwork_view(id),
            ContentKind::Trend => CacheKey::trend_view(id),
        }
    }

    /// The author's list of published items of this kind
    pub fn author_list_key(&self, author_id: &str) -> String {
        match self {
            ContentKind::Artwork => CacheKey::user_art(author_id),
            ContentKind::Trend => CacheKey::user_trend(author_id),
        }
    }
}

/// Artwork detail page, counts embedded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtworkDetail {
    pub id: String,
    pub author_id: String,
    pub title: String,
    pub description: Option<String>,
    pub image_urls: Vec<String>,
    pub tags: Vec<String>,
    pub like_count: i64,
    pub collect_count: i64,
    pub comment_count: i64,
    pub view_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Trend (short post) detail, counts embedded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendDetail {
    pub id: String,
    pub author_id: String,
    pub content: String,
    pub image_urls: Vec<String>,
    pub topic_id: Option<String>,
    pub like_count: i64,
    pub comment_count: i64,
    pub forward_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Profile panel, follower/following/like totals embedded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub nickname: String,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub follower_count: i64,
    pub following_count: i64,
    pub like_count: i64,
    pub art_count: i64,
    pub trend_count: i64,
}

/// Big-card shown on hover and in recommendation rails
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCard {
    pub id: String,
    pub nickname: String,
    pub avatar_url: Option<String>,
    pub follower_count: i64,
    pub recent_art_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicDetail {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub trend_count: i64,
    pub follower_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagSummary {
    pub id: String,
    pub name: String,
    pub art_count: i64,
}

/// One ranked row of a hot list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankEntry {
    pub id: String,
    pub score: f64,
}

/// Hot/rank list computed by an out-of-band job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankSnapshot {
    pub entries: Vec<RankEntry>,
    pub computed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_kind_keys() {
        assert_eq!(ContentKind::Artwork.count_key("5"), "artwork:count:5");
        assert_eq!(ContentKind::Trend.detail_key("5"), "trend:detail:5");
        assert_eq!(ContentKind::Trend.view_key("5"), "trend:view:5");
        assert_eq!(ContentKind::Artwork.author_list_key("9"), "user:art:9");
    }

    #[test]
    fn test_content_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ContentKind::Artwork).unwrap(),
            "\"artwork\""
        );
    }
}
