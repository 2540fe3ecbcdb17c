//! Unified cache key schema
//!
//! Every key used by the layer is built here.
//! Key format: {domain}:{subject}:{id}

/// Cache key builder
pub struct CacheKey;

impl CacheKey {
    // ============= Artwork Keys =============

    /// Serialized artwork detail (embeds counts, deleted on interaction)
    /// Format: artwork:detail:{id}
    pub fn artwork_detail(artwork_id: &str) -> String {
        format!("artwork:detail:{}", artwork_id)
    }

    /// Artwork counter hash
    /// Format: artwork:count:{id}
    pub fn artwork_count(artwork_id: &str) -> String {
        format!("artwork:count:{}", artwork_id)
    }

    /// Approximate unique viewers of an artwork
    pub fn artwork_view(artwork_id: &str) -> String {
        format!("artwork:view:{}", artwork_id)
    }

    // ============= Trend Keys =============

    /// Format: trend:detail:{id}
    pub fn trend_detail(trend_id: &str) -> String {
        format!("trend:detail:{}", trend_id)
    }

    /// Format: trend:count:{id}
    pub fn trend_count(trend_id: &str) -> String {
        format!("trend:count:{}", trend_id)
    }

    pub fn trend_view(trend_id: &str) -> String {
        format!("trend:view:{}", trend_id)
    }

    // ============= User Keys =============

    /// Profile panel (embeds follower/following/like totals)
    /// Format: user:profile:{id}
    pub fn user_profile(user_id: &str) -> String {
        format!("user:profile:{}", user_id)
    }

    /// Big-card shown on hover and in recommendation rails
    pub fn user_card(user_id: &str) -> String {
        format!("user:card:{}", user_id)
    }

    /// User counter hash
    /// Format: user:count:{id}
    pub fn user_count(user_id: &str) -> String {
        format!("user:count:{}", user_id)
    }

    /// Content the user liked, scored by like time
    pub fn user_like(user_id: &str) -> String {
        format!("user:like:{}", user_id)
    }

    /// Content the user collected, scored by collect time
    pub fn user_collect(user_id: &str) -> String {
        format!("user:collect:{}", user_id)
    }

    /// Users this user follows
    pub fn user_follow(user_id: &str) -> String {
        format!("user:follow:{}", user_id)
    }

    /// Users following this user
    pub fn user_fans(user_id: &str) -> String {
        format!("user:fans:{}", user_id)
    }

    /// Artworks published by the user
    pub fn user_art(user_id: &str) -> String {
        format!("user:art:{}", user_id)
    }

    /// Trends published by the user
    pub fn user_trend(user_id: &str) -> String {
        format!("user:trend:{}", user_id)
    }

    /// Items already shown to the user in recommendation rails
    pub fn user_seen(user_id: &str) -> String {
        format!("user:seen:{}", user_id)
    }

    // ============= Comment Keys =============

    /// Root comments under one piece of content
    /// Format: comment:rootList:{content_id}
    pub fn comment_root_list(content_id: &str) -> String {
        format!("comment:rootList:{}", content_id)
    }

    /// Replies under one root comment
    /// Format: comment:childList:{root_id}
    pub fn comment_child_list(root_id: &str) -> String {
        format!("comment:childList:{}", root_id)
    }

    // ============= Topic / Tag Keys =============

    pub fn topic_detail(topic_id: &str) -> String {
        format!("topic:detail:{}", topic_id)
    }

    pub fn tag_summary(tag_id: &str) -> String {
        format!("tag:summary:{}", tag_id)
    }

    // ============= Rank / Misc =============

    /// Hot/rank snapshot, written by out-of-band jobs
    /// Format: rank:{kind}
    pub fn rank(kind: &str) -> String {
        format!("rank:{}", kind)
    }

    /// Short-lived verification code
    /// Format: verify:{purpose}:{target}
    pub fn verify_code(purpose: &str, target: &str) -> String {
        format!("verify:{}:{}", purpose, target.to_lowercase())
    }

    /// Stream consumed by the image-processing worker
    pub fn image_task_stream() -> String {
        "stream:image:tasks".to_string()
    }

    // ============= Utility =============

    /// Extract the domain segment of a key, used as the metrics label
    pub fn entity_type(key: &str) -> Option<&str> {
        match key.split_once(':') {
            Some((domain, rest)) if !domain.is_empty() && !rest.is_empty() => Some(domain),
            _ => None,
        }
    }
}
