use std::sync::{
    LazyLock,
    atomic::{AtomicU64, Ordering},
};

use chrono::Utc;
use regex::Regex;

pub const DEFAULT_DISPLAY_NAME: &str = "Guest";
pub const DEFAULT_AVATAR: &str = "/images/default-avatar.png";

const MAX_DISPLAY_NAME: usize = 64;

static STRIP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{Cc}<>]").expect("strip pattern compiles"));
static COLLAPSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("collapse pattern compiles"));

static BUSTER: AtomicU64 = AtomicU64::new(0);

/// Cleans a display name for rendering. Returns `None` if nothing printable is left.
pub fn sanitize_display_name(input: &str) -> Option<String> {
    let s = STRIP.replace_all(input, " ");
    let s = COLLAPSE.replace_all(s.trim(), " ");

    let s: String = s.chars().take(MAX_DISPLAY_NAME).collect();
    let s = s.trim_end();

    (!s.is_empty()).then(|| s.to_string())
}

pub fn display_name_or_default(name: Option<&str>) -> String {
    name.and_then(sanitize_display_name)
        .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string())
}

pub fn avatar_or_default(avatar: Option<&str>) -> String {
    avatar
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .unwrap_or(DEFAULT_AVATAR)
        .to_string()
}

/// Value for the `t` query parameter. Unique within the process even when two
/// calls land in the same millisecond.
pub fn cache_buster() -> String {
    let count = BUSTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{count}", Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic() {
        assert_eq!(sanitize_display_name("Ada").as_deref(), Some("Ada"));
        assert_eq!(
            sanitize_display_name("Ada Lovelace").as_deref(),
            Some("Ada Lovelace")
        );
    }

    #[test]
    fn test_leading_trailing_spaces() {
        assert_eq!(sanitize_display_name("   Ada   ").as_deref(), Some("Ada"));
        assert_eq!(
            sanitize_display_name("  multiple   spaces  ").as_deref(),
            Some("multiple spaces")
        );
    }

    #[test]
    fn test_markup_and_control_characters() {
        assert_eq!(
            sanitize_display_name("<b>Ada</b>").as_deref(),
            Some("b Ada /b")
        );
        assert_eq!(sanitize_display_name("Ada\u{0}\n\tL").as_deref(), Some("Ada L"));
    }

    #[test]
    fn test_empty_string() {
        assert_eq!(sanitize_display_name(""), None);
        assert_eq!(sanitize_display_name("     "), None);
        assert_eq!(sanitize_display_name("<>"), None);
    }

    #[test]
    fn test_length_cap() {
        let long = "x".repeat(200);
        assert_eq!(sanitize_display_name(&long).map(|s| s.len()), Some(64));
    }

    #[test]
    fn test_defaults() {
        assert_eq!(display_name_or_default(None), DEFAULT_DISPLAY_NAME);
        assert_eq!(display_name_or_default(Some(" ")), DEFAULT_DISPLAY_NAME);
        assert_eq!(avatar_or_default(None), DEFAULT_AVATAR);
        assert_eq!(avatar_or_default(Some("")), DEFAULT_AVATAR);
        assert_eq!(avatar_or_default(Some("/a.png")), "/a.png");
    }

    #[test]
    fn test_cache_buster_unique() {
        assert_ne!(cache_buster(), cache_buster());
    }
}
