//! Helpers for pulling data out of scraped markup and loosely typed JSON.

use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::str::FromStr;
use std::sync::LazyLock;

static REPLAY_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"live_chat_replay\?continuation=([A-Za-z0-9%_\-=]+)"#).unwrap()
});

static RELOAD_CONTINUATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""reloadContinuationData"\s*:\s*\{\s*"continuation"\s*:\s*"([^"]+)""#).unwrap()
});

/// The upstream encodes 64-bit integers as strings in some places and as
/// numbers in others.
#[derive(Deserialize)]
#[serde(untagged)]
enum Flexible<T> {
    Number(T),
    Text(String),
}

fn de_flexible<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Deserialize<'de>,
    T::Err: std::fmt::Display,
{
    match Flexible::<T>::deserialize(deserializer)? {
        Flexible::Number(n) => Ok(n),
        Flexible::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

pub(crate) fn de_flexible_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    de_flexible(deserializer)
}

pub(crate) fn de_flexible_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    de_flexible(deserializer)
}

/// First replay continuation referenced by a watch page, either as a
/// literal replay URL or inside the chat renderer's reload data.
pub(crate) fn find_replay_continuation(html: &str) -> Option<String> {
    REPLAY_URL
        .captures(html)
        .or_else(|| RELOAD_CONTINUATION.captures(html))
        .map(|caps| caps[1].to_string())
}

/// Slice of `text` holding the JSON object that opens at byte `start`.
/// Braces inside string literals are ignored.
fn balanced_object(text: &str, start: usize) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.get(start) != Some(&b'{') {
        return None;
    }
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// JSON object assigned right after the first occurrence of `marker`.
pub(crate) fn object_after<'a>(html: &'a str, marker: &str) -> Option<&'a str> {
    let from = html.find(marker)? + marker.len();
    let open = from + html[from..].find('{')?;
    balanced_object(html, open)
}

/// Every `ytcfg.set({...})` payload on the page, parsed. Unparseable ones
/// are skipped.
pub(crate) fn ytcfg_objects(html: &str) -> Vec<Value> {
    const MARKER: &str = "ytcfg.set(";
    html.match_indices(MARKER)
        .filter_map(|(at, _)| {
            let from = at + MARKER.len();
            let open = from + html[from..].find(|c: char| !c.is_whitespace())?;
            balanced_object(html, open)
        })
        .filter_map(|raw| serde_json::from_str(raw).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balanced_object_skips_braces_in_strings() {
        let text = r#"x = {"a": "}{", "b": {"c": "\"}"}}; rest"#;
        let start = text.find('{').unwrap();
        let object = balanced_object(text, start).unwrap();
        let parsed: Value = serde_json::from_str(object).unwrap();
        assert_eq!(parsed["b"]["c"], "\"}");
    }

    #[test]
    fn test_unterminated_object() {
        assert!(balanced_object(r#"{"a": {"b": 1}"#, 0).is_none());
        assert!(balanced_object("no brace", 0).is_none());
    }

    #[test]
    fn test_find_replay_continuation_from_url() {
        let html = r#"<iframe src="/live_chat_replay?continuation=op2w0wRg%3D%3D&amp;x=1">"#;
        assert_eq!(find_replay_continuation(html).unwrap(), "op2w0wRg%3D%3D");
    }

    #[test]
    fn test_find_replay_continuation_from_reload_data() {
        let html = r#"{"liveChatRenderer":{"continuations":[{"reloadContinuationData":{"continuation":"seed-token","clickTrackingParams":"x"}}]}}"#;
        assert_eq!(find_replay_continuation(html).unwrap(), "seed-token");
    }

    #[test]
    fn test_find_replay_continuation_missing() {
        assert!(find_replay_continuation("<html><body>no chat</body></html>").is_none());
    }

    #[test]
    fn test_object_after_marker() {
        let html = r#"<script>window["ytInitialData"] = {"k": {"v": 1}};</script>"#;
        let raw = object_after(html, "ytInitialData").unwrap();
        assert_eq!(raw, r#"{"k": {"v": 1}}"#);
    }

    #[test]
    fn test_ytcfg_objects() {
        let html = r#"<script>ytcfg.set({"A": 1}); ytcfg.set("KEY", 2); ytcfg.set( {"INNERTUBE_API_KEY": "k"});</script>"#;
        let objects = ytcfg_objects(html);
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[1]["INNERTUBE_API_KEY"], "k");
    }

    #[test]
    fn test_flexible_numbers() {
        #[derive(Deserialize)]
        struct Row {
            #[serde(deserialize_with = "de_flexible_i64")]
            value: i64,
        }
        let from_text: Row = serde_json::from_str(r#"{"value": "1234"}"#).unwrap();
        let from_number: Row = serde_json::from_str(r#"{"value": 99}"#).unwrap();
        assert_eq!(from_text.value, 1234);
        assert_eq!(from_number.value, 99);
        assert!(serde_json::from_str::<Row>(r#"{"value": "abc"}"#).is_err());
    }
}
