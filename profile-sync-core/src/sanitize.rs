//! Markup stripping for event payloads.
//!
//! Payloads cross into other applications' UIs, so every string leaf is
//! scrubbed of tags, script blocks, script-capable URL schemes and inline
//! event handlers before it is serialized or broadcast.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static SCRIPT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>")
        .expect("SCRIPT_BLOCK is a compile-time constant")
});

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)</?[a-zA-Z!][^>]*>").expect("TAG is a compile-time constant"));

static SCRIPT_SCHEME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:javascript|vbscript)\s*:").expect("SCRIPT_SCHEME is a compile-time constant")
});

/// Handler attributes only: `on...=` at the start or after whitespace, a
/// quote or a slash, so query strings such as `?only=1` survive.
static INLINE_HANDLER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?P<lead>^|[\s"'/])on[a-z]+\s*="#)
        .expect("INLINE_HANDLER is a compile-time constant")
});

/// Recursively sanitize a payload. Only string leaves change; numbers,
/// booleans, null, object keys and array structure pass through untouched.
pub fn sanitize_event_data(data: Value) -> Value {
    match data {
        Value::String(s) => Value::String(sanitize_str(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_event_data).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, sanitize_event_data(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Strip markup and script-like fragments from one string.
pub fn sanitize_str(input: &str) -> String {
    if !input.contains(&['<', ':', '='][..]) {
        return input.to_string();
    }
    let without_scripts = SCRIPT_BLOCK.replace_all(input, "");
    let without_tags = TAG.replace_all(&without_scripts, "");
    let without_schemes = SCRIPT_SCHEME.replace_all(&without_tags, "");
    INLINE_HANDLER
        .replace_all(&without_schemes, "${lead}")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_strings_are_unchanged() {
        assert_eq!(sanitize_str("Ada Lovelace"), "Ada Lovelace");
        assert_eq!(sanitize_str("a < b and c > d"), "a < b and c > d");
        assert_eq!(
            sanitize_str("https://cdn.example.com/a.png?size=64"),
            "https://cdn.example.com/a.png?size=64"
        );
    }

    #[test]
    fn script_blocks_and_tags_are_removed() {
        assert_eq!(
            sanitize_str("Ada<script>alert('x')</script>"),
            "Ada"
        );
        assert_eq!(sanitize_str("<b>bold</b> name"), "bold name");
        assert_eq!(sanitize_str("<img src=x onerror=alert(1)>Bob"), "Bob");
    }

    #[test]
    fn script_schemes_and_handlers_are_removed() {
        assert_eq!(sanitize_str("javascript:alert(1)"), "alert(1)");
        assert_eq!(sanitize_str("x onclick=steal()"), "x steal()");
        assert_eq!(sanitize_str("onload=go()"), "go()");
        assert_eq!(sanitize_str("a\"onmouseover=x"), "a\"x");
    }

    #[test]
    fn query_parameters_starting_with_on_survive() {
        assert_eq!(
            sanitize_str("https://x/a.png?only=1"),
            "https://x/a.png?only=1"
        );
        assert_eq!(
            sanitize_str("https://x/a.png?size=2&one=1"),
            "https://x/a.png?size=2&one=1"
        );
    }

    #[test]
    fn structure_and_non_strings_pass_through() {
        let input = json!({
            "displayName": "<i>Eve</i>",
            "count": 3,
            "flag": true,
            "missing": null,
            "tags": ["<u>a</u>", 1, {"nested": "<script>x</script>ok"}],
        });
        let output = sanitize_event_data(input);
        assert_eq!(
            output,
            json!({
                "displayName": "Eve",
                "count": 3,
                "flag": true,
                "missing": null,
                "tags": ["a", 1, {"nested": "ok"}],
            })
        );
    }
}
