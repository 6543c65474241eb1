//! Secret redaction for request and response logging.
//!
//! Request bodies sent to the identity service carry passwords, temporary
//! secret keys and security tokens; headers carry signatures and tokens.
//! Nothing in this module is used for anything but log output.

use http::HeaderMap;
use serde_json::Value;

/// Replacement for a masked value.
pub const MASK: &str = "***";

/// String values longer than this are replaced with a placeholder.
pub const MAX_LOGGED_FIELD_LEN: usize = 1024;

/// Substring patterns that mark a JSON field as secret.
///
/// Matched case-insensitively against the field name.
const SECRET_SUBSTRINGS: &[&str] =
    &["password", "secret", "adminpass", "private_key", "passphrase", "securitytoken"];

/// Suffix patterns that mark a JSON field as secret.
const SECRET_SUFFIXES: &[&str] = &["pwd", "token"];

/// Header names whose values never reach the log.
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "x-auth-token",
    "x-subject-token",
    "x-security-token",
    "proxy-authorization",
    "cookie",
    "set-cookie",
];

/// Returns true if a JSON field name suggests a secret value.
///
/// # Examples
///
/// ```
/// use hwcloud_transport::redaction::is_secret_field;
///
/// assert!(is_secret_field("password"));
/// assert!(is_secret_field("admin_pwd"));
/// assert!(is_secret_field("securitytoken"));
/// assert!(!is_secret_field("name"));
/// ```
#[must_use]
pub fn is_secret_field(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SECRET_SUBSTRINGS.iter().any(|p| lower.contains(p))
        || SECRET_SUFFIXES.iter().any(|s| lower.ends_with(s))
}

/// Masks secret fields and oversized strings in a JSON value, recursively.
pub fn redact_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                if is_secret_field(key) {
                    *field = Value::String(MASK.to_owned());
                } else {
                    redact_value(field);
                }
            }
        },
        Value::Array(items) => items.iter_mut().for_each(redact_value),
        Value::String(text) => {
            let len = text.chars().count();
            if len > MAX_LOGGED_FIELD_LEN {
                *text = format!("*** {len} characters omitted ***");
            }
        },
        _ => {},
    }
}

/// Formats a body for the log.
///
/// JSON bodies are redacted and pretty-printed. Anything else is reported by
/// length only, because it cannot be inspected for secrets.
#[must_use]
pub fn format_body(body: &[u8]) -> String {
    if body.is_empty() {
        return String::new();
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(mut value) => {
            redact_value(&mut value);
            serde_json::to_string_pretty(&value)
                .unwrap_or_else(|_| format!("<{} bytes>", body.len()))
        },
        Err(_) => format!("<{} bytes, not JSON>", body.len()),
    }
}

/// Renders headers for the log with sensitive values masked.
#[must_use]
pub fn format_headers(headers: &HeaderMap) -> String {
    let mut rendered: Vec<String> = headers
        .iter()
        .map(|(name, value)| {
            let name = name.as_str();
            if SENSITIVE_HEADERS.contains(&name) {
                format!("{name}: {MASK}")
            } else {
                format!("{name}: {}", value.to_str().unwrap_or("<binary>"))
            }
        })
        .collect();
    rendered.sort();
    rendered.join(", ")
}

/// Returns a copy of `url` with sensitive query parameter values replaced.
#[must_use]
pub fn redact_url(url: &url::Url) -> String {
    if url.query().is_none() {
        return url.to_string();
    }

    let mut changed = false;
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            if is_sensitive_query_key(&key) {
                changed = true;
                (key.into_owned(), MASK.to_owned())
            } else {
                (key.into_owned(), value.into_owned())
            }
        })
        .collect();

    if !changed {
        return url.to_string();
    }

    let mut redacted = url.clone();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}

fn is_sensitive_query_key(key: &str) -> bool {
    let normalized = key.to_ascii_lowercase();
    matches!(normalized.as_str(), "signature" | "sig" | "token" | "x-auth-token" | "securitytoken")
        || is_secret_field(&normalized)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use http::HeaderValue;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_password_masked_other_preserved() {
        let logged = format_body(br#"{"password":"x","other":"y"}"#);
        let value: Value = serde_json::from_str(&logged).unwrap();
        assert_eq!(value["password"], MASK);
        assert_eq!(value["other"], "y");
    }

    #[test]
    fn test_long_field_replaced_with_placeholder() {
        let long = "a".repeat(MAX_LOGGED_FIELD_LEN + 1);
        let body = serde_json::to_vec(&json!({ "user_data": long, "name": "vm-1" })).unwrap();
        let logged = format_body(&body);
        assert!(!logged.contains(&long));
        assert!(logged.contains("1025 characters omitted"));
        assert!(logged.contains("vm-1"));
    }

    #[test]
    fn test_field_at_limit_is_kept() {
        let exact = "b".repeat(MAX_LOGGED_FIELD_LEN);
        let mut value = json!({ "blob": exact.clone() });
        redact_value(&mut value);
        assert_eq!(value["blob"], exact);
    }

    #[test]
    fn test_nested_secrets_masked() {
        let mut value = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": { "user": { "name": "alice", "password": "hunter2" } }
                }
            },
            "servers": [{ "admin_pwd": "p", "adminPass": "q", "name": "s" }],
            "credential": { "access": "AK", "secret": "SK", "securitytoken": "ST" }
        });
        redact_value(&mut value);

        assert_eq!(value["auth"]["identity"]["password"], MASK);
        assert_eq!(value["auth"]["identity"]["methods"][0], "password");
        assert_eq!(value["servers"][0]["admin_pwd"], MASK);
        assert_eq!(value["servers"][0]["adminPass"], MASK);
        assert_eq!(value["servers"][0]["name"], "s");
        assert_eq!(value["credential"]["access"], "AK");
        assert_eq!(value["credential"]["secret"], MASK);
        assert_eq!(value["credential"]["securitytoken"], MASK);
    }

    #[rstest]
    #[case::upper_case_password("DB_PASSWORD", true)]
    #[case::header_style_token("X-Auth-Token", true)]
    #[case::camel_case_secret("ClientSecret", true)]
    #[case::pwd_suffix("admin_pwd", true)]
    #[case::token_not_suffix("tokens_issued", false)]
    #[case::plain("region", false)]
    fn test_case_insensitive_field_match(#[case] name: &str, #[case] secret: bool) {
        assert_eq!(is_secret_field(name), secret);
    }

    #[test]
    fn test_non_json_body_reported_by_length() {
        assert_eq!(format_body(b"plain text"), "<10 bytes, not JSON>");
        assert_eq!(format_body(b""), "");
    }

    #[test]
    fn test_headers_masked() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("SDK-HMAC-SHA256 Access=AK"));
        headers.insert("x-auth-token", HeaderValue::from_static("tok"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let rendered = format_headers(&headers);
        assert!(rendered.contains("authorization: ***"));
        assert!(rendered.contains("x-auth-token: ***"));
        assert!(rendered.contains("content-type: application/json"));
        assert!(!rendered.contains("Access=AK"));
    }

    #[test]
    fn test_redact_url_query() {
        let url = url::Url::parse("https://iam.example/v3/projects?name=cn-north-4&token=abc")
            .unwrap();
        let redacted = redact_url(&url);
        assert!(redacted.contains("name=cn-north-4"));
        assert!(redacted.contains("token=***") || redacted.contains("token=%2A%2A%2A"));
        assert!(!redacted.contains("abc"));
    }

    #[test]
    fn test_redact_url_without_query_unchanged() {
        let url = url::Url::parse("https://iam.example/v3/auth/tokens").unwrap();
        assert_eq!(redact_url(&url), "https://iam.example/v3/auth/tokens");
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            /// A secret never survives into the formatted body, whatever
            /// the field it sits under.
            #[test]
            fn secret_values_never_logged(
                prefix in "[a-z_]{0,8}",
                secret in "[A-Z0-9]{12,40}",
                other in "[a-z]{1,12}",
            ) {
                let field = format!("{prefix}password");
                let body = serde_json::to_vec(&json!({ field: secret.clone(), "name": other.clone() })).unwrap();
                let logged = format_body(&body);
                prop_assert!(!logged.contains(&secret));
                prop_assert!(logged.contains(&other));
            }

            /// Strings up to the limit are kept verbatim; longer ones never
            /// reach the log.
            #[test]
            fn long_strings_replaced(len in 0..(2 * MAX_LOGGED_FIELD_LEN)) {
                let text = "x".repeat(len);
                let mut value = json!({ "data": text.clone() });
                redact_value(&mut value);
                if len > MAX_LOGGED_FIELD_LEN {
                    prop_assert_eq!(value["data"].as_str().unwrap(), format!("*** {len} characters omitted ***"));
                } else {
                    prop_assert_eq!(value["data"].as_str().unwrap(), text);
                }
            }
        }
    }
}
