//! Utility functions for Ripple

use std::sync::LazyLock;

use if_addrs::IfAddr;

/// Allowed characters for distributed object names
static VALID_NAME_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new("^[a-zA-Z0-9_:-]+$").expect("Invalid regex pattern"));

/// Validate a distributed object name.
///
/// Names are used as configuration path segments, so dots and whitespace are
/// rejected.
///
/// # Examples
///
/// ```
/// use ripple_common::is_valid_name;
///
/// assert!(is_valid_name("orders"));
/// assert!(is_valid_name("user-sessions_v2"));
/// assert!(!is_valid_name("with.dot"));
/// assert!(!is_valid_name(""));
/// ```
pub fn is_valid_name(name: &str) -> bool {
    VALID_NAME_PATTERN.is_match(name)
}

/// Get the local IP address
///
/// Returns the first non-loopback IPv4 address found,
/// or "127.0.0.1" as fallback.
pub fn local_ip() -> String {
    if_addrs::get_if_addrs()
        .ok()
        .and_then(|addrs| {
            addrs
                .into_iter()
                .find(|iface| !iface.is_loopback() && matches!(iface.addr, IfAddr::V4(_)))
                .and_then(|iface| match iface.addr {
                    IfAddr::V4(addr) => Some(addr.ip.to_string()),
                    _ => None,
                })
        })
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

/// Current wall-clock time in Unix milliseconds
pub fn current_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_valid_names() {
        assert!(is_valid_name("abc123"));
        assert!(is_valid_name("test_value"));
        assert!(is_valid_name("test-value"));
        assert!(is_valid_name("tenant:map"));
    }

    #[test]
    fn test_invalid_names() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("test value"));
        assert!(!is_valid_name("a.b"));
        assert!(!is_valid_name("a/b"));
    }

    #[test]
    fn test_local_ip_not_empty() {
        assert!(!local_ip().is_empty());
    }

    #[test]
    fn test_current_millis_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(current_millis() > 1_577_836_800_000);
    }

    proptest! {
        #[test]
        fn names_with_dots_are_rejected(prefix in "[a-z]{1,8}", suffix in "[a-z]{1,8}") {
            let name = format!("{prefix}.{suffix}");
            prop_assert!(!is_valid_name(&name));
        }
    }
}
