//! Environment variable utilities
//!
//! Typed lookups with defaults, used by `EngineConfig::from_env()`.
//!
//! ```ignore
//! use sockasync_core::env::{env_get, env_get_bool};
//!
//! let workers: usize = env_get("SOCKASYNC_COMPLETION_WORKERS", 4);
//! let blocking_close = env_get_bool("SOCKASYNC_BLOCKING_CLOSE", true);
//! ```

use std::str::FromStr;

/// Environment variable parsed as `T`, or `default` if unset or unparsable.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Environment variable as boolean.
///
/// "1", "true", "yes", "on" (any case) are true, "0", "false", "no", "off"
/// are false. Anything else, including unset, returns `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// `Some(T)` if the variable is set and parses, `None` otherwise.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__SOCKASYNC_UNSET_12345__", 42);
        assert_eq!(val, 42);
        assert!(env_get_opt::<u64>("__SOCKASYNC_UNSET_12345__").is_none());
    }

    #[test]
    fn test_env_get_with_set_var() {
        std::env::set_var("__SOCKASYNC_TEST_NUM__", " 123 ");
        let val: usize = env_get("__SOCKASYNC_TEST_NUM__", 0);
        assert_eq!(val, 123);
        std::env::remove_var("__SOCKASYNC_TEST_NUM__");
    }

    #[test]
    fn test_env_get_invalid_parse() {
        std::env::set_var("__SOCKASYNC_TEST_INVALID__", "not_a_number");
        let val: usize = env_get("__SOCKASYNC_TEST_INVALID__", 99);
        assert_eq!(val, 99);
        std::env::remove_var("__SOCKASYNC_TEST_INVALID__");
    }

    #[test]
    fn test_env_get_bool_variants() {
        std::env::set_var("__SOCKASYNC_TEST_BOOL__", "YES");
        assert!(env_get_bool("__SOCKASYNC_TEST_BOOL__", false));

        std::env::set_var("__SOCKASYNC_TEST_BOOL__", "off");
        assert!(!env_get_bool("__SOCKASYNC_TEST_BOOL__", true));

        std::env::set_var("__SOCKASYNC_TEST_BOOL__", "garbage");
        assert!(env_get_bool("__SOCKASYNC_TEST_BOOL__", true));
        assert!(!env_get_bool("__SOCKASYNC_TEST_BOOL__", false));

        std::env::remove_var("__SOCKASYNC_TEST_BOOL__");
    }
}
