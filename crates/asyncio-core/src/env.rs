//! Environment variable utilities
//!
//! Every tunable in the asyncio crates has a library default that an
//! `ASYNCIO_*` variable can override at runtime.
//!
//! ```ignore
//! use asyncio_core::env::{env_get, env_get_bool};
//!
//! let workers: usize = env_get("ASYNCIO_POOL_WORKERS", 4);
//! let strict: bool = env_get_bool("ASYNCIO_STRICT", false);
//! ```

use std::str::FromStr;

/// Get environment variable parsed as `T`, or `default` when unset or
/// unparseable.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Boolean variable. Accepts "1", "true", "yes", "on" (case-insensitive)
/// as true; any other value is false. Unset returns `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
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

/// String variable with a default.
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__ASYNCIO_TEST_UNSET__", 42);
        assert_eq!(val, 42);
    }

    #[test]
    fn test_env_get_opt_none() {
        let val: Option<u64> = env_get_opt("__ASYNCIO_TEST_UNSET__");
        assert!(val.is_none());
    }

    #[test]
    fn test_env_get_str_default() {
        assert_eq!(env_get_str("__ASYNCIO_TEST_UNSET__", "poller"), "poller");
    }

    #[test]
    fn test_env_get_parses_trimmed() {
        std::env::set_var("__ASYNCIO_TEST_NUM__", " 123 ");
        let val: usize = env_get("__ASYNCIO_TEST_NUM__", 0);
        assert_eq!(val, 123);
        std::env::remove_var("__ASYNCIO_TEST_NUM__");
    }

    #[test]
    fn test_env_get_invalid_parse() {
        std::env::set_var("__ASYNCIO_TEST_BAD__", "many");
        let val: usize = env_get("__ASYNCIO_TEST_BAD__", 99);
        assert_eq!(val, 99);
        std::env::remove_var("__ASYNCIO_TEST_BAD__");
    }

    #[test]
    fn test_env_get_bool_variants() {
        let key = "__ASYNCIO_TEST_BOOL__";
        for on in ["1", "true", "TRUE", "yes", "on"] {
            std::env::set_var(key, on);
            assert!(env_get_bool(key, false), "{on} should be true");
        }
        for off in ["0", "false", "garbage"] {
            std::env::set_var(key, off);
            assert!(!env_get_bool(key, true), "{off} should be false");
        }
        std::env::remove_var(key);
        assert!(env_get_bool(key, true));
    }
}
