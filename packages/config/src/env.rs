// ABOUTME: Environment variable parsing utilities
// ABOUTME: Typed lookups with validation and logged fallback to defaults

use std::str::FromStr;
use std::time::Duration;

/// Parse an environment variable, falling back to `default` when it is unset or unparseable.
pub fn parse_env_or_default<T>(var_name: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(var_name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Parse an environment variable and keep it only if `validator` accepts it.
///
/// Set-but-invalid values are logged at warn level so misconfiguration is
/// visible; an unset variable silently yields the default.
pub fn parse_env_or_default_with_validation<T, F>(var_name: &str, default: T, validator: F) -> T
where
    T: FromStr + Copy + std::fmt::Display,
    F: Fn(T) -> bool,
{
    let raw_value = match std::env::var(var_name) {
        Ok(raw) => raw,
        Err(_) => return default,
    };

    match raw_value.trim().parse::<T>() {
        Ok(parsed) if validator(parsed) => parsed,
        Ok(_) => {
            tracing::warn!(
                "Environment variable {} has invalid value '{}', using default: {}",
                var_name,
                raw_value,
                default
            );
            default
        }
        Err(_) => {
            tracing::warn!(
                "Environment variable {} has unparseable value '{}', using default: {}",
                var_name,
                raw_value,
                default
            );
            default
        }
    }
}

/// Parse a whole-second duration bounded to `min..=max` seconds.
pub fn parse_env_secs(var_name: &str, default: Duration, min: u64, max: u64) -> Duration {
    let secs = parse_env_or_default_with_validation(var_name, default.as_secs(), |v| {
        (min..=max).contains(&v)
    });
    Duration::from_secs(secs)
}

/// Parse a millisecond duration bounded to `min..=max` milliseconds.
pub fn parse_env_millis(var_name: &str, default: Duration, min: u64, max: u64) -> Duration {
    let millis = parse_env_or_default_with_validation(var_name, default.as_millis() as u64, |v| {
        (min..=max).contains(&v)
    });
    Duration::from_millis(millis)
}
