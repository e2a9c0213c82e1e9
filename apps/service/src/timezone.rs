use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tracing::warn;

/// Persisted setting key holding the server timezone.
pub const SETTING_KEY: &str = "serverTimezone";

/// Environment variable consulted first in the resolution chain.
pub const ENV_OVERRIDE: &str = "TZ";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimezoneError {
    #[error("invalid timezone {0:?}")]
    Invalid(String),
}

/// Validate a timezone name by parsing it and formatting a fixed
/// reference instant in that zone.
pub fn validate(name: &str) -> Result<Tz, TimezoneError> {
    let tz = Tz::from_str(name).map_err(|_| TimezoneError::Invalid(name.to_string()))?;

    // 2000-01-01T00:00:00Z as the reference instant.
    let reference = DateTime::<Utc>::from_timestamp(946_684_800, 0)
        .ok_or_else(|| TimezoneError::Invalid(name.to_string()))?;
    let formatted = reference.with_timezone(&tz).to_rfc3339();
    if formatted.is_empty() {
        return Err(TimezoneError::Invalid(name.to_string()));
    }

    Ok(tz)
}

/// Ordered fallback chain: environment override, persisted setting,
/// best-effort system guess, then UTC unconditionally. Candidates
/// failing validation are logged and skipped, never fatal.
pub fn resolve(env_override: Option<&str>, persisted: Option<&str>, system: Option<&str>) -> Tz {
    let candidates = [
        ("environment", env_override),
        ("persisted setting", persisted),
        ("system guess", system),
    ];

    for (source, candidate) in candidates {
        let Some(name) = candidate else { continue };
        match validate(name) {
            Ok(tz) => return tz,
            Err(err) => warn!(source, %err, "Skipping timezone candidate"),
        }
    }

    Tz::UTC
}

/// Best-effort guess of the host timezone: `/etc/timezone` contents,
/// falling back to the `/etc/localtime` symlink target.
pub fn system_guess() -> Option<String> {
    if let Ok(contents) = std::fs::read_to_string("/etc/timezone") {
        let name = contents.trim();
        if !name.is_empty() {
            return Some(name.to_string());
        }
    }

    let target = std::fs::read_link("/etc/localtime").ok()?;
    let target = target.to_string_lossy();
    target.split_once("zoneinfo/").map(|(_, name)| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names_resolve() {
        assert_eq!(validate("UTC"), Ok(Tz::UTC));
        assert!(validate("Europe/Berlin").is_ok());
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert_eq!(
            validate("Mars/Olympus_Mons"),
            Err(TimezoneError::Invalid("Mars/Olympus_Mons".to_string()))
        );
    }

    #[test]
    fn invalid_override_falls_through_to_persisted() {
        let tz = resolve(Some("not-a-zone"), Some("Europe/Berlin"), Some("America/New_York"));
        assert_eq!(tz.name(), "Europe/Berlin");
    }

    #[test]
    fn override_wins_when_valid() {
        let tz = resolve(Some("Asia/Tokyo"), Some("Europe/Berlin"), None);
        assert_eq!(tz.name(), "Asia/Tokyo");
    }

    #[test]
    fn utc_is_the_unconditional_fallback() {
        assert_eq!(resolve(Some("bogus"), Some("also bogus"), None), Tz::UTC);
        assert_eq!(resolve(None, None, None), Tz::UTC);
    }
}
