use serde::{Deserialize, Deserializer};
use std::time::Duration;

pub fn parse_duration(s: &str) -> Result<Duration, String> {
    cyborgtime::parse_duration(s).map_err(|e| format!("Invalid duration: {e}"))
}

/// Deserializes an optional human readable duration such as `"2s"` or `"5m 30s"`.
pub fn deserialize_optional_duration<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    Option::<String>::deserialize(deserializer)?
        .map(|s| parse_duration(&s).map_err(serde::de::Error::custom))
        .transpose()
}

pub fn humanize_duration_core(duration: Duration) -> Result<String, time::error::ConversionRange> {
    Ok(humanize_duration(duration.try_into()?))
}

/// Renders the magnitude of `duration` as e.g. `2 days, 3 hours`. Months and years are
/// approximated as 30.44 and 365.25 days.
pub fn humanize_duration(duration: time::Duration) -> String {
    const UNITS: [(&str, u64); 6] = [
        ("year", 31_557_600),
        ("month", 2_630_016),
        ("day", 86_400),
        ("hour", 3_600),
        ("minute", 60),
        ("second", 1),
    ];

    let mut remaining = duration.whole_seconds().unsigned_abs();
    let mut components = Vec::new();
    for (unit, unit_seconds) in UNITS {
        let count = remaining / unit_seconds;
        remaining %= unit_seconds;
        if count > 0 {
            let plural = if count == 1 { "" } else { "s" };
            components.push(format!("{count} {unit}{plural}"));
        }
    }
    if components.is_empty() {
        "0 seconds".to_string()
    } else {
        components.join(", ")
    }
}
