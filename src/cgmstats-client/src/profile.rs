//! Profile document lookups.
//!
//! The timezone may sit at any depth of a profile document, so it is found
//! with a bounded depth-first walk in document order.

use std::fmt::Display;

use chrono::FixedOffset;
use chrono_tz::Tz;
use serde_json::Value;

pub const TIMEZONE_FIELD: &str = "timezone";

/// Nesting beyond this is treated as malformed and not searched.
pub const MAX_DEPTH: usize = 64;

/// First string value stored under `field`, searching objects and arrays
/// depth first.
pub fn find_string_field<'a>(document: &'a Value, field: &str) -> Option<&'a str> {
    find_at_depth(document, field, 0)
}

fn find_at_depth<'a>(value: &'a Value, field: &str, depth: usize) -> Option<&'a str> {
    if depth > MAX_DEPTH {
        return None;
    }

    match value {
        Value::Object(map) => map.iter().find_map(|(key, child)| match child {
            Value::String(s) if key == field => Some(s.as_str()),
            _ => find_at_depth(child, field, depth + 1),
        }),
        Value::Array(items) => items
            .iter()
            .find_map(|child| find_at_depth(child, field, depth + 1)),
        _ => None,
    }
}

/// Interprets a timezone name as a fixed UTC offset.
///
/// Accepts `UTC`, `GMT`, `Z`, `Etc/UTC`, `Etc/GMT±h` (POSIX sign, so
/// `Etc/GMT+8` is eight hours west) and numeric offsets such as `+05:30`,
/// `-0800`, `UTC+2`. Region names like `America/Vancouver` return `None`;
/// see [`PatientZone::parse`].
pub fn parse_utc_offset(name: &str) -> Option<FixedOffset> {
    let name = name.trim();

    if let Some(rest) = name.strip_prefix("Etc/GMT") {
        if rest.is_empty() {
            return FixedOffset::east_opt(0);
        }
        let seconds = parse_signed_offset(rest)?;
        return FixedOffset::east_opt(-seconds);
    }

    let rest = name
        .strip_prefix("Etc/UTC")
        .or_else(|| name.strip_prefix("UTC"))
        .or_else(|| name.strip_prefix("GMT"))
        .unwrap_or(name);

    if rest.is_empty() || rest == "Z" {
        return FixedOffset::east_opt(0);
    }

    FixedOffset::east_opt(parse_signed_offset(rest)?)
}

/// `+h`, `+hh`, `+hhmm`, `+hh:mm` to seconds east.
fn parse_signed_offset(s: &str) -> Option<i32> {
    let (sign, digits) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    if !digits.bytes().all(|b| b.is_ascii_digit() || b == b':') {
        return None;
    }

    let (hours, minutes) = match digits.split_once(':') {
        Some((h, m)) => (h, m),
        None if digits.len() == 4 => digits.split_at(2),
        None => (digits, "0"),
    };

    if hours.is_empty() || hours.len() > 2 || minutes.is_empty() || minutes.contains(':') {
        return None;
    }
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes >= 60 {
        return None;
    }

    Some(sign * (hours * 3600 + minutes * 60))
}

/// The zone a patient's local times are read in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PatientZone {
    Fixed(FixedOffset),
    /// IANA region, with daylight saving applied per reading.
    Region(Tz),
}

impl PatientZone {
    /// Fixed offsets first, then IANA region names.
    pub fn parse(name: &str) -> Option<Self> {
        if let Some(offset) = parse_utc_offset(name) {
            return Some(Self::Fixed(offset));
        }
        name.trim().parse::<Tz>().ok().map(Self::Region)
    }
}

impl Display for PatientZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(offset) => write!(f, "{offset}"),
            Self::Region(tz) => write!(f, "{}", tz.name()),
        }
    }
}

/// The profile's zone when it names one, else `fallback`.
pub fn resolve_zone(timezone: Option<&str>, fallback: FixedOffset) -> PatientZone {
    match timezone {
        Some(name) => PatientZone::parse(name).unwrap_or_else(|| {
            log::warn!("unknown timezone `{name}`, using {fallback}");
            PatientZone::Fixed(fallback)
        }),
        None => PatientZone::Fixed(fallback),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn finds_nested_timezone() {
        let doc = json!([{
            "defaultProfile": "Default",
            "store": {
                "Default": {
                    "dia": 3,
                    "timezone": "America/Vancouver"
                }
            }
        }]);
        assert_eq!(find_string_field(&doc, TIMEZONE_FIELD), Some("America/Vancouver"));
    }

    #[test]
    fn first_match_in_document_order() {
        let doc = json!({
            "a": {"timezone": "Etc/GMT+8"},
            "timezone": "UTC"
        });
        assert_eq!(find_string_field(&doc, TIMEZONE_FIELD), Some("Etc/GMT+8"));
    }

    #[test]
    fn skips_non_string_matches() {
        let doc = json!({"timezone": null, "store": [{"timezone": "+02:00"}]});
        assert_eq!(find_string_field(&doc, TIMEZONE_FIELD), Some("+02:00"));
    }

    #[test]
    fn missing_field() {
        let doc = json!({"store": {"Default": {"dia": 3}}});
        assert_eq!(find_string_field(&doc, TIMEZONE_FIELD), None);
        assert_eq!(find_string_field(&json!(42), TIMEZONE_FIELD), None);
    }

    #[test]
    fn depth_is_bounded() {
        let mut doc = json!({"timezone": "UTC"});
        for _ in 0..(MAX_DEPTH + 5) {
            doc = json!([doc]);
        }
        assert_eq!(find_string_field(&doc, TIMEZONE_FIELD), None);
    }

    #[test]
    fn fixed_offsets() {
        let east = |s| FixedOffset::east_opt(s).unwrap();
        assert_eq!(parse_utc_offset("UTC"), Some(east(0)));
        assert_eq!(parse_utc_offset("Etc/UTC"), Some(east(0)));
        assert_eq!(parse_utc_offset("Z"), Some(east(0)));
        assert_eq!(parse_utc_offset("+05:30"), Some(east(19800)));
        assert_eq!(parse_utc_offset("-0800"), Some(east(-28800)));
        assert_eq!(parse_utc_offset("UTC+2"), Some(east(7200)));
        assert_eq!(parse_utc_offset("Etc/GMT+8"), Some(east(-28800)));
        assert_eq!(parse_utc_offset("Etc/GMT-3"), Some(east(10800)));
    }

    #[test]
    fn region_names_are_not_offsets() {
        assert_eq!(parse_utc_offset("America/Vancouver"), None);
        assert_eq!(parse_utc_offset("+25:00"), None);
        assert_eq!(parse_utc_offset("+5:75"), None);
    }

    #[test]
    fn non_ascii_offsets_are_rejected() {
        for name in ["+a\u{20ac}", "+1\u{20ac}", "-\u{e9}\u{e9}", "+05:+3", "+05:", "+1:2:3"] {
            assert_eq!(parse_utc_offset(name), None, "{name}");
            assert_eq!(PatientZone::parse(name), None, "{name}");
        }
    }

    #[test]
    fn region_names_resolve_to_zones() {
        assert_eq!(
            PatientZone::parse("America/Vancouver"),
            Some(PatientZone::Region(chrono_tz::America::Vancouver))
        );
        assert_eq!(
            PatientZone::parse(" +05:30 "),
            Some(PatientZone::Fixed(FixedOffset::east_opt(19800).unwrap()))
        );
        assert_eq!(PatientZone::parse("Mars/Olympus_Mons"), None);
        assert_eq!(
            PatientZone::Region(chrono_tz::Europe::Berlin).to_string(),
            "Europe/Berlin"
        );
    }

    #[test]
    fn resolve_falls_back() {
        let fallback = FixedOffset::west_opt(8 * 3600).unwrap();
        assert_eq!(resolve_zone(None, fallback), PatientZone::Fixed(fallback));
        assert_eq!(
            resolve_zone(Some("Not/A_Zone"), fallback),
            PatientZone::Fixed(fallback)
        );
        assert_eq!(
            resolve_zone(Some("UTC"), fallback),
            PatientZone::Fixed(FixedOffset::east_opt(0).unwrap())
        );
    }

    #[test]
    fn malformed_profile_timezone_falls_back() {
        let fallback = FixedOffset::east_opt(0).unwrap();
        let doc = json!({"store": {"Default": {"timezone": "+a\u{20ac}"}}});
        let zone = resolve_zone(find_string_field(&doc, TIMEZONE_FIELD), fallback);
        assert_eq!(zone, PatientZone::Fixed(fallback));
    }
}
