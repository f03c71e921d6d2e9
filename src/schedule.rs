//! Cron schedules for deployments.
//!
//! A schedule is only ever attached when the input text asks for recurrence.
//! [`mentions_recurrence`] answers whether it did, and [`detect_interval`]
//! turns plain phrases like "every 5 minutes" into a cron expression. Both
//! accept the same phrases.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;

const CRON_MACROS: &[&str] = &[
    "@yearly",
    "@annually",
    "@monthly",
    "@weekly",
    "@daily",
    "@midnight",
    "@hourly",
];

const MONTH_NAMES: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

const DAY_NAMES: &[&str] = &["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

struct CronField {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// Value of the first entry in `names`.
    names_base: u32,
}

const FIELDS: [CronField; 5] = [
    CronField {
        name: "minute",
        min: 0,
        max: 59,
        names: &[],
        names_base: 0,
    },
    CronField {
        name: "hour",
        min: 0,
        max: 23,
        names: &[],
        names_base: 0,
    },
    CronField {
        name: "day-of-month",
        min: 1,
        max: 31,
        names: &[],
        names_base: 0,
    },
    CronField {
        name: "month",
        min: 1,
        max: 12,
        names: MONTH_NAMES,
        names_base: 1,
    },
    CronField {
        name: "day-of-week",
        min: 0,
        max: 7,
        names: DAY_NAMES,
        names_base: 0,
    },
];

/// A validated cron schedule, serialized the way Prefect expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronSchedule {
    pub cron: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl CronSchedule {
    /// Validates `cron` and collapses its whitespace.
    pub fn new(cron: impl AsRef<str>) -> Result<Self, ScheduleError> {
        let normalized = cron
            .as_ref()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        validate_cron(&normalized)?;
        Ok(Self {
            cron: normalized,
            timezone: None,
        })
    }

    /// Attaches an IANA-style timezone name.
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Result<Self, ScheduleError> {
        let timezone = timezone.into();
        validate_timezone(&timezone)?;
        self.timezone = Some(timezone);
        Ok(self)
    }

    /// Re-checks a schedule that came from deserialization.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        validate_cron(&self.cron)?;
        if let Some(ref tz) = self.timezone {
            validate_timezone(tz)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.timezone {
            Some(ref tz) => write!(f, "{} ({})", self.cron, tz),
            None => write!(f, "{}", self.cron),
        }
    }
}

fn validate_timezone(tz: &str) -> Result<(), ScheduleError> {
    static TZ_RE: OnceLock<Regex> = OnceLock::new();
    let re = TZ_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9_+\-]*(/[A-Za-z0-9_+\-]+)*$").expect("valid regex")
    });
    if re.is_match(tz) {
        Ok(())
    } else {
        Err(ScheduleError::InvalidTimezone(tz.to_string()))
    }
}

/// Validates a five-field cron expression or a standard `@` macro.
pub fn validate_cron(expr: &str) -> Result<(), ScheduleError> {
    let expr = expr.trim();
    if expr.starts_with('@') {
        let lower = expr.to_ascii_lowercase();
        return if CRON_MACROS.contains(&lower.as_str()) {
            Ok(())
        } else {
            Err(ScheduleError::UnknownMacro(expr.to_string()))
        };
    }

    let parts: Vec<&str> = expr.split_whitespace().collect();
    if parts.len() != FIELDS.len() {
        return Err(ScheduleError::FieldCount(parts.len()));
    }

    for (value, field) in parts.iter().zip(FIELDS.iter()) {
        validate_field(value, field)?;
    }
    Ok(())
}

fn validate_field(value: &str, field: &CronField) -> Result<(), ScheduleError> {
    let invalid = |reason: String| ScheduleError::InvalidField {
        field: field.name,
        value: value.to_string(),
        reason,
    };

    for item in value.split(',') {
        if item.is_empty() {
            return Err(invalid("empty list item".to_string()));
        }

        let (base, step) = match item.split_once('/') {
            Some((base, step)) => (base, Some(step)),
            None => (item, None),
        };

        if let Some(step) = step {
            let step: u32 = step
                .parse()
                .map_err(|_| invalid(format!("step '{}' is not a number", step)))?;
            if step == 0 || step > field.max.max(1) {
                return Err(invalid(format!("step {} out of range", step)));
            }
        }

        if base == "*" {
            continue;
        }

        match base.split_once('-') {
            Some((lo, hi)) => {
                let lo = parse_value(lo, field).map_err(&invalid)?;
                let hi = parse_value(hi, field).map_err(&invalid)?;
                if lo > hi {
                    return Err(invalid(format!("range {}-{} is reversed", lo, hi)));
                }
            }
            None => {
                parse_value(base, field).map_err(&invalid)?;
            }
        }
    }
    Ok(())
}

fn parse_value(raw: &str, field: &CronField) -> Result<u32, String> {
    if let Ok(n) = raw.parse::<u32>() {
        return if (field.min..=field.max).contains(&n) {
            Ok(n)
        } else {
            Err(format!(
                "{} is outside {}-{}",
                n, field.min, field.max
            ))
        };
    }

    let lower = raw.to_ascii_lowercase();
    field
        .names
        .iter()
        .position(|name| *name == lower)
        .map(|pos| pos as u32 + field.names_base)
        .ok_or_else(|| format!("'{}' is not a valid value", raw))
}

fn every_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:every|each)\s+(?:(\d+|a|an|one|two|three|four|five|six|seven|eight|nine|ten|eleven|twelve|fifteen|twenty|thirty)\s+)?(second|sec|minute|min|hour|hr|day|week|month)s?\b",
        )
        .expect("valid regex")
    })
}

fn weekday_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bevery\s+(sunday|monday|tuesday|wednesday|thursday|friday|saturday)s?\b")
            .expect("valid regex")
    })
}

fn adverb_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(hourly|daily|nightly|weekly|monthly)\b").expect("valid regex"))
}

fn retrospective_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s+(?:(?:of|in|over|from|during)\s+(?:the\s+)?(?:last|past|previous)|since|between)\b",
        )
        .expect("valid regex")
    })
}

const CODE_CHARS: &[char] = &['=', '/', '&', '?', '_', '.', ':', '#', '@', '`', '\\'];

/// True when `start..end` sits in a URL, path, query string or identifier.
fn inside_code_token(text: &str, start: usize, end: usize) -> bool {
    let token_start = text[..start]
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map_or(0, |(i, c)| i + c.len_utf8());
    let token_end = text[end..]
        .find(char::is_whitespace)
        .map_or(text.len(), |i| end + i);

    text[token_start..token_end]
        .trim_start_matches(['(', '[', '"', '\''])
        .trim_end_matches(['.', ',', ';', ':', '!', '?', ')', ']', '"', '\''])
        .contains(CODE_CHARS)
}

/// Matches of `re` that read as a request for recurrence.
///
/// Phrases inside code-like tokens ("interval=daily", URLs) and phrases
/// that enumerate a past range ("every day of last week") are skipped.
fn recurrence_matches<'t>(
    re: &'static Regex,
    text: &'t str,
) -> impl Iterator<Item = regex::Captures<'t>> + 't {
    re.captures_iter(text).filter(move |caps| {
        caps.get(0).is_some_and(|m| {
            !inside_code_token(text, m.start(), m.end())
                && !retrospective_re().is_match(&text[m.end()..])
        })
    })
}

/// True when the text explicitly asks for something to happen repeatedly.
///
/// Only unit-bearing phrases count: "every 5 minutes", "every monday",
/// "daily". A bare "every" does not.
pub fn mentions_recurrence(text: &str) -> bool {
    [every_re(), weekday_re(), adverb_re()]
        .into_iter()
        .any(|re| recurrence_matches(re, text).next().is_some())
}

fn number_word(word: &str) -> Option<u32> {
    let n = match word.to_ascii_lowercase().as_str() {
        "a" | "an" | "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "eleven" => 11,
        "twelve" => 12,
        "fifteen" => 15,
        "twenty" => 20,
        "thirty" => 30,
        other => return other.parse().ok(),
    };
    Some(n)
}

fn minutes_cron(n: u32) -> Option<String> {
    match n {
        0 => None,
        1 => Some("* * * * *".to_string()),
        n if n < 60 => Some(format!("*/{} * * * *", n)),
        n if n % 60 == 0 => hours_cron(n / 60),
        _ => None,
    }
}

fn hours_cron(n: u32) -> Option<String> {
    match n {
        0 => None,
        1 => Some("0 * * * *".to_string()),
        n if n < 24 => Some(format!("0 */{} * * *", n)),
        n if n % 24 == 0 => days_cron(n / 24),
        _ => None,
    }
}

fn days_cron(n: u32) -> Option<String> {
    match n {
        0 => None,
        1 => Some("0 0 * * *".to_string()),
        7 => Some("0 0 * * 0".to_string()),
        n if n <= 31 => Some(format!("0 0 */{} * *", n)),
        _ => None,
    }
}

fn months_cron(n: u32) -> Option<String> {
    match n {
        0 => None,
        1 => Some("0 0 1 * *".to_string()),
        n if n <= 12 => Some(format!("0 0 1 */{} *", n)),
        _ => None,
    }
}

/// Maps explicit periodicity language to a cron expression.
///
/// Returns `None` when the text has no such language, and also when the
/// requested interval has no exact cron form (sub-minute, "every 90 minutes").
pub fn detect_interval(text: &str) -> Option<CronSchedule> {
    let cron = if let Some(caps) = recurrence_matches(every_re(), text).next() {
        let count = caps.get(1).map_or(Some(1), |m| number_word(m.as_str()))?;
        match caps[2].to_ascii_lowercase().as_str() {
            "minute" | "min" => minutes_cron(count),
            "hour" | "hr" => hours_cron(count),
            "day" => days_cron(count),
            "week" if count == 1 => days_cron(7),
            "month" => months_cron(count),
            _ => None,
        }
    } else if let Some(caps) = recurrence_matches(weekday_re(), text).next() {
        let day = caps[1].to_ascii_lowercase();
        DAY_NAMES
            .iter()
            .position(|name| day.starts_with(name))
            .map(|pos| format!("0 0 * * {}", pos))
    } else if let Some(caps) = recurrence_matches(adverb_re(), text).next() {
        match caps[1].to_ascii_lowercase().as_str() {
            "hourly" => hours_cron(1),
            "daily" | "nightly" => days_cron(1),
            "weekly" => days_cron(7),
            "monthly" => months_cron(1),
            _ => None,
        }
    } else {
        None
    }?;

    CronSchedule::new(cron).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_cron_accepts_common_forms() {
        for expr in [
            "*/5 * * * *",
            "0 0 * * *",
            "0 9-17 * * mon-fri",
            "15,45 */2 1 jan,jul 0",
            "0 0 * * 7",
            "@hourly",
            "@DAILY",
        ] {
            assert!(validate_cron(expr).is_ok(), "{} should be valid", expr);
        }
    }

    #[test]
    fn test_validate_cron_rejects_bad_forms() {
        assert_eq!(validate_cron("* * * *"), Err(ScheduleError::FieldCount(4)));
        assert!(matches!(
            validate_cron("60 * * * *"),
            Err(ScheduleError::InvalidField { field: "minute", .. })
        ));
        assert!(matches!(
            validate_cron("*/0 * * * *"),
            Err(ScheduleError::InvalidField { .. })
        ));
        assert!(matches!(
            validate_cron("0 0 0 * *"),
            Err(ScheduleError::InvalidField { field: "day-of-month", .. })
        ));
        assert!(matches!(
            validate_cron("0 5-2 * * *"),
            Err(ScheduleError::InvalidField { field: "hour", .. })
        ));
        assert!(matches!(
            validate_cron("@fortnightly"),
            Err(ScheduleError::UnknownMacro(_))
        ));
    }

    #[test]
    fn test_schedule_new_normalizes_whitespace() {
        let schedule = CronSchedule::new("  */5   *  * * * ").expect("valid");
        assert_eq!(schedule.cron, "*/5 * * * *");
        assert_eq!(schedule.timezone, None);
    }

    #[test]
    fn test_timezone_validation() {
        let schedule = CronSchedule::new("0 0 * * *").expect("valid");
        assert!(schedule.clone().with_timezone("America/New_York").is_ok());
        assert!(schedule.with_timezone("not a zone").is_err());
    }

    #[test]
    fn test_detect_interval_minutes() {
        let schedule =
            detect_interval("I want to see the price of ETH in USD every 5 minutes.").expect("schedule");
        assert_eq!(schedule.cron, "*/5 * * * *");

        let schedule = detect_interval("check every minute").expect("schedule");
        assert_eq!(schedule.cron, "* * * * *");

        let schedule = detect_interval("poll every fifteen mins").expect("schedule");
        assert_eq!(schedule.cron, "*/15 * * * *");

        let schedule = detect_interval("every 120 minutes").expect("schedule");
        assert_eq!(schedule.cron, "0 */2 * * *");
    }

    #[test]
    fn test_detect_interval_hours_days_and_words() {
        assert_eq!(detect_interval("every 6 hours").expect("schedule").cron, "0 */6 * * *");
        assert_eq!(detect_interval("run it every day").expect("schedule").cron, "0 0 * * *");
        assert_eq!(detect_interval("send a daily digest").expect("schedule").cron, "0 0 * * *");
        assert_eq!(detect_interval("every monday").expect("schedule").cron, "0 0 * * 1");
        assert_eq!(detect_interval("a weekly report").expect("schedule").cron, "0 0 * * 0");
    }

    #[test]
    fn test_detect_interval_none_without_periodicity() {
        assert!(detect_interval("show me the ETH price once").is_none());
        assert!(!mentions_recurrence("show me the ETH price once"));
        assert!(detect_interval("every 90 minutes").is_none());
        assert!(mentions_recurrence("every 90 minutes"));
    }

    #[test]
    fn test_every_without_unit_is_not_recurrence() {
        assert!(!mentions_recurrence("list every pokemon heavier than 100kg"));
        assert!(detect_interval("list every pokemon heavier than 100kg").is_none());
        assert!(!mentions_recurrence("run this periodically"));
    }

    #[test]
    fn test_past_range_is_not_recurrence() {
        let goal = "show me the ETH closing price for every day of last week, once";
        assert!(!mentions_recurrence(goal));
        assert!(detect_interval(goal).is_none());
        assert!(detect_interval("average of every hour in the past day").is_none());
        assert!(mentions_recurrence("run every day of the week"));
        assert_eq!(
            detect_interval("post the ETH price every day to the channel").expect("schedule").cron,
            "0 0 * * *"
        );
    }

    #[test]
    fn test_code_tokens_are_not_recurrence() {
        assert!(!mentions_recurrence("fetch https://api.example.com/v1/prices?symbol=ETH&interval=daily"));
        assert!(detect_interval("read reports/daily/eth.csv").is_none());
        assert!(detect_interval("call get_daily_price()").is_none());
        assert_eq!(
            detect_interval("send a (daily) summary.").expect("schedule").cron,
            "0 0 * * *"
        );
    }
}
