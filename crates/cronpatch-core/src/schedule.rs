//! Cron expression parsing.
//!
//! Resource owners write standard 5-field cron (`min hour dom month dow`),
//! optionally prefixed with `CRON_TZ=<zone>`. The `cron` crate wants 6 or 7
//! fields with a leading seconds field and numbers Sunday as 1, so 5-field
//! expressions are normalized before parsing.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use crate::ScheduleError;

/// Prefixes that embed a timezone in the expression itself.
const TZ_PREFIXES: [&str; 2] = ["CRON_TZ=", "TZ="];

/// Highest standard day-of-week number (7 is an alias for Sunday).
const MAX_STANDARD_DOW: u32 = 7;

/// Day names in standard order, Sunday = 0.
const DAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// A parsed cron schedule bound to a timezone.
#[derive(Clone)]
pub struct CronSchedule {
    expression: String,
    timezone: Tz,
    /// One schedule normally; two when day-of-month and day-of-week are both
    /// restricted and either may match.
    parts: Vec<Schedule>,
}

impl CronSchedule {
    /// Parse `expression`, evaluated in `timezone` (or a `CRON_TZ=` prefix, or UTC).
    pub fn parse(expression: &str, timezone: Option<&str>) -> Result<Self, ScheduleError> {
        let (prefixed_zone, body) = split_timezone_prefix(expression.trim());
        let zone = timezone
            .map(str::trim)
            .filter(|zone| !zone.is_empty())
            .or(prefixed_zone);

        let tz = match zone {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| ScheduleError::new(expression, format!("unknown timezone: {name}")))?,
            None => chrono_tz::UTC,
        };

        if body.is_empty() {
            return Err(ScheduleError::new(expression, "empty expression"));
        }

        let parts = normalize(body)
            .map_err(|reason| ScheduleError::new(expression, reason))?
            .iter()
            .map(|normalized| {
                Schedule::from_str(normalized)
                    .map_err(|e| ScheduleError::new(expression, e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            expression: expression.to_string(),
            timezone: tz,
            parts,
        })
    }

    /// First fire time strictly after `instant`.
    ///
    /// Returns `None` if the schedule never fires again.
    pub fn next_after(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = instant.with_timezone(&self.timezone);
        self.parts
            .iter()
            .filter_map(|schedule| schedule.after(&local).next())
            .map(|next| next.with_timezone(&Utc))
            .min()
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }
}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CronSchedule")
            .field("expression", &self.expression)
            .field("timezone", &self.timezone.name())
            .finish()
    }
}

fn split_timezone_prefix(expression: &str) -> (Option<&str>, &str) {
    for prefix in TZ_PREFIXES {
        if let Some(rest) = expression.strip_prefix(prefix) {
            return match rest.split_once(char::is_whitespace) {
                Some((zone, body)) => (Some(zone), body.trim()),
                None => (Some(rest), ""),
            };
        }
    }
    (None, expression)
}

/// Rewrite an expression into one or more `cron` crate expressions.
pub(crate) fn normalize(body: &str) -> Result<Vec<String>, String> {
    if let Some(descriptor) = body.strip_prefix('@') {
        return descriptor_expression(descriptor).map(|expr| vec![expr.to_string()]);
    }

    let fields: Vec<&str> = body.split_whitespace().collect();
    match fields.len() {
        5 => {
            let (minute, hour, dom, month) = (fields[0], fields[1], fields[2], fields[3]);
            let dow = translate_day_of_week(fields[4])?;
            if is_restricted(dom) && is_restricted(&dow) {
                Ok(vec![
                    format!("0 {minute} {hour} {dom} {month} *"),
                    format!("0 {minute} {hour} * {month} {dow}"),
                ])
            } else {
                Ok(vec![format!("0 {minute} {hour} {dom} {month} {dow}")])
            }
        }
        6 | 7 => Ok(vec![fields.join(" ")]),
        n => Err(format!("expected 5, 6 or 7 fields, found {n}")),
    }
}

fn descriptor_expression(descriptor: &str) -> Result<&'static str, String> {
    match descriptor.to_ascii_lowercase().as_str() {
        "yearly" | "annually" => Ok("0 0 0 1 1 *"),
        "monthly" => Ok("0 0 0 1 * *"),
        "weekly" => Ok("0 0 0 * * 1"),
        "daily" | "midnight" => Ok("0 0 0 * * *"),
        "hourly" => Ok("0 0 * * * *"),
        other => Err(format!("unsupported descriptor @{other}")),
    }
}

fn is_restricted(field: &str) -> bool {
    field != "*" && field != "?"
}

/// Translate standard day-of-week numbers (0/7 = Sunday) to 1-7 Sunday-first.
///
/// Items with a number anywhere are expanded to explicit lists, with names
/// in the same item converted too. Purely named items pass through.
fn translate_day_of_week(field: &str) -> Result<String, String> {
    if !is_restricted(field) {
        return Ok(field.to_string());
    }

    let mut translated: Vec<String> = Vec::new();
    for item in field.split(',') {
        match expand_numeric_item(item)? {
            Some(days) => {
                let days: BTreeSet<u32> = days
                    .into_iter()
                    .map(|day| if day == 0 || day == 7 { 1 } else { day + 1 })
                    .collect();
                translated.extend(days.into_iter().map(|day| day.to_string()));
            }
            None => translated.push(item.to_string()),
        }
    }
    Ok(translated.join(","))
}

/// One end of a day-of-week item.
#[derive(Debug, Clone, Copy)]
enum DayBound {
    Number(u32),
    Name(u32),
}

impl DayBound {
    fn parse(s: &str) -> Option<Self> {
        if let Ok(day) = s.parse::<u32>() {
            return Some(Self::Number(day));
        }
        let lower = s.to_ascii_lowercase();
        DAY_NAMES
            .iter()
            .position(|name| *name == lower)
            .map(|day| Self::Name(day as u32))
    }

    fn day(self) -> u32 {
        match self {
            Self::Number(day) | Self::Name(day) => day,
        }
    }

    fn is_number(self) -> bool {
        matches!(self, Self::Number(_))
    }
}

/// Expand `n`, `a-b`, `a/s`, `a-b/s` or `*/s` into standard day numbers.
///
/// Either end of a range may be a name as long as the other is a number.
/// Returns `None` when the item has no number in it.
fn expand_numeric_item(item: &str) -> Result<Option<Vec<u32>>, String> {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => {
            let step: u32 = match step.parse() {
                Ok(step) => step,
                Err(_) => return Ok(None),
            };
            if step == 0 {
                return Err(format!("step must be positive in {item:?}"));
            }
            (range, Some(step))
        }
        None => (item, None),
    };

    let (start, end) = if range == "*" {
        (0, 6)
    } else if let Some((start, end)) = range.split_once('-') {
        match (DayBound::parse(start), DayBound::parse(end)) {
            (Some(start), Some(end)) if start.is_number() || end.is_number() => {
                // A named Sunday closing a range means the end of the week.
                let end = match end {
                    DayBound::Name(0) => MAX_STANDARD_DOW,
                    end => end.day(),
                };
                (start.day(), end)
            }
            _ => return Ok(None),
        }
    } else {
        match DayBound::parse(range) {
            Some(DayBound::Number(day)) if step.is_some() => (day, 6),
            Some(DayBound::Number(day)) => (day, day),
            _ => return Ok(None),
        }
    };

    if start > MAX_STANDARD_DOW || end > MAX_STANDARD_DOW {
        return Err(format!("day of week out of range in {item:?}"));
    }
    if start > end {
        return Err(format!("inverted range in {item:?}"));
    }

    let step = step.unwrap_or(1) as usize;
    Ok(Some((start..=end).step_by(step).collect()))
}
