// src/trigger/cron.rs

//! Cron expression handling.
//!
//! Task files use standard 5-field Unix cron expressions (minute, hour,
//! day-of-month, month, day-of-week). The `cron` crate wants a leading
//! seconds field, so 5-field expressions get `0 ` prepended. It also numbers
//! weekdays 1-7 starting at Sunday, where Unix cron uses 0-6 (7 is Sunday
//! too), so numeric day-of-week items are rewritten. 6- and 7-field
//! expressions use the crate's own syntax and are passed through unchanged.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::errors::{Result, WardenError};

fn normalize_cron_expr(expr: &str) -> String {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    match fields.as_slice() {
        [minute, hour, dom, month, dow] => format!(
            "0 {minute} {hour} {dom} {month} {}",
            translate_day_of_week(dow)
        ),
        _ => fields.join(" "),
    }
}

fn translate_day_of_week(field: &str) -> String {
    if field == "*" || field == "?" {
        return field.to_string();
    }
    field
        .split(',')
        .map(|item| match unix_days(item) {
            Some(days) => days
                .iter()
                .map(|d| (d + 1).to_string())
                .collect::<Vec<_>>()
                .join(","),
            // Names and malformed items go to the parser as written.
            None => item.to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Expand one day-of-week list item (`3`, `1-5`, `*/2`, `1-7/3`) into Unix
/// day numbers with Sunday as 0.
fn unix_days(item: &str) -> Option<BTreeSet<u32>> {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, step.parse::<usize>().ok().filter(|s| *s > 0)?),
        None => (item, 1),
    };
    let (start, end): (u32, u32) = match range.split_once('-') {
        _ if range == "*" => (0, 6),
        Some((a, b)) => (a.parse().ok()?, b.parse().ok()?),
        None if item.contains('/') => (range.parse().ok()?, 6),
        None => {
            let day = range.parse().ok()?;
            (day, day)
        }
    };
    if start > end || end > 7 {
        return None;
    }
    Some((start..=end).step_by(step).map(|d| d % 7).collect())
}

/// Parse a cron expression into a schedule.
pub fn parse_schedule(expr: &str) -> Result<Schedule> {
    if expr.trim().is_empty() {
        return Err(WardenError::Validation(
            "cron expression must not be empty".to_string(),
        ));
    }

    Schedule::from_str(&normalize_cron_expr(expr))
        .map_err(|e| WardenError::Validation(format!("invalid cron expression '{expr}': {e}")))
}

/// Next occurrence of `schedule` strictly after `after`.
pub fn next_after(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}
