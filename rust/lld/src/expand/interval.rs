/*
 * Copyright 2025 Carver Automation Corporation.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use super::{is_user_macro, IntervalValidator};

pub const SEC_PER_MIN: u64 = 60;
pub const SEC_PER_HOUR: u64 = 60 * SEC_PER_MIN;
pub const SEC_PER_DAY: u64 = 24 * SEC_PER_HOUR;
pub const SEC_PER_WEEK: u64 = 7 * SEC_PER_DAY;

/// Parses `N[smhdw]` into seconds. No sign, no fractions.
pub fn parse_time_suffix(value: &str) -> Option<u64> {
    let (digits, multiplier) = match value.char_indices().last()? {
        (idx, 's') => (&value[..idx], 1),
        (idx, 'm') => (&value[..idx], SEC_PER_MIN),
        (idx, 'h') => (&value[..idx], SEC_PER_HOUR),
        (idx, 'd') => (&value[..idx], SEC_PER_DAY),
        (idx, 'w') => (&value[..idx], SEC_PER_WEEK),
        _ => (value, 1),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u64>().ok()?.checked_mul(multiplier)
}

/// Validates `delay` values: a base interval followed by `;`-separated
/// flexible (`50s/1-5,09:00-18:00`) or scheduling (`wd1-5h9`) intervals.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateIntervalValidator;

impl IntervalValidator for UpdateIntervalValidator {
    fn validate_interval(&self, delay: &str) -> Result<(), String> {
        let mut parts = delay.split(';');
        let base = parts.next().unwrap_or_default();
        let base_delay = if is_user_macro(base) {
            None
        } else {
            Some(parse_delay(base)?)
        };

        let mut has_custom = false;
        for part in parts {
            if part.is_empty() {
                return Err(format!("Invalid update interval \"{delay}\"."));
            }
            if part.starts_with(|c: char| c.is_ascii_alphabetic()) {
                validate_scheduling(part)
                    .map_err(|err| format!("Invalid scheduling interval \"{part}\": {err}."))?;
                has_custom = true;
                continue;
            }
            match part.split_once('/') {
                Some((interval, period)) => {
                    let active = if is_user_macro(interval) {
                        true
                    } else {
                        parse_delay(interval)? > 0
                    };
                    if !is_user_macro(period) {
                        validate_period(period).map_err(|err| {
                            format!("Invalid flexible interval \"{part}\": {err}.")
                        })?;
                    }
                    has_custom |= active;
                }
                None => return Err(format!("Invalid flexible interval \"{part}\".")),
            }
        }

        if base_delay == Some(0) && !has_custom {
            return Err("Item will not be refreshed. Please enter a correct update interval.".into());
        }
        Ok(())
    }
}

fn parse_delay(value: &str) -> Result<u64, String> {
    let seconds = parse_time_suffix(value)
        .ok_or_else(|| format!("Invalid update interval \"{value}\"."))?;
    if seconds > SEC_PER_DAY {
        return Err(format!(
            "Invalid update interval \"{value}\": must be between 0 and 86400 seconds."
        ));
    }
    Ok(seconds)
}

/// `d[-d],hh:mm-hh:mm`
fn validate_period(period: &str) -> Result<(), String> {
    let (days, time) = period
        .split_once(',')
        .ok_or("expected \"d[-d],hh:mm-hh:mm\"")?;

    let (from_day, to_day) = match days.split_once('-') {
        Some((from, to)) => (parse_day(from)?, parse_day(to)?),
        None => {
            let day = parse_day(days)?;
            (day, day)
        }
    };
    if from_day > to_day {
        return Err("week day range is reversed".into());
    }

    let (from, to) = time.split_once('-').ok_or("expected time range")?;
    let (from, to) = (parse_clock(from)?, parse_clock(to)?);
    if from >= to {
        return Err("time range is empty".into());
    }
    Ok(())
}

fn parse_day(day: &str) -> Result<u8, String> {
    match day.parse::<u8>() {
        Ok(day @ 1..=7) => Ok(day),
        _ => Err(format!("invalid week day \"{day}\"")),
    }
}

/// Minutes since midnight; `24:00` is the only valid hour 24 value.
fn parse_clock(clock: &str) -> Result<u32, String> {
    let invalid = || format!("invalid time \"{clock}\"");
    let (hours, minutes) = clock.split_once(':').ok_or_else(invalid)?;
    if hours.is_empty() || hours.len() > 2 || minutes.len() != 2 {
        return Err(invalid());
    }
    let hours: u32 = hours.parse().map_err(|_| invalid())?;
    let minutes: u32 = minutes.parse().map_err(|_| invalid())?;
    if minutes > 59 || hours > 24 || (hours == 24 && minutes != 0) {
        return Err(invalid());
    }
    Ok(hours * 60 + minutes)
}

/// Scheduling intervals are sequences of `md`, `wd`, `h`, `m` and `s`
/// filters, each followed by values, ranges and optional `/step`.
fn validate_scheduling(interval: &str) -> Result<(), String> {
    let mut rest = interval;
    let mut seen = 0;
    while !rest.is_empty() {
        let (prefix, limit) = ["md", "wd", "h", "m", "s"]
            .iter()
            .zip([31u32, 7, 23, 59, 59])
            .find(|(prefix, _)| rest.starts_with(**prefix))
            .map(|(prefix, limit)| (*prefix, limit))
            .ok_or_else(|| format!("unexpected \"{rest}\""))?;
        rest = &rest[prefix.len()..];
        let end = rest
            .find(|c: char| c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        validate_filter(&rest[..end], limit).map_err(|err| format!("{prefix}: {err}"))?;
        rest = &rest[end..];
        seen += 1;
    }
    if seen == 0 {
        return Err("empty interval".into());
    }
    Ok(())
}

fn validate_filter(filter: &str, limit: u32) -> Result<(), String> {
    if filter.is_empty() {
        return Err("missing value".into());
    }
    for entry in filter.split(',') {
        let (range, step) = match entry.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (entry, None),
        };
        if let Some(step) = step {
            let step: u32 = step.parse().map_err(|_| format!("invalid step \"{step}\""))?;
            if step == 0 || step > limit {
                return Err(format!("step {step} is out of range"));
            }
        }
        if range.is_empty() {
            if step.is_some() {
                continue;
            }
            return Err("missing value".into());
        }
        let (from, to) = range.split_once('-').unwrap_or((range, range));
        for value in [from, to] {
            let number: u32 = value
                .parse()
                .map_err(|_| format!("invalid value \"{value}\""))?;
            if number > limit {
                return Err(format!("value {number} is out of range"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_suffixes() {
        assert_eq!(parse_time_suffix("30"), Some(30));
        assert_eq!(parse_time_suffix("5m"), Some(300));
        assert_eq!(parse_time_suffix("2h"), Some(7200));
        assert_eq!(parse_time_suffix("30d"), Some(30 * SEC_PER_DAY));
        assert_eq!(parse_time_suffix("1w"), Some(SEC_PER_WEEK));
        assert_eq!(parse_time_suffix("0h"), Some(0));
        assert_eq!(parse_time_suffix(""), None);
        assert_eq!(parse_time_suffix("d"), None);
        assert_eq!(parse_time_suffix("-1"), None);
        assert_eq!(parse_time_suffix("1.5h"), None);
        assert_eq!(parse_time_suffix("99999999999999999999w"), None);
    }

    #[test]
    fn accepts_common_intervals() {
        let validator = UpdateIntervalValidator;
        for delay in [
            "30s",
            "1m",
            "{$DELAY}",
            "0;50s/1-5,09:00-18:00",
            "1h;wd1-5h9",
            "0;md1,15h0m0",
            "10s;{$FLEX}/{$PERIOD}",
            "0;h/2",
        ] {
            assert!(validator.validate_interval(delay).is_ok(), "{delay}");
        }
    }

    #[test]
    fn rejects_broken_intervals() {
        let validator = UpdateIntervalValidator;
        for delay in [
            "",
            "abc",
            "2d",
            "0",
            "0;0/1-7,00:00-24:00",
            "1m;",
            "1m;50s/8,00:00-24:00",
            "1m;50s/1-5,18:00-09:00",
            "1m;wd8",
            "1m;x1",
        ] {
            assert!(validator.validate_interval(delay).is_err(), "{delay}");
        }
    }
}
