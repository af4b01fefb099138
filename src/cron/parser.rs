// src/cron/parser.rs
use std::collections::HashSet;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Datelike, TimeZone, Timelike};

use crate::error::EngineError;

/// Cron expression evaluator.
/// Supports:
/// - 6-field:  `sec  min  hour  dom  mon  dow`
/// - 5-field:  `min  hour  dom  mon  dow`   (auto-seconds = 0)
///
/// Tokens per field:
/// ```text
/// *         -> any
/// a         -> exact
/// a,b,c     -> list
/// a-b       -> range inclusive
/// */n       -> step over full range
/// a-b/n     -> stepped range
/// Names:
///   Months:  JAN..DEC
///   Weekdays: SUN,MON,TUE,WED,THU,FRI,SAT  (0/7 = SUN)
/// ```
///
/// Unlike a next-occurrence search, this evaluator answers one question:
/// does a given instant satisfy the expression? The scheduling loop calls
/// it once per job per tick against the tick's captured "now".
#[derive(Debug, Clone)]
pub struct Schedule {
    sec: Field,
    min: Field,
    hour: Field,
    dom: FieldDomDow, // day-of-month (1..31) with "any" info
    mon: Field,
    dow: FieldDomDow, // day-of-week (0..6, 0/7 = Sun) with "any" info
}

#[derive(Debug, Clone)]
struct Field {
    allowed: HashSet<u32>, // empty => Any
}

#[derive(Debug, Clone)]
struct FieldDomDow {
    allowed: HashSet<u32>, // empty => Any
    any: bool,
}

impl Schedule {
    pub fn parse(expr: &str) -> Result<Self, EngineError> {
        Self::parse_inner(expr).map_err(|e| EngineError::CronParse {
            expr: expr.to_string(),
            reason: format!("{e:#}"),
        })
    }

    fn parse_inner(expr: &str) -> Result<Self> {
        let expr6 = normalize_to_six(expr);
        let parts: Vec<&str> = expr6.split_whitespace().collect();
        if parts.len() != 6 {
            return Err(anyhow!("expected 6 fields: sec min hour dom mon dow"));
        }

        let sec = Field::parse(parts[0], 0, 59, None, false)?;
        let min = Field::parse(parts[1], 0, 59, None, false)?;
        let hour = Field::parse(parts[2], 0, 23, None, false)?;
        let dom = FieldDomDow::parse_dom(parts[3])?;
        let mon = Field::parse(parts[4], 1, 12, Some(&month_name_map()), false)?;
        let dow = FieldDomDow::parse_dow(parts[5])?;

        Ok(Self { sec, min, hour, dom, mon, dow })
    }

    /// Does `dt` satisfy this expression, to the second?
    pub fn matches<Tz: TimeZone>(&self, dt: &DateTime<Tz>) -> bool {
        self.sec.matches(dt.second())
            && self.min.matches(dt.minute())
            && self.hour.matches(dt.hour())
            && self.mon.matches(dt.month())
            && self.matches_day(dt)
    }

    /// DOM/DOW OR logic:
    /// - If both are Any => accept any day
    /// - Else day is valid if (DOM matches) OR (DOW matches)
    fn matches_day<Tz: TimeZone>(&self, dt: &DateTime<Tz>) -> bool {
        let dom_match = self.dom.contains(dt.day());
        let dow_match = self.dow.contains(dt.weekday().num_days_from_sunday()); // 0=Sun..6=Sat

        match (self.dom.any, self.dow.any) {
            (true, true) => true,
            (false, true) => dom_match,
            (true, false) => dow_match,
            (false, false) => dom_match || dow_match,
        }
    }
}

impl Field {
    fn parse(
        token: &str,
        min: u32,
        max: u32,
        names: Option<&std::collections::HashMap<&'static str, u32>>,
        is_dow: bool,
    ) -> Result<Self> {
        let mut allowed = HashSet::new();

        // "*" => Any
        if token.trim() == "*" {
            return Ok(Self { allowed });
        }

        for part in token.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            // Handle names (case-insensitive)
            let mut part = if let Some(map) = names {
                let upper = part.to_ascii_uppercase();
                if let Some(&num) = map.get(upper.as_str()) {
                    num.to_string()
                } else {
                    part.to_string()
                }
            } else {
                part.to_string()
            };

            // For DOW: allow 7 => 0 (Sunday)
            if is_dow && part == "7" {
                part = "0".to_string();
            }

            // Step forms: "*/n" or "a-b/n"
            if let Some((lhs, step_s)) = part.split_once('/') {
                let step = parse_step(lhs, step_s)?;
                if lhs == "*" {
                    for v in (min..=max).step_by(step) {
                        allowed.insert(v);
                    }
                } else if let Some((a_s, b_s)) = lhs.split_once('-') {
                    let a = parse_num(a_s, min, max, names, is_dow)?;
                    let b = parse_num(b_s, min, max, names, is_dow)?;
                    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                    for v in (lo..=hi).step_by(step) {
                        allowed.insert(v);
                    }
                } else {
                    return Err(anyhow!("invalid stepped token '{}'", part));
                }
                continue;
            }

            // "a-b"
            if let Some((a_s, b_s)) = part.split_once('-') {
                let a = parse_num(a_s, min, max, names, is_dow)?;
                let b = parse_num(b_s, min, max, names, is_dow)?;
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                for v in lo..=hi {
                    allowed.insert(v);
                }
                continue;
            }

            // single number
            let n = parse_num(&part, min, max, names, is_dow)?;
            allowed.insert(n);
        }

        Ok(Self { allowed })
    }

    #[inline]
    fn matches(&self, v: u32) -> bool {
        if self.allowed.is_empty() {
            return true;
        }
        self.allowed.contains(&v)
    }
}

impl FieldDomDow {
    fn parse_dom(token: &str) -> Result<Self> {
        let base = Field::parse(token, 1, 31, None, false)?;
        Ok(Self { any: base.allowed.is_empty(), allowed: base.allowed })
    }

    fn parse_dow(token: &str) -> Result<Self> {
        let base = Field::parse(token, 0, 6, Some(&weekday_name_map()), true)?;
        Ok(Self { any: base.allowed.is_empty(), allowed: base.allowed })
    }

    #[inline]
    fn contains(&self, v: u32) -> bool {
        if self.any {
            return true;
        }
        self.allowed.contains(&v)
    }
}

// --------- helpers ----------

fn normalize_to_six(expr: &str) -> String {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    match parts.len() {
        5 => format!("0 {}", expr.trim()),
        _ => expr.trim().to_string(),
    }
}

fn parse_step(lhs: &str, step: &str) -> Result<usize> {
    if !lhs.is_empty() && lhs != "*" && !lhs.contains('-') {
        return Err(anyhow!("invalid stepped lhs '{}'", lhs));
    }
    let st: u32 = step.parse().context("invalid step value")?;
    if st == 0 {
        return Err(anyhow!("step must be > 0"));
    }
    Ok(st as usize)
}

fn parse_num(
    token: &str,
    min: u32,
    max: u32,
    names: Option<&std::collections::HashMap<&'static str, u32>>,
    is_dow: bool,
) -> Result<u32> {
    let t = token.trim();
    if let Some(map) = names {
        let up = t.to_ascii_uppercase();
        if let Some(&n) = map.get(up.as_str()) {
            return Ok(n);
        }
    }
    let mut n: u32 = t.parse().with_context(|| format!("invalid number '{}'", t))?;
    if is_dow && n == 7 {
        n = 0; // 7 => 0 (Sunday)
    }
    if n < min || n > max {
        return Err(anyhow!("value {} out of range {}..{}", n, min, max));
    }
    Ok(n)
}

fn month_name_map() -> std::collections::HashMap<&'static str, u32> {
    std::collections::HashMap::from_iter([
        ("JAN", 1), ("FEB", 2), ("MAR", 3), ("APR", 4), ("MAY", 5), ("JUN", 6),
        ("JUL", 7), ("AUG", 8), ("SEP", 9), ("OCT", 10), ("NOV", 11), ("DEC", 12),
    ])
}

fn weekday_name_map() -> std::collections::HashMap<&'static str, u32> {
    // 0=SUN .. 6=SAT
    std::collections::HashMap::from_iter([
        ("SUN", 0), ("MON", 1), ("TUE", 2), ("WED", 3),
        ("THU", 4), ("FRI", 5), ("SAT", 6),
    ])
}
