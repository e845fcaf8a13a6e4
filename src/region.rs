//! Genomic region strings and axis tick helpers.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A genomic region, round-tripped as the compact `chr:start-end` string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub chr: String,
    pub start: f64,
    pub end: f64,
}

impl Region {
    pub fn new(chr: &str, start: f64, end: f64) -> Self {
        Self {
            chr: chr.to_string(),
            start,
            end,
        }
    }

    pub fn width(&self) -> f64 {
        self.end - self.start
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chr, self.start as u64, self.end as u64)
    }
}

/// Result of parsing a position query string.
#[derive(Clone, Debug, PartialEq)]
pub enum PositionQuery {
    Range(Region),
    /// `chr:pos` form, a single point without an extent.
    Single { chr: String, position: f64 },
}

/// Convert an integer position to a megabase string (e.g. 23423456 => "23.42").
pub fn position_to_string(p: f64) -> String {
    let places = (6.0 - p.log10().floor()).clamp(2.0, 12.0) as usize;
    format!("{:.*}", places, p / 1e6)
}

/// Convert a position string to a number (e.g. "5.8 Mb" => 58000000).
pub fn position_from_string(p: &str) -> Option<f64> {
    let mut val = p.to_uppercase().replace(',', "");
    let mut mult = 1.0;
    let suffix_re = Regex::new(r"([KMG])B*$").unwrap();
    if let Some(m) = suffix_re.captures(&val) {
        mult = match &m[1] {
            "M" => 1e6,
            "G" => 1e9,
            _ => 1e3,
        };
        val = suffix_re.replace(&val, "").into_owned();
    }
    val.trim().parse::<f64>().ok().map(|v| v * mult)
}

/// Parse region queries of the forms `chr:start-end`, `chr:center+offset` and `chr:pos`.
pub fn parse_position_query(query: &str) -> Option<PositionQuery> {
    let chrposoff = Regex::new(r"^(\w+):([\d,.]+[kmgbKMGB]*)([-+])([\d,.]+[kmgbKMGB]*)$").unwrap();
    let chrpos = Regex::new(r"^(\w+):([\d,.]+[kmgbKMGB]*)$").unwrap();
    if let Some(m) = chrposoff.captures(query) {
        let left = position_from_string(&m[2])?;
        let right = position_from_string(&m[4])?;
        let region = if &m[3] == "+" {
            Region::new(&m[1], left - right, left + right)
        } else {
            Region::new(&m[1], left, right)
        };
        return Some(PositionQuery::Range(region));
    }
    if let Some(m) = chrpos.captures(query) {
        return Some(PositionQuery::Single {
            chr: m[1].to_string(),
            position: position_from_string(&m[2])?,
        });
    }
    None
}

/// Which ends of a generated tick run may extend beyond the input range.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClipRange {
    Neither,
    Low,
    High,
    Both,
}

/// Generate a "pretty" set of ticks: multiples of 1, 2, or 5 on the order of
/// magnitude of the range. Based on R's `pretty`.
pub fn pretty_ticks(range: [f64; 2], clip_range: ClipRange, target_tick_count: usize) -> Vec<f64> {
    let target = target_tick_count.max(1) as f64;
    let min_n = target / 3.0;
    let shrink_sml = 0.75;
    let high_u_bias = 1.5;
    let u5_bias = 0.5 + 1.5 * high_u_bias;

    let d = (range[0] - range[1]).abs();
    if d == 0.0 {
        return vec![range[0]];
    }
    let mut c = d / target;
    if d.log10() < -2.0 {
        c = (d.abs() * shrink_sml) / min_n;
    }

    let base = 10f64.powf((c.log10()).floor());
    let base_to_fixed = if base < 1.0 && base != 0.0 {
        base.log10().round().abs() as i32
    } else {
        0
    };

    let mut unit = base;
    if (2.0 * base) - c < high_u_bias * (c - unit) {
        unit = 2.0 * base;
        if (5.0 * base) - c < u5_bias * (c - unit) {
            unit = 5.0 * base;
            if (10.0 * base) - c < high_u_bias * (c - unit) {
                unit = 10.0 * base;
            }
        }
    }

    let round_at = |value: f64| {
        if base_to_fixed > 0 {
            let f = 10f64.powi(base_to_fixed);
            (value * f).round() / f
        } else {
            value
        }
    };

    let mut ticks = vec![];
    let mut i = round_at((range[0] / unit).floor() * unit);
    while i < range[1] {
        ticks.push(i);
        i = round_at(i + unit);
    }
    ticks.push(i);

    if matches!(clip_range, ClipRange::Low | ClipRange::Both)
        && ticks.first().is_some_and(|t| *t < range[0])
    {
        ticks.remove(0);
    }
    if matches!(clip_range, ClipRange::High | ClipRange::Both)
        && ticks.last().is_some_and(|t| *t > range[1])
    {
        ticks.pop();
    }

    ticks
}
