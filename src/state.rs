//! Shared view state: the flat map of named values (chromosome, start, end,
//! LD reference variant, ...) driving every panel of one plot instance.

use crate::region::{parse_position_query, PositionQuery, Region};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State {
    values: Map<String, Value>,
}

impl State {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn chr(&self) -> Option<String> {
        match self.values.get("chr") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn start(&self) -> Option<f64> {
        self.number("start")
    }

    pub fn end(&self) -> Option<f64> {
        self.number("end")
    }

    pub fn region(&self) -> Option<Region> {
        Some(Region {
            chr: self.chr()?,
            start: self.start()?,
            end: self.end()?,
        })
    }

    fn number(&self, key: &str) -> Option<f64> {
        match self.values.get(key) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.parse::<f64>().ok(),
            _ => None,
        }
    }

    fn set_number(&mut self, key: &str, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.values.insert(key.to_string(), Value::Number(n));
        }
    }

    /// Merge proposed changes into this state. No validation happens here;
    /// the orchestrator normalizes the region afterwards.
    pub fn apply(&mut self, changes: &Map<String, Value>) {
        for (key, value) in changes {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Seed region keys from a `chr:start-end` / `chr:pos` hint string.
    pub fn apply_region_hint(&mut self, hint: &str) {
        match parse_position_query(hint) {
            Some(PositionQuery::Range(region)) => {
                self.set("chr", Value::String(region.chr));
                self.set_number("start", region.start);
                self.set_number("end", region.end);
            }
            Some(PositionQuery::Single { chr, position }) => {
                self.set("chr", Value::String(chr));
                self.set_number("position", position);
            }
            None => {}
        }
    }

    /// Normalize the region triple before committing a state change:
    /// NaN and negative positions coerce to 1, swapped bounds are reordered,
    /// and the region width is clamped to the configured scale bounds,
    /// re-centered on the original midpoint when clamping changes it.
    pub fn normalize_region(&mut self, min_region_scale: Option<f64>, max_region_scale: Option<f64>) {
        let raw_start = self.number("start");
        let raw_end = self.number("end");
        if raw_start.is_none() && raw_end.is_none() {
            return;
        }

        let coerce = |v: Option<f64>| match v {
            Some(x) if x.is_finite() && x >= 0.0 => x,
            _ => 1.0,
        };
        let mut start = coerce(raw_start);
        let mut end = coerce(raw_end);
        if start > end {
            std::mem::swap(&mut start, &mut end);
        }

        let width = end - start;
        let mut clamped = width;
        if let Some(max) = max_region_scale {
            clamped = clamped.min(max);
        }
        if let Some(min) = min_region_scale {
            clamped = clamped.max(min);
        }
        if clamped != width {
            let mid = (start + end) / 2.0;
            start = mid - clamped / 2.0;
            end = mid + clamped / 2.0;
        }
        if start < 1.0 {
            end += 1.0 - start;
            start = 1.0;
        }

        self.set_number("start", start.round());
        self.set_number("end", end.round());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state_with(start: Value, end: Value) -> State {
        let mut state = State::default();
        state.set("chr", json!("1"));
        state.set("start", start);
        state.set("end", end);
        state
    }

    #[test]
    fn swapped_bounds_are_reordered_not_rejected() {
        let mut state = state_with(json!(100), json!(50));
        state.normalize_region(None, None);
        assert_eq!(state.start(), Some(50.0));
        assert_eq!(state.end(), Some(100.0));
    }

    #[test]
    fn bad_positions_coerce_to_one() {
        let mut state = state_with(json!(-500), json!("junk"));
        state.normalize_region(None, None);
        assert_eq!(state.start(), Some(1.0));
        assert_eq!(state.end(), Some(1.0));
    }

    #[test]
    fn width_clamps_recenter_on_midpoint() {
        // Too wide: 0..4_000_000 against a 2_000_000 cap, midpoint 2_000_000.
        let mut state = state_with(json!(1_000_000), json!(5_000_000));
        state.normalize_region(None, Some(2_000_000.0));
        assert_eq!(state.start(), Some(2_000_000.0));
        assert_eq!(state.end(), Some(4_000_000.0));

        // Too narrow: re-centered and widened to the minimum scale.
        let mut state = state_with(json!(999_000), json!(1_001_000));
        state.normalize_region(Some(20_000.0), None);
        assert_eq!(state.start(), Some(990_000.0));
        assert_eq!(state.end(), Some(1_010_000.0));
    }

    #[test]
    fn region_hint_seeds_state() {
        let mut state = State::default();
        state.apply_region_hint("10:114550452-115067678");
        assert_eq!(state.chr(), Some("10".to_string()));
        assert_eq!(state.start(), Some(114_550_452.0));
        assert_eq!(state.region().unwrap().to_string(), "10:114550452-115067678");
    }

    #[test]
    fn non_region_state_is_left_alone() {
        let mut state = State::default();
        state.set("ldrefvar", json!("10:114758349_C/T"));
        state.normalize_region(Some(1.0), Some(10.0));
        assert_eq!(state.get("start"), None);
        assert_eq!(state.get("ldrefvar"), Some(&json!("10:114758349_C/T")));
    }
}
