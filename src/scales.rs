//! Scale functions: map data values to visual attributes (colors, shapes,
//! sizes) from declarative layout parameters, plus the linear pixel scale
//! panels use for coordinates.

use crate::error::{PlotError, Result};
use itertools::Itertools;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// `(parameters, value, index) -> attribute`. A `None` result means the scale
/// could not place the value and the layer's default attribute applies.
pub type ScaleFn = Arc<dyn Fn(&Value, &Value, usize) -> Option<Value> + Send + Sync>;

#[derive(Clone)]
pub struct ScaleRegistry {
    functions: HashMap<String, ScaleFn>,
}

impl Default for ScaleRegistry {
    fn default() -> Self {
        let mut ret = Self {
            functions: HashMap::new(),
        };
        ret.set("categorical_bin", Arc::new(categorical_bin));
        ret.set("numerical_bin", Arc::new(numerical_bin));
        ret.set("interpolate", Arc::new(interpolate));
        ret.set("ordinal_cycle", Arc::new(ordinal_cycle));
        ret
    }
}

impl ScaleRegistry {
    pub fn get(&self, name: &str) -> Result<ScaleFn> {
        self.functions
            .get(name)
            .cloned()
            .ok_or_else(|| PlotError::NotFound(format!("scale function [{name}]")))
    }

    pub fn set(&mut self, name: &str, function: ScaleFn) {
        self.functions.insert(name.to_string(), function);
    }

    pub fn list(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }
}

fn params_array<'a>(params: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
    params.get(key)?.as_array()
}

fn null_value(params: &Value) -> Option<Value> {
    match params.get("null_value") {
        Some(Value::Null) | None => None,
        Some(v) => Some(v.clone()),
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

/// Exact-match binning against a list of categories.
fn categorical_bin(params: &Value, value: &Value, _index: usize) -> Option<Value> {
    let categories = params_array(params, "categories")?;
    let values = params_array(params, "values")?;
    match categories.iter().position(|c| c == value) {
        Some(idx) => values.get(idx).cloned(),
        None => null_value(params),
    }
}

/// Numeric binning: the value associated with the greatest break <= input.
fn numerical_bin(params: &Value, value: &Value, _index: usize) -> Option<Value> {
    let breaks = params_array(params, "breaks")?;
    let values = params_array(params, "values")?;
    let Some(x) = value_as_f64(value) else {
        return null_value(params).or_else(|| values.first().cloned());
    };
    let idx = breaks
        .iter()
        .rposition(|b| b.as_f64().is_some_and(|b| x >= b))
        .unwrap_or(0);
    values.get(idx).cloned()
}

/// Continuous interpolation between the two breaks bracketing the input.
/// Numeric value lists interpolate linearly; anything else snaps to the
/// nearer break's value.
fn interpolate(params: &Value, value: &Value, _index: usize) -> Option<Value> {
    let breaks = params_array(params, "breaks")?;
    let values = params_array(params, "values")?;
    if breaks.is_empty() || breaks.len() != values.len() {
        return None;
    }
    let Some(x) = value_as_f64(value) else {
        return null_value(params);
    };
    let points: Vec<f64> = breaks.iter().filter_map(|b| b.as_f64()).collect();
    if points.len() != breaks.len() {
        return None;
    }
    if x <= points[0] {
        return values.first().cloned();
    }
    if x >= points[points.len() - 1] {
        return values.last().cloned();
    }
    let lower = points
        .iter()
        .tuple_windows()
        .position(|(a, b)| x >= *a && x < *b)?;
    let upper = lower + 1;
    let span = points[upper] - points[lower];
    let fraction = if span > 0.0 { (x - points[lower]) / span } else { 0.0 };
    match (values[lower].as_f64(), values[upper].as_f64()) {
        (Some(a), Some(b)) => {
            serde_json::Number::from_f64(a + fraction * (b - a)).map(Value::Number)
        }
        _ => {
            let nearer = if fraction < 0.5 { lower } else { upper };
            values.get(nearer).cloned()
        }
    }
}

/// Cycle through the configured values by element index.
fn ordinal_cycle(params: &Value, _value: &Value, index: usize) -> Option<Value> {
    let values = params_array(params, "values")?;
    if values.is_empty() {
        return None;
    }
    values.get(index % values.len()).cloned()
}

/// Linear mapping between a data domain and a pixel range.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearScale {
    pub domain: [f64; 2],
    pub range: [f64; 2],
}

impl LinearScale {
    pub fn new(domain: [f64; 2], range: [f64; 2]) -> Self {
        Self { domain, range }
    }

    pub fn scale(&self, x: f64) -> f64 {
        let span = self.domain[1] - self.domain[0];
        if span == 0.0 {
            return self.range[0];
        }
        let t = (x - self.domain[0]) / span;
        self.range[0] + t * (self.range[1] - self.range[0])
    }

    pub fn invert(&self, px: f64) -> f64 {
        let span = self.range[1] - self.range[0];
        if span == 0.0 {
            return self.domain[0];
        }
        let t = (px - self.range[0]) / span;
        self.domain[0] + t * (self.domain[1] - self.domain[0])
    }
}
