//! Transformation functions: named single-argument value transforms,
//! chainable on a field name with pipe syntax (`pvalue|neglog10|scinotation`).

use crate::error::{PlotError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub type TransformFn = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// Registry of transform functions. Constructed with the built-ins; plots own
/// their instance so custom transforms never leak across plots.
#[derive(Clone)]
pub struct TransformRegistry {
    functions: HashMap<String, TransformFn>,
}

impl Default for TransformRegistry {
    fn default() -> Self {
        let mut ret = Self {
            functions: HashMap::new(),
        };
        ret.set("neglog10", Arc::new(neglog10));
        ret.set("log10", Arc::new(log10));
        ret.set("scinotation", Arc::new(scinotation));
        ret.set("htmlescape", Arc::new(htmlescape));
        ret
    }
}

impl TransformRegistry {
    /// Look up a single transform, or compile a leading-pipe chain string
    /// (`|a|b`) into one composed function applying `a` then `b`.
    pub fn get(&self, name: &str) -> Result<TransformFn> {
        if name.starts_with('|') {
            self.compile_chain(name)
        } else {
            self.functions
                .get(name)
                .cloned()
                .ok_or_else(|| PlotError::NotFound(format!("transform function [{name}]")))
        }
    }

    pub fn set(&mut self, name: &str, function: TransformFn) {
        self.functions.insert(name.to_string(), function);
    }

    pub fn list(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }

    /// Compile `|a|b|c` into a single function `c(b(a(x)))`.
    fn compile_chain(&self, chain: &str) -> Result<TransformFn> {
        let stages: Vec<TransformFn> = chain
            .split('|')
            .filter(|part| !part.is_empty())
            .map(|part| self.get(part))
            .collect::<Result<_>>()?;
        if stages.is_empty() {
            return Err(PlotError::NotFound(format!("transform chain [{chain}]")));
        }
        Ok(Arc::new(move |value: &Value| {
            let mut current = value.clone();
            for stage in &stages {
                current = stage(&current)?;
            }
            Ok(current)
        }))
    }

    /// Convenience: compile and apply a chain string to one value.
    pub fn apply(&self, chain: &str, value: &Value) -> Result<Value> {
        (self.get(chain)?)(value)
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn number_value(x: f64) -> Value {
    serde_json::Number::from_f64(x).map(Value::Number).unwrap_or(Value::Null)
}

/// -log10(x). Null for missing, non-numeric, or non-positive input.
fn neglog10(value: &Value) -> Result<Value> {
    match as_number(value) {
        Some(x) if x > 0.0 => Ok(number_value(-x.log10())),
        _ => Ok(Value::Null),
    }
}

fn log10(value: &Value) -> Result<Value> {
    match as_number(value) {
        Some(x) if x > 0.0 => Ok(number_value(x.log10())),
        _ => Ok(Value::Null),
    }
}

/// Scientific notation for display: close-to-unit values render with three
/// decimals, everything else as `m × 10^e`.
fn scinotation(value: &Value) -> Result<Value> {
    let Some(x) = as_number(value) else {
        return Ok(Value::Null);
    };
    if x == 0.0 {
        return Ok(Value::String("0".to_string()));
    }
    let log = if x.abs() > 1.0 {
        x.abs().log10().ceil()
    } else {
        x.abs().log10().floor()
    };
    if log.abs() <= 3.0 {
        Ok(Value::String(format!("{x:.3}")))
    } else {
        Ok(Value::String(format!("{x:.2e}").replace('e', " × 10^")))
    }
}

fn htmlescape(value: &Value) -> Result<Value> {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let escaped = text
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;");
    Ok(Value::String(escaped))
}
