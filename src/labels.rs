//! Label functions: generate a string from the current state, for dynamic
//! axis labels like "Chromosome 10 (Mb)".

use crate::error::{PlotError, Result};
use crate::state::State;
use std::collections::HashMap;
use std::sync::Arc;

pub type LabelFn = Arc<dyn Fn(&State) -> String + Send + Sync>;

#[derive(Clone)]
pub struct LabelRegistry {
    functions: HashMap<String, LabelFn>,
}

impl Default for LabelRegistry {
    fn default() -> Self {
        let mut ret = Self {
            functions: HashMap::new(),
        };
        ret.set(
            "chromosome",
            Arc::new(|state: &State| match state.chr() {
                Some(chr) => format!("Chromosome {chr} (Mb)"),
                None => "Chromosome (Mb)".to_string(),
            }),
        );
        ret
    }
}

impl LabelRegistry {
    pub fn get(&self, name: &str) -> Result<LabelFn> {
        self.functions
            .get(name)
            .cloned()
            .ok_or_else(|| PlotError::NotFound(format!("label function [{name}]")))
    }

    pub fn set(&mut self, name: &str, function: LabelFn) {
        self.functions.insert(name.to_string(), function);
    }

    pub fn list(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }
}
