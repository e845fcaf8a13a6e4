//! Tooltip/label templates: literal text with `{{field|transform}}`
//! interpolation and non-nesting `{{#if field}} ... {{/if}}` conditionals,
//! rendered against one resolved record.

use crate::transforms::TransformRegistry;
use log::warn;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq)]
enum Node {
    Literal(String),
    Variable {
        raw: String,
        path: String,
        transforms: Option<String>,
    },
    Conditional {
        path: String,
        children: Vec<Node>,
    },
}

#[derive(Clone, Debug)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    pub fn parse(text: &str) -> Self {
        let token_re =
            Regex::new(r"\{\{(?:#if +([A-Za-z0-9_:|.\-]+)|(/if)|([A-Za-z0-9_:|.\-]+))\}\}")
                .unwrap();

        // Frames: the bottom frame is the root node list, every open
        // conditional pushes another. The first {{/if}} closes the most
        // recently opened conditional.
        let mut frames: Vec<(Option<String>, Vec<Node>)> = vec![(None, vec![])];
        let mut cursor = 0;
        for caps in token_re.captures_iter(text) {
            let whole = caps.get(0).unwrap();
            if whole.start() > cursor {
                frames
                    .last_mut()
                    .unwrap()
                    .1
                    .push(Node::Literal(text[cursor..whole.start()].to_string()));
            }
            cursor = whole.end();

            if let Some(path) = caps.get(1) {
                frames.push((Some(path.as_str().to_string()), vec![]));
            } else if caps.get(2).is_some() {
                if frames.len() > 1 {
                    let (path, children) = frames.pop().unwrap();
                    frames.last_mut().unwrap().1.push(Node::Conditional {
                        path: path.unwrap(),
                        children,
                    });
                }
                // A stray {{/if}} with nothing open is dropped.
            } else if let Some(spec) = caps.get(3) {
                let raw = whole.as_str().to_string();
                let (path, transforms) = match spec.as_str().find('|') {
                    Some(idx) => (
                        spec.as_str()[..idx].to_string(),
                        Some(spec.as_str()[idx..].to_string()),
                    ),
                    None => (spec.as_str().to_string(), None),
                };
                frames.last_mut().unwrap().1.push(Node::Variable {
                    raw,
                    path,
                    transforms,
                });
            }
        }
        if cursor < text.len() {
            frames
                .last_mut()
                .unwrap()
                .1
                .push(Node::Literal(text[cursor..].to_string()));
        }

        // Auto-close any conditional left open at end of input.
        while frames.len() > 1 {
            let (path, children) = frames.pop().unwrap();
            frames.last_mut().unwrap().1.push(Node::Conditional {
                path: path.unwrap(),
                children,
            });
        }

        Self {
            nodes: frames.pop().unwrap().1,
        }
    }

    pub fn render(&self, record: &Map<String, Value>, transforms: &TransformRegistry) -> String {
        let mut pass = RenderPass {
            record,
            transforms,
            cache: HashMap::new(),
        };
        let mut out = String::new();
        render_nodes(&self.nodes, &mut pass, &mut out);
        out
    }
}

/// Parse and render in one step.
pub fn render(template: &str, record: &Map<String, Value>, transforms: &TransformRegistry) -> String {
    Template::parse(template).render(record, transforms)
}

struct RenderPass<'a> {
    record: &'a Map<String, Value>,
    transforms: &'a TransformRegistry,
    cache: HashMap<String, Option<Value>>,
}

impl RenderPass<'_> {
    /// Resolve a path against the record, cached per render pass. Namespaced
    /// keys (`assoc:pvalue`) are literal; dotted paths traverse nested maps.
    fn resolve(&mut self, path: &str) -> Option<Value> {
        if let Some(cached) = self.cache.get(path) {
            return cached.clone();
        }
        let mut found = self.record.get(path).cloned();
        if found.is_none() && path.contains('.') {
            let mut current = self.record.get(path.split('.').next().unwrap()).cloned();
            for part in path.split('.').skip(1) {
                current = current.and_then(|v| v.get(part).cloned());
            }
            found = current;
        }
        self.cache.insert(path.to_string(), found.clone());
        found
    }
}

fn render_nodes(nodes: &[Node], pass: &mut RenderPass, out: &mut String) {
    for node in nodes {
        match node {
            Node::Literal(text) => out.push_str(text),
            Node::Variable {
                raw,
                path,
                transforms,
            } => match render_variable(pass, path, transforms.as_deref()) {
                Ok(text) => out.push_str(&text),
                Err(err) => {
                    // Fail soft: the raw placeholder stays visible.
                    warn!("template variable {raw} failed: {err}");
                    out.push_str(raw);
                }
            },
            Node::Conditional { path, children } => {
                // Existence test, not truthiness: 0 and "" satisfy it.
                let exists = matches!(pass.resolve(path), Some(v) if !v.is_null());
                if exists {
                    render_nodes(children, pass, out);
                }
            }
        }
    }
}

fn render_variable(
    pass: &mut RenderPass,
    path: &str,
    transforms: Option<&str>,
) -> Result<String, crate::error::PlotError> {
    // A record may already carry the fully transformed value under its
    // output name (`pvalue|scinotation`); prefer that over recomputing.
    if let Some(chain) = transforms {
        let full_name = format!("{path}{chain}");
        if let Some(value) = pass.resolve(&full_name) {
            return stringify(value, &full_name);
        }
    }
    let Some(mut value) = pass.resolve(path) else {
        return Ok(String::new());
    };
    if let Some(chain) = transforms {
        value = pass.transforms.apply(chain, &value)?;
    }
    stringify(value, path)
}

fn stringify(value: Value, path: &str) -> Result<String, crate::error::PlotError> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(crate::error::PlotError::Template(format!(
            "non-scalar value for [{path}]: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    fn run(template: &str, rec: Value) -> String {
        render(template, &record(rec), &TransformRegistry::default())
    }

    #[test]
    fn interpolates_scalars() {
        assert_eq!(
            run("<strong>{{id}}</strong>", json!({"id": "10:114758349_C/T"})),
            "<strong>10:114758349_C/T</strong>"
        );
        assert_eq!(run("MAF: {{maf}}", json!({"maf": 0.23})), "MAF: 0.23");
    }

    #[test]
    fn applies_transform_chains() {
        assert_eq!(
            run("P: {{pvalue|neglog10|scinotation}}", json!({"pvalue": 1e-10})),
            "P: 10.000"
        );
    }

    #[test]
    fn prefers_already_transformed_output_names() {
        // The record carries the chain's output name; no recomputation.
        assert_eq!(
            run(
                "P: {{pvalue|scinotation}}",
                json!({ "pvalue|scinotation": "4.52 × 10^-8" })
            ),
            "P: 4.52 × 10^-8"
        );
    }

    #[test]
    fn missing_and_null_render_empty() {
        assert_eq!(run("[{{nope}}]", json!({"x": 1})), "[]");
        assert_eq!(run("[{{x}}]", json!({"x": null})), "[]");
    }

    #[test]
    fn failing_transform_leaves_placeholder() {
        assert_eq!(
            run("P: {{pvalue|frobnicate}}", json!({"pvalue": 1e-10})),
            "P: {{pvalue|frobnicate}}"
        );
    }

    #[test]
    fn conditional_tests_existence_not_truthiness() {
        assert_eq!(run("{{#if x}}A{{/if}}", json!({"x": 0})), "A");
        assert_eq!(run("{{#if x}}A{{/if}}", json!({})), "");
        assert_eq!(run("{{#if x}}A{{/if}}", json!({"x": null})), "");
        assert_eq!(
            run("{{#if beta}}beta: {{beta}}{{/if}}!", json!({"beta": -0.04})),
            "beta: -0.04!"
        );
    }

    #[test]
    fn first_close_ends_most_recent_conditional() {
        // The inner open is closed by the first {{/if}}; the outer by the second.
        assert_eq!(
            run(
                "{{#if a}}A{{#if b}}B{{/if}}C{{/if}}",
                json!({"a": 1, "b": null})
            ),
            "AC"
        );
        // Unclosed conditional auto-closes at end of input.
        assert_eq!(run("{{#if a}}tail", json!({"a": 1})), "tail");
        assert_eq!(run("{{#if a}}tail", json!({})), "");
    }

    #[test]
    fn namespaced_and_dotted_paths_resolve() {
        assert_eq!(
            run("r2: {{ld:state}}", json!({"ld:state": 0.96})),
            "r2: 0.96"
        );
        assert_eq!(
            run("{{gene.name}}", json!({"gene": {"name": "TCF7L2"}})),
            "TCF7L2"
        );
    }

    #[test]
    fn resolution_is_cached_per_pass() {
        // Same path twice renders consistently from one resolution.
        assert_eq!(run("{{x}}{{x}}", json!({"x": 7})), "77");
    }
}
