//! The data source chain: namespaced field specs, the header+body chain
//! accumulator, and the resolver that threads it through the registered
//! providers in dependency order.

use crate::data_source::{DataSource as _, DataSources};
use crate::error::{PlotError, Result};
use crate::state::State;
use crate::transforms::TransformRegistry;
use serde_json::{Map, Value};

/// One resolved row. Keys are the requested output names
/// (`namespace:field|transforms`) plus any passthrough fields.
pub type Record = Map<String, Value>;

/// The accumulator threaded through successive providers during one resolve.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Chain {
    pub header: Map<String, Value>,
    pub body: Vec<Record>,
}

/// One parsed `namespace:field|trans|trans` spec.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldSpec {
    /// The full original spec, used as the output field name.
    pub raw: String,
    pub namespace: String,
    pub field: String,
    /// Leading-pipe transform chain (`|neglog10|scinotation`), if any.
    pub transforms: Option<String>,
}

impl FieldSpec {
    pub fn parse(raw: &str) -> Self {
        let (namespace, rest) = match raw.find(':') {
            Some(idx) => (raw[..idx].to_string(), &raw[idx + 1..]),
            None => ("base".to_string(), raw),
        };
        let (field, transforms) = match rest.find('|') {
            Some(idx) => (rest[..idx].to_string(), Some(rest[idx..].to_string())),
            None => (rest.to_string(), None),
        };
        Self {
            raw: raw.to_string(),
            namespace,
            field,
            transforms,
        }
    }
}

/// The fields one namespace's provider is asked for in one resolve pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldRequest {
    pub namespace: String,
    pub fields: Vec<String>,
    pub outnames: Vec<String>,
    pub transforms: Vec<Option<String>>,
}

impl FieldRequest {
    /// Prepend a mandatory field if the request does not already carry it.
    pub fn ensure_field(&mut self, field: &str) {
        if !self.fields.iter().any(|f| f == field) {
            self.fields.insert(0, field.to_string());
            self.outnames.insert(0, field.to_string());
            self.transforms.insert(0, None);
        }
    }
}

/// Group field specs by namespace, in the order namespaces first appear.
pub fn split_requests(field_specs: &[String]) -> Vec<FieldRequest> {
    let mut requests: Vec<FieldRequest> = vec![];
    for raw in field_specs {
        let spec = FieldSpec::parse(raw);
        let index = match requests.iter().position(|r| r.namespace == spec.namespace) {
            Some(index) => index,
            None => {
                requests.push(FieldRequest {
                    namespace: spec.namespace.clone(),
                    ..FieldRequest::default()
                });
                requests.len() - 1
            }
        };
        let request = &mut requests[index];
        request.fields.push(spec.field);
        request.outnames.push(spec.raw);
        request.transforms.push(spec.transforms);
    }
    requests
}

/// Result of one full resolve pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedData {
    pub header: Map<String, Value>,
    pub records: Vec<Record>,
}

pub struct Requester<'a> {
    sources: &'a DataSources,
    transforms: &'a TransformRegistry,
}

impl<'a> Requester<'a> {
    pub fn new(sources: &'a DataSources, transforms: &'a TransformRegistry) -> Self {
        Self { sources, transforms }
    }

    /// Resolve an ordered list of field specs against the registered
    /// providers. Providers run in namespace first-appearance order, each
    /// receiving the chain produced by its predecessors. Any provider error
    /// aborts the whole pass; partial results are discarded.
    pub fn resolve(&self, state: &State, field_specs: &[String]) -> Result<ResolvedData> {
        let mut chain = Chain::default();
        for request in split_requests(field_specs) {
            let source = self.sources.get(&request.namespace).ok_or_else(|| {
                PlotError::DataSource(format!(
                    "no data source registered for namespace [{}]",
                    request.namespace
                ))
            })?;
            chain = source.get_data(state, chain, &request, self.transforms)?;
        }
        self.finalize(chain, field_specs)
    }

    /// Final pass: make sure every requested output name exists on every
    /// record, evaluating transform chains against record fields with
    /// fallback to accumulated header fields.
    fn finalize(&self, chain: Chain, field_specs: &[String]) -> Result<ResolvedData> {
        let specs: Vec<FieldSpec> = field_specs.iter().map(|raw| FieldSpec::parse(raw)).collect();
        let Chain { header, mut body } = chain;
        for record in &mut body {
            for spec in &specs {
                if record.contains_key(&spec.raw) {
                    continue;
                }
                let base = record
                    .get(&spec.field)
                    .or_else(|| header.get(&spec.field))
                    .cloned();
                let Some(base) = base else { continue };
                let value = match &spec.transforms {
                    Some(chain_str) => self.transforms.apply(chain_str, &base)?,
                    None => base,
                };
                record.insert(spec.raw.clone(), value);
            }
        }
        Ok(ResolvedData { header, records: body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::{DataSource, StaticSource};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn parses_field_specs() {
        let spec = FieldSpec::parse("ld:state");
        assert_eq!(spec.namespace, "ld");
        assert_eq!(spec.field, "state");
        assert_eq!(spec.transforms, None);

        let spec = FieldSpec::parse("pvalue|neglog10|scinotation");
        assert_eq!(spec.namespace, "base");
        assert_eq!(spec.field, "pvalue");
        assert_eq!(spec.transforms.as_deref(), Some("|neglog10|scinotation"));
    }

    #[test]
    fn groups_by_namespace_in_first_appearance_order() {
        let specs = vec![
            "id".to_string(),
            "position".to_string(),
            "ld:state".to_string(),
            "pvalue|neglog10".to_string(),
        ];
        let requests = split_requests(&specs);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].namespace, "base");
        assert_eq!(requests[0].fields, vec!["id", "position", "pvalue"]);
        assert_eq!(
            requests[0].outnames,
            vec!["id", "position", "pvalue|neglog10"]
        );
        assert_eq!(requests[1].namespace, "ld");
    }

    #[test]
    fn resolve_threads_providers_in_order() {
        let mut sources = DataSources::default();
        sources.add(
            "base",
            Arc::new(StaticSource::new(json!({
                "id": ["1:1_A/T", "1:2_C/G"],
                "position": [1, 2],
                "pvalue": [0.001, 0.5]
            }))),
        );
        let transforms = TransformRegistry::default();
        let requester = Requester::new(&sources, &transforms);
        let resolved = requester
            .resolve(
                &State::default(),
                &[
                    "id".to_string(),
                    "position".to_string(),
                    "pvalue|neglog10".to_string(),
                ],
            )
            .unwrap();
        assert_eq!(resolved.records.len(), 2);
        let first = &resolved.records[0];
        assert_eq!(first.get("id"), Some(&json!("1:1_A/T")));
        assert!(
            (first.get("pvalue|neglog10").unwrap().as_f64().unwrap() - 3.0).abs() < 1e-12
        );
    }

    #[test]
    fn missing_namespace_fails_the_whole_resolve() {
        let sources = DataSources::default();
        let transforms = TransformRegistry::default();
        let requester = Requester::new(&sources, &transforms);
        let result = requester.resolve(&State::default(), &["nope:field".to_string()]);
        assert!(matches!(result, Err(PlotError::DataSource(_))));
    }

    #[test]
    fn dependent_source_passes_empty_chain_through() {
        let mut sources = DataSources::default();
        sources.add(
            "base",
            Arc::new(StaticSource::new(json!({
                "id": [],
                "position": [],
                "pvalue": []
            }))),
        );
        sources.add(
            "ld",
            Arc::new(crate::data_source::LdSource::new("https://example.org/ld/")),
        );
        let transforms = TransformRegistry::default();
        let requester = Requester::new(&sources, &transforms);
        // The LD source is invoked but has no rows to act on; no error, no fetch.
        let resolved = requester
            .resolve(
                &State::default(),
                &[
                    "id".to_string(),
                    "position".to_string(),
                    "ld:state".to_string(),
                ],
            )
            .unwrap();
        assert_eq!(resolved.records, vec![]);
    }

    #[test]
    fn finalize_falls_back_to_header_fields() {
        struct HeaderSource;
        impl DataSource for HeaderSource {
            fn get_data(
                &self,
                _state: &State,
                mut chain: Chain,
                _request: &FieldRequest,
                _transforms: &TransformRegistry,
            ) -> crate::error::Result<Chain> {
                chain
                    .header
                    .insert("refvar".to_string(), json!("10:114758349_C/T"));
                let mut record = Record::new();
                record.insert("assoc:position".to_string(), json!(10));
                chain.body.push(record);
                Ok(chain)
            }
        }

        let mut sources = DataSources::default();
        sources.add("assoc", Arc::new(HeaderSource));
        let transforms = TransformRegistry::default();
        let requester = Requester::new(&sources, &transforms);
        let resolved = requester
            .resolve(
                &State::default(),
                &["assoc:position".to_string(), "assoc:refvar".to_string()],
            )
            .unwrap();
        assert_eq!(
            resolved.records[0].get("assoc:refvar"),
            Some(&json!("10:114758349_C/T"))
        );
        assert_eq!(resolved.header.get("refvar"), Some(&json!("10:114758349_C/T")));
    }
}
