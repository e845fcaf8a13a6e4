//! Data providers: a capability trait with default fetch/parse behavior,
//! composed rather than subclassed, plus the built-in GWAS sources
//! (association, LD, genes, recombination, static JSON).

use crate::error::{PlotError, Result};
use crate::requester::{Chain, FieldRequest, Record};
use crate::state::State;
use crate::transforms::TransformRegistry;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// A namespaced data provider. `get_data` is the entry point the chain
/// resolver calls; the default implementation composes `get_url` →
/// `fetch_request` → `parse_response`, skipping the fetch entirely for a
/// dependent source facing an empty chain.
pub trait DataSource: Send + Sync {
    /// A dependent source needs upstream rows to act on; with an empty chain
    /// body it passes the chain through unchanged instead of fetching.
    fn is_dependent(&self) -> bool {
        false
    }

    /// Join key for merging this source's records into the chain body.
    /// `None` means positional merge.
    fn join_key(&self) -> Option<&str> {
        None
    }

    /// Adjust the outgoing request, e.g. to inject mandatory fields.
    fn prepare_request(&self, _request: &mut FieldRequest) {}

    fn get_url(&self, _state: &State, _chain: &Chain, _request: &FieldRequest) -> Result<String> {
        Err(PlotError::DataSource(
            "source not initialized with a URL".to_string(),
        ))
    }

    fn fetch_request(&self, state: &State, chain: &Chain, request: &FieldRequest) -> Result<Value> {
        let url = self.get_url(state, chain, request)?;
        http_get_json(&url)
    }

    fn parse_response(
        &self,
        response: Value,
        chain: Chain,
        request: &FieldRequest,
        transforms: &TransformRegistry,
    ) -> Result<Chain> {
        let data = match response.get("data") {
            Some(inner) => inner.clone(),
            None => response,
        };
        let records = parse_records(&data, request, transforms)?;
        merge_records(chain, records, self.join_key())
    }

    fn get_data(
        &self,
        state: &State,
        chain: Chain,
        request: &FieldRequest,
        transforms: &TransformRegistry,
    ) -> Result<Chain> {
        if self.is_dependent() && chain.body.is_empty() {
            return Ok(chain);
        }
        let mut request = request.clone();
        self.prepare_request(&mut request);
        let response = self.fetch_request(state, &chain, &request)?;
        self.parse_response(response, chain, &request, transforms)
    }
}

/// Registry mapping namespaces to providers for one plot instance.
#[derive(Clone, Default)]
pub struct DataSources {
    sources: HashMap<String, Arc<dyn DataSource>>,
}

impl DataSources {
    pub fn add(&mut self, namespace: &str, source: Arc<dyn DataSource>) -> &mut Self {
        self.set(namespace, Some(source))
    }

    pub fn set(&mut self, namespace: &str, source: Option<Arc<dyn DataSource>>) -> &mut Self {
        match source {
            Some(source) => {
                self.sources.insert(namespace.to_string(), source);
            }
            None => {
                self.sources.remove(namespace);
            }
        }
        self
    }

    pub fn get(&self, namespace: &str) -> Option<Arc<dyn DataSource>> {
        self.sources.get(namespace).cloned()
    }

    pub fn remove(&mut self, namespace: &str) -> &mut Self {
        self.set(namespace, None)
    }

    pub fn keys(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

pub fn http_get_json(url: &str) -> Result<Value> {
    let value = reqwest::blocking::get(url)?
        .error_for_status()?
        .json::<Value>()?;
    Ok(value)
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn value_as_plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse a response body into records. Accepts either equal-length columns
/// (`{"id": [...], "pvalue": [...]}`) or an array of row objects. Validates
/// that every requested field is present and that columns agree on length;
/// applies per-field transform chains and renames fields to their output
/// names, carrying non-requested fields through.
pub fn parse_records(
    data: &Value,
    request: &FieldRequest,
    transforms: &TransformRegistry,
) -> Result<Vec<Record>> {
    let compiled: Vec<Option<crate::transforms::TransformFn>> = request
        .transforms
        .iter()
        .map(|chain| chain.as_deref().map(|c| transforms.get(c)).transpose())
        .collect::<Result<_>>()?;

    match data {
        Value::Object(columns) => parse_column_records(columns, request, &compiled),
        Value::Array(rows) => parse_row_records(rows, request, &compiled),
        other => Err(PlotError::DataSource(format!(
            "unsupported response body: {other}"
        ))),
    }
}

fn parse_column_records(
    columns: &Map<String, Value>,
    request: &FieldRequest,
    compiled: &[Option<crate::transforms::TransformFn>],
) -> Result<Vec<Record>> {
    let mut length: Option<usize> = None;
    for (key, column) in columns {
        let Some(array) = column.as_array() else {
            return Err(PlotError::DataSource(format!(
                "response column [{key}] is not an array"
            )));
        };
        match length {
            None => length = Some(array.len()),
            Some(expected) if expected != array.len() => {
                return Err(PlotError::DataSource(format!(
                    "response column [{key}] has length {} but expected {expected}",
                    array.len()
                )));
            }
            Some(_) => {}
        }
    }
    for (field, outname) in request.fields.iter().zip(&request.outnames) {
        if !columns.contains_key(field) {
            return Err(PlotError::DataSource(format!(
                "field {field} not found in response for {outname}"
            )));
        }
    }

    let length = length.unwrap_or(0);
    let mut records = Vec::with_capacity(length);
    for i in 0..length {
        let mut record = Record::new();
        for (key, column) in columns {
            if !request.fields.iter().any(|f| f == key) {
                record.insert(key.clone(), column[i].clone());
            }
        }
        for (j, field) in request.fields.iter().enumerate() {
            let mut value = columns[field.as_str()][i].clone();
            if let Some(transform) = &compiled[j] {
                value = transform(&value)?;
            }
            record.insert(request.outnames[j].clone(), value);
        }
        records.push(record);
    }
    Ok(records)
}

fn parse_row_records(
    rows: &[Value],
    request: &FieldRequest,
    compiled: &[Option<crate::transforms::TransformFn>],
) -> Result<Vec<Record>> {
    let mut field_found = vec![false; request.fields.len()];
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(row) = row.as_object() else {
            return Err(PlotError::DataSource(
                "response row is not an object".to_string(),
            ));
        };
        let mut record = row.clone();
        for (j, field) in request.fields.iter().enumerate() {
            let Some(value) = row.get(field) else { continue };
            field_found[j] = true;
            let mut value = value.clone();
            if let Some(transform) = &compiled[j] {
                value = transform(&value)?;
            }
            record.insert(request.outnames[j].clone(), value);
        }
        records.push(record);
    }
    if !rows.is_empty() {
        for (j, found) in field_found.iter().enumerate() {
            if !found {
                return Err(PlotError::DataSource(format!(
                    "field {} not found in response for {}",
                    request.fields[j], request.outnames[j]
                )));
            }
        }
    }
    Ok(records)
}

/// Merge freshly parsed records into the running chain: an empty chain takes
/// the records wholesale; a join key does a left join into the existing body;
/// otherwise the merge is positional and requires matching row counts.
pub fn merge_records(mut chain: Chain, records: Vec<Record>, join_key: Option<&str>) -> Result<Chain> {
    if chain.body.is_empty() {
        chain.body = records;
        return Ok(chain);
    }
    match join_key {
        Some(key) => {
            let mut by_key: HashMap<String, &Record> = HashMap::new();
            for record in &records {
                if let Some(value) = record.get(key) {
                    by_key.entry(value_as_plain_string(value)).or_insert(record);
                }
            }
            for existing in &mut chain.body {
                let Some(value) = existing.get(key) else { continue };
                if let Some(incoming) = by_key.get(&value_as_plain_string(value)) {
                    for (k, v) in incoming.iter() {
                        existing.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        None => {
            if chain.body.len() != records.len() {
                return Err(PlotError::DataSource(format!(
                    "positional merge length mismatch: chain has {} rows, response has {}",
                    chain.body.len(),
                    records.len()
                )));
            }
            for (existing, incoming) in chain.body.iter_mut().zip(records) {
                for (k, v) in incoming {
                    existing.insert(k, v);
                }
            }
        }
    }
    Ok(chain)
}

//------------------------------------------------------------------------------
// Built-in sources
//------------------------------------------------------------------------------

fn state_region(state: &State) -> Result<(String, f64, f64)> {
    match (state.chr(), state.start(), state.end()) {
        (Some(chr), Some(start), Some(end)) => Ok((chr, start, end)),
        _ => Err(PlotError::DataSource(
            "state does not define a chr/start/end region".to_string(),
        )),
    }
}

fn param_or<'a>(
    state: &'a State,
    chain: &'a Chain,
    params: &'a Value,
    key: &str,
) -> Option<&'a Value> {
    state
        .get(key)
        .or_else(|| chain.header.get(key))
        .or_else(|| params.get(key))
}

/// Per-phenotype association statistics, filtered to the state region.
pub struct AssociationSource {
    url: String,
    params: Value,
}

impl AssociationSource {
    pub fn new(url: &str) -> Self {
        Self::with_params(url, Value::Null)
    }

    pub fn with_params(url: &str, params: Value) -> Self {
        Self {
            url: url.to_string(),
            params,
        }
    }
}

impl DataSource for AssociationSource {
    fn prepare_request(&self, request: &mut FieldRequest) {
        // id and position are always fetched; downstream sources join on them.
        request.ensure_field("position");
        request.ensure_field("id");
    }

    fn get_url(&self, state: &State, chain: &Chain, _request: &FieldRequest) -> Result<String> {
        let (chr, start, end) = state_region(state)?;
        let analysis = param_or(state, chain, &self.params, "analysis")
            .map(value_as_plain_string)
            .unwrap_or_else(|| "3".to_string());
        Ok(format!(
            "{}results/?filter=analysis in {analysis} and chromosome in '{chr}' and position ge {start} and position le {end}",
            self.url
        ))
    }
}

/// Linkage disequilibrium against a reference variant picked from the chain.
/// Dependent: with no association rows to act on it passes the chain through.
pub struct LdSource {
    url: String,
    params: Value,
}

impl LdSource {
    pub fn new(url: &str) -> Self {
        Self::with_params(url, Value::Null)
    }

    pub fn with_params(url: &str, params: Value) -> Self {
        Self {
            url: url.to_string(),
            params,
        }
    }

    fn id_field(&self) -> &str {
        self.params.get("id_field").and_then(Value::as_str).unwrap_or("id")
    }

    fn position_field(&self) -> &str {
        self.params
            .get("position_field")
            .and_then(Value::as_str)
            .unwrap_or("position")
    }

    fn pvalue_field(&self) -> &str {
        self.params
            .get("pvalue_field")
            .and_then(Value::as_str)
            .unwrap_or("pvalue|neglog10")
    }

    /// Resolve the reference variant: an explicit state/header override, or
    /// the most significant row in the chain when asked for "best".
    fn reference_variant(&self, state: &State, chain: &Chain, request: &FieldRequest) -> Result<String> {
        let mut refvar = match request.fields.first().map(String::as_str) {
            Some("state") | None => param_or(state, chain, &self.params, "ldrefvar")
                .map(value_as_plain_string)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "best".to_string()),
            Some(explicit) => explicit.to_string(),
        };
        if refvar == "best" {
            let best = chain
                .body
                .iter()
                .filter_map(|record| {
                    let pvalue = value_as_f64(record.get(self.pvalue_field())?)?;
                    Some((pvalue, record))
                })
                .max_by(|a, b| a.0.total_cmp(&b.0))
                .ok_or_else(|| {
                    PlotError::DataSource(
                        "no association data found to pick the best reference variant".to_string(),
                    )
                })?;
            refvar = best
                .1
                .get(self.id_field())
                .map(value_as_plain_string)
                .ok_or_else(|| {
                    PlotError::DataSource(format!(
                        "reference row has no [{}] field",
                        self.id_field()
                    ))
                })?;
        }
        Ok(refvar)
    }
}

impl DataSource for LdSource {
    fn is_dependent(&self) -> bool {
        true
    }

    fn get_url(&self, state: &State, chain: &Chain, _request: &FieldRequest) -> Result<String> {
        let (chr, start, end) = state_region(state)?;
        let refsource = param_or(state, chain, &self.params, "ldrefsource")
            .map(value_as_plain_string)
            .unwrap_or_else(|| "1".to_string());
        let refvar = chain
            .header
            .get("ldrefvar")
            .map(value_as_plain_string)
            .unwrap_or_default();
        Ok(format!(
            "{}results/?filter=reference eq {refsource} and chromosome2 eq '{chr}' and position2 ge {start} and position2 le {end} and variant1 eq '{refvar}'&fields=chr,pos,rsquare",
            self.url
        ))
    }

    fn get_data(
        &self,
        state: &State,
        mut chain: Chain,
        request: &FieldRequest,
        _transforms: &TransformRegistry,
    ) -> Result<Chain> {
        if chain.body.is_empty() {
            return Ok(chain);
        }
        let refvar = self.reference_variant(state, &chain, request)?;
        chain
            .header
            .insert("ldrefvar".to_string(), Value::String(refvar));
        let response = self.fetch_request(state, &chain, request)?;
        let outname = request
            .outnames
            .first()
            .cloned()
            .unwrap_or_else(|| "ld:state".to_string());
        let data = response.get("data").cloned().unwrap_or(response);
        left_join_by_position(&mut chain.body, &data, self.position_field(), &outname)?;
        Ok(chain)
    }
}

/// Sorted left join of an r² column response into the chain body, matching
/// body position against the response's `position2` column.
fn left_join_by_position(
    body: &mut [Record],
    data: &Value,
    position_field: &str,
    outname: &str,
) -> Result<()> {
    let positions = data
        .get("position2")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            PlotError::DataSource("LD response has no position2 column".to_string())
        })?;
    let rsquares = data
        .get("rsquare")
        .and_then(Value::as_array)
        .ok_or_else(|| PlotError::DataSource("LD response has no rsquare column".to_string()))?;
    if positions.len() != rsquares.len() {
        return Err(PlotError::DataSource(format!(
            "LD response column lengths differ: {} positions, {} rsquares",
            positions.len(),
            rsquares.len()
        )));
    }

    let mut i = 0;
    let mut j = 0;
    while i < body.len() && j < positions.len() {
        let left = body[i].get(position_field).and_then(value_as_f64);
        let right = positions[j].as_f64();
        let (Some(left), Some(right)) = (left, right) else {
            i += 1;
            continue;
        };
        if left == right {
            body[i].insert(outname.to_string(), rsquares[j].clone());
            i += 1;
            j += 1;
        } else if left < right {
            i += 1;
        } else {
            j += 1;
        }
    }
    Ok(())
}

/// Gene annotation overlapping the state region. Replaces the chain body
/// wholesale: gene rows are unrelated to upstream variant rows.
pub struct GeneSource {
    url: String,
    params: Value,
}

impl GeneSource {
    pub fn new(url: &str) -> Self {
        Self::with_params(url, Value::Null)
    }

    pub fn with_params(url: &str, params: Value) -> Self {
        Self {
            url: url.to_string(),
            params,
        }
    }
}

impl DataSource for GeneSource {
    fn get_url(&self, state: &State, chain: &Chain, _request: &FieldRequest) -> Result<String> {
        let (chr, start, end) = state_region(state)?;
        let source = param_or(state, chain, &self.params, "source")
            .map(value_as_plain_string)
            .unwrap_or_else(|| "2".to_string());
        Ok(format!(
            "{}?filter=source in {source} and chrom eq '{chr}' and start le {end} and end ge {start}",
            self.url
        ))
    }

    fn parse_response(
        &self,
        response: Value,
        mut chain: Chain,
        _request: &FieldRequest,
        _transforms: &TransformRegistry,
    ) -> Result<Chain> {
        let data = response.get("data").cloned().unwrap_or(response);
        let rows = data.as_array().ok_or_else(|| {
            PlotError::DataSource("gene response body is not an array".to_string())
        })?;
        chain.body = rows
            .iter()
            .map(|row| {
                row.as_object().cloned().ok_or_else(|| {
                    PlotError::DataSource("gene response row is not an object".to_string())
                })
            })
            .collect::<Result<_>>()?;
        Ok(chain)
    }
}

/// Recombination rate over the state region.
pub struct RecombinationRateSource {
    url: String,
    params: Value,
}

impl RecombinationRateSource {
    pub fn new(url: &str) -> Self {
        Self::with_params(url, Value::Null)
    }

    pub fn with_params(url: &str, params: Value) -> Self {
        Self {
            url: url.to_string(),
            params,
        }
    }
}

impl DataSource for RecombinationRateSource {
    fn get_url(&self, state: &State, chain: &Chain, _request: &FieldRequest) -> Result<String> {
        let (chr, start, end) = state_region(state)?;
        let source = param_or(state, chain, &self.params, "recombsource")
            .map(value_as_plain_string)
            .unwrap_or_else(|| "15".to_string());
        Ok(format!(
            "{}?filter=id in {source} and chromosome eq '{chr}' and position le {end} and position ge {start}",
            self.url
        ))
    }
}

/// Fixed in-memory data, e.g. a significance threshold line.
pub struct StaticSource {
    data: Value,
}

impl StaticSource {
    pub fn new(data: Value) -> Self {
        Self { data }
    }
}

impl DataSource for StaticSource {
    fn fetch_request(&self, _state: &State, _chain: &Chain, _request: &FieldRequest) -> Result<Value> {
        Ok(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(specs: &[&str]) -> FieldRequest {
        let specs: Vec<String> = specs.iter().map(|s| s.to_string()).collect();
        crate::requester::split_requests(&specs).remove(0)
    }

    fn region_state() -> State {
        let mut state = State::default();
        state.set("chr", json!("10"));
        state.set("start", json!(114550452));
        state.set("end", json!(115067678));
        state
    }

    #[test]
    fn column_and_row_responses_parse_alike() {
        let transforms = TransformRegistry::default();
        let req = request(&["id", "pvalue|neglog10"]);
        let columns = json!({ "id": ["a", "b"], "pvalue": [0.1, 0.01], "extra": [1, 2] });
        let rows = json!([
            { "id": "a", "pvalue": 0.1, "extra": 1 },
            { "id": "b", "pvalue": 0.01, "extra": 2 }
        ]);
        let from_columns = parse_records(&columns, &req, &transforms).unwrap();
        let from_rows = parse_records(&rows, &req, &transforms).unwrap();
        assert_eq!(from_columns.len(), 2);
        for records in [&from_columns, &from_rows] {
            assert_eq!(records[0].get("id"), Some(&json!("a")));
            assert!(records[0].get("pvalue|neglog10").is_some());
            // Passthrough fields survive.
            assert_eq!(records[1].get("extra"), Some(&json!(2)));
        }
    }

    #[test]
    fn unequal_columns_are_rejected() {
        let transforms = TransformRegistry::default();
        let req = request(&["id"]);
        let data = json!({ "id": ["a", "b"], "pvalue": [0.1] });
        assert!(matches!(
            parse_records(&data, &req, &transforms),
            Err(PlotError::DataSource(_))
        ));
    }

    #[test]
    fn missing_requested_field_is_rejected() {
        let transforms = TransformRegistry::default();
        let req = request(&["id", "maf"]);
        let columns = json!({ "id": ["a"] });
        assert!(matches!(
            parse_records(&columns, &req, &transforms),
            Err(PlotError::DataSource(_))
        ));
        let rows = json!([{ "id": "a" }]);
        assert!(matches!(
            parse_records(&rows, &req, &transforms),
            Err(PlotError::DataSource(_))
        ));
    }

    #[test]
    fn positional_merge_requires_matching_lengths() {
        let mut chain = Chain::default();
        chain.body = vec![Record::new(), Record::new()];
        let records = vec![Record::new()];
        assert!(matches!(
            merge_records(chain, records, None),
            Err(PlotError::DataSource(_))
        ));
    }

    #[test]
    fn dependent_source_skips_on_empty_chain() {
        let ld = LdSource::new("https://example.org/ld/");
        let transforms = TransformRegistry::default();
        let chain = Chain::default();
        let req = request(&["ld:state"]);
        // No association rows: the chain passes through, nothing is fetched.
        let out = ld
            .get_data(&region_state(), chain.clone(), &req, &transforms)
            .unwrap();
        assert_eq!(out, chain);
    }

    #[test]
    fn association_url_includes_region_filter() {
        let source = AssociationSource::new("https://example.org/api/");
        let url = source
            .get_url(&region_state(), &Chain::default(), &request(&["id"]))
            .unwrap();
        assert_eq!(
            url,
            "https://example.org/api/results/?filter=analysis in 3 and chromosome in '10' and position ge 114550452 and position le 115067678"
        );
    }

    #[test]
    fn association_request_always_carries_id_and_position() {
        let source = AssociationSource::new("https://example.org/api/");
        let mut req = request(&["pvalue|neglog10"]);
        source.prepare_request(&mut req);
        assert_eq!(req.fields, vec!["id", "position", "pvalue"]);
        assert_eq!(req.outnames[0], "id");
    }

    #[test]
    fn ld_picks_best_reference_variant_from_chain() {
        let ld = LdSource::new("https://example.org/ld/");
        let mut chain = Chain::default();
        for (id, neglog) in [("10:1_A/T", 3.5), ("10:2_C/G", 12.0), ("10:3_G/A", 7.1)] {
            let mut record = Record::new();
            record.insert("id".to_string(), json!(id));
            record.insert("pvalue|neglog10".to_string(), json!(neglog));
            chain.body.push(record);
        }
        let refvar = ld
            .reference_variant(&region_state(), &chain, &request(&["ld:state"]))
            .unwrap();
        assert_eq!(refvar, "10:2_C/G");
    }

    #[test]
    fn ld_join_writes_rsquare_by_position() {
        let mut body = vec![];
        for pos in [100, 200, 300] {
            let mut record = Record::new();
            record.insert("position".to_string(), json!(pos));
            body.push(record);
        }
        let data = json!({ "position2": [100, 300], "rsquare": [0.9, 0.2] });
        left_join_by_position(&mut body, &data, "position", "ld:state").unwrap();
        assert_eq!(body[0].get("ld:state"), Some(&json!(0.9)));
        assert_eq!(body[1].get("ld:state"), None);
        assert_eq!(body[2].get("ld:state"), Some(&json!(0.2)));
    }

    #[test]
    fn gene_source_replaces_body_wholesale() {
        let source = GeneSource::new("https://example.org/genes/");
        let transforms = TransformRegistry::default();
        let mut chain = Chain::default();
        let mut upstream = Record::new();
        upstream.insert("id".to_string(), json!("x"));
        chain.body = vec![upstream];
        let response = json!({ "data": [
            { "gene_name": "TCF7L2", "start": 114710009, "end": 114927437 }
        ]});
        let out = source
            .parse_response(response, chain, &request(&["gene:gene"]), &transforms)
            .unwrap();
        assert_eq!(out.body.len(), 1);
        assert_eq!(out.body[0].get("gene_name"), Some(&json!("TCF7L2")));
    }
}
