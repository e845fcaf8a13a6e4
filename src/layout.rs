//! Layout configuration: deep merge of user/default trees, the typed layout
//! model the engine runs on, and the built-in default/standard layouts.

use crate::error::{PlotError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

/// Merge a custom layout tree over a default tree.
///
/// Every key of `default` ends up present in the result. Keys present in both
/// recurse when both sides are objects; otherwise the custom value wins.
/// `null` in the custom tree counts as absent. Arrays are atomic values and
/// are replaced wholesale, never merged element-wise. Neither input is
/// mutated.
pub fn merge_layouts(custom: &Value, default: &Value) -> Value {
    match (custom, default) {
        (Value::Object(custom_map), Value::Object(default_map)) => {
            let mut out = custom_map.clone();
            for (key, default_value) in default_map {
                let merged = match custom_map.get(key) {
                    None | Some(Value::Null) => default_value.clone(),
                    Some(custom_value) if custom_value.is_object() && default_value.is_object() => {
                        merge_layouts(custom_value, default_value)
                    }
                    Some(custom_value) => custom_value.clone(),
                };
                out.insert(key.clone(), merged);
            }
            Value::Object(out)
        }
        (Value::Null, default_value) => default_value.clone(),
        (custom_value, _) => custom_value.clone(),
    }
}

//------------------------------------------------------------------------------
// Typed layout model
//------------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub enum ResizeMode {
    #[default]
    Fixed,
    Manual,
    Responsive,
}

impl<'de> Deserialize<'de> for ResizeMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::Null | Value::Bool(false) => Ok(ResizeMode::Fixed),
            Value::String(s) => match s.as_str() {
                "manual" => Ok(ResizeMode::Manual),
                "responsive" => Ok(ResizeMode::Responsive),
                other => Err(serde::de::Error::custom(format!(
                    "unknown resizable mode `{other}`"
                ))),
            },
            other => Err(serde::de::Error::custom(format!(
                "invalid resizable directive `{other}`"
            ))),
        }
    }
}

/// Which axes follow the hosting surface in responsive mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub enum ResponsiveResize {
    #[default]
    Width,
    Both,
}

impl<'de> Deserialize<'de> for ResponsiveResize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::Null => Ok(ResponsiveResize::Width),
            Value::String(s) => match s.as_str() {
                "width" => Ok(ResponsiveResize::Width),
                "both" => Ok(ResponsiveResize::Both),
                other => Err(serde::de::Error::custom(format!(
                    "unknown responsive_resize mode `{other}`"
                ))),
            },
            other => Err(serde::de::Error::custom(format!(
                "invalid responsive_resize directive `{other}`"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Margin {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisLayout {
    pub label: Option<String>,
    pub label_function: Option<String>,
    pub label_offset: Option<f64>,
    pub tick_format: Option<String>,
    pub ticks: Option<Vec<f64>>,
    pub render: Option<bool>,
}

impl AxisLayout {
    /// An axis renders when it carries any directive, unless explicitly
    /// disabled.
    pub fn should_render(&self) -> bool {
        match self.render {
            Some(explicit) => explicit,
            None => {
                self.label.is_some()
                    || self.label_function.is_some()
                    || self.label_offset.is_some()
                    || self.tick_format.is_some()
                    || self.ticks.is_some()
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelAxes {
    pub x: AxisLayout,
    pub y1: AxisLayout,
    pub y2: AxisLayout,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Scatter,
    Line,
    Genes,
}

/// A visual attribute directive: a constant, or a field mapped through a
/// registered scale function.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VisualDirective {
    Scaled {
        scale_function: String,
        #[serde(default)]
        field: Option<String>,
        #[serde(default)]
        parameters: Value,
    },
    Constant(Value),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisBinding {
    pub field: Option<String>,
    pub axis: Option<u8>,
    pub floor: Option<f64>,
    pub ceiling: Option<f64>,
    pub upper_buffer: Option<f64>,
    pub lower_buffer: Option<f64>,
    pub min_extent: Option<[f64; 2]>,
    pub decoupled: bool,
}

/// Point labels for a scatter layer: a template rendered per record, with
/// the geometry the separation pass needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelDirective {
    pub text: String,
    pub font_size: f64,
    pub spacing: f64,
}

impl Default for LabelDirective {
    fn default() -> Self {
        Self {
            text: String::new(),
            font_size: 12.0,
            spacing: 4.0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TooltipDiv {
    pub html: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TooltipLayout {
    pub html: Option<String>,
    pub divs: Option<Vec<TooltipDiv>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLayerLayout {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: LayerKind,
    pub fields: Vec<String>,
    pub z_index: Option<i64>,
    pub id_field: Option<String>,
    pub x_axis: AxisBinding,
    pub y_axis: AxisBinding,
    pub color: Option<VisualDirective>,
    pub point_shape: Option<VisualDirective>,
    pub point_size: Option<VisualDirective>,
    pub tooltip: Option<TooltipLayout>,
    pub label: Option<LabelDirective>,
    // Gene-track geometry (genes layers only).
    pub label_font_size: f64,
    pub label_exon_spacing: f64,
    pub exon_height: f64,
    pub bounding_box_padding: f64,
    pub track_vertical_spacing: f64,
}

impl Default for DataLayerLayout {
    fn default() -> Self {
        Self {
            id: String::new(),
            kind: LayerKind::Scatter,
            fields: vec![],
            z_index: None,
            id_field: None,
            x_axis: AxisBinding::default(),
            y_axis: AxisBinding::default(),
            color: None,
            point_shape: None,
            point_size: None,
            tooltip: None,
            label: None,
            label_font_size: 12.0,
            label_exon_spacing: 4.0,
            exon_height: 16.0,
            bounding_box_padding: 6.0,
            track_vertical_spacing: 10.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TitleLayout {
    Text(String),
    Placed { text: String, x: f64, y: f64 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelLayout {
    pub id: String,
    pub title: Option<TitleLayout>,
    pub y_index: Option<i64>,
    pub width: f64,
    pub height: f64,
    pub min_width: f64,
    pub min_height: f64,
    pub proportional_width: Option<f64>,
    pub proportional_height: Option<f64>,
    pub origin: Point,
    pub margin: Margin,
    pub axes: PanelAxes,
    pub data_layers: Vec<DataLayerLayout>,
}

impl Default for PanelLayout {
    fn default() -> Self {
        Self {
            id: String::new(),
            title: None,
            y_index: None,
            width: 0.0,
            height: 0.0,
            min_width: 1.0,
            min_height: 1.0,
            proportional_width: None,
            proportional_height: None,
            origin: Point::default(),
            margin: Margin::default(),
            axes: PanelAxes::default(),
            data_layers: vec![],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotLayout {
    pub state: Map<String, Value>,
    pub width: f64,
    pub height: f64,
    pub min_width: f64,
    pub min_height: f64,
    pub resizable: ResizeMode,
    pub responsive_resize: ResponsiveResize,
    pub aspect_ratio: f64,
    pub min_region_scale: Option<f64>,
    pub max_region_scale: Option<f64>,
    pub panels: Vec<PanelLayout>,
}

impl Default for PlotLayout {
    fn default() -> Self {
        Self {
            state: Map::new(),
            width: 1.0,
            height: 1.0,
            min_width: 1.0,
            min_height: 1.0,
            resizable: ResizeMode::Fixed,
            responsive_resize: ResponsiveResize::Width,
            aspect_ratio: 1.0,
            min_region_scale: None,
            max_region_scale: None,
            panels: vec![],
        }
    }
}

impl PlotLayout {
    /// Merge a user layout tree over the defaults (panel and layer defaults
    /// applied per element, since arrays merge atomically), deserialize, and
    /// validate.
    pub fn from_value(user: &Value) -> Result<Self> {
        let mut merged = merge_layouts(user, &default_plot_layout());
        if let Some(panels) = merged.get_mut("panels").and_then(Value::as_array_mut) {
            for panel in panels.iter_mut() {
                let resolved = resolve_panel_value(panel);
                *panel = resolved;
            }
        }
        let layout: PlotLayout = serde_json::from_value(merged)
            .map_err(|e| PlotError::Configuration(e.to_string()))?;
        layout.validate()?;
        Ok(layout)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.width > 0.0) || !(self.height > 0.0) {
            return Err(PlotError::Configuration(
                "plot width and height must be positive numbers".to_string(),
            ));
        }
        if !(self.aspect_ratio > 0.0) {
            return Err(PlotError::Configuration(
                "plot aspect_ratio must be a positive number".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for panel in &self.panels {
            if panel.id.is_empty() {
                return Err(PlotError::Configuration("panel is missing an id".to_string()));
            }
            if !seen.insert(panel.id.clone()) {
                return Err(PlotError::Configuration(format!(
                    "duplicate panel id [{}]",
                    panel.id
                )));
            }
            if panel.proportional_height.is_some_and(|h| h < 0.0)
                || panel.proportional_width.is_some_and(|w| w < 0.0)
            {
                return Err(PlotError::Configuration(format!(
                    "panel [{}] has a negative proportional dimension",
                    panel.id
                )));
            }
            let mut layer_ids = std::collections::HashSet::new();
            for layer in &panel.data_layers {
                if layer.id.is_empty() {
                    return Err(PlotError::Configuration(format!(
                        "data layer in panel [{}] is missing an id",
                        panel.id
                    )));
                }
                if !layer_ids.insert(layer.id.clone()) {
                    return Err(PlotError::Configuration(format!(
                        "duplicate data layer id [{}] in panel [{}]",
                        layer.id, panel.id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Merge one panel tree over the panel defaults, applying per-kind layer
/// defaults to each of its data layers.
pub fn resolve_panel_value(panel: &Value) -> Value {
    let mut resolved = merge_layouts(panel, &default_panel_layout());
    if let Some(layers) = resolved.get_mut("data_layers").and_then(Value::as_array_mut) {
        for layer in layers.iter_mut() {
            let kind = layer
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let resolved_layer = merge_layouts(layer, &default_layer_layout(&kind));
            *layer = resolved_layer;
        }
    }
    resolved
}

/// Resolve a single panel tree into its typed layout.
pub fn panel_layout_from_value(panel: &Value) -> Result<PanelLayout> {
    serde_json::from_value(resolve_panel_value(panel))
        .map_err(|e| PlotError::Configuration(e.to_string()))
}

//------------------------------------------------------------------------------
// Default layout trees
//------------------------------------------------------------------------------

pub fn default_plot_layout() -> Value {
    json!({
        "state": {},
        "width": 1,
        "height": 1,
        "min_width": 1,
        "min_height": 1,
        "resizable": false,
        "aspect_ratio": 1,
        "panels": []
    })
}

pub fn default_panel_layout() -> Value {
    json!({
        "title": null,
        "y_index": null,
        "width": 0,
        "height": 0,
        "origin": { "x": 0, "y": 0 },
        "min_width": 1,
        "min_height": 1,
        "proportional_width": null,
        "proportional_height": null,
        "margin": { "top": 0, "right": 0, "bottom": 0, "left": 0 },
        "axes": { "x": {}, "y1": {}, "y2": {} },
        "data_layers": []
    })
}

pub fn default_layer_layout(kind: &str) -> Value {
    match kind {
        "scatter" => json!({
            "fields": [],
            "id_field": "id",
            "point_size": 40,
            "point_shape": "circle",
            "color": "#888888",
            "x_axis": {},
            "y_axis": { "axis": 1 }
        }),
        "line" => json!({
            "fields": [],
            "x_axis": { "field": "x" },
            "y_axis": { "field": "y", "axis": 1 }
        }),
        "genes" => json!({
            "fields": [],
            "label_font_size": 12,
            "label_exon_spacing": 4,
            "exon_height": 16,
            "bounding_box_padding": 6,
            "track_vertical_spacing": 10,
            "x_axis": {},
            "y_axis": {}
        }),
        _ => json!({ "fields": [], "x_axis": {}, "y_axis": {} }),
    }
}

/// The standard region-view layout: an association panel over a gene track,
/// sized 3:2, with LD-colored scatter points and the usual region clamps.
pub fn standard_layout() -> Value {
    json!({
        "width": 800,
        "height": 450,
        "resizable": "responsive",
        "aspect_ratio": 16.0 / 9.0,
        "min_region_scale": 20000,
        "max_region_scale": 20000000,
        "panels": [
            {
                "id": "association",
                "proportional_height": 0.5,
                "min_width": 400,
                "min_height": 200,
                "margin": { "top": 35, "right": 50, "bottom": 40, "left": 50 },
                "axes": {
                    "x": {
                        "label_function": "chromosome",
                        "label_offset": 32,
                        "tick_format": "region"
                    },
                    "y1": { "label": "-log10 p-value", "label_offset": 28 },
                    "y2": { "label": "Recombination Rate (cM/Mb)", "label_offset": 40 }
                },
                "data_layers": [
                    {
                        "id": "significance",
                        "type": "line",
                        "fields": ["sig:x", "sig:y"],
                        "z_index": 0,
                        "x_axis": { "field": "sig:x", "decoupled": true },
                        "y_axis": { "axis": 1, "field": "sig:y" }
                    },
                    {
                        "id": "recomb",
                        "type": "line",
                        "fields": ["recomb:position", "recomb:recomb_rate"],
                        "z_index": 1,
                        "x_axis": { "field": "recomb:position" },
                        "y_axis": { "axis": 2, "field": "recomb:recomb_rate", "floor": 0, "ceiling": 100 }
                    },
                    {
                        "id": "positions",
                        "type": "scatter",
                        "fields": ["id", "position", "pvalue|scinotation", "pvalue|neglog10", "ld:state"],
                        "z_index": 2,
                        "x_axis": { "field": "position" },
                        "y_axis": {
                            "axis": 1,
                            "field": "pvalue|neglog10",
                            "floor": 0,
                            "upper_buffer": 0.05,
                            "min_extent": [0, 10]
                        },
                        "color": {
                            "field": "ld:state",
                            "scale_function": "numerical_bin",
                            "parameters": {
                                "breaks": [0, 0.2, 0.4, 0.6, 0.8],
                                "values": ["#357ebd", "#46b8da", "#5cb85c", "#eea236", "#d43f3a"],
                                "null_value": "#B8B8B8"
                            }
                        },
                        "tooltip": {
                            "html": "<strong>{{id}}</strong><br>P-value: <strong>{{pvalue|scinotation}}</strong>"
                        }
                    }
                ]
            },
            {
                "id": "genes",
                "proportional_height": 0.5,
                "min_width": 400,
                "min_height": 112.5,
                "margin": { "top": 20, "right": 50, "bottom": 20, "left": 50 },
                "data_layers": [
                    {
                        "id": "genes",
                        "type": "genes",
                        "fields": ["gene:gene"],
                        "tooltip": {
                            "html": "<strong><i>{{gene_name}}</i></strong><br>Gene ID: <strong>{{gene_id}}</strong>"
                        }
                    }
                ]
            }
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_idempotent() {
        let layout = standard_layout();
        assert_eq!(merge_layouts(&layout, &layout), layout);
    }

    #[test]
    fn merge_keeps_every_default_key() {
        let user = json!({ "width": 1000, "panels": [] });
        let defaults = default_plot_layout();
        let merged = merge_layouts(&user, &defaults);
        for key in defaults.as_object().unwrap().keys() {
            assert!(merged.get(key).is_some(), "dropped default key {key}");
        }
        assert_eq!(merged["width"], json!(1000));
    }

    #[test]
    fn merge_does_not_mutate_inputs() {
        let user = json!({ "margin": { "top": 5 } });
        let defaults = json!({ "margin": { "top": 0, "bottom": 10 } });
        let user_before = user.clone();
        let defaults_before = defaults.clone();
        let merged = merge_layouts(&user, &defaults);
        assert_eq!(user, user_before);
        assert_eq!(defaults, defaults_before);
        assert_eq!(merged["margin"]["top"], json!(5));
        assert_eq!(merged["margin"]["bottom"], json!(10));
    }

    #[test]
    fn merge_treats_arrays_as_atomic() {
        let user = json!({ "fields": ["a", "b"] });
        let defaults = json!({ "fields": ["x", "y", "z"] });
        assert_eq!(merge_layouts(&user, &defaults)["fields"], json!(["a", "b"]));
    }

    #[test]
    fn null_custom_values_take_defaults() {
        let user = json!({ "width": null });
        let merged = merge_layouts(&user, &default_plot_layout());
        assert_eq!(merged["width"], json!(1));
    }

    #[test]
    fn standard_layout_resolves() {
        let layout = PlotLayout::from_value(&standard_layout()).unwrap();
        assert_eq!(layout.panels.len(), 2);
        assert_eq!(layout.resizable, ResizeMode::Responsive);
        assert_eq!(layout.panels[0].data_layers.len(), 3);
        assert_eq!(layout.panels[1].data_layers[0].kind, LayerKind::Genes);
        // Scatter defaults filled in per layer.
        let scatter = &layout.panels[0].data_layers[2];
        assert_eq!(scatter.id_field.as_deref(), Some("id"));
        assert_eq!(scatter.point_shape, Some(VisualDirective::Constant(json!("circle"))));
    }

    #[test]
    fn bad_dimensions_are_configuration_errors() {
        let result = PlotLayout::from_value(&json!({ "width": 0 }));
        assert!(matches!(result, Err(PlotError::Configuration(_))));
    }

    #[test]
    fn unknown_resize_mode_is_a_configuration_error() {
        let result = PlotLayout::from_value(&json!({ "resizable": "diagonal" }));
        assert!(matches!(result, Err(PlotError::Configuration(_))));
    }

    #[test]
    fn duplicate_panel_ids_are_rejected() {
        let result = PlotLayout::from_value(&json!({
            "panels": [{ "id": "a" }, { "id": "a" }]
        }));
        assert!(matches!(result, Err(PlotError::Configuration(_))));
    }
}
