//! Data layers: a declared set of namespaced fields plus visual-mapping
//! directives, resolved into positioned elements within a panel.

use crate::error::Result;
use crate::gene_track::{assign_tracks, estimate_label_width, GeneFeature, TrackConfig};
use crate::layout::{AxisBinding, DataLayerLayout, LayerKind, VisualDirective};
use crate::region::Region;
use crate::requester::{Record, Requester};
use crate::scales::{LinearScale, ScaleRegistry};
use crate::state::State;
use crate::template::render as render_template;
use crate::transforms::TransformRegistry;
use itertools::Itertools;
use serde_json::Value;

/// Coordinate for data that falls outside the plottable domain.
const OFFSCREEN: f64 = -1000.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Dimension {
    X,
    Y,
}

/// One positioned scatter point with its resolved visual attributes.
#[derive(Clone, Debug, PartialEq)]
pub struct PointElement {
    pub x: f64,
    pub y: f64,
    pub color: Option<Value>,
    pub shape: Option<Value>,
    pub size: Option<Value>,
    pub record_index: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LayerElements {
    Points(Vec<PointElement>),
    Path(Vec<(f64, f64)>),
    /// Genes render from the layer's track-assigned features.
    Genes { tracks: usize },
}

/// One point label after template rendering and separation.
#[derive(Clone, Debug, PartialEq)]
pub struct LabelElement {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub text: String,
    pub record_index: usize,
}

/// Push overlapping point labels apart vertically until none collide, the
/// positions stop changing, or the iteration cap is reached. One synchronous
/// pass per render; positions are clamped to `[0, max_y]`.
pub fn separate_labels(labels: &mut [LabelElement], max_y: f64, spacing: f64) {
    const MAX_ITERATIONS: usize = 150;
    for _ in 0..MAX_ITERATIONS {
        let mut moved = false;
        for i in 0..labels.len() {
            for j in (i + 1)..labels.len() {
                let horizontal_overlap = labels[i].x < labels[j].x + labels[j].width
                    && labels[j].x < labels[i].x + labels[i].width;
                if !horizontal_overlap {
                    continue;
                }
                let required = (labels[i].height + labels[j].height) / 2.0 + spacing;
                let gap = labels[j].y - labels[i].y;
                if gap.abs() >= required {
                    continue;
                }
                let push = (required - gap.abs()) / 2.0;
                let (up, down) = if gap >= 0.0 { (i, j) } else { (j, i) };
                labels[up].y = (labels[up].y - push).max(0.0);
                labels[down].y = (labels[down].y + push).min(max_y);
                moved = true;
            }
        }
        if !moved {
            break;
        }
    }
}

#[derive(Clone, Debug)]
pub struct DataLayer {
    layout: DataLayerLayout,
    data: Vec<Record>,
    features: Vec<GeneFeature>,
    tracks: usize,
    labels: Vec<LabelElement>,
}

impl DataLayer {
    pub fn new(mut layout: DataLayerLayout) -> Self {
        // A y-axis binding must point at axis 1 or 2; anything else means 1.
        if layout.y_axis.axis.is_some_and(|a| a != 1 && a != 2) {
            layout.y_axis.axis = Some(1);
        }
        Self {
            layout,
            data: vec![],
            features: vec![],
            tracks: 0,
            labels: vec![],
        }
    }

    pub fn id(&self) -> &str {
        &self.layout.id
    }

    pub fn kind(&self) -> LayerKind {
        self.layout.kind
    }

    pub fn layout(&self) -> &DataLayerLayout {
        &self.layout
    }

    pub fn data(&self) -> &[Record] {
        &self.data
    }

    pub fn features(&self) -> &[GeneFeature] {
        &self.features
    }

    pub fn tracks(&self) -> usize {
        self.tracks
    }

    pub fn labels(&self) -> &[LabelElement] {
        &self.labels
    }

    pub fn track_config(&self) -> TrackConfig {
        TrackConfig {
            label_font_size: self.layout.label_font_size,
            label_exon_spacing: self.layout.label_exon_spacing,
            exon_height: self.layout.exon_height,
            bounding_box_padding: self.layout.bounding_box_padding,
            track_vertical_spacing: self.layout.track_vertical_spacing,
        }
    }

    pub fn y_axis_number(&self) -> u8 {
        self.layout.y_axis.axis.unwrap_or(1)
    }

    /// Re-fetch this layer's declared fields through the data source chain.
    pub fn refresh(&mut self, requester: &Requester, state: &State) -> Result<()> {
        let resolved = requester.resolve(state, &self.layout.fields)?;
        self.data = resolved.records;
        if self.layout.kind == LayerKind::Genes {
            self.features = self
                .data
                .iter()
                .filter_map(GeneFeature::from_record)
                .collect();
        }
        Ok(())
    }

    /// Replace this layer's records directly (used by tests and static hosts).
    pub fn set_data(&mut self, data: Vec<Record>) {
        if self.layout.kind == LayerKind::Genes {
            self.features = data.iter().filter_map(GeneFeature::from_record).collect();
        }
        self.data = data;
    }

    fn binding(&self, dimension: Dimension) -> &AxisBinding {
        match dimension {
            Dimension::X => &self.layout.x_axis,
            Dimension::Y => &self.layout.y_axis,
        }
    }

    /// Compute this layer's extent along one dimension: explicit floor and
    /// ceiling win outright; otherwise the data extent widened by the
    /// configured buffers and minimum extent, clamped by floor/ceiling. The
    /// x dimension falls back to the state region.
    pub fn axis_extent(&self, dimension: Dimension, state: &State) -> Option<[f64; 2]> {
        let binding = self.binding(dimension);

        if let (Some(floor), Some(ceiling)) = (binding.floor, binding.ceiling) {
            return Some([floor, ceiling]);
        }

        if let Some(field) = &binding.field {
            let values: Vec<f64> = self
                .data
                .iter()
                .filter_map(|record| value_as_f64(record.get(field)?))
                .collect();
            if !values.is_empty() {
                let mut lo = values.iter().cloned().fold(f64::INFINITY, f64::min);
                let mut hi = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                let span = hi - lo;
                if let Some(buffer) = binding.lower_buffer {
                    lo -= span * buffer;
                }
                if let Some(buffer) = binding.upper_buffer {
                    hi += span * buffer;
                }
                if let Some([min_lo, min_hi]) = binding.min_extent {
                    lo = lo.min(min_lo);
                    hi = hi.max(min_hi);
                }
                if let Some(floor) = binding.floor {
                    lo = floor;
                }
                if let Some(ceiling) = binding.ceiling {
                    hi = ceiling;
                }
                return Some([lo, hi]);
            }
        }

        if dimension == Dimension::X {
            if let (Some(start), Some(end)) = (state.start(), state.end()) {
                return Some([start, end]);
            }
        }
        None
    }

    /// Whether this layer's extent participates in the panel's shared axis.
    pub fn is_decoupled(&self, dimension: Dimension) -> bool {
        self.binding(dimension).decoupled
    }

    /// Produce this layer's positioned elements. Genes layers run the track
    /// packer over the current view; scatter and line layers project their
    /// bound fields through the panel scales. Scatter layers with a label
    /// directive also rebuild their separated point labels.
    pub fn elements(
        &mut self,
        view: Option<&Region>,
        x_scale: &LinearScale,
        y_scale: &LinearScale,
        scales: &ScaleRegistry,
        transforms: &TransformRegistry,
    ) -> Result<LayerElements> {
        match self.layout.kind {
            LayerKind::Genes => {
                let tracks = match view {
                    Some(view) => {
                        let track_config = self.track_config();
                        assign_tracks(&mut self.features, view, x_scale, &track_config)
                    }
                    None => 0,
                };
                self.tracks = tracks;
                Ok(LayerElements::Genes { tracks })
            }
            LayerKind::Line => {
                let x_field = self.layout.x_axis.field.as_deref().unwrap_or("x");
                let y_field = self.layout.y_axis.field.as_deref().unwrap_or("y");
                let path = self
                    .data
                    .iter()
                    .filter_map(|record| {
                        let x = value_as_f64(record.get(x_field)?)?;
                        let y = value_as_f64(record.get(y_field)?)?;
                        Some((x_scale.scale(x), y_scale.scale(y)))
                    })
                    .collect();
                Ok(LayerElements::Path(path))
            }
            LayerKind::Scatter => {
                let mut points = Vec::with_capacity(self.data.len());
                for (index, record) in self.data.iter().enumerate() {
                    let x = self
                        .layout
                        .x_axis
                        .field
                        .as_deref()
                        .and_then(|f| record.get(f))
                        .and_then(value_as_f64)
                        .map(|v| x_scale.scale(v))
                        .unwrap_or(OFFSCREEN);
                    let y = self
                        .layout
                        .y_axis
                        .field
                        .as_deref()
                        .and_then(|f| record.get(f))
                        .and_then(value_as_f64)
                        .map(|v| y_scale.scale(v))
                        .unwrap_or(OFFSCREEN);
                    points.push(PointElement {
                        x: if x.is_nan() { OFFSCREEN } else { x },
                        y: if y.is_nan() { OFFSCREEN } else { y },
                        color: resolve_visual(&self.layout.color, record, index, scales)?,
                        shape: resolve_visual(&self.layout.point_shape, record, index, scales)?,
                        size: resolve_visual(&self.layout.point_size, record, index, scales)?,
                        record_index: index,
                    });
                }
                self.labels = match &self.layout.label {
                    Some(directive) => {
                        let mut labels: Vec<LabelElement> = points
                            .iter()
                            .filter(|point| point.x != OFFSCREEN && point.y != OFFSCREEN)
                            .filter_map(|point| {
                                let record = &self.data[point.record_index];
                                let text =
                                    crate::template::render(&directive.text, record, transforms);
                                if text.is_empty() {
                                    return None;
                                }
                                let width = estimate_label_width(&text, directive.font_size);
                                Some(LabelElement {
                                    x: point.x + directive.spacing,
                                    y: point.y,
                                    width,
                                    height: directive.font_size,
                                    text,
                                    record_index: point.record_index,
                                })
                            })
                            .collect();
                        let max_y = y_scale.range[0].max(y_scale.range[1]);
                        separate_labels(&mut labels, max_y, directive.spacing);
                        labels
                    }
                    None => vec![],
                };
                Ok(LayerElements::Points(points))
            }
        }
    }

    /// Render this layer's tooltip template against one of its records.
    pub fn render_tooltip(
        &self,
        record: &Record,
        transforms: &TransformRegistry,
    ) -> Option<String> {
        let tooltip = self.layout.tooltip.as_ref()?;
        if let Some(html) = &tooltip.html {
            return Some(render_template(html, record, transforms));
        }
        if let Some(divs) = &tooltip.divs {
            return Some(
                divs.iter()
                    .map(|div| render_template(&div.html, record, transforms))
                    .join(""),
            );
        }
        None
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

/// Resolve a visual directive for one record: constants pass through, scaled
/// directives run the registered scale function on the bound field value.
pub fn resolve_visual(
    directive: &Option<VisualDirective>,
    record: &Record,
    index: usize,
    scales: &ScaleRegistry,
) -> Result<Option<Value>> {
    match directive {
        None => Ok(None),
        Some(VisualDirective::Constant(value)) => Ok(Some(value.clone())),
        Some(VisualDirective::Scaled {
            scale_function,
            field,
            parameters,
        }) => {
            let value = field
                .as_deref()
                .and_then(|f| record.get(f))
                .cloned()
                .unwrap_or(Value::Null);
            let scale = scales.get(scale_function)?;
            Ok(scale(parameters, &value, index))
        }
    }
}
