//! A panel: one stacked rectangular region of the plot, owning its margins,
//! clip area, axis extents/scales/ticks and an ordered set of data layers.

use crate::data_layer::{DataLayer, Dimension, LayerElements};
use crate::error::{PlotError, Result};
use crate::labels::LabelRegistry;
use crate::layout::{AxisLayout, PanelLayout};
use crate::region::{pretty_ticks, ClipRange};
use crate::requester::Requester;
use crate::scales::{LinearScale, ScaleRegistry};
use crate::state::State;
use crate::template::render as render_template;
use crate::transforms::TransformRegistry;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PanelAxis {
    X,
    Y1,
    Y2,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ClipArea {
    pub width: f64,
    pub height: f64,
    pub origin_x: f64,
    pub origin_y: f64,
}

#[derive(Clone, Debug)]
pub struct Panel {
    layout: PanelLayout,
    layers: Vec<DataLayer>,
    cliparea: ClipArea,
    x_scale: Option<LinearScale>,
    y1_scale: Option<LinearScale>,
    y2_scale: Option<LinearScale>,
    x_ticks: Vec<f64>,
    y1_ticks: Vec<f64>,
    y2_ticks: Vec<f64>,
    rendered: Vec<(String, LayerElements)>,
}

impl Panel {
    pub fn new(layout: PanelLayout) -> Result<Self> {
        if layout.id.is_empty() {
            return Err(PlotError::Configuration("panel is missing an id".to_string()));
        }
        let mut panel = Self {
            layers: vec![],
            layout,
            cliparea: ClipArea::default(),
            x_scale: None,
            y1_scale: None,
            y2_scale: None,
            x_ticks: vec![],
            y1_ticks: vec![],
            y2_ticks: vec![],
            rendered: vec![],
        };

        // Order layers by z-index: explicit indexes splice into position
        // (negative counts back from the end), everything else appends.
        for layer_layout in panel.layout.data_layers.clone() {
            let layer = DataLayer::new(layer_layout);
            let z = layer.layout().z_index;
            match z {
                Some(z) if !panel.layers.is_empty() => {
                    let len = panel.layers.len() as i64;
                    let idx = if z < 0 { (len + z).max(0) } else { z.min(len) } as usize;
                    panel.layers.insert(idx, layer);
                }
                _ => panel.layers.push(layer),
            }
        }
        panel.update_cliparea();
        Ok(panel)
    }

    pub fn id(&self) -> &str {
        &self.layout.id
    }

    pub fn layout(&self) -> &PanelLayout {
        &self.layout
    }

    pub(crate) fn layout_mut(&mut self) -> &mut PanelLayout {
        &mut self.layout
    }

    pub fn layers(&self) -> &[DataLayer] {
        &self.layers
    }

    pub(crate) fn layers_mut(&mut self) -> &mut [DataLayer] {
        &mut self.layers
    }

    pub fn layer(&self, id: &str) -> Option<&DataLayer> {
        self.layers.iter().find(|layer| layer.id() == id)
    }

    pub fn cliparea(&self) -> ClipArea {
        self.cliparea
    }

    pub fn x_scale(&self) -> Option<LinearScale> {
        self.x_scale
    }

    pub fn y_scale(&self, axis: u8) -> Option<LinearScale> {
        match axis {
            2 => self.y2_scale,
            _ => self.y1_scale,
        }
    }

    pub fn ticks(&self, axis: PanelAxis) -> &[f64] {
        match axis {
            PanelAxis::X => &self.x_ticks,
            PanelAxis::Y1 => &self.y1_ticks,
            PanelAxis::Y2 => &self.y2_ticks,
        }
    }

    pub fn rendered(&self) -> &[(String, LayerElements)] {
        &self.rendered
    }

    /// Set pixel dimensions, bounded below by the panel minimums.
    pub fn set_dimensions(&mut self, width: f64, height: f64) {
        if width.is_finite() && width >= 0.0 && height.is_finite() && height >= 0.0 {
            self.layout.width = width.round().max(self.layout.min_width);
            self.layout.height = height.round().max(self.layout.min_height);
        }
        self.constrain_margins();
        self.update_cliparea();
    }

    pub fn set_origin(&mut self, x: f64, y: f64) {
        if x.is_finite() && x >= 0.0 {
            self.layout.origin.x = x.round().max(0.0);
        }
        if y.is_finite() && y >= 0.0 {
            self.layout.origin.y = y.round().max(0.0);
        }
    }

    /// Margins may never exceed the panel itself; overflow is split evenly.
    fn constrain_margins(&mut self) {
        let margin = &mut self.layout.margin;
        if margin.top + margin.bottom > self.layout.height {
            let extra = ((margin.top + margin.bottom) - self.layout.height) / 2.0;
            margin.top -= extra;
            margin.bottom -= extra;
        }
        if margin.left + margin.right > self.layout.width {
            let extra = ((margin.left + margin.right) - self.layout.width) / 2.0;
            margin.left -= extra;
            margin.right -= extra;
        }
        margin.top = margin.top.max(0.0);
        margin.right = margin.right.max(0.0);
        margin.bottom = margin.bottom.max(0.0);
        margin.left = margin.left.max(0.0);
    }

    fn update_cliparea(&mut self) {
        let margin = &self.layout.margin;
        self.cliparea = ClipArea {
            width: (self.layout.width - margin.left - margin.right).max(0.0),
            height: (self.layout.height - margin.top - margin.bottom).max(0.0),
            origin_x: margin.left,
            origin_y: margin.top,
        };
    }

    /// Re-fetch every layer's declared fields.
    pub fn refresh(&mut self, requester: &Requester, state: &State) -> Result<()> {
        for layer in &mut self.layers {
            layer.refresh(requester, state)?;
        }
        Ok(())
    }

    /// Merge the extents of all coupled layers along one axis.
    fn merged_extent(&self, axis: PanelAxis, state: &State) -> Option<[f64; 2]> {
        let mut merged: Option<[f64; 2]> = None;
        for layer in &self.layers {
            let extent = match axis {
                PanelAxis::X => {
                    if layer.is_decoupled(Dimension::X) {
                        None
                    } else {
                        layer.axis_extent(Dimension::X, state)
                    }
                }
                PanelAxis::Y1 | PanelAxis::Y2 => {
                    let number = if axis == PanelAxis::Y1 { 1 } else { 2 };
                    if layer.y_axis_number() != number
                        || layer.is_decoupled(Dimension::Y)
                        || layer.layout().y_axis.field.is_none()
                    {
                        None
                    } else {
                        layer.axis_extent(Dimension::Y, state)
                    }
                }
            };
            if let Some([lo, hi]) = extent {
                merged = Some(match merged {
                    Some([mlo, mhi]) => [mlo.min(lo), mhi.max(hi)],
                    None => [lo, hi],
                });
            }
        }
        merged
    }

    /// Recompute extents, scales and ticks, then rebuild every layer's
    /// positioned elements for the current state.
    pub fn render(
        &mut self,
        state: &State,
        scales: &ScaleRegistry,
        transforms: &TransformRegistry,
    ) -> Result<()> {
        // x: ticks clip to the extent, target density follows the clip width.
        match self.merged_extent(PanelAxis::X, state) {
            Some(extent) => {
                self.x_ticks = match &self.layout.axes.x.ticks {
                    Some(explicit) => explicit.clone(),
                    None => pretty_ticks(
                        extent,
                        ClipRange::Both,
                        ((self.cliparea.width / 120.0) as usize).max(1),
                    ),
                };
                self.x_scale = Some(LinearScale::new(extent, [0.0, self.cliparea.width]));
            }
            None => {
                self.x_ticks.clear();
                self.x_scale = None;
            }
        }

        // y axes: the extent grows to cover the generated ticks.
        for axis in [PanelAxis::Y1, PanelAxis::Y2] {
            let merged = self.merged_extent(axis, state);
            let (scale, ticks) = match merged {
                Some(mut extent) => {
                    let axis_layout = match axis {
                        PanelAxis::Y1 => &self.layout.axes.y1,
                        _ => &self.layout.axes.y2,
                    };
                    let ticks = match &axis_layout.ticks {
                        Some(explicit) => explicit.clone(),
                        None => pretty_ticks(extent, ClipRange::Neither, 5),
                    };
                    for tick in &ticks {
                        extent[0] = extent[0].min(*tick);
                        extent[1] = extent[1].max(*tick);
                    }
                    (
                        Some(LinearScale::new(extent, [self.cliparea.height, 0.0])),
                        ticks,
                    )
                }
                None => (None, vec![]),
            };
            match axis {
                PanelAxis::Y1 => {
                    self.y1_scale = scale;
                    self.y1_ticks = ticks;
                }
                _ => {
                    self.y2_scale = scale;
                    self.y2_ticks = ticks;
                }
            }
        }

        let identity = LinearScale::new([0.0, 1.0], [0.0, 1.0]);
        let x_scale = self.x_scale.unwrap_or(identity);
        let view = state.region();
        let y1 = self.y1_scale.unwrap_or(identity);
        let y2 = self.y2_scale.unwrap_or(identity);

        let mut rendered = Vec::with_capacity(self.layers.len());
        for layer in &mut self.layers {
            let y_scale = if layer.y_axis_number() == 2 { y2 } else { y1 };
            let elements =
                layer.elements(view.as_ref(), &x_scale, &y_scale, scales, transforms)?;
            rendered.push((layer.id().to_string(), elements));
        }
        self.rendered = rendered;
        Ok(())
    }

    /// Resolve the display label for one axis: a registered label function
    /// wins, otherwise the static label renders as a template against state.
    pub fn axis_label(
        &self,
        axis: PanelAxis,
        state: &State,
        labels: &LabelRegistry,
        transforms: &TransformRegistry,
    ) -> Option<String> {
        let axis_layout: &AxisLayout = match axis {
            PanelAxis::X => &self.layout.axes.x,
            PanelAxis::Y1 => &self.layout.axes.y1,
            PanelAxis::Y2 => &self.layout.axes.y2,
        };
        if !axis_layout.should_render() {
            return None;
        }
        if let Some(name) = &axis_layout.label_function {
            if let Ok(function) = labels.get(name) {
                return Some(function(state));
            }
        }
        axis_layout
            .label
            .as_ref()
            .map(|label| render_template(label, state.values(), transforms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn panel_from(value: serde_json::Value) -> Panel {
        let merged =
            crate::layout::merge_layouts(&value, &crate::layout::default_panel_layout());
        let mut layout: PanelLayout = serde_json::from_value(merged).unwrap();
        layout.data_layers = layout
            .data_layers
            .into_iter()
            .map(|layer| {
                let kind = match layer.kind {
                    crate::layout::LayerKind::Scatter => "scatter",
                    crate::layout::LayerKind::Line => "line",
                    crate::layout::LayerKind::Genes => "genes",
                };
                let value = serde_json::to_value(&layer).unwrap();
                let merged =
                    crate::layout::merge_layouts(&value, &crate::layout::default_layer_layout(kind));
                serde_json::from_value(merged).unwrap()
            })
            .collect();
        Panel::new(layout).unwrap()
    }

    fn region_state() -> State {
        let mut state = State::default();
        state.set("chr", json!("10"));
        state.set("start", json!(0));
        state.set("end", json!(1000));
        state
    }

    #[test]
    fn cliparea_subtracts_margins() {
        let mut panel = panel_from(json!({
            "id": "association",
            "margin": { "top": 35, "right": 50, "bottom": 40, "left": 50 }
        }));
        panel.set_dimensions(800.0, 225.0);
        let clip = panel.cliparea();
        assert_eq!(clip.width, 700.0);
        assert_eq!(clip.height, 150.0);
        assert_eq!(clip.origin_x, 50.0);
        assert_eq!(clip.origin_y, 35.0);
    }

    #[test]
    fn oversized_margins_are_split_back() {
        let mut panel = panel_from(json!({
            "id": "squeezed",
            "margin": { "top": 60, "right": 0, "bottom": 60, "left": 0 }
        }));
        panel.set_dimensions(100.0, 100.0);
        let margin = panel.layout().margin;
        assert_eq!(margin.top + margin.bottom, 100.0);
        assert_eq!(panel.cliparea().height, 0.0);
    }

    #[test]
    fn dimensions_respect_minimums() {
        let mut panel = panel_from(json!({
            "id": "min",
            "min_width": 400,
            "min_height": 200
        }));
        panel.set_dimensions(100.0, 100.0);
        assert_eq!(panel.layout().width, 400.0);
        assert_eq!(panel.layout().height, 200.0);
    }

    #[test]
    fn z_index_orders_layers() {
        let panel = panel_from(json!({
            "id": "p",
            "data_layers": [
                { "id": "first", "type": "line" },
                { "id": "second", "type": "line" },
                { "id": "spliced", "type": "line", "z_index": 0 }
            ]
        }));
        let ids: Vec<&str> = panel.layers().iter().map(|l| l.id()).collect();
        assert_eq!(ids, vec!["spliced", "first", "second"]);
    }

    #[test]
    fn render_builds_scales_and_elements() {
        let mut panel = panel_from(json!({
            "id": "association",
            "margin": { "top": 0, "right": 0, "bottom": 0, "left": 0 },
            "data_layers": [{
                "id": "positions",
                "type": "scatter",
                "x_axis": { "field": "position" },
                "y_axis": { "field": "pvalue|neglog10", "floor": 0, "ceiling": 10 }
            }]
        }));
        panel.set_dimensions(800.0, 400.0);
        let mut records = vec![];
        for (pos, neglog) in [(100.0, 2.0), (900.0, 8.0)] {
            let mut record = crate::requester::Record::new();
            record.insert("position".to_string(), json!(pos));
            record.insert("pvalue|neglog10".to_string(), json!(neglog));
            records.push(record);
        }
        panel.layers_mut()[0].set_data(records);
        panel
            .render(
                &region_state(),
                &ScaleRegistry::default(),
                &TransformRegistry::default(),
            )
            .unwrap();

        let x_scale = panel.x_scale().unwrap();
        assert_eq!(x_scale.domain, [100.0, 900.0]);
        assert_eq!(x_scale.range, [0.0, 800.0]);
        let y_scale = panel.y_scale(1).unwrap();
        assert_eq!(y_scale.domain, [0.0, 10.0]);
        // y range is inverted: larger values sit higher on the panel.
        assert_eq!(y_scale.range, [400.0, 0.0]);
        assert!(!panel.ticks(PanelAxis::X).is_empty());

        let (id, elements) = &panel.rendered()[0];
        assert_eq!(id, "positions");
        let LayerElements::Points(points) = elements else {
            panic!("expected points");
        };
        assert_eq!(points[0].x, 0.0);
        assert_eq!(points[1].y, 80.0);
    }

    #[test]
    fn axis_labels_resolve_functions_and_templates() {
        let panel = panel_from(json!({
            "id": "association",
            "axes": {
                "x": { "label_function": "chromosome" },
                "y1": { "label": "-log10 p-value (chr {{chr}})" }
            }
        }));
        let labels = LabelRegistry::default();
        let transforms = TransformRegistry::default();
        let state = region_state();
        assert_eq!(
            panel.axis_label(PanelAxis::X, &state, &labels, &transforms),
            Some("Chromosome 10 (Mb)".to_string())
        );
        assert_eq!(
            panel.axis_label(PanelAxis::Y1, &state, &labels, &transforms),
            Some("-log10 p-value (chr 10)".to_string())
        );
        assert_eq!(
            panel.axis_label(PanelAxis::Y2, &state, &labels, &transforms),
            None
        );
    }
}
