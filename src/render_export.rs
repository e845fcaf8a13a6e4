//! Headless SVG export of the solved geometry: panel frames, axis ticks,
//! scatter points, line paths and gene tracks. This serializes what the
//! engine decided to draw where; hosts bring their own styling.

use crate::data_layer::LayerElements;
use crate::gene_track::TextAnchor;
use crate::panel::{Panel, PanelAxis};
use crate::plot::Plot;
use crate::region::position_to_string;
use svg::node::element::path::Data;
use svg::node::element::{Circle, Group, Line, Path, Rectangle, Text};
use svg::Document;

const FRAME_COLOR: &str = "#d2d2d2";
const TICK_COLOR: &str = "#1c1c1c";
const TICK_LENGTH: f64 = 6.0;
const TICK_FONT_SIZE: f64 = 10.0;
const LABEL_FONT_SIZE: f64 = 12.0;
const DEFAULT_POINT_COLOR: &str = "#888888";
const GENE_BOUNDARY_COLOR: &str = "#545454";
const LINE_COLOR: &str = "#0000ff";

pub fn export_svg(plot: &Plot) -> Document {
    let width = plot.layout().width;
    let height = plot.layout().height;
    let mut document = Document::new()
        .set("viewBox", (0.0, 0.0, width, height))
        .set("width", width)
        .set("height", height);

    document = document.add(
        Rectangle::new()
            .set("width", width)
            .set("height", height)
            .set("fill", "#ffffff"),
    );

    for panel in plot.panels() {
        document = document.add(panel_group(plot, panel));
    }
    document
}

pub fn export_svg_string(plot: &Plot) -> String {
    export_svg(plot).to_string()
}

fn panel_group(plot: &Plot, panel: &Panel) -> Group {
    let layout = panel.layout();
    let clip = panel.cliparea();
    let mut group = Group::new()
        .set("id", format!("panel_{}", layout.id))
        .set(
            "transform",
            format!("translate({},{})", layout.origin.x, layout.origin.y),
        );

    group = group.add(
        Rectangle::new()
            .set("width", layout.width)
            .set("height", layout.height)
            .set("fill", "none")
            .set("stroke", FRAME_COLOR),
    );

    group = add_axes(group, plot, panel);

    // Data layers, already positioned in clip-area coordinates.
    let mut layers = Group::new().set(
        "transform",
        format!("translate({},{})", clip.origin_x, clip.origin_y),
    );
    for (layer_id, elements) in panel.rendered() {
        layers = layers.add(layer_group(panel, layer_id, elements));
    }
    group.add(layers)
}

fn add_axes(mut group: Group, plot: &Plot, panel: &Panel) -> Group {
    let layout = panel.layout();
    let clip = panel.cliparea();
    let region_format = layout.axes.x.tick_format.as_deref() == Some("region");

    if let Some(x_scale) = panel.x_scale() {
        let axis_y = layout.height - layout.margin.bottom;
        for tick in panel.ticks(PanelAxis::X) {
            let x = clip.origin_x + x_scale.scale(*tick);
            group = group.add(
                Line::new()
                    .set("x1", x)
                    .set("y1", axis_y)
                    .set("x2", x)
                    .set("y2", axis_y + TICK_LENGTH)
                    .set("stroke", TICK_COLOR),
            );
            let text = if region_format {
                position_to_string(*tick)
            } else {
                format!("{tick}")
            };
            group = group.add(
                Text::new(text)
                    .set("x", x)
                    .set("y", axis_y + TICK_LENGTH + TICK_FONT_SIZE)
                    .set("font-size", TICK_FONT_SIZE)
                    .set("text-anchor", "middle"),
            );
        }
    }
    for (axis, panel_axis) in [(1u8, PanelAxis::Y1), (2u8, PanelAxis::Y2)] {
        let Some(y_scale) = panel.y_scale(axis) else { continue };
        let ticks = panel.ticks(panel_axis);
        if ticks.is_empty() {
            continue;
        }
        let (x, direction) = if axis == 1 {
            (layout.margin.left, -1.0)
        } else {
            (layout.width - layout.margin.right, 1.0)
        };
        for tick in ticks {
            let y = clip.origin_y + y_scale.scale(*tick);
            group = group.add(
                Line::new()
                    .set("x1", x)
                    .set("y1", y)
                    .set("x2", x + direction * TICK_LENGTH)
                    .set("y2", y)
                    .set("stroke", TICK_COLOR),
            );
            group = group.add(
                Text::new(format!("{tick}"))
                    .set("x", x + direction * (TICK_LENGTH + 2.0))
                    .set("y", y)
                    .set("font-size", TICK_FONT_SIZE)
                    .set("text-anchor", if axis == 1 { "end" } else { "start" }),
            );
        }
    }

    let labels = [
        (PanelAxis::X, clip.origin_x + clip.width / 2.0, layout.height - 4.0),
        (PanelAxis::Y1, LABEL_FONT_SIZE, clip.origin_y + clip.height / 2.0),
    ];
    for (axis, x, y) in labels {
        if let Some(label) = panel.axis_label(axis, plot.state(), plot.labels(), plot.transforms())
        {
            let mut text = Text::new(label)
                .set("x", x)
                .set("y", y)
                .set("font-size", LABEL_FONT_SIZE)
                .set("text-anchor", "middle");
            if axis == PanelAxis::Y1 {
                text = text.set("transform", format!("rotate(-90 {x} {y})"));
            }
            group = group.add(text);
        }
    }
    group
}

fn layer_group(panel: &Panel, layer_id: &str, elements: &LayerElements) -> Group {
    let mut group = Group::new().set("id", format!("layer_{layer_id}"));
    match elements {
        LayerElements::Points(points) => {
            if let Some(layer) = panel.layer(layer_id) {
                for label in layer.labels() {
                    group = group.add(
                        Text::new(label.text.clone())
                            .set("x", label.x)
                            .set("y", label.y)
                            .set("font-size", label.height)
                            .set("text-anchor", "start"),
                    );
                }
            }
            for point in points {
                let size = point
                    .size
                    .as_ref()
                    .and_then(|s| s.as_f64())
                    .unwrap_or(40.0);
                let radius = (size / std::f64::consts::PI).sqrt();
                let fill = point
                    .color
                    .as_ref()
                    .and_then(|c| c.as_str().map(str::to_string))
                    .unwrap_or_else(|| DEFAULT_POINT_COLOR.to_string());
                group = group.add(
                    Circle::new()
                        .set("cx", point.x)
                        .set("cy", point.y)
                        .set("r", radius)
                        .set("fill", fill),
                );
            }
        }
        LayerElements::Path(points) => {
            if points.is_empty() {
                return group;
            }
            let mut data = Data::new().move_to(points[0]);
            for point in &points[1..] {
                data = data.line_to(*point);
            }
            group = group.add(
                Path::new()
                    .set("d", data)
                    .set("fill", "none")
                    .set("stroke", LINE_COLOR),
            );
        }
        LayerElements::Genes { .. } => {
            let Some(layer) = panel.layer(layer_id) else {
                return group;
            };
            let cfg = layer.track_config();
            let track_height = cfg.track_height();
            for feature in layer.features() {
                let top = (feature.track.saturating_sub(1)) as f64 * track_height;
                let range = &feature.display_range;
                group = group.add(
                    Rectangle::new()
                        .set("x", range.start)
                        .set("y", top)
                        .set("width", range.width())
                        .set("height", track_height - cfg.track_vertical_spacing)
                        .set("rx", cfg.bounding_box_padding)
                        .set("fill", "none")
                        .set("stroke", FRAME_COLOR),
                );
                let boundary_y = top
                    + cfg.bounding_box_padding
                    + cfg.label_font_size
                    + cfg.label_exon_spacing
                    + cfg.exon_height.max(3.0) / 2.0;
                if let Some(x_scale) = panel.x_scale() {
                    group = group.add(
                        Line::new()
                            .set("x1", x_scale.scale(feature.start))
                            .set("y1", boundary_y)
                            .set("x2", x_scale.scale(feature.end))
                            .set("y2", boundary_y)
                            .set("stroke", GENE_BOUNDARY_COLOR),
                    );
                    let exon_y = top
                        + cfg.bounding_box_padding
                        + cfg.label_font_size
                        + cfg.label_exon_spacing;
                    for exon in &feature.exons {
                        group = group.add(
                            Rectangle::new()
                                .set("x", x_scale.scale(exon.start))
                                .set("y", exon_y)
                                .set("width", x_scale.scale(exon.end) - x_scale.scale(exon.start))
                                .set("height", cfg.exon_height)
                                .set("fill", GENE_BOUNDARY_COLOR),
                        );
                    }
                }
                let (label_x, anchor) = match range.text_anchor {
                    TextAnchor::Start => (range.start + cfg.bounding_box_padding, "start"),
                    TextAnchor::Middle => (range.start + range.width() / 2.0, "middle"),
                    TextAnchor::End => (range.end - cfg.bounding_box_padding, "end"),
                };
                group = group.add(
                    Text::new(feature.label())
                        .set("x", label_x)
                        .set("y", top + cfg.bounding_box_padding + cfg.label_font_size)
                        .set("font-size", cfg.label_font_size)
                        .set("text-anchor", anchor),
                );
            }
        }
    }
    group
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::{DataSources, StaticSource};
    use crate::plot::{populate, FixedSurface};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn exports_one_group_per_panel() {
        let mut sources = DataSources::default();
        sources.add(
            "base",
            Arc::new(StaticSource::new(json!({
                "id": ["1:100_A/T"],
                "position": [100],
                "pvalue": [1e-8]
            }))),
        );
        sources.add(
            "gene",
            Arc::new(StaticSource::new(json!([
                { "gene": "TCF7L2", "gene_name": "TCF7L2", "start": 120, "end": 180 }
            ]))),
        );
        let layout = json!({
            "width": 800,
            "height": 400,
            "state": { "chr": "10", "start": 1, "end": 500 },
            "panels": [
                {
                    "id": "association",
                    "proportional_height": 0.5,
                    "data_layers": [{
                        "id": "positions",
                        "type": "scatter",
                        "fields": ["id", "position", "pvalue|neglog10"],
                        "x_axis": { "field": "position" },
                        "y_axis": { "field": "pvalue|neglog10" }
                    }]
                },
                {
                    "id": "genes",
                    "proportional_height": 0.5,
                    "data_layers": [{
                        "id": "genes",
                        "type": "genes",
                        "fields": ["gene:gene_name", "gene:start", "gene:end"]
                    }]
                }
            ]
        });
        let surface = FixedSurface {
            width: 800.0,
            height: 400.0,
        };
        let plot = populate(&surface, sources, &layout).unwrap();
        assert!(plot.curtain().is_none(), "curtain: {:?}", plot.curtain());

        let rendered = export_svg_string(&plot);
        assert!(rendered.contains("<svg"));
        assert!(rendered.contains("panel_association"));
        assert!(rendered.contains("panel_genes"));
        assert!(rendered.contains("<circle"));
        assert!(rendered.contains("TCF7L2→"));
    }
}
