//! Gene features and the greedy track packer: assign each feature to the
//! first horizontal track where its padded pixel footprint (widened to fit
//! its label) does not collide with anything already placed.

use crate::region::Region;
use crate::requester::Record;
use crate::scales::LinearScale;
use serde_json::Value;

/// Monospace-ish width estimate per glyph, as a fraction of the font size.
/// Headless stand-in for measuring a rendered label.
const LABEL_GLYPH_WIDTH_RATIO: f64 = 0.6;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TrackConfig {
    pub label_font_size: f64,
    pub label_exon_spacing: f64,
    pub exon_height: f64,
    pub bounding_box_padding: f64,
    pub track_vertical_spacing: f64,
}

impl TrackConfig {
    /// Total vertical footprint of one track: bounding box padding above and
    /// below, label, label/exon gap, exon block, and inter-track spacing.
    pub fn track_height(&self) -> f64 {
        2.0 * self.bounding_box_padding
            + self.label_font_size
            + self.label_exon_spacing
            + self.exon_height
            + self.track_vertical_spacing
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TextAnchor {
    Start,
    Middle,
    End,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Exon {
    pub start: f64,
    pub end: f64,
}

/// Pixel footprint of a feature after label widening and padding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayRange {
    pub start: f64,
    pub end: f64,
    pub label_width: f64,
    pub text_anchor: TextAnchor,
}

impl DisplayRange {
    pub fn width(&self) -> f64 {
        self.end - self.start
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GeneFeature {
    pub gene_name: String,
    pub gene_id: Option<String>,
    pub gene_version: Option<String>,
    pub transcript_id: Option<String>,
    pub strand: Option<String>,
    pub start: f64,
    pub end: f64,
    pub exons: Vec<Exon>,
    pub record: Record,
    pub display_range: DisplayRange,
    /// Display range converted back to domain units.
    pub display_domain: (f64, f64),
    /// Assigned track, 1-based. 0 until `assign_tracks` has run.
    pub track: usize,
}

fn field_f64(record: &Record, key: &str) -> Option<f64> {
    match record.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn field_string(record: &Record, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl GeneFeature {
    /// Build a feature from a gene annotation record. Rows without a name or
    /// interval are not renderable and yield `None`. Combined `id.version`
    /// gene ids are split apart; exons come from the first transcript.
    pub fn from_record(record: &Record) -> Option<Self> {
        let gene_name = field_string(record, "gene_name")?;
        let start = field_f64(record, "start")?;
        let end = field_f64(record, "end")?;

        let (gene_id, gene_version) = match field_string(record, "gene_id") {
            Some(raw) => match raw.split_once('.') {
                Some((id, version)) => (Some(id.to_string()), Some(version.to_string())),
                None => (Some(raw), None),
            },
            None => (None, None),
        };

        let first_transcript = record
            .get("transcripts")
            .and_then(Value::as_array)
            .and_then(|t| t.first());
        let transcript_id = first_transcript
            .and_then(|t| t.get("transcript_id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let exons = first_transcript
            .and_then(|t| t.get("exons"))
            .and_then(Value::as_array)
            .map(|exons| {
                exons
                    .iter()
                    .filter_map(|exon| {
                        Some(Exon {
                            start: exon.get("start")?.as_f64()?,
                            end: exon.get("end")?.as_f64()?,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            gene_name,
            gene_id,
            gene_version,
            transcript_id,
            strand: field_string(record, "strand"),
            start,
            end,
            exons,
            record: record.clone(),
            display_range: DisplayRange {
                start: 0.0,
                end: 0.0,
                label_width: 0.0,
                text_anchor: TextAnchor::Middle,
            },
            display_domain: (0.0, 0.0),
            track: 0,
        })
    }

    /// The label as drawn: gene name plus a strand arrow.
    pub fn label(&self) -> String {
        match self.strand.as_deref() {
            Some("-") => format!("←{}", self.gene_name),
            _ => format!("{}→", self.gene_name),
        }
    }
}

pub fn estimate_label_width(label: &str, font_size: f64) -> f64 {
    label.chars().count() as f64 * font_size * LABEL_GLYPH_WIDTH_RATIO
}

/// Assign features to non-overlapping tracks.
///
/// Each feature's pixel display range is its genomic interval clipped to the
/// view. A label wider than the range widens it, anchored at the feature's
/// start when its true start lies left of the window, at its end when the
/// true end lies right of it, otherwise centered, clamped to the visible
/// pixel area, then padded by the bounding-box margin. Features are placed
/// in input order onto the first track with no collision; the scan is greedy
/// and deterministic, not globally optimal. Returns the number of tracks.
pub fn assign_tracks(
    features: &mut [GeneFeature],
    view: &Region,
    x_scale: &LinearScale,
    cfg: &TrackConfig,
) -> usize {
    let view_left = x_scale.scale(view.start);
    let view_right = x_scale.scale(view.end);

    // Placed footprints per track: (start, end, width).
    let mut tracks: Vec<Vec<(f64, f64, f64)>> = vec![vec![]];

    for feature in features.iter_mut() {
        let mut range = DisplayRange {
            start: x_scale.scale(feature.start.max(view.start)),
            end: x_scale.scale(feature.end.min(view.end)),
            label_width: estimate_label_width(&feature.label(), cfg.label_font_size),
            text_anchor: TextAnchor::Middle,
        };

        if range.width() < range.label_width {
            if feature.start < view.start {
                range.end = range.start + range.label_width + cfg.label_font_size;
                range.text_anchor = TextAnchor::Start;
            } else if feature.end > view.end {
                range.start = range.end - range.label_width - cfg.label_font_size;
                range.text_anchor = TextAnchor::End;
            } else {
                let centered_margin =
                    (range.label_width - range.width()) / 2.0 + cfg.label_font_size;
                if range.start - centered_margin < view_left {
                    range.start = view_left;
                    range.end = range.start + range.label_width;
                    range.text_anchor = TextAnchor::Start;
                } else if range.end + centered_margin > view_right {
                    range.end = view_right;
                    range.start = range.end - range.label_width;
                    range.text_anchor = TextAnchor::End;
                } else {
                    range.start -= centered_margin;
                    range.end += centered_margin;
                }
            }
        }

        range.start -= cfg.bounding_box_padding;
        range.end += cfg.bounding_box_padding;

        feature.display_domain = (x_scale.invert(range.start), x_scale.invert(range.end));
        feature.display_range = range;

        let footprint = (range.start, range.end, range.width());
        let mut assigned = None;
        for (index, placed) in tracks.iter().enumerate() {
            let collision = placed.iter().any(|other| {
                footprint.1.max(other.1) - footprint.0.min(other.0) < footprint.2 + other.2
            });
            if !collision {
                assigned = Some(index);
                break;
            }
        }
        let index = match assigned {
            Some(index) => index,
            None => {
                tracks.push(vec![]);
                tracks.len() - 1
            }
        };
        tracks[index].push(footprint);
        feature.track = index + 1;
    }

    tracks.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bare_feature(start: f64, end: f64) -> GeneFeature {
        let record = json!({ "gene_name": "", "start": start, "end": end });
        GeneFeature::from_record(record.as_object().unwrap()).unwrap()
    }

    fn identity_setup() -> (Region, LinearScale, TrackConfig) {
        (
            Region::new("1", 0.0, 800.0),
            LinearScale::new([0.0, 800.0], [0.0, 800.0]),
            TrackConfig::default(),
        )
    }

    #[test]
    fn overlap_forces_a_new_track() {
        let (view, scale, cfg) = identity_setup();
        let mut features = vec![
            bare_feature(10.0, 20.0),
            bare_feature(15.0, 25.0),
            bare_feature(30.0, 40.0),
        ];
        let tracks = assign_tracks(&mut features, &view, &scale, &cfg);
        assert_eq!(tracks, 2);
        assert_eq!(features[0].track, 1);
        assert_eq!(features[1].track, 2);
        assert_eq!(features[2].track, 1);
    }

    #[test]
    fn assignment_is_deterministic() {
        let (view, scale, cfg) = identity_setup();
        let build = || {
            vec![
                bare_feature(10.0, 120.0),
                bare_feature(50.0, 200.0),
                bare_feature(130.0, 300.0),
                bare_feature(10.0, 15.0),
                bare_feature(700.0, 790.0),
            ]
        };
        let mut first = build();
        let mut second = build();
        assign_tracks(&mut first, &view, &scale, &cfg);
        assign_tracks(&mut second, &view, &scale, &cfg);
        let tracks_of = |f: &[GeneFeature]| f.iter().map(|g| g.track).collect::<Vec<_>>();
        assert_eq!(tracks_of(&first), tracks_of(&second));
    }

    #[test]
    fn no_same_track_features_overlap() {
        let (view, scale, _) = identity_setup();
        let cfg = TrackConfig {
            label_font_size: 12.0,
            bounding_box_padding: 6.0,
            ..TrackConfig::default()
        };
        let mut features: Vec<GeneFeature> = (0..20)
            .map(|i| {
                let start = (i as f64 * 37.0) % 700.0;
                let mut f = bare_feature(start, start + 60.0);
                f.gene_name = format!("GENE{i}");
                f
            })
            .collect();
        assign_tracks(&mut features, &view, &scale, &cfg);
        for a in &features {
            for b in &features {
                if std::ptr::eq(a, b) || a.track != b.track {
                    continue;
                }
                let (ar, br) = (&a.display_range, &b.display_range);
                let apart = ar.end.max(br.end) - ar.start.min(br.start)
                    >= ar.width() + br.width();
                assert!(apart, "{} and {} collide on track {}", a.gene_name, b.gene_name, a.track);
            }
        }
    }

    #[test]
    fn label_widening_anchors_at_the_window_edges() {
        let view = Region::new("1", 1000.0, 2000.0);
        let scale = LinearScale::new([1000.0, 2000.0], [0.0, 800.0]);
        let cfg = TrackConfig {
            label_font_size: 12.0,
            ..TrackConfig::default()
        };

        // True start lies left of the window: anchor at start.
        let mut left = vec![bare_feature(500.0, 1010.0)];
        left[0].gene_name = "LONGGENENAME".to_string();
        assign_tracks(&mut left, &view, &scale, &cfg);
        assert_eq!(left[0].display_range.text_anchor, TextAnchor::Start);

        // True end lies right of the window: anchor at end.
        let mut right = vec![bare_feature(1990.0, 2500.0)];
        right[0].gene_name = "LONGGENENAME".to_string();
        assign_tracks(&mut right, &view, &scale, &cfg);
        assert_eq!(right[0].display_range.text_anchor, TextAnchor::End);

        // Fully visible: stays centered, widened symmetrically.
        let mut center = vec![bare_feature(1490.0, 1510.0)];
        center[0].gene_name = "LONGGENENAME".to_string();
        assign_tracks(&mut center, &view, &scale, &cfg);
        assert_eq!(center[0].display_range.text_anchor, TextAnchor::Middle);
        assert!(center[0].display_range.width() >= center[0].display_range.label_width);
    }

    #[test]
    fn parses_gene_records() {
        let record = json!({
            "gene_name": "TCF7L2",
            "gene_id": "ENSG00000148737.10",
            "start": 114710009,
            "end": 114927437,
            "strand": "+",
            "transcripts": [
                { "transcript_id": "ENST00000543371", "exons": [
                    { "start": 114710009, "end": 114710400 },
                    { "start": 114880000, "end": 114880500 }
                ]}
            ]
        });
        let feature = GeneFeature::from_record(record.as_object().unwrap()).unwrap();
        assert_eq!(feature.gene_id.as_deref(), Some("ENSG00000148737"));
        assert_eq!(feature.gene_version.as_deref(), Some("10"));
        assert_eq!(feature.transcript_id.as_deref(), Some("ENST00000543371"));
        assert_eq!(feature.exons.len(), 2);
        assert_eq!(feature.label(), "TCF7L2→");

        let unusable = json!({ "gene_name": "X" });
        assert!(GeneFeature::from_record(unusable.as_object().unwrap()).is_none());
    }

    #[test]
    fn track_height_sums_geometry() {
        let cfg = TrackConfig {
            label_font_size: 12.0,
            label_exon_spacing: 4.0,
            exon_height: 16.0,
            bounding_box_padding: 6.0,
            track_vertical_spacing: 10.0,
        };
        assert_eq!(cfg.track_height(), 54.0);
    }
}
