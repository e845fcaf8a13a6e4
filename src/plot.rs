//! The plot orchestrator: owns shared view state and the ordered panel
//! registry, drives re-fetch/re-render batches on state changes, solves the
//! stacked-panel geometry, and emits lifecycle events.

use crate::data_source::DataSources;
use crate::error::{PlotError, Result};
use crate::events::{Event, EventBus, EventKind};
use crate::labels::LabelRegistry;
use crate::layout::{panel_layout_from_value, PlotLayout, ResizeMode, ResponsiveResize};
use crate::panel::Panel;
use crate::requester::Requester;
use crate::scales::ScaleRegistry;
use crate::state::State;
use crate::transforms::TransformRegistry;
use log::warn;
use rayon::prelude::*;
use serde_json::{Map, Value};

/// The surface a plot is mounted into. The engine only ever asks for its
/// current size (responsive layouts) and an optional region hint.
pub trait HostSurface {
    fn size(&self) -> (f64, f64);
    fn region_hint(&self) -> Option<String> {
        None
    }
}

/// A fixed-size surface with no region hint; enough for headless hosts.
#[derive(Clone, Copy, Debug)]
pub struct FixedSurface {
    pub width: f64,
    pub height: f64,
}

impl HostSurface for FixedSurface {
    fn size(&self) -> (f64, f64) {
        (self.width, self.height)
    }
}

pub struct Plot {
    layout: PlotLayout,
    state: State,
    panels: Vec<Panel>,
    sources: DataSources,
    transforms: TransformRegistry,
    scales: ScaleRegistry,
    labels: LabelRegistry,
    events: EventBus,
    loading: bool,
    generation: u64,
    curtain: Option<String>,
    surface_size: (f64, f64),
}

/// Build a plot into a hosting surface: resolve the layout over the
/// defaults, seed state (honoring the surface's region hint), create the
/// panels, solve the initial geometry, and run a first refresh when any data
/// sources are registered. Data errors during that first refresh drop the
/// curtain rather than failing construction; configuration errors are fatal.
pub fn populate(
    surface: &dyn HostSurface,
    sources: DataSources,
    layout: &Value,
) -> Result<Plot> {
    let mut resolved = PlotLayout::from_value(layout)?;

    let mut state = State::new(std::mem::take(&mut resolved.state));
    if let Some(hint) = surface.region_hint() {
        state.apply_region_hint(&hint);
    }
    state.normalize_region(resolved.min_region_scale, resolved.max_region_scale);

    let panel_layouts = std::mem::take(&mut resolved.panels);
    let mut plot = Plot {
        layout: resolved,
        state,
        panels: vec![],
        sources,
        transforms: TransformRegistry::default(),
        scales: ScaleRegistry::default(),
        labels: LabelRegistry::default(),
        events: EventBus::default(),
        loading: false,
        generation: 0,
        curtain: None,
        surface_size: surface.size(),
    };
    for panel_layout in panel_layouts {
        plot.insert_panel(Panel::new(panel_layout)?)?;
    }
    plot.set_dimensions(Some(plot.layout.width), Some(plot.layout.height));
    plot.position_panels();

    if !plot.sources.is_empty() {
        if let Err(err) = plot.refresh() {
            warn!("initial refresh failed: {err}");
        }
    }
    Ok(plot)
}

impl Plot {
    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn layout(&self) -> &PlotLayout {
        &self.layout
    }

    pub fn panels(&self) -> &[Panel] {
        &self.panels
    }

    pub fn panel(&self, id: &str) -> Option<&Panel> {
        self.panels.iter().find(|panel| panel.id() == id)
    }

    pub fn loading(&self) -> bool {
        self.loading
    }

    /// The blocking error message from the last failed batch, if any.
    pub fn curtain(&self) -> Option<&str> {
        self.curtain.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn transforms(&self) -> &TransformRegistry {
        &self.transforms
    }

    pub fn transforms_mut(&mut self) -> &mut TransformRegistry {
        &mut self.transforms
    }

    pub fn scales(&self) -> &ScaleRegistry {
        &self.scales
    }

    pub fn scales_mut(&mut self) -> &mut ScaleRegistry {
        &mut self.scales
    }

    pub fn labels(&self) -> &LabelRegistry {
        &self.labels
    }

    pub fn on(&mut self, kind: EventKind, handler: Box<dyn Fn(&Event)>) {
        self.events.on(kind, handler);
    }

    /// Merge proposed changes into the shared state, normalize the region,
    /// and run one full re-fetch/re-render batch over every panel. The batch
    /// either settles completely or fails as a unit: on failure the state
    /// stays committed, the last good render stays visible under the curtain,
    /// and the error is reported once (no automatic retry).
    pub fn apply_state(&mut self, changes: Map<String, Value>) -> Result<()> {
        let mut staged = self.state.clone();
        staged.apply(&changes);
        staged.normalize_region(self.layout.min_region_scale, self.layout.max_region_scale);
        self.state = staged;

        self.loading = true;
        self.generation += 1;
        let generation = self.generation;
        self.events.emit(&Event::DataRequested { generation });

        match self.refresh_panels() {
            Err(err) => {
                self.loading = false;
                self.curtain = Some(err.to_string());
                Err(err)
            }
            Ok(()) => {
                self.loading = false;
                self.curtain = None;
                self.position_panels();
                self.events.emit(&Event::DataRendered { generation });
                self.events.emit(&Event::StateChanged {
                    state: self.state.clone(),
                });
                Ok(())
            }
        }
    }

    /// Re-pull all data without changing position.
    pub fn refresh(&mut self) -> Result<()> {
        self.apply_state(Map::new())
    }

    /// Refresh every panel; the batch is complete only when all have
    /// settled. Panels refresh concurrently but results commit here, on the
    /// calling thread, and the first failure aborts the whole batch.
    fn refresh_panels(&mut self) -> Result<()> {
        let Plot {
            panels,
            sources,
            transforms,
            scales,
            state,
            ..
        } = self;
        let (sources, transforms, scales, state) = (&*sources, &*transforms, &*scales, &*state);
        let results: Vec<Result<()>> = panels
            .par_iter_mut()
            .map(|panel| {
                let requester = Requester::new(sources, transforms);
                panel.refresh(&requester, state)?;
                panel.render(state, scales, transforms)
            })
            .collect();
        results.into_iter().collect()
    }

    /// Add a panel from a layout tree. Triggers a full re-layout; the new
    /// panel's data loads on the next refresh.
    pub fn add_panel(&mut self, layout: &Value) -> Result<&Panel> {
        let panel_layout = panel_layout_from_value(layout)?;
        if self.panel(&panel_layout.id).is_some() {
            return Err(PlotError::Configuration(format!(
                "cannot add panel with id [{}]; a panel with that id already exists",
                panel_layout.id
            )));
        }
        let index = self.insert_panel(Panel::new(panel_layout)?)?;
        self.position_panels();
        self.events.emit(&Event::LayoutChanged);
        Ok(&self.panels[index])
    }

    /// Place a panel into the y-ordered registry, honoring an explicit
    /// y_index (negative counts back from the end), and initialize its
    /// proportional dimensions the way panels default them.
    fn insert_panel(&mut self, mut panel: Panel) -> Result<usize> {
        let existing = self.panels.len();
        {
            let layout = panel.layout_mut();
            if layout.width == 0.0 && layout.proportional_width.is_none() {
                layout.proportional_width = Some(1.0);
            }
            if layout.height == 0.0 && layout.proportional_height.is_none() {
                layout.proportional_height = Some(if existing > 0 {
                    1.0 / existing as f64
                } else {
                    1.0
                });
            }
        }

        let index = match panel.layout().y_index {
            Some(y) if !self.panels.is_empty() => {
                let len = self.panels.len() as i64;
                let idx = if y < 0 { (len + y).max(0) } else { y.min(len) };
                idx as usize
            }
            _ => self.panels.len(),
        };
        self.panels.insert(index, panel);
        self.apply_y_indexes();
        Ok(index)
    }

    pub fn remove_panel(&mut self, id: &str) -> Result<()> {
        let index = self
            .panels
            .iter()
            .position(|panel| panel.id() == id)
            .ok_or_else(|| {
                PlotError::Configuration(format!("unable to remove panel, id not found: {id}"))
            })?;
        self.panels.remove(index);
        self.apply_y_indexes();
        self.position_panels();
        self.events.emit(&Event::PanelRemoved {
            panel_id: id.to_string(),
        });
        self.events.emit(&Event::LayoutChanged);
        Ok(())
    }

    fn apply_y_indexes(&mut self) {
        for (index, panel) in self.panels.iter_mut().enumerate() {
            panel.layout_mut().y_index = Some(index as i64);
        }
    }

    /// The stacked-panel geometry solver. Defaults null proportions, rescales
    /// proportional heights to sum to exactly 1, then walks panels in y order
    /// assigning origins and pixel dimensions. A zero proportional-height sum
    /// is a guarded no-op.
    pub fn position_panels(&mut self) {
        let total_height = self.layout.height;
        let total_width = self.layout.width;

        for panel in &mut self.panels {
            let layout = panel.layout_mut();
            if layout.proportional_height.is_none() {
                layout.proportional_height = Some(if total_height > 0.0 {
                    layout.height / total_height
                } else {
                    0.0
                });
            }
            if layout.proportional_width.is_none() {
                layout.proportional_width = Some(1.0);
            }
        }

        let sum: f64 = self
            .panels
            .iter()
            .map(|panel| panel.layout().proportional_height.unwrap_or(0.0))
            .sum();
        if sum == 0.0 {
            return;
        }

        let adjustment = 1.0 / sum;
        for panel in &mut self.panels {
            let layout = panel.layout_mut();
            let height = layout.proportional_height.unwrap_or(0.0) * adjustment;
            layout.proportional_height = Some(height);
        }

        let mut y_offset = 0.0;
        for panel in &mut self.panels {
            let proportional_height = panel.layout().proportional_height.unwrap_or(0.0);
            let proportional_width = panel.layout().proportional_width.unwrap_or(1.0);
            panel.set_origin(0.0, y_offset);
            y_offset += proportional_height * total_height;
            panel.set_dimensions(
                proportional_width * total_width,
                proportional_height * total_height,
            );
        }
    }

    /// Set plot dimensions. With discrete values, panels resize and
    /// reposition proportionally (responsive layouts override the width from
    /// the hosting surface, and both-axis responsive derives the height from
    /// the aspect ratio). Without them, dimensions conform to the panels.
    pub fn set_dimensions(&mut self, width: Option<f64>, height: Option<f64>) {
        // Aggregate minimums from panels.
        let mut min_width: f64 = 0.0;
        let mut min_height: f64 = 0.0;
        for panel in &self.panels {
            let layout = panel.layout();
            min_width = min_width.max(layout.min_width);
            let proportion = layout.proportional_height.unwrap_or(1.0);
            if proportion > 0.0 {
                min_height = min_height.max(layout.min_height / proportion);
            }
        }
        self.layout.min_width = min_width.max(1.0);
        self.layout.min_height = min_height.max(1.0);

        match (width, height) {
            (Some(width), Some(height)) if width >= 0.0 && height >= 0.0 => {
                self.layout.width = width.round().max(self.layout.min_width);
                self.layout.height = height.round().max(self.layout.min_height);
                if self.layout.resizable == ResizeMode::Responsive {
                    self.layout.width = self.surface_size.0.max(self.layout.min_width);
                    if self.layout.responsive_resize == ResponsiveResize::Both {
                        self.layout.height = self.layout.width / self.layout.aspect_ratio;
                        if self.layout.height < self.layout.min_height {
                            self.layout.height = self.layout.min_height;
                            self.layout.width = self.layout.height * self.layout.aspect_ratio;
                        }
                    }
                }
                let mut y_offset = 0.0;
                let total_width = self.layout.width;
                let total_height = self.layout.height;
                for panel in &mut self.panels {
                    let proportional_width =
                        panel.layout().proportional_width.unwrap_or(1.0);
                    let proportional_height =
                        panel.layout().proportional_height.unwrap_or(0.0);
                    let panel_height = proportional_height * total_height;
                    panel.set_dimensions(proportional_width * total_width, panel_height);
                    panel.set_origin(0.0, y_offset);
                    y_offset += panel_height;
                }
            }
            _ => {
                if !self.panels.is_empty() {
                    let mut width: f64 = 0.0;
                    let mut height: f64 = 0.0;
                    for panel in &self.panels {
                        width = width.max(panel.layout().width);
                        height += panel.layout().height;
                    }
                    self.layout.width = width.max(self.layout.min_width);
                    self.layout.height = height.max(self.layout.min_height);
                }
            }
        }
        self.layout.aspect_ratio = self.layout.width / self.layout.height;
    }

    /// Note a change in the hosting surface's size (responsive layouts).
    pub fn update_surface(&mut self, width: f64, height: f64) {
        self.surface_size = (width, height);
        self.set_dimensions(Some(self.layout.width), Some(self.layout.height));
        self.events.emit(&Event::LayoutChanged);
    }

    /// Interactive panel resize: set one panel's discrete height, recompute
    /// every panel's proportion against the new total, shift panels below by
    /// the delta, and re-solve.
    pub fn resize_panel(&mut self, id: &str, height: f64) -> Result<()> {
        let index = self
            .panels
            .iter()
            .position(|panel| panel.id() == id)
            .ok_or_else(|| {
                PlotError::Configuration(format!("unable to resize panel, id not found: {id}"))
            })?;

        let original_height = self.panels[index].layout().height;
        let width = self.panels[index].layout().width;
        self.panels[index].set_dimensions(width, height);
        let delta = self.panels[index].layout().height - original_height;
        let new_total = self.layout.height + delta;
        if new_total <= 0.0 {
            return Ok(());
        }

        for (i, panel) in self.panels.iter_mut().enumerate() {
            let layout = panel.layout_mut();
            layout.proportional_height = Some(layout.height / new_total);
            if i > index {
                let origin = layout.origin;
                panel.set_origin(origin.x, origin.y + delta);
            }
        }
        self.layout.height = new_total;
        self.position_panels();
        self.events.emit(&Event::LayoutChanged);
        Ok(())
    }

    /// Report a click on a rendered element: emits `element_clicked` with the
    /// backing record and its rendered tooltip.
    pub fn handle_click(&mut self, panel_id: &str, layer_id: &str, record_index: usize) -> Result<()> {
        let panel = self.panel(panel_id).ok_or_else(|| {
            PlotError::Configuration(format!("unknown panel [{panel_id}]"))
        })?;
        let layer = panel.layer(layer_id).ok_or_else(|| {
            PlotError::Configuration(format!("unknown data layer [{layer_id}] in panel [{panel_id}]"))
        })?;
        let record = layer.data().get(record_index).ok_or_else(|| {
            PlotError::Configuration(format!(
                "element {record_index} out of range for layer [{layer_id}]"
            ))
        })?;
        let tooltip = layer.render_tooltip(record, &self.transforms);
        let event = Event::ElementClicked {
            panel_id: panel_id.to_string(),
            layer_id: layer_id.to_string(),
            record: record.clone(),
            tooltip,
        };
        self.events.emit(&event);
        Ok(())
    }
}
