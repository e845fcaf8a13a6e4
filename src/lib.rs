pub mod data_layer;
pub mod data_source;
pub mod error;
pub mod events;
pub mod gene_track;
pub mod labels;
pub mod layout;
pub mod panel;
pub mod plot;
pub mod region;
pub mod render_export;
pub mod requester;
pub mod scales;
pub mod state;
pub mod template;
pub mod transforms;

pub use error::{PlotError, Result};
pub use events::{Event, EventKind};
pub use layout::{merge_layouts, standard_layout, PlotLayout};
pub use plot::{populate, FixedSurface, HostSurface, Plot};
pub use state::State;
