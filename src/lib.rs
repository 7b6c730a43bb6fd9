mod cost;
mod detection;
mod engine;
mod error;
mod lap;
mod sparse;
mod track;

pub use detection::DetectionStore;
pub use engine::{DebugLink, Engine, TrackerParams, TrackerStats};
pub use error::{Result, TrackerError};
pub use lap::{compute_cost, solve as solve_assignment, Assignment};
pub use sparse::{SparseMatrix, TripletBuilder, EPSILON};
pub use track::Track;
