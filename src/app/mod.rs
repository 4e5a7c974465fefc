//! Process wiring: shared state and node lifecycle

pub mod node;
pub mod state;

pub use node::Node;
pub use state::AppState;
