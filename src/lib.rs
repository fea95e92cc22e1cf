pub mod config;
pub mod errors;
pub mod orchestrator;
pub mod remote;
pub mod store;
pub mod stream;
pub mod ui;

pub use truthcast_common as common;
