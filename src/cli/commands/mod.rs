//! CLI command implementations.

mod config;
mod inspect;
mod keygen;
mod start;
mod status;

pub use config::{run_config, ConfigArgs};
pub use inspect::{run_inspect, InspectArgs};
pub use keygen::{run_keygen, KeygenArgs};
pub use start::{run_start_with_config, StartArgs};
pub use status::{run_status, StatusArgs};
