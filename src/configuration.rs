pub mod config;
pub mod layout;
pub mod types;

pub use config::{Args, Config, ServerSettings};
pub use layout::RuntimeLayout;
pub use types::{LogCycle, ServerRole};
