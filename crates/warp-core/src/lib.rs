pub mod config;
pub mod resources;
pub mod types;

pub use config::SchedulerConfig;
pub use resources::Resources;
pub use types::*;
