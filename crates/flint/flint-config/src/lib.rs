mod config;
mod mode;

pub use config::{ConfigError, DemoConfig};
pub use mode::Mode;
