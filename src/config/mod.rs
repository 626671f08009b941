// Configuration management: TOML settings file, `.env`/environment overrides
// and the interactive setup flow.

pub mod interactive;
pub mod settings;


pub use interactive::{run_interactive_config, show_config};
pub use settings::{Config, ConfigError, ServerConfig, ServiceNowConfig};
