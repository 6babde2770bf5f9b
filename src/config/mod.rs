//! Agent configuration: typed settings, the shared versioned store, and
//! TOML persistence.

mod loader;
mod settings;

pub use loader::{
    default_settings_path, load_or_init, load_settings, parse_settings, save_settings,
    CONFIG_ENV_VAR,
};
pub use settings::*;
