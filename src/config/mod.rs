pub mod error;
pub mod paths;
pub mod plan_file;
pub mod settings;

pub use error::ConfigError;
pub use paths::{
    default_global_config_path, default_state_root, CONFIG_PATH_ENV, GLOBAL_SETTINGS_FILE_NAME,
    GLOBAL_STATE_DIR,
};
pub use plan_file::{load_plan, PlanDocument, StepDocument};
pub use settings::{load_global_settings, save_settings, Settings};
