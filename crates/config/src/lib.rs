#[cfg(test)]
use std::fs;
#[cfg(test)]
use std::path::{Path, PathBuf};

mod env_parsing;
mod loader;
mod schema;

pub use self::loader::{load_from_env_or_default, load_from_path, API_KEY_ENV, CONFIG_PATH_ENV};
pub use self::schema::{
    ActivityConfig, AppConfig, EliminationConfig, EnricherConfig, RunProfileConfig, SystemConfig,
};

#[cfg(test)]
mod tests;
