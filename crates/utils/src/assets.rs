use std::{env, path::PathBuf};

use directories::ProjectDirs;

const ASSET_DIR_ENV: &str = "ATELIER_ASSET_DIR";

/// Directory that holds the SQLite database and any other runtime assets.
///
/// Resolution order: `ATELIER_ASSET_DIR` env override, then the platform
/// data directory, then `./assets` as a last resort.
pub fn asset_dir() -> PathBuf {
    if let Ok(dir) = env::var(ASSET_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(dirs) = ProjectDirs::from("ai", "atelier", "atelier") {
        return dirs.data_dir().to_path_buf();
    }

    tracing::warn!("could not resolve a platform data directory, falling back to ./assets");
    PathBuf::from("assets")
}
