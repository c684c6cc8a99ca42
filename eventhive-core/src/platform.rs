//! Platform-specific locations for scanner data and configuration

use std::path::PathBuf;

const APP_DIR: &str = "EventHive";

/// Get the platform-specific data directory for the scanner's local store
///
/// Returns:
/// - Windows: %LOCALAPPDATA%\EventHive
/// - macOS: ~/Library/Application Support/EventHive
/// - Linux/Other: ~/.local/share/EventHive
pub fn get_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".data")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR)
}

/// Get the platform-specific config directory
pub fn get_config_dir() -> PathBuf {
    let base = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR)
}

/// Get the default local ticket store path
pub fn get_default_database_path() -> PathBuf {
    get_data_dir().join("checkin.db")
}

/// Get the default scanner config file path
pub fn get_default_config_path() -> PathBuf {
    get_config_dir().join("scanner.toml")
}

/// Ensure the data directory exists, creating it if necessary
pub fn ensure_data_dir() -> std::io::Result<PathBuf> {
    let dir = get_data_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
