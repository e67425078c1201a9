use std::path::{Path, PathBuf};

/// Environment variable that overrides the storage root entirely.
pub const HOME_ENV: &str = "CAMSTREAM_HOME";

/// Get the base storage directory following XDG Base Directory Specification.
/// Returns `$CAMSTREAM_HOME`, `$XDG_DATA_HOME/camstream` or `~/.local/share/camstream`.
pub fn get_storage_dir() -> PathBuf {
    if let Ok(home) = std::env::var(HOME_ENV) {
        return PathBuf::from(home);
    }

    if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg_data).join("camstream");
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".local")
        .join("share")
        .join("camstream")
}

/// Directory holding converted, playable segments.
pub fn get_segments_dir(root: &Path) -> PathBuf {
    root.join("segments")
}

/// Working directory the capture process writes raw chunks into.
pub fn get_recorder_dir(root: &Path) -> PathBuf {
    root.join("recorder")
}

/// Player pages served at `/`.
pub fn get_static_dir(root: &Path) -> PathBuf {
    root.join("static")
}

/// Get the logs directory path.
/// Returns `{root}/logs`.
pub fn get_log_dir(root: &Path) -> PathBuf {
    root.join("logs")
}

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
