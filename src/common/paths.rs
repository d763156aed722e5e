use directories::ProjectDirs;
use std::path::PathBuf;

pub fn system_config_file() -> PathBuf {
    PathBuf::from("/etc/facegate/face-gate.toml")
}

/// Per-user data directory, falling back to the working directory when the
/// platform exposes no home.
pub fn data_dir() -> PathBuf {
    ProjectDirs::from("com", "facegate", "FaceGate")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn default_reference_image() -> PathBuf {
    data_dir().join("reference.jpg")
}

/// Sibling path used to keep the previous reference when it is replaced.
pub fn reference_backup_path(reference: &std::path::Path) -> PathBuf {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let stem = reference
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("reference");
    let ext = reference
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("jpg");
    reference.with_file_name(format!("{}_{}.{}", stem, timestamp, ext))
}

/// Where `check` writes the reference with detected faces drawn on it.
pub fn annotated_reference_path(reference: &std::path::Path) -> PathBuf {
    let stem = reference
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("reference");
    reference.with_file_name(format!("{}_annotated.png", stem))
}
