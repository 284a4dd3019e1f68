use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory for stored enrollment photos.
    pub data_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Detection model file name inside the model dir.
    pub detect_model: String,
    /// Embedding model file name inside the model dir.
    pub embed_model: String,
    /// Depth of the extraction engine request queue.
    pub engine_queue: usize,
}

impl Config {
    /// Load configuration from `ADSUM_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("ADSUM_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let db_path = std::env::var("ADSUM_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("adsum.db"));

        let model_dir = std::env::var("ADSUM_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/usr/share/adsum/models"));

        Self {
            db_path,
            data_dir,
            model_dir,
            detect_model: std::env::var("ADSUM_DETECT_MODEL")
                .unwrap_or_else(|_| "version-RFB-320.onnx".to_string()),
            embed_model: std::env::var("ADSUM_EMBED_MODEL")
                .unwrap_or_else(|_| "mobilefacenet.onnx".to_string()),
            engine_queue: env_usize("ADSUM_ENGINE_QUEUE", 4),
        }
    }

    pub fn detect_model_path(&self) -> String {
        self.model_dir
            .join(&self.detect_model)
            .to_string_lossy()
            .into_owned()
    }

    pub fn embed_model_path(&self) -> String {
        self.model_dir
            .join(&self.embed_model)
            .to_string_lossy()
            .into_owned()
    }

    /// Directory the daemon stores enrollment photos in.
    pub fn faces_dir(&self) -> PathBuf {
        self.data_dir.join("faces")
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("adsum")
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
