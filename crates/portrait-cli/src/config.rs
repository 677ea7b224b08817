use portrait_engine::PipelineConfig;
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Gallery JSON file.
    pub gallery_path: PathBuf,
    /// Model bundle JSON file.
    pub bundle_path: PathBuf,
    /// Optional TOML vocabulary schema replacing the built-in v1 schema.
    pub schema_path: Option<PathBuf>,
    /// Mean cosine similarity needed to accept an identity.
    pub match_threshold: f32,
    /// Faces scoring below this are refused at enrollment.
    pub min_enroll_quality: f32,
    /// Faces scoring below this are not matched during recognition.
    pub min_recognize_quality: f32,
    /// Fraction of the corpus held out for validation when training.
    pub validation_split: f64,
}

impl Config {
    /// Load configuration from `PORTRAIT_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("portrait");

        Self {
            gallery_path: std::env::var("PORTRAIT_GALLERY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("gallery.json")),
            bundle_path: std::env::var("PORTRAIT_BUNDLE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("models.json")),
            schema_path: std::env::var("PORTRAIT_SCHEMA_PATH").ok().map(PathBuf::from),
            match_threshold: env_parse("PORTRAIT_MATCH_THRESHOLD", 0.55),
            min_enroll_quality: env_parse("PORTRAIT_MIN_ENROLL_QUALITY", 0.3),
            min_recognize_quality: env_parse("PORTRAIT_MIN_RECOGNIZE_QUALITY", 0.0),
            validation_split: env_parse("PORTRAIT_VALIDATION_SPLIT", 0.2),
        }
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            match_threshold: self.match_threshold,
            min_enroll_quality: self.min_enroll_quality,
            min_recognize_quality: self.min_recognize_quality,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
