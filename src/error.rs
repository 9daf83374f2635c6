use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShortsError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Script has {actual} segments, expected {expected}")]
    ScriptMismatch { expected: usize, actual: usize },

    #[error("Invalid audio duration for segment {segment}: {seconds}s")]
    InvalidDuration { segment: usize, seconds: f64 },

    #[error("Image interval of {seconds}s is shorter than one frame")]
    InvalidInterval { seconds: f64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Project error: {0}")]
    Project(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Environment variable error: {0}")]
    Env(String),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),
}

pub type Result<T> = std::result::Result<T, ShortsError>;
