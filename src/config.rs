//! 配置
//!
//! 从可选的 TOML 文件加载，文件不存在时使用默认值。密钥只从环境变量读取。

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::caption::DEFAULT_MAX_CHARS;
use crate::error::{Result, ShortsError};
use crate::timeline::{DEFAULT_IMAGE_INTERVAL_SECS, FPS, VIDEO_HEIGHT, VIDEO_WIDTH};

pub const DEFAULT_CONFIG_FILE: &str = "shorts.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathSettings,
    pub script: ScriptSettings,
    pub captions: CaptionSettings,
    pub timeline: TimelineConfig,
    pub tts: TtsSettings,
    pub render: RenderSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// 每个对象一个子目录，存放它的图片
    pub subjects_dir: PathBuf,
    pub projects_dir: PathBuf,
    pub temp_dir: PathBuf,
    /// 字幕字体，不存在时用系统字体
    pub font: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            subjects_dir: PathBuf::from("assets/vehicles"),
            projects_dir: PathBuf::from("assets/projects"),
            temp_dir: PathBuf::from("temp"),
            font: PathBuf::from("assets/fonts/Jalnan2TTF.ttf"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSettings {
    pub model: String,
    pub segment_count: usize,
    pub max_duration_secs: u32,
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash".to_string(),
            segment_count: 3,
            max_duration_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionSettings {
    pub max_chars: usize,
}

impl Default for CaptionSettings {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    pub image_interval_secs: f64,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            image_interval_secs: DEFAULT_IMAGE_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsSettings {
    pub language: String,
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            language: "ko".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    /// 资源服务器的首选端口
    pub asset_port: u16,
    /// 端口被占用时最多尝试的次数
    pub asset_port_attempts: u16,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: VIDEO_WIDTH,
            height: VIDEO_HEIGHT,
            asset_port: 3456,
            asset_port_attempts: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// 从 TOML 文件加载
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// 文件存在就加载，否则使用默认值
    ///
    /// 同时返回实际读取的文件；日志在此时通常还没初始化，由调用方记录。
    pub fn load(path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        if path.exists() {
            Ok((Self::from_file(path)?, Some(path.to_path_buf())))
        } else {
            Ok((Self::default(), None))
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.captions.max_chars == 0 {
            return Err(ShortsError::Config(
                "captions.max_chars must be at least 1".to_string(),
            ));
        }
        if self.script.segment_count == 0 {
            return Err(ShortsError::Config(
                "script.segment_count must be at least 1".to_string(),
            ));
        }
        if (self.timeline.image_interval_secs * FPS as f64).floor() < 1.0 {
            return Err(ShortsError::InvalidInterval {
                seconds: self.timeline.image_interval_secs,
            });
        }
        if self.render.asset_port_attempts == 0 {
            return Err(ShortsError::Config(
                "render.asset_port_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Gemini API key：命令行参数优先，其次环境变量（含 .env）
    pub fn api_key(explicit: Option<String>) -> Result<String> {
        if let Some(key) = explicit {
            return Ok(key);
        }
        std::env::var("GEMINI_API_KEY").map_err(|_| {
            ShortsError::Env(
                "GEMINI_API_KEY not found. Set it via --api-key or the GEMINI_API_KEY environment variable"
                    .to_string(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_layout() {
        let config = Config::default();
        assert_eq!(config.captions.max_chars, 10);
        assert_eq!(config.timeline.image_interval_secs, 3.0);
        assert_eq!(config.script.segment_count, 3);
        assert_eq!((config.render.width, config.render.height), (1080, 1920));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[captions]\nmax_chars = 14\n\n[timeline]\nimage_interval_secs = 2.5\n"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.captions.max_chars, 14);
        assert_eq!(config.timeline.image_interval_secs, 2.5);
        assert_eq!(config.tts.language, "ko");
        assert_eq!(config.paths.projects_dir, PathBuf::from("assets/projects"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[captions]\nmax_chars = 0\n").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ShortsError::Config(_))
        ));

        let mut config = Config::default();
        config.timeline.image_interval_secs = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ShortsError::InvalidInterval { .. })
        ));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (config, source) = Config::load(Some(&dir.path().join("nope.toml"))).unwrap();
        assert_eq!(config.captions.max_chars, 10);
        assert!(source.is_none());
    }

    #[test]
    fn load_reports_the_file_it_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"\n").unwrap();

        let (config, source) = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(source.as_deref(), Some(file.path()));
    }

    #[test]
    fn explicit_api_key_wins() {
        assert_eq!(Config::api_key(Some("k".into())).unwrap(), "k");
    }
}
