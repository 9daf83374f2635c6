use crate::error::{Result, ShortsError};
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// 用 ffprobe 实测音频时长（秒）
pub async fn audio_duration(path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await
        .map_err(|e| {
            ShortsError::Ffmpeg(format!("Failed to run ffprobe for {}: {}", path.display(), e))
        })?;

    if !output.status.success() {
        return Err(ShortsError::Ffmpeg(format!(
            "ffprobe failed for {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let duration = parse_duration(&String::from_utf8_lossy(&output.stdout))?;
    debug!("Measured {}: {:.3}s", path.display(), duration);
    Ok(duration)
}

fn parse_duration(stdout: &str) -> Result<f64> {
    let value = stdout.trim();
    value
        .parse::<f64>()
        .map_err(|_| ShortsError::Ffmpeg(format!("Unexpected ffprobe duration: {:?}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ffprobe_output() {
        assert_eq!(parse_duration("7.032000\n").unwrap(), 7.032);
        assert!(matches!(parse_duration("N/A\n"), Err(ShortsError::Ffmpeg(_))));
        assert!(parse_duration("").is_err());
    }
}
