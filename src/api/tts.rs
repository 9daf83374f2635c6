use crate::caption;
use crate::error::{Result, ShortsError};
use crate::script::ScriptSegment;
use reqwest::header::USER_AGENT;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const GOOGLE_TTS_API: &str = "https://translate.google.com/translate_tts";

/// 接口单次请求的文本上限
const MAX_REQUEST_CHARS: usize = 100;

/// Google 翻译语音合成
#[derive(Debug, Clone)]
pub struct GoogleTts {
    client: Client,
    language: String,
    output_dir: PathBuf,
}

impl GoogleTts {
    pub fn new(language: String, output_dir: PathBuf) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            language,
            output_dir,
        })
    }

    /// 生成一段语音，长文本分多次请求后拼接成一个 mp3
    pub async fn synthesize(&self, text: &str, output_path: &Path) -> Result<()> {
        let parts = request_parts(text);
        if parts.is_empty() {
            return Err(ShortsError::Api("Cannot synthesize empty text".to_string()));
        }

        let mut audio = Vec::new();
        for (idx, part) in parts.iter().enumerate() {
            debug!("TTS request {}/{}: {}", idx + 1, parts.len(), part);

            let query = [
                ("ie", "UTF-8".to_string()),
                ("q", part.clone()),
                ("tl", self.language.clone()),
                ("total", parts.len().to_string()),
                ("idx", idx.to_string()),
                ("textlen", part.chars().count().to_string()),
                ("client", "tw-ob".to_string()),
            ];

            let response = self
                .client
                .get(GOOGLE_TTS_API)
                .header(USER_AGENT, "Mozilla/5.0")
                .query(&query)
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response.text().await?;
                return Err(ShortsError::Api(format!(
                    "TTS API error (HTTP {}): {}",
                    status, error_text
                )));
            }

            audio.extend_from_slice(&response.bytes().await?);
        }

        tokio::fs::write(output_path, audio).await?;
        info!("Speech saved to: {}", output_path.display());
        Ok(())
    }

    /// 每个分段一个音频文件：`<output_dir>/<base>_segment_<i>.mp3`
    pub async fn synthesize_segments(
        &self,
        segments: &[ScriptSegment],
        base_name: &str,
    ) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let mut paths = Vec::with_capacity(segments.len());
        for (i, segment) in segments.iter().enumerate() {
            let path = self.segment_path(base_name, i);
            self.synthesize(&segment.text, &path).await?;
            info!("Generated audio for segment {}/{}", i + 1, segments.len());
            paths.push(path);
        }
        Ok(paths)
    }

    fn segment_path(&self, base_name: &str, index: usize) -> PathBuf {
        self.output_dir
            .join(format!("{}_segment_{}.mp3", base_name, index))
    }
}

/// 按句子和逗号切成接口能接受的长度
fn request_parts(text: &str) -> Vec<String> {
    caption::chunk(text, MAX_REQUEST_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_text_is_split_under_limit() {
        let text = "이건 꽤 긴 문장입니다. ".repeat(20);
        let parts = request_parts(&text);
        assert!(parts.len() > 1);
        assert!(parts.iter().all(|p| p.chars().count() <= MAX_REQUEST_CHARS));
    }

    #[test]
    fn short_text_is_one_request() {
        assert_eq!(request_parts("안녕하세요."), vec!["안녕하세요."]);
        assert!(request_parts("  ").is_empty());
    }

    #[test]
    fn segment_paths_are_indexed() {
        let tts = GoogleTts::new("ko".into(), PathBuf::from("temp")).unwrap();
        assert_eq!(
            tts.segment_path("1700000000", 2),
            PathBuf::from("temp/1700000000_segment_2.mp3")
        );
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tts = GoogleTts::new("ko".into(), dir.path().to_path_buf()).unwrap();
        let result = tts.synthesize("   ", &dir.path().join("x.mp3")).await;
        assert!(matches!(result, Err(ShortsError::Api(_))));
    }
}
