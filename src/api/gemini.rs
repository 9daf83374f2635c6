use crate::error::{Result, ShortsError};
use crate::script::Script;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_key: String,
    model: String,
    client: Client,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            api_key,
            model,
            client,
        })
    }

    /// 根据主题生成短视频脚本
    pub async fn generate_script(
        &self,
        topic: &str,
        segment_count: usize,
        max_duration: u32,
    ) -> Result<Script> {
        info!("Generating script for topic: {}", topic);

        let prompt = build_prompt(topic, segment_count, max_duration);
        let request_body = json!({
            "contents": [
                {
                    "parts": [
                        { "text": prompt }
                    ]
                }
            ],
            "generationConfig": {
                "responseMimeType": "application/json"
            }
        });

        let url = format!("{}/{}:generateContent", GEMINI_API_BASE, self.model);
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(ShortsError::Api(format!("Gemini API error: {}", error_text)));
        }

        let response_json: serde_json::Value = response.json().await?;

        // 提取生成的文本
        let generated_text = response_json["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| ShortsError::Api("Failed to extract generated text".to_string()))?;

        info!("Generated script text: {}", generated_text);

        let script = parse_script_response(generated_text, segment_count)?;
        let estimated = script.estimated_duration();
        if estimated > max_duration as f64 {
            warn!(
                "Estimated script duration {:.1}s exceeds the requested {}s",
                estimated, max_duration
            );
        }

        info!(
            "Script generated: {} ({} segments, ~{:.1}s)",
            script.title,
            script.segments.len(),
            estimated
        );
        Ok(script)
    }
}

fn build_prompt(topic: &str, segment_count: usize, max_duration: u32) -> String {
    format!(
        r#"당신은 유튜브 숏츠 전문 스크립트 작가입니다.

주제: {topic}
세그먼트 수: {segment_count}개
목표 길이: {max_duration}초 이내

다음 JSON 형식으로 스크립트를 작성해주세요:
{{
  "titleMain": "메인 제목 (호기심 유발, 15자 이내)",
  "titleSub": "서브 제목 (15자 이내)",
  "title": "메인 제목과 서브 제목을 줄바꿈으로 이은 전체 제목",
  "script": "전체 스크립트 (TTS용, 자연스러운 말투)",
  "segments": [
    {{
      "text": "세그먼트 나레이션",
      "duration": 예상 초 (숫자만),
      "subject": "a" | "b" | "both"
    }}
  ]
}}

규칙:
- segments 배열의 길이는 정확히 {segment_count}개여야 합니다
- 주제에 두 대상이 나오면 첫 번째는 "a", 두 번째는 "b", 둘 다 또는 해당 없음은 "both"로 표시합니다
- duration 합계가 {max_duration}초를 넘지 않도록 합니다
- 한국어로 작성하고, TTS가 읽기 좋은 자연스러운 문장으로 작성합니다
- 숏츠 특성상 첫 3초가 중요하므로 흥미로운 도입부를 작성합니다

JSON만 출력하세요."#
    )
}

/// 取出文本中最外层的 JSON 对象（容忍 markdown 代码块等多余内容）
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// 解析模型返回的脚本并校验分段数量
pub fn parse_script_response(text: &str, expected_segments: usize) -> Result<Script> {
    let json_text = extract_json_object(text)
        .ok_or_else(|| ShortsError::Api("Failed to find script JSON in response".to_string()))?;

    let script: Script = serde_json::from_str(json_text)
        .map_err(|e| ShortsError::Api(format!("Failed to parse script JSON: {}", e)))?;

    if script.segments.len() != expected_segments {
        return Err(ShortsError::ScriptMismatch {
            expected: expected_segments,
            actual: script.segments.len(),
        });
    }

    Ok(script)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Subject;

    const RESPONSE: &str = r#"```json
{
  "titleMain": "EV6 vs 아이오닉6",
  "titleSub": "승자는?",
  "title": "EV6 vs 아이오닉6\n승자는?",
  "script": "이거 실화냐?! 진짜 미쳤어요.",
  "segments": [
    { "text": "이거 실화냐?!", "duration": 2.5, "subject": "a" },
    { "text": "진짜 미쳤어요.", "duration": 3, "subject": "both" }
  ]
}
```"#;

    #[test]
    fn parses_fenced_response() {
        let script = parse_script_response(RESPONSE, 2).unwrap();
        assert_eq!(script.segments.len(), 2);
        assert_eq!(script.segments[0].subject, Subject::A);
        assert_eq!(script.segments[1].duration, 3.0);
        assert_eq!(script.title_main.as_deref(), Some("EV6 vs 아이오닉6"));
    }

    #[test]
    fn segment_count_must_match() {
        let err = parse_script_response(RESPONSE, 3).unwrap_err();
        assert!(matches!(
            err,
            ShortsError::ScriptMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn malformed_response_is_an_api_error() {
        assert!(matches!(
            parse_script_response("sorry, no json here", 1),
            Err(ShortsError::Api(_))
        ));
        assert!(matches!(
            parse_script_response("{ \"segments\": [ }", 1),
            Err(ShortsError::Api(_))
        ));
    }

    #[test]
    fn prompt_mentions_constraints() {
        let prompt = build_prompt("아이오닉9 가격", 5, 45);
        assert!(prompt.contains("정확히 5개"));
        assert!(prompt.contains("45초"));
        assert!(prompt.contains("아이오닉9 가격"));
    }
}
