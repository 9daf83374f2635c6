use serde::{Deserialize, Serialize};

use crate::caption;

/// 分段所讲述的对象，用来挑选该段使用的图片
///
/// 对比类短视频只有两个对象；未知或缺省的标签一律归为 `Both`，使用全局图片。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    A,
    B,
    #[default]
    #[serde(other)]
    Both,
}

impl Subject {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subject::A => "a",
            Subject::B => "b",
            Subject::Both => "both",
        }
    }
}

/// 一个旁白分段
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptSegment {
    /// 旁白文本
    pub text: String,
    /// 预估时长（秒），仅供参考，时间轴以实测音频时长为准
    pub duration: f64,
    #[serde(default)]
    pub subject: Subject,
    /// 切分好的字幕，用户可以在渲染前手动修改
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitles: Option<Vec<String>>,
}

#[cfg(test)]
impl ScriptSegment {
    pub fn new(text: impl Into<String>, duration: f64) -> Self {
        Self {
            text: text.into(),
            duration,
            subject: Subject::Both,
            subtitles: None,
        }
    }

    pub fn with_subject(mut self, subject: Subject) -> Self {
        self.subject = subject;
        self
    }
}

impl ScriptSegment {
    /// 该段最终使用的字幕；没有任何字幕时整段文本就是一条
    pub fn captions(&self, max_chars: usize) -> Vec<String> {
        let captions = match &self.subtitles {
            Some(subtitles) => subtitles
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => caption::chunk(&self.text, max_chars),
        };

        if captions.is_empty() {
            vec![self.text.clone()]
        } else {
            captions
        }
    }
}

/// 文本生成服务返回的完整脚本
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_main: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_sub: Option<String>,
    /// 完整旁白
    #[serde(default)]
    pub script: String,
    pub segments: Vec<ScriptSegment>,
}

impl Script {
    /// 标题的主副两行；没有单独给出时按 `title` 里的换行拆分
    pub fn title_lines(&self) -> (String, String) {
        if let Some(main) = self.title_main.as_deref().filter(|m| !m.is_empty()) {
            return (main.to_string(), self.title_sub.clone().unwrap_or_default());
        }

        let mut lines = self.title.splitn(2, '\n');
        let main = lines.next().unwrap_or_default().trim().to_string();
        let sub = lines.next().unwrap_or_default().trim().to_string();
        (main, sub)
    }

    /// 为还没有字幕的分段切分字幕，已有的保持不动
    pub fn annotate_captions(&mut self, max_chars: usize) {
        for segment in self.segments.iter_mut() {
            if segment.subtitles.is_none() {
                segment.subtitles = Some(caption::chunk(&segment.text, max_chars));
            }
        }
    }

    pub fn estimated_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }
}
