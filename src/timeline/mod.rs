//! 时间轴合成
//!
//! 把每段的实测音频时长、字幕和图片列表排到同一条帧轴上，生成渲染计划。
//! 全部使用整数帧运算：段长向上取整保证音频不被截断，图片间隔向下取整。

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ShortsError};
use crate::script::Subject;

/// 固定帧率
pub const FPS: u32 = 30;

/// 默认图片切换间隔（秒）
pub const DEFAULT_IMAGE_INTERVAL_SECS: f64 = 3.0;

/// 单个分段的时长上限（秒）
pub const MAX_SEGMENT_SECS: f64 = 3600.0;

pub const VIDEO_WIDTH: u32 = 1080;
pub const VIDEO_HEIGHT: u32 = 1920;

/// 一张图片的显示区间，帧号为绝对值
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlideWindow {
    pub start_frame: u64,
    pub duration_frames: u64,
    pub image: String,
}

impl SlideWindow {
    pub fn end_frame(&self) -> u64 {
        self.start_frame + self.duration_frames
    }
}

/// 一条字幕的显示区间，帧号相对所在分段的起点，左闭右开
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionWindow {
    pub start_frame: u64,
    pub end_frame: u64,
    pub text: String,
}

/// 音轨区间；静音预览时没有音频
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioWindow {
    pub start_frame: u64,
    pub duration_frames: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedSegment {
    pub start_frame: u64,
    pub duration_frames: u64,
    pub slides: Vec<SlideWindow>,
    pub captions: Vec<CaptionWindow>,
    pub audio: AudioWindow,
}

impl PlannedSegment {
    pub fn end_frame(&self) -> u64 {
        self.start_frame + self.duration_frames
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleLines {
    pub main: String,
    pub sub: String,
}

/// 交给渲染端的完整计划
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderPlan {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub total_frames: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<TitleLines>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font: Option<String>,
    pub segments: Vec<PlannedSegment>,
}

impl RenderPlan {
    pub fn duration_secs(&self) -> f64 {
        self.total_frames as f64 / self.fps as f64
    }

    /// 把计划里的所有图片、音频、字体引用替换成 `resolve` 的结果
    pub fn map_references<F>(&self, mut resolve: F) -> RenderPlan
    where
        F: FnMut(&str) -> String,
    {
        let mut plan = self.clone();
        plan.font = plan.font.as_deref().map(&mut resolve);
        for segment in plan.segments.iter_mut() {
            for slide in segment.slides.iter_mut() {
                slide.image = resolve(&slide.image);
            }
            segment.audio.source = segment.audio.source.as_deref().map(&mut resolve);
        }
        plan
    }

    /// 计划中引用的全部文件（去重，保持首次出现顺序）
    pub fn references(&self) -> Vec<String> {
        let mut refs: Vec<String> = Vec::new();
        let mut push = |r: &str| {
            if !refs.iter().any(|x| x == r) {
                refs.push(r.to_string());
            }
        };
        if let Some(font) = &self.font {
            push(font);
        }
        for segment in &self.segments {
            for slide in &segment.slides {
                push(&slide.image);
            }
            if let Some(source) = &segment.audio.source {
                push(source);
            }
        }
        refs
    }
}

/// 全局图片加上按对象划分的图片
#[derive(Debug, Clone, Default)]
pub struct ImagePool {
    pub global: Vec<String>,
    pub subject_a: Vec<String>,
    pub subject_b: Vec<String>,
}

impl ImagePool {
    /// 分段使用的图片；对象没有专属图片时退回全局图片
    pub fn resolve(&self, subject: Subject) -> &[String] {
        let specific = match subject {
            Subject::A => &self.subject_a,
            Subject::B => &self.subject_b,
            Subject::Both => return &self.global,
        };
        if specific.is_empty() {
            debug!("No images for subject {}, using global pool", subject.as_str());
            &self.global
        } else {
            specific
        }
    }
}

/// 合成一个分段所需的输入
#[derive(Debug, Clone)]
pub struct SegmentTiming {
    /// 权威时长（秒）
    pub duration_secs: f64,
    pub captions: Vec<String>,
    /// 旁白全文，字幕为空时作为唯一一条字幕
    pub text: String,
    pub images: Vec<String>,
    pub audio: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TimelineSettings {
    pub fps: u32,
    pub image_interval_secs: f64,
    pub width: u32,
    pub height: u32,
    pub title: Option<TitleLines>,
    pub font: Option<String>,
}

impl Default for TimelineSettings {
    fn default() -> Self {
        Self {
            fps: FPS,
            image_interval_secs: DEFAULT_IMAGE_INTERVAL_SECS,
            width: VIDEO_WIDTH,
            height: VIDEO_HEIGHT,
            title: None,
            font: None,
        }
    }
}

impl TimelineSettings {
    fn interval_frames(&self) -> Result<u64> {
        let frames = (self.image_interval_secs * self.fps as f64).floor();
        if !frames.is_finite() || frames < 1.0 {
            return Err(ShortsError::InvalidInterval {
                seconds: self.image_interval_secs,
            });
        }
        Ok(frames as u64)
    }
}

/// 秒数转帧数，向上取整；超过 `MAX_SEGMENT_SECS` 视为非法时长
pub fn duration_to_frames(index: usize, seconds: f64, fps: u32) -> Result<u64> {
    if !seconds.is_finite() || seconds <= 0.0 || seconds > MAX_SEGMENT_SECS {
        return Err(ShortsError::InvalidDuration {
            segment: index,
            seconds,
        });
    }
    Ok((seconds * fps as f64).ceil() as u64)
}

/// 在 `[start, start + frames)` 内按间隔循环铺满图片
pub fn slide_windows(start: u64, frames: u64, interval: u64, images: &[String]) -> Vec<SlideWindow> {
    if images.is_empty() {
        return Vec::new();
    }

    let end = start.saturating_add(frames);
    let interval = interval.max(1);
    let mut windows = Vec::new();
    let mut cursor = start;
    let mut index = 0;

    while cursor < end {
        let length = interval.min(end - cursor);
        windows.push(SlideWindow {
            start_frame: cursor,
            duration_frames: length,
            image: images[index % images.len()].clone(),
        });
        cursor += length;
        index += 1;
    }

    windows
}

/// 把分段等分给每条字幕，最后一条吸收整除余数
pub fn caption_windows(frames: u64, captions: &[String], text: &str) -> Vec<CaptionWindow> {
    let fallback = [text.to_string()];
    let captions = if captions.is_empty() {
        &fallback[..]
    } else {
        captions
    };

    let count = captions.len() as u64;
    let per_caption = frames / count;

    captions
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let i = i as u64;
            let end = if i + 1 == count {
                frames
            } else {
                (i + 1) * per_caption
            };
            CaptionWindow {
                start_frame: i * per_caption,
                end_frame: end,
                text: text.clone(),
            }
        })
        .collect()
}

/// 生成渲染计划
///
/// 任何一段时长非法都会让整个请求失败，不会产生零长度的分段。
pub fn synthesize(segments: &[SegmentTiming], settings: &TimelineSettings) -> Result<RenderPlan> {
    let interval = settings.interval_frames()?;
    let mut planned = Vec::with_capacity(segments.len());
    let mut segment_start = 0u64;

    for (index, segment) in segments.iter().enumerate() {
        let frames = duration_to_frames(index, segment.duration_secs, settings.fps)?;
        let segment_end = segment_start
            .checked_add(frames)
            .ok_or(ShortsError::InvalidDuration {
                segment: index,
                seconds: segment.duration_secs,
            })?;

        let planned_segment = PlannedSegment {
            start_frame: segment_start,
            duration_frames: frames,
            slides: slide_windows(segment_start, frames, interval, &segment.images),
            captions: caption_windows(frames, &segment.captions, &segment.text),
            audio: AudioWindow {
                start_frame: segment_start,
                duration_frames: frames,
                source: segment.audio.clone(),
            },
        };

        debug!(
            "Segment {}: frames {}..{}, {} slides, {} captions",
            index,
            planned_segment.start_frame,
            planned_segment.end_frame(),
            planned_segment.slides.len(),
            planned_segment.captions.len()
        );

        planned.push(planned_segment);
        segment_start = segment_end;
    }

    Ok(RenderPlan {
        fps: settings.fps,
        width: settings.width,
        height: settings.height,
        total_frames: segment_start,
        title: settings.title.clone(),
        font: settings.font.clone(),
        segments: planned,
    })
}
