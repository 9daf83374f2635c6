use crate::error::{Result, ShortsError};
use crate::timeline::{RenderPlan, SlideWindow};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

const CAPTION_FONT_SIZE: u32 = 80;
const TITLE_MAIN_FONT_SIZE: u32 = 72;
const TITLE_SUB_FONT_SIZE: u32 = 64;
const TITLE_SUB_COLOR: &str = "0xFFD700";

/// 画面布局：顶部标题区、正方形图片区、底部留白（3:1 分配剩余高度）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub width: u32,
    pub height: u32,
    pub title_height: u32,
    pub image_size: u32,
}

impl Layout {
    pub fn for_plan(plan: &RenderPlan) -> Self {
        let image_size = plan.width.min(plan.height);
        let band = plan.height - image_size;
        Self {
            width: plan.width,
            height: plan.height,
            title_height: band * 3 / 4,
            image_size,
        }
    }
}

/// 一次 ffmpeg 调用：参数和运行前需要写好的文字文件
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub args: Vec<String>,
    pub text_files: Vec<(PathBuf, String)>,
}

pub struct VideoGenerator {
    work_dir: PathBuf,
    /// 文字文件名前缀，避免同一工作目录下的并发渲染互相覆盖
    job_name: String,
}

impl VideoGenerator {
    pub fn new(work_dir: PathBuf, job_name: impl Into<String>) -> Self {
        Self {
            work_dir,
            job_name: job_name.into(),
        }
    }

    fn text_file(&self, name: &str) -> PathBuf {
        self.work_dir.join(format!("{}_{}.txt", self.job_name, name))
    }

    /// 按渲染计划合成最终视频
    pub async fn render(&self, plan: &RenderPlan, output_path: &Path, with_audio: bool) -> Result<()> {
        info!(
            "Rendering {} frames ({:.2}s) to {}",
            plan.total_frames,
            plan.duration_secs(),
            output_path.display()
        );

        tokio::fs::create_dir_all(&self.work_dir).await?;
        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let job = self.build_job(plan, output_path, with_audio);
        for (path, text) in &job.text_files {
            tokio::fs::write(path, text).await?;
        }
        debug!("ffmpeg {}", job.args.join(" "));

        let output = Command::new("ffmpeg")
            .args(&job.args)
            .output()
            .await
            .map_err(|e| ShortsError::Ffmpeg(format!("Failed to run FFmpeg: {}", e)));

        // 清理文字文件
        for (path, _) in &job.text_files {
            tokio::fs::remove_file(path).await.ok();
        }

        let output = output?;
        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(ShortsError::Ffmpeg(format!("FFmpeg render failed: {}", error)));
        }

        info!("Video rendered: {}", output_path.display());
        Ok(())
    }

    /// 把计划编译成一个 filter_complex
    pub fn build_job(&self, plan: &RenderPlan, output_path: &Path, with_audio: bool) -> RenderJob {
        let layout = Layout::for_plan(plan);
        let fps = plan.fps;
        let font = plan.font.as_deref();

        let mut args: Vec<String> = ["-y", "-hide_banner", "-loglevel", "error"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut filters = Vec::new();
        let mut text_files = Vec::new();
        let mut input_index = 0usize;

        filters.push(format!(
            "color=c=black:s={}x{}:r={}:d={}[base]",
            layout.width,
            layout.height,
            fps,
            seconds(plan.total_frames, fps)
        ));

        // 同一张图片只输入一次，在它的所有区间内启用
        let mut current = "base".to_string();
        for (k, (image, windows)) in group_slides(plan).into_iter().enumerate() {
            push_args(&mut args, &["-loop", "1", "-framerate", &fps.to_string(), "-i", image]);
            filters.push(format!(
                "[{input}:v]scale={s}:{s}:force_original_aspect_ratio=increase,crop={s}:{s},setsar=1[img{k}]",
                input = input_index,
                s = layout.image_size,
            ));
            let next = format!("v{}", k);
            filters.push(format!(
                "[{}][img{}]overlay=0:{}:enable='{}'[{}]",
                current,
                k,
                layout.title_height,
                enable_expr(&windows),
                next
            ));
            current = next;
            input_index += 1;
        }

        let mut text_filters = Vec::new();
        if let Some(title) = &plan.title {
            let middle = layout.title_height / 2;
            if !title.main.is_empty() {
                let path = self.text_file("title_main");
                text_filters.push(drawtext(
                    font,
                    &path,
                    TITLE_MAIN_FONT_SIZE,
                    "white",
                    &format!("{}-text_h-10", middle),
                    None,
                ));
                text_files.push((path, title.main.clone()));
            }
            if !title.sub.is_empty() {
                let path = self.text_file("title_sub");
                text_filters.push(drawtext(
                    font,
                    &path,
                    TITLE_SUB_FONT_SIZE,
                    TITLE_SUB_COLOR,
                    &format!("{}+10", middle),
                    None,
                ));
                text_files.push((path, title.sub.clone()));
            }
        }

        let caption_y = format!("{}+({}-text_h)/2", layout.title_height, layout.image_size);
        for (si, segment) in plan.segments.iter().enumerate() {
            for (ci, caption) in segment.captions.iter().enumerate() {
                // 零长度窗口不显示
                if caption.end_frame <= caption.start_frame {
                    continue;
                }
                let start = segment.start_frame + caption.start_frame;
                let end = segment.start_frame + caption.end_frame - 1;
                let path = self.text_file(&format!("caption_{}_{}", si, ci));
                text_filters.push(drawtext(
                    font,
                    &path,
                    CAPTION_FONT_SIZE,
                    "white",
                    &caption_y,
                    Some(&format!("between(n,{},{})", start, end)),
                ));
                text_files.push((path, caption.text.clone()));
            }
        }

        if text_filters.is_empty() {
            filters.push(format!("[{}]null[vout]", current));
        } else {
            filters.push(format!("[{}]{}[vout]", current, text_filters.join(",")));
        }

        // 每段音频补齐或截断到该段的帧长，没有音频的段用静音占位
        let with_audio = with_audio && !plan.segments.is_empty();
        if with_audio {
            for (j, segment) in plan.segments.iter().enumerate() {
                let duration = seconds(segment.audio.duration_frames, fps);
                match &segment.audio.source {
                    Some(source) => {
                        push_args(&mut args, &["-i", source]);
                        filters.push(format!(
                            "[{}:a]apad=whole_dur={d},atrim=duration={d}[a{}]",
                            input_index,
                            j,
                            d = duration
                        ));
                        input_index += 1;
                    }
                    None => {
                        filters.push(format!("aevalsrc=0:s=44100:d={}[a{}]", duration, j));
                    }
                }
            }
            let labels: String = (0..plan.segments.len()).map(|j| format!("[a{}]", j)).collect();
            filters.push(format!(
                "{}concat=n={}:v=0:a=1[aout]",
                labels,
                plan.segments.len()
            ));
        }

        push_args(&mut args, &["-filter_complex", &filters.join(";"), "-map", "[vout]"]);
        if with_audio {
            push_args(&mut args, &["-map", "[aout]", "-c:a", "aac", "-b:a", "128k"]);
        } else {
            push_args(&mut args, &["-an"]);
        }
        push_args(
            &mut args,
            &[
                "-frames:v",
                &plan.total_frames.to_string(),
                "-r",
                &fps.to_string(),
                "-c:v",
                "libx264",
                "-preset",
                "fast",
                "-pix_fmt",
                "yuv420p",
            ],
        );
        args.push(output_path.to_string_lossy().into_owned());

        RenderJob { args, text_files }
    }
}

fn push_args(args: &mut Vec<String>, extra: &[&str]) {
    args.extend(extra.iter().map(|s| s.to_string()));
}

fn seconds(frames: u64, fps: u32) -> String {
    format!("{:.6}", frames as f64 / fps as f64)
}

/// 按首次出现的顺序把区间归到各自的图片下
fn group_slides(plan: &RenderPlan) -> Vec<(&str, Vec<&SlideWindow>)> {
    let mut groups: Vec<(&str, Vec<&SlideWindow>)> = Vec::new();
    for slide in plan.segments.iter().flat_map(|s| s.slides.iter()) {
        match groups.iter_mut().find(|(image, _)| *image == slide.image) {
            Some((_, windows)) => windows.push(slide),
            None => groups.push((slide.image.as_str(), vec![slide])),
        }
    }
    groups
}

fn enable_expr(windows: &[&SlideWindow]) -> String {
    windows
        .iter()
        .map(|w| format!("between(n,{},{})", w.start_frame, w.end_frame() - 1))
        .collect::<Vec<_>>()
        .join("+")
}

/// 转义单引号包裹的滤镜参数
fn quote(value: &str) -> String {
    value.replace('\'', "'\\''")
}

fn drawtext(
    font: Option<&str>,
    textfile: &Path,
    size: u32,
    color: &str,
    y: &str,
    enable: Option<&str>,
) -> String {
    let mut filter = String::from("drawtext=");
    if let Some(font) = font {
        filter.push_str(&format!("fontfile='{}':", quote(font)));
    }
    filter.push_str(&format!(
        "textfile='{}':fontsize={}:fontcolor={}:borderw=4:bordercolor=black:x=(w-text_w)/2:y={}",
        quote(&textfile.to_string_lossy()),
        size,
        color,
        y
    ));
    if let Some(enable) = enable {
        filter.push_str(&format!(":enable='{}'", enable));
    }
    filter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::{synthesize, SegmentTiming, TimelineSettings, TitleLines};

    fn plan(audio: bool) -> RenderPlan {
        let segments = vec![
            SegmentTiming {
                duration_secs: 7.0,
                captions: vec!["이거 실화냐?!".into(), "진짜 미쳤어요.".into()],
                text: "이거 실화냐?! 진짜 미쳤어요.".into(),
                images: vec!["/img/a.jpg".into(), "/img/b.jpg".into()],
                audio: audio.then(|| "/tmp/seg0.mp3".to_string()),
            },
            SegmentTiming {
                duration_secs: 2.0,
                captions: vec!["끝".into()],
                text: "끝".into(),
                images: vec![],
                audio: None,
            },
        ];
        synthesize(
            &segments,
            &TimelineSettings {
                title: Some(TitleLines {
                    main: "EV6 vs 아이오닉6".into(),
                    sub: String::new(),
                }),
                font: Some("/fonts/Jalnan2TTF.ttf".into()),
                ..TimelineSettings::default()
            },
        )
        .unwrap()
    }

    fn filter_of(job: &RenderJob) -> &str {
        let pos = job.args.iter().position(|a| a == "-filter_complex").unwrap();
        &job.args[pos + 1]
    }

    #[test]
    fn layout_for_vertical_video() {
        let layout = Layout::for_plan(&plan(false));
        assert_eq!(layout.title_height, 630);
        assert_eq!(layout.image_size, 1080);
    }

    #[test]
    fn images_are_enabled_on_their_windows() {
        let generator = VideoGenerator::new(PathBuf::from("/work"), "1700000000000");
        let job = generator.build_job(&plan(true), Path::new("/out/shorts.mp4"), true);
        let filter = filter_of(&job);

        assert!(filter.contains("enable='between(n,0,89)+between(n,180,209)'[v0]"));
        assert!(filter.contains("enable='between(n,90,179)'[v1]"));
        assert!(filter.contains("overlay=0:630"));
        // 两张图片各输入一次
        assert_eq!(job.args.iter().filter(|a| *a == "-loop").count(), 2);
    }

    #[test]
    fn captions_use_absolute_frames() {
        let generator = VideoGenerator::new(PathBuf::from("/work"), "1700000000000");
        let job = generator.build_job(&plan(true), Path::new("/out/shorts.mp4"), true);
        let filter = filter_of(&job);

        assert!(filter.contains("between(n,0,104)"));
        assert!(filter.contains("between(n,105,209)"));
        assert!(filter.contains("between(n,210,269)"));
        assert!(filter.contains("fontfile='/fonts/Jalnan2TTF.ttf'"));

        let texts: Vec<&str> = job.text_files.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(texts, vec!["EV6 vs 아이오닉6", "이거 실화냐?!", "진짜 미쳤어요.", "끝"]);
    }

    #[test]
    fn audio_is_padded_and_silence_fills_gaps() {
        let generator = VideoGenerator::new(PathBuf::from("/work"), "1700000000000");
        let job = generator.build_job(&plan(true), Path::new("/out/shorts.mp4"), true);
        let filter = filter_of(&job);

        assert!(filter.contains("[2:a]apad=whole_dur=7.000000,atrim=duration=7.000000[a0]"));
        assert!(filter.contains("aevalsrc=0:s=44100:d=2.000000[a1]"));
        assert!(filter.contains("[a0][a1]concat=n=2:v=0:a=1[aout]"));
        assert!(job.args.contains(&"[aout]".to_string()));
        assert_eq!(job.args.last().unwrap(), "/out/shorts.mp4");

        let frames = job.args.iter().position(|a| a == "-frames:v").unwrap();
        assert_eq!(job.args[frames + 1], "270");
    }

    #[test]
    fn silent_render_drops_audio() {
        let generator = VideoGenerator::new(PathBuf::from("/work"), "1700000000000");
        let job = generator.build_job(&plan(false), Path::new("preview.mp4"), false);
        assert!(job.args.contains(&"-an".to_string()));
        assert!(!filter_of(&job).contains("concat"));
    }

    #[test]
    fn text_files_are_named_per_job() {
        let first = VideoGenerator::new(PathBuf::from("/work"), "111")
            .build_job(&plan(false), Path::new("a.mp4"), false);
        let second = VideoGenerator::new(PathBuf::from("/work"), "222")
            .build_job(&plan(false), Path::new("b.mp4"), false);

        assert_eq!(first.text_files[0].0, PathBuf::from("/work/111_title_main.txt"));
        assert_eq!(first.text_files[1].0, PathBuf::from("/work/111_caption_0_0.txt"));
        assert!(first
            .text_files
            .iter()
            .all(|(path, _)| second.text_files.iter().all(|(other, _)| other != path)));
        assert!(filter_of(&first).contains("textfile='/work/111_caption_0_0.txt'"));
    }

    #[test]
    fn quotes_are_escaped() {
        assert_eq!(quote("it's"), "it'\\''s");
    }
}
