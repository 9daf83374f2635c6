//! 短视频生成流程：脚本 → 语音 → 实测时长 → 渲染计划 → 视频

use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::api::{GeminiClient, GoogleTts};
use crate::config::Config;
use crate::error::{Result, ShortsError};
use crate::project::{self, ProjectStore};
use crate::script::Script;
use crate::timeline::{synthesize, ImagePool, RenderPlan, SegmentTiming, TimelineSettings, TitleLines};
use crate::video::{probe, AssetServer, VideoGenerator};

/// 项目目录下存放分段音频的子目录
const AUDIO_DIR: &str = "audio";

#[derive(Debug, Clone)]
pub struct ShortsRequest {
    pub topic: String,
    pub images: ImagePool,
    pub project_name: Option<String>,
    pub max_duration: u32,
    pub segment_count: usize,
    pub image_interval_secs: f64,
    pub font: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ShortsResult {
    pub video_path: PathBuf,
    pub project_dir: PathBuf,
    pub title: String,
    pub script: Script,
}

#[derive(Debug, Clone)]
pub struct ScriptOnlyResult {
    pub project_dir: PathBuf,
    pub script_path: PathBuf,
    pub script: Script,
}

/// 从已有项目渲染时的可选覆盖项
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    pub image_interval_secs: Option<f64>,
    pub title_main: Option<String>,
    pub title_sub: Option<String>,
    pub font: Option<PathBuf>,
}

pub struct ShortsPipeline {
    config: Config,
    store: ProjectStore,
    gemini: Option<GeminiClient>,
    tts: GoogleTts,
}

impl ShortsPipeline {
    pub fn new(config: Config, api_key: Option<String>) -> Result<Self> {
        let store = ProjectStore::new(&config.paths);
        store.ensure_dirs()?;

        let gemini = api_key
            .map(|key| GeminiClient::new(key, config.script.model.clone()))
            .transpose()?;
        let tts = GoogleTts::new(config.tts.language.clone(), config.paths.temp_dir.clone())?;

        Ok(Self {
            config,
            store,
            gemini,
            tts,
        })
    }

    pub fn store(&self) -> &ProjectStore {
        &self.store
    }

    /// 收集图片：`dirs` 为全局图片，`subject_a`/`subject_b` 可以是目录路径或素材目录下的对象名
    pub fn image_pool(
        &self,
        dirs: &[PathBuf],
        subject_a: Option<&str>,
        subject_b: Option<&str>,
    ) -> Result<ImagePool> {
        let mut global = Vec::new();
        for dir in dirs {
            global.extend(project::images_in_dir(dir)?);
        }

        let subject = |name: Option<&str>| -> Result<Vec<PathBuf>> {
            match name {
                None => Ok(Vec::new()),
                Some(name) if Path::new(name).is_dir() => project::images_in_dir(Path::new(name)),
                Some(name) => self.store.subject_images(name),
            }
        };
        let subject_a = subject(subject_a)?;
        let subject_b = subject(subject_b)?;

        // 没有全局图片时用两个对象的图片代替
        if global.is_empty() {
            global.extend(subject_a.iter().cloned());
            global.extend(subject_b.iter().cloned());
        }
        if global.is_empty() {
            warn!("No images found, video will only contain captions");
        }
        info!(
            "Images: {} global, {} for a, {} for b",
            global.len(),
            subject_a.len(),
            subject_b.len()
        );

        let to_strings = |paths: Vec<PathBuf>| -> Vec<String> {
            paths
                .into_iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect()
        };
        Ok(ImagePool {
            global: to_strings(global),
            subject_a: to_strings(subject_a),
            subject_b: to_strings(subject_b),
        })
    }

    fn gemini(&self) -> Result<&GeminiClient> {
        self.gemini.as_ref().ok_or_else(|| {
            ShortsError::Env("GEMINI_API_KEY is required to generate scripts".to_string())
        })
    }

    /// 只生成脚本并保存，方便人工检查和修改字幕后再渲染
    pub async fn generate_script_only(
        &self,
        topic: &str,
        project_name: Option<&str>,
        segment_count: usize,
        max_duration: u32,
    ) -> Result<ScriptOnlyResult> {
        let project_dir = self
            .store
            .create_project(project_name.unwrap_or(topic), Local::now().date_naive())?;

        let mut script = self
            .gemini()?
            .generate_script(topic, segment_count, max_duration)
            .await?;
        script.annotate_captions(self.config.captions.max_chars);

        let script_path = project::save_script(&project_dir, &script)?;
        info!("Script saved: {}", script_path.display());

        Ok(ScriptOnlyResult {
            project_dir,
            script_path,
            script,
        })
    }

    /// 完整流程
    pub async fn create_shorts(&self, request: ShortsRequest) -> Result<ShortsResult> {
        let project_dir = self.store.create_project(
            request.project_name.as_deref().unwrap_or(&request.topic),
            Local::now().date_naive(),
        )?;

        info!("[1/4] Generating script for: {}", request.topic);
        let mut script = self
            .gemini()?
            .generate_script(&request.topic, request.segment_count, request.max_duration)
            .await?;
        script.annotate_captions(self.config.captions.max_chars);
        project::save_script(&project_dir, &script)?;

        let options = RenderOptions {
            image_interval_secs: Some(request.image_interval_secs),
            font: request.font.clone(),
            ..RenderOptions::default()
        };
        let video_path = self
            .narrate_and_render(&project_dir, &script, &request.images, &options)
            .await?;

        Ok(ShortsResult {
            video_path,
            project_dir,
            title: script.title.clone(),
            script,
        })
    }

    /// 用项目中（可能已手动修改的）脚本重新配音并渲染
    pub async fn render_project(
        &self,
        project_dir: &Path,
        images: &ImagePool,
        options: &RenderOptions,
    ) -> Result<PathBuf> {
        let script = project::load_script(project_dir)?;
        info!("[1/4] Loaded script: {}", script.title);
        self.narrate_and_render(project_dir, &script, images, options).await
    }

    /// 静音预览：用脚本的预估时长代替实测时长
    pub async fn preview_project(
        &self,
        project_dir: &Path,
        images: &ImagePool,
        options: &RenderOptions,
    ) -> Result<PathBuf> {
        let script = project::load_script(project_dir)?;
        let durations: Vec<f64> = script.segments.iter().map(|s| s.duration).collect();

        let plan = self.plan_for(&script, &durations, None, images, options)?;
        let preview_path = project_dir.join("preview.mp4");
        let job_name = format!("preview_{}", Local::now().timestamp_millis());
        VideoGenerator::new(self.store.temp_dir().to_path_buf(), job_name)
            .render(&plan, &preview_path, false)
            .await?;

        info!("Preview created: {}", preview_path.display());
        Ok(preview_path)
    }

    /// 把项目的渲染计划和素材交给外部渲染端，直到 Ctrl-C
    pub async fn serve_project(&self, project_dir: &Path) -> Result<()> {
        let plan = project::load_plan(project_dir)?;
        let server = AssetServer::start(
            plan.references(),
            self.config.render.asset_port,
            self.config.render.asset_port_attempts,
        )
        .await?;
        server.publish_plan(&plan).await?;
        info!("Render plan available at http://{}/plan.json", server.addr());

        let waited = tokio::signal::ctrl_c().await;
        server.shutdown().await;
        waited?;
        Ok(())
    }

    async fn narrate_and_render(
        &self,
        project_dir: &Path,
        script: &Script,
        images: &ImagePool,
        options: &RenderOptions,
    ) -> Result<PathBuf> {
        let base_name = Local::now().timestamp_millis().to_string();
        let result = self
            .narrate_and_render_inner(project_dir, script, images, options, &base_name)
            .await;

        info!("Cleaning up temp files...");
        if let Err(e) = self.store.cleanup_temp(&base_name) {
            warn!("Failed to clean temp files: {}", e);
        }
        result
    }

    async fn narrate_and_render_inner(
        &self,
        project_dir: &Path,
        script: &Script,
        images: &ImagePool,
        options: &RenderOptions,
        base_name: &str,
    ) -> Result<PathBuf> {
        info!("[2/4] Generating TTS audio...");
        let temp_audio = self.tts.synthesize_segments(&script.segments, base_name).await?;
        info!("Generated {} audio segments", temp_audio.len());

        info!("[3/4] Preparing render segments...");
        // 音频放进项目目录，plan.json 之后还能被 serve 使用
        let audio_dir = project_dir.join(AUDIO_DIR);
        tokio::fs::create_dir_all(&audio_dir).await?;

        let mut audio_paths = Vec::with_capacity(temp_audio.len());
        let mut durations = Vec::with_capacity(temp_audio.len());
        for (i, temp_path) in temp_audio.iter().enumerate() {
            let path = audio_dir.join(format!("segment_{}.mp3", i));
            tokio::fs::copy(temp_path, &path).await?;

            let duration = probe::audio_duration(&path).await?;
            info!(
                "Segment {}/{} prepared ({:.2}s, subject: {})",
                i + 1,
                temp_audio.len(),
                duration,
                script.segments[i].subject.as_str()
            );
            durations.push(duration);
            audio_paths.push(path);
        }

        let plan = self.plan_for(script, &durations, Some(&audio_paths), images, options)?;
        project::save_plan(project_dir, &plan)?;
        info!(
            "Render plan: {} frames ({:.1}s)",
            plan.total_frames,
            plan.duration_secs()
        );

        info!("[4/4] Rendering video...");
        let output_path = project_dir.join("shorts.mp4");
        VideoGenerator::new(self.store.temp_dir().to_path_buf(), base_name)
            .render(&plan, &output_path, true)
            .await?;

        info!("Video created: {}", output_path.display());
        Ok(output_path)
    }

    /// 由时长生成渲染计划
    pub fn plan_for(
        &self,
        script: &Script,
        durations: &[f64],
        audio: Option<&[PathBuf]>,
        images: &ImagePool,
        options: &RenderOptions,
    ) -> Result<RenderPlan> {
        let (main, sub) = script.title_lines();
        let title = TitleLines {
            main: options.title_main.clone().unwrap_or(main),
            sub: options.title_sub.clone().unwrap_or(sub),
        };

        let settings = TimelineSettings {
            image_interval_secs: options
                .image_interval_secs
                .unwrap_or(self.config.timeline.image_interval_secs),
            width: self.config.render.width,
            height: self.config.render.height,
            title: Some(title),
            font: self.resolve_font(options.font.as_deref()),
            ..TimelineSettings::default()
        };

        build_plan(
            script,
            durations,
            audio,
            images,
            &settings,
            self.config.captions.max_chars,
        )
    }

    fn resolve_font(&self, requested: Option<&Path>) -> Option<String> {
        let font = requested.unwrap_or(&self.config.paths.font);
        if font.exists() {
            info!("Using font: {}", font.display());
            std::path::absolute(font)
                .ok()
                .map(|p| p.to_string_lossy().into_owned())
        } else {
            warn!("Font not found: {}, using system font", font.display());
            None
        }
    }
}

/// 脚本分段 + 时长 + 图片 → 渲染计划
pub fn build_plan(
    script: &Script,
    durations: &[f64],
    audio: Option<&[PathBuf]>,
    images: &ImagePool,
    settings: &TimelineSettings,
    max_chars: usize,
) -> Result<RenderPlan> {
    if durations.len() != script.segments.len() {
        return Err(ShortsError::ScriptMismatch {
            expected: script.segments.len(),
            actual: durations.len(),
        });
    }

    let timings: Vec<SegmentTiming> = script
        .segments
        .iter()
        .zip(durations)
        .enumerate()
        .map(|(i, (segment, &duration))| SegmentTiming {
            duration_secs: duration,
            captions: segment.captions(max_chars),
            text: segment.text.clone(),
            images: images.resolve(segment.subject).to_vec(),
            audio: audio
                .and_then(|paths| paths.get(i))
                .map(|p| p.to_string_lossy().into_owned()),
        })
        .collect();

    synthesize(&timings, settings)
}
