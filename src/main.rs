mod api;
mod caption;
mod config;
mod error;
mod project;
mod script;
mod shorts;
mod timeline;
mod video;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use config::Config;
use shorts::{RenderOptions, ShortsPipeline, ShortsRequest};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "shorts-maker")]
#[command(about = "Generate captioned vertical short-form videos from a topic", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Gemini API key
    #[arg(long, global = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate script, speech and video in one go
    Create {
        /// Topic of the video
        #[arg(short, long)]
        topic: String,

        /// Project folder name (defaults to the topic)
        #[arg(short, long)]
        name: Option<String>,

        /// Maximum video length in seconds
        #[arg(long)]
        max_duration: Option<u32>,

        /// Number of narration segments
        #[arg(long)]
        segments: Option<usize>,

        #[command(flatten)]
        images: ImageArgs,

        #[command(flatten)]
        render: RenderArgs,
    },
    /// Generate and save only the script for review
    Script {
        #[arg(short, long)]
        topic: String,

        #[arg(short, long)]
        name: Option<String>,

        #[arg(long)]
        max_duration: Option<u32>,

        #[arg(long)]
        segments: Option<usize>,
    },
    /// Render a project from its script.json with fresh speech
    Render {
        /// Project folder (defaults to the latest project)
        project: Option<PathBuf>,

        #[command(flatten)]
        images: ImageArgs,

        #[command(flatten)]
        render: RenderArgs,
    },
    /// Render a silent preview using estimated durations
    Preview {
        project: Option<PathBuf>,

        #[command(flatten)]
        images: ImageArgs,

        #[command(flatten)]
        render: RenderArgs,
    },
    /// Serve a project's render plan and assets to an external renderer
    Serve { project: Option<PathBuf> },
    /// Print the caption chunks for a text
    Captions {
        text: String,

        #[arg(long)]
        max_chars: Option<usize>,
    },
    /// List subjects with their image counts
    Subjects,
    /// List projects
    Projects,
}

#[derive(Args, Debug, Default)]
struct ImageArgs {
    /// Image directories used by every segment
    #[arg(short, long = "images")]
    image_dirs: Vec<PathBuf>,

    /// Images for subject "a" (directory or subject name)
    #[arg(long)]
    subject_a: Option<String>,

    /// Images for subject "b" (directory or subject name)
    #[arg(long)]
    subject_b: Option<String>,
}

#[derive(Args, Debug, Default)]
struct RenderArgs {
    /// Seconds each image stays on screen
    #[arg(long)]
    image_interval: Option<f64>,

    /// Font file for titles and captions
    #[arg(long)]
    font: Option<PathBuf>,

    #[arg(long)]
    title_main: Option<String>,

    #[arg(long)]
    title_sub: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载环境变量
    dotenvy::dotenv().ok();

    // 解析命令行参数
    let cli = Cli::parse();

    let (config, config_file) =
        Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    // 初始化日志，RUST_LOG 优先
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    match &config_file {
        Some(path) => info!("Loaded configuration from {}", path.display()),
        None => info!("No configuration file found, using defaults"),
    }

    if let Err(e) = run(cli.command, config, cli.api_key).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(command: Command, config: Config, api_key: Option<String>) -> anyhow::Result<()> {
    match command {
        Command::Captions { text, max_chars } => {
            let max_chars = max_chars.unwrap_or(config.captions.max_chars);
            for (i, chunk) in caption::chunk(&text, max_chars).iter().enumerate() {
                println!("{:>3}  {}", i + 1, chunk);
            }
            return Ok(());
        }
        Command::Create { .. } | Command::Script { .. } => {
            let key = Config::api_key(api_key)?;
            let pipeline = ShortsPipeline::new(config.clone(), Some(key))?;
            return generate(&pipeline, &config, command).await;
        }
        _ => {}
    }

    let pipeline = ShortsPipeline::new(config.clone(), api_key)?;
    let store = pipeline.store();

    match command {
        Command::Render {
            project,
            images,
            render,
        } => {
            let project_dir = resolve_project(&pipeline, project)?;
            let (pool, options) = project_inputs(&pipeline, &project_dir, images, render)?;
            let video = pipeline.render_project(&project_dir, &pool, &options).await?;
            info!("Done: {}", video.display());
        }
        Command::Preview {
            project,
            images,
            render,
        } => {
            let project_dir = resolve_project(&pipeline, project)?;
            let (pool, options) = project_inputs(&pipeline, &project_dir, images, render)?;
            let video = pipeline.preview_project(&project_dir, &pool, &options).await?;
            info!("Done: {}", video.display());
        }
        Command::Serve { project } => {
            let project_dir = resolve_project(&pipeline, project)?;
            pipeline.serve_project(&project_dir).await?;
        }
        Command::Subjects => {
            let subjects = store.list_subjects()?;
            if subjects.is_empty() {
                println!("No subjects found");
            }
            for subject in subjects {
                let count = store.subject_images(&subject)?.len();
                println!("{}  ({} images)", subject, count);
            }
        }
        Command::Projects => {
            let projects = store.list_projects()?;
            if projects.is_empty() {
                println!("No projects found");
            }
            for name in projects {
                println!("{}", name);
            }
        }
        Command::Create { .. } | Command::Script { .. } | Command::Captions { .. } => {}
    }

    Ok(())
}

async fn generate(pipeline: &ShortsPipeline, config: &Config, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Script {
            topic,
            name,
            max_duration,
            segments,
        } => {
            let result = pipeline
                .generate_script_only(
                    &topic,
                    name.as_deref(),
                    segments.unwrap_or(config.script.segment_count),
                    max_duration.unwrap_or(config.script.max_duration_secs),
                )
                .await?;
            info!("Project: {}", result.project_dir.display());
            info!("Title: {}", result.script.title);
            info!(
                "{} segments, about {:.1}s",
                result.script.segments.len(),
                result.script.estimated_duration()
            );
            info!("Edit {} and run `render` when ready", result.script_path.display());
        }
        Command::Create {
            topic,
            name,
            max_duration,
            segments,
            images,
            render,
        } => {
            let pool = pipeline.image_pool(
                &images.image_dirs,
                images.subject_a.as_deref(),
                images.subject_b.as_deref(),
            )?;
            let result = pipeline
                .create_shorts(ShortsRequest {
                    topic,
                    images: pool,
                    project_name: name,
                    max_duration: max_duration.unwrap_or(config.script.max_duration_secs),
                    segment_count: segments.unwrap_or(config.script.segment_count),
                    image_interval_secs: render
                        .image_interval
                        .unwrap_or(config.timeline.image_interval_secs),
                    font: render.font,
                })
                .await?;
            info!("Title: {}", result.title);
            info!(
                "{} segments, {:.1}s estimated",
                result.script.segments.len(),
                result.script.estimated_duration()
            );
            info!("Project: {}", result.project_dir.display());
            info!("Video: {}", result.video_path.display());
        }
        _ => {}
    }
    Ok(())
}

fn resolve_project(pipeline: &ShortsPipeline, project: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    match project {
        Some(path) if path.is_dir() => Ok(path),
        Some(name) => {
            let path = pipeline.store().project_dir(&name.to_string_lossy());
            anyhow::ensure!(path.is_dir(), "Project not found: {}", name.display());
            Ok(path)
        }
        None => pipeline
            .store()
            .latest_project()?
            .context("No projects found, run `create` or `script` first"),
    }
}

/// 命令行参数优先，其次项目的 config.json
fn project_inputs(
    pipeline: &ShortsPipeline,
    project_dir: &Path,
    images: ImageArgs,
    render: RenderArgs,
) -> anyhow::Result<(timeline::ImagePool, RenderOptions)> {
    let project_config = project::load_project_config(project_dir)
        .with_context(|| format!("Failed to read project config in {}", project_dir.display()))?;

    let dirs = if images.image_dirs.is_empty() {
        project_config.image_dirs
    } else {
        images.image_dirs
    };
    let pool = pipeline.image_pool(&dirs, images.subject_a.as_deref(), images.subject_b.as_deref())?;

    let options = RenderOptions {
        image_interval_secs: render.image_interval.or(project_config.image_interval_seconds),
        title_main: render.title_main.or(project_config.title_main),
        title_sub: render.title_sub.or(project_config.title_sub),
        font: render.font,
    };
    Ok((pool, options))
}
