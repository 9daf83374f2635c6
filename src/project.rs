//! 项目目录管理：脚本、渲染计划和图片素材的读写

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::PathSettings;
use crate::error::{Result, ShortsError};
use crate::script::Script;
use crate::timeline::RenderPlan;

pub const SCRIPT_FILE: &str = "script.json";
pub const PLAN_FILE: &str = "plan.json";
pub const PROJECT_CONFIG_FILE: &str = "config.json";

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "bmp", "heic", "avif"];

/// 项目自带的渲染设置，可选
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    #[serde(default)]
    pub image_dirs: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_main: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_interval_seconds: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ProjectStore {
    subjects_dir: PathBuf,
    projects_dir: PathBuf,
    temp_dir: PathBuf,
}

impl ProjectStore {
    pub fn new(paths: &PathSettings) -> Self {
        Self {
            subjects_dir: paths.subjects_dir.clone(),
            projects_dir: paths.projects_dir.clone(),
            temp_dir: paths.temp_dir.clone(),
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.subjects_dir, &self.projects_dir, &self.temp_dir] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// 素材目录下的每个子目录对应一个对象
    pub fn list_subjects(&self) -> Result<Vec<String>> {
        list_dirs(&self.subjects_dir)
    }

    pub fn subject_images(&self, name: &str) -> Result<Vec<PathBuf>> {
        images_in_dir(&self.subjects_dir.join(name))
    }

    pub fn project_dir(&self, name: &str) -> PathBuf {
        self.projects_dir.join(name)
    }

    pub fn list_projects(&self) -> Result<Vec<String>> {
        list_dirs(&self.projects_dir)
    }

    /// 最近修改的项目
    pub fn latest_project(&self) -> Result<Option<PathBuf>> {
        if !self.projects_dir.exists() {
            return Ok(None);
        }

        let mut latest: Option<(std::time::SystemTime, PathBuf)> = None;
        for entry in fs::read_dir(&self.projects_dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_dir() {
                continue;
            }
            let modified = metadata.modified()?;
            if latest.as_ref().map_or(true, |(t, _)| modified > *t) {
                latest = Some((modified, entry.path()));
            }
        }
        Ok(latest.map(|(_, path)| path))
    }

    /// 创建 `<projects_dir>/<YYYYMMDD>_<name>`
    pub fn create_project(&self, name: &str, date: NaiveDate) -> Result<PathBuf> {
        let folder = format!("{}_{}", date.format("%Y%m%d"), safe_name(name));
        let dir = self.projects_dir.join(folder);
        fs::create_dir_all(&dir)?;
        info!("Project folder: {}", dir.display());
        Ok(dir)
    }

    /// 删除临时目录中文件名包含 `pattern` 的文件
    pub fn cleanup_temp(&self, pattern: &str) -> Result<usize> {
        if !self.temp_dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in fs::read_dir(&self.temp_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() && entry.file_name().to_string_lossy().contains(pattern) {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        debug!("Removed {} temp files matching {}", removed, pattern);
        Ok(removed)
    }
}

/// 目录名只保留字母数字、韩文音节、`_` 和 `-`
pub fn safe_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            let hangul = ('\u{AC00}'..='\u{D7A3}').contains(&c);
            if c.is_ascii_alphanumeric() || hangul || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn list_dirs(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// 目录中的图片，按文件名排序；目录不存在时为空
pub fn images_in_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut images = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_image && path.is_file() {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

pub fn save_script(project_dir: &Path, script: &Script) -> Result<PathBuf> {
    let path = project_dir.join(SCRIPT_FILE);
    fs::write(&path, serde_json::to_string_pretty(script)?)?;
    Ok(path)
}

pub fn load_script(project_dir: &Path) -> Result<Script> {
    let path = project_dir.join(SCRIPT_FILE);
    if !path.exists() {
        return Err(ShortsError::Project(format!(
            "{} not found in {}",
            SCRIPT_FILE,
            project_dir.display()
        )));
    }
    let content = fs::read_to_string(&path)?;
    serde_json::from_str(&content)
        .map_err(|e| ShortsError::Script(format!("Invalid {}: {}", path.display(), e)))
}

pub fn save_plan(project_dir: &Path, plan: &RenderPlan) -> Result<PathBuf> {
    let path = project_dir.join(PLAN_FILE);
    fs::write(&path, serde_json::to_string_pretty(plan)?)?;
    Ok(path)
}

pub fn load_plan(project_dir: &Path) -> Result<RenderPlan> {
    let path = project_dir.join(PLAN_FILE);
    if !path.exists() {
        return Err(ShortsError::Project(format!(
            "{} not found in {}",
            PLAN_FILE,
            project_dir.display()
        )));
    }
    Ok(serde_json::from_str(&fs::read_to_string(&path)?)?)
}

pub fn load_project_config(project_dir: &Path) -> Result<ProjectConfig> {
    let path = project_dir.join(PROJECT_CONFIG_FILE);
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }
    Ok(serde_json::from_str(&fs::read_to_string(&path)?)?)
}
