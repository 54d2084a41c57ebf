use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::enumerate::CategoryMatcher;
use crate::models::Category;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub categories: CategoriesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Directory tree or single `.zip` archive.
    pub root: PathBuf,
    #[serde(default)]
    pub follow_symlinks: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".tracker_cache")
}

/// File-name globs per category.
#[derive(Debug, Deserialize, Clone)]
pub struct CategoriesConfig {
    #[serde(default = "default_heart_rate")]
    pub heart_rate: String,
    #[serde(default = "default_steps")]
    pub steps: String,
    #[serde(default = "default_sleep")]
    pub sleep: String,
    #[serde(default = "default_daily")]
    pub daily: String,
    /// Extra daily glob applied to archive members only. Empty disables it.
    #[serde(default = "default_daily_archived")]
    pub daily_archived: String,
}

impl Default for CategoriesConfig {
    fn default() -> Self {
        Self {
            heart_rate: default_heart_rate(),
            steps: default_steps(),
            sleep: default_sleep(),
            daily: default_daily(),
            daily_archived: default_daily_archived(),
        }
    }
}

fn default_heart_rate() -> String {
    Category::HeartRate.default_pattern().to_string()
}
fn default_steps() -> String {
    Category::Steps.default_pattern().to_string()
}
fn default_sleep() -> String {
    Category::Sleep.default_pattern().to_string()
}
fn default_daily() -> String {
    Category::Daily.default_pattern().to_string()
}
fn default_daily_archived() -> String {
    Category::Daily
        .archived_pattern()
        .unwrap_or_default()
        .to_string()
}

impl CategoriesConfig {
    pub fn pattern(&self, category: Category) -> &str {
        match category {
            Category::HeartRate => &self.heart_rate,
            Category::Steps => &self.steps,
            Category::Sleep => &self.sleep,
            Category::Daily => &self.daily,
        }
    }

    pub fn matcher(&self) -> Result<CategoryMatcher> {
        let matcher = CategoryMatcher::new(Category::ALL.map(|c| (c, self.pattern(c))))?;
        if self.daily_archived.trim().is_empty() {
            return Ok(matcher);
        }
        matcher.with_archived(Category::Daily, &self.daily_archived)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.source.root.as_os_str().is_empty() {
        anyhow::bail!("source.root must not be empty");
    }
    if config.cache.dir.as_os_str().is_empty() {
        anyhow::bail!("cache.dir must not be empty");
    }

    for category in Category::ALL {
        let pattern = config.categories.pattern(category);
        if pattern.trim().is_empty() {
            anyhow::bail!("categories.{} must not be empty", category);
        }
    }
    config
        .categories
        .matcher()
        .with_context(|| "Invalid category glob in [categories]")?;

    Ok(config)
}
