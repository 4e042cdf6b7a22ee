use std::path::PathBuf;
use std::time::Duration;
use std::{env, fs};

use serde::Deserialize;

use crate::scheduler::trigger::ScheduleZone;
use crate::util::dates;
use crate::Error;

#[derive(Debug, Deserialize, Clone)]
struct FileConfig {
    pub database_path: String,
    pub log: FileLogConfig,
    pub upstream: UpstreamConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Deserialize, Clone)]
struct FileLogConfig {
    pub level: String,
    pub path: String,
    pub json_path: String,
    pub seq_endpoint: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub locale: Option<String>,
    pub platform: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_after_margin_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    #[serde(default)]
    pub run_on_startup: bool,
    pub heroes_hour: u32,
    pub heroes_minute: u32,
    pub stats_every_hours: u32,
    pub stats_minute: u32,
    pub politeness_delay_secs: u64,
    pub failure_cooldown_secs: u64,
    #[serde(default)]
    pub zone: ScheduleZone,
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Clone, Debug)]
pub struct LogConfig {
    pub level: String,
    pub path: PathBuf,
    pub json_path: PathBuf,
    pub seq_endpoint: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub log: LogConfig,
    pub upstream: UpstreamConfig,
    pub scheduler: SchedulerConfig,
}

fn expand_tilde(path: &str) -> Result<PathBuf, Error> {
    if path.starts_with("~/") {
        let home = env::var("HOME")?;
        Ok(PathBuf::from(path.replacen("~", &home, 1)))
    } else {
        Ok(PathBuf::from(path))
    }
}

pub fn load_config() -> Result<AppConfig, Error> {
    let exe_path = env::current_exe()?;
    let config_path = match exe_path.parent() {
        Some(dir) => dir.join("oowsync.toml"),
        _ => return Err("failed to determine executable directory".into()),
    };

    if !config_path.exists() || !config_path.is_file() {
        return Err(format!(
            "Config file does not exist or is not a file: {}",
            config_path.display()
        )
        .into());
    }
    let s = fs::read_to_string(&config_path)?;
    parse_config(&s)
}

fn parse_config(s: &str) -> Result<AppConfig, Error> {
    let cfg: FileConfig = toml::from_str(s)?;

    let database_path = expand_tilde(&cfg.database_path)?;
    if let Some(parent) = database_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(format!("Database directory does not exist: {}", parent.display()).into());
        }
    }

    validate_upstream(&cfg.upstream)?;
    validate_scheduler(&cfg.scheduler)?;

    Ok(AppConfig {
        database_path,
        log: build_log_config(cfg.log)?,
        upstream: cfg.upstream,
        scheduler: cfg.scheduler,
    })
}

fn validate_upstream(upstream: &UpstreamConfig) -> Result<(), Error> {
    let url = &upstream.base_url;
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(format!("Upstream base_url must be an http(s) URL: {url}").into());
    }
    if upstream.max_attempts == 0 {
        return Err("Upstream max_attempts must be at least 1".into());
    }
    if upstream.platform.trim().is_empty() {
        return Err("Upstream platform must not be empty".into());
    }
    Ok(())
}

fn validate_scheduler(scheduler: &SchedulerConfig) -> Result<(), Error> {
    if scheduler.heroes_hour > 23 || scheduler.heroes_minute > 59 {
        return Err(format!(
            "Invalid heroes schedule {:02}:{:02}",
            scheduler.heroes_hour, scheduler.heroes_minute
        )
        .into());
    }
    if scheduler.stats_every_hours == 0 || scheduler.stats_every_hours > 24 {
        return Err(format!(
            "stats_every_hours must be between 1 and 24, got {}",
            scheduler.stats_every_hours
        )
        .into());
    }
    if scheduler.stats_minute > 59 {
        return Err(format!("Invalid stats_minute {}", scheduler.stats_minute).into());
    }
    Ok(())
}

fn build_log_config(file_log: FileLogConfig) -> Result<LogConfig, Error> {
    let path = log_file_replacements(&file_log.path)?;
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            return Err(format!("Log file directory does not exist: {}", parent.display()).into());
        }
    }
    if path.exists() && !path.is_file() {
        return Err(format!("Log path exists but is not a file: {}", &file_log.path).into());
    }

    let json_path = log_file_replacements(&file_log.json_path)?;
    if let Some(parent) = json_path.parent() {
        if !parent.exists() {
            return Err(format!("Log file directory does not exist: {}", parent.display()).into());
        }
    }
    if json_path.exists() && !json_path.is_file() {
        return Err(format!("Log path exists but is not a file: {}", &file_log.json_path).into());
    }

    Ok(LogConfig {
        level: file_log.level,
        path,
        json_path,
        seq_endpoint: file_log.seq_endpoint,
    })
}

fn log_file_replacements(cfg_path: &str) -> Result<PathBuf, Error> {
    let date_str = dates::local_date_yyyy_mm_dd();
    let replaced = cfg_path.replace("{DATE}", &date_str);
    expand_tilde(&replaced)
}
