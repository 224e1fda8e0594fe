//! 設定檔
//!
//! `config/mcdr.json`，缺少的欄位使用預設值，檔案不存在時以預設內容建立

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// 設定檔錯誤
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("設定檔讀寫失敗: {0}")]
    Io(#[from] io::Error),

    #[error("設定檔格式錯誤: {0}")]
    Json(#[from] serde_json::Error),
}

/// 守護程式設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McdrConfig {
    /// 伺服器工作目錄
    #[serde(default = "default_working_directory")]
    pub working_directory: PathBuf,
    /// 啟動伺服器的 shell 指令
    #[serde(default = "default_start_command")]
    pub start_command: String,
    /// 處理器名稱
    #[serde(default = "default_handler")]
    pub handler: String,
    /// MCDR -> 伺服器的編碼，未設定時使用 UTF-8
    #[serde(default)]
    pub encoding: Option<String>,
    /// 伺服器 -> MCDR 的解碼，未設定時使用平台預設
    #[serde(default)]
    pub decoding: Option<String>,
    #[serde(default = "default_permission_file")]
    pub permission_file: PathBuf,
    /// 輪詢間隔（毫秒）
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
    /// 輸出結束後等待行程結束的輪詢次數
    #[serde(default = "default_stream_close_ticks")]
    pub stream_close_ticks: u32,
    /// 送出停止指令後等待行程結束的輪詢次數
    #[serde(default = "default_stop_timeout_ticks")]
    pub stop_timeout_ticks: u32,
    /// 重新啟動前的等待秒數
    #[serde(default = "default_restart_delay_secs")]
    pub restart_delay_secs: u64,
    #[serde(default)]
    pub debug: bool,
}

fn default_working_directory() -> PathBuf {
    PathBuf::from("server")
}

fn default_start_command() -> String {
    "java -server -Xms1G -Xmx2G -jar fabric-server-launch.jar nogui".to_string()
}

fn default_handler() -> String {
    "vanilla_handler".to_string()
}

fn default_permission_file() -> PathBuf {
    PathBuf::from("config").join("permission.json")
}

fn default_tick_millis() -> u64 {
    1000
}

fn default_stream_close_ticks() -> u32 {
    60
}

fn default_stop_timeout_ticks() -> u32 {
    360
}

fn default_restart_delay_secs() -> u64 {
    5
}

impl Default for McdrConfig {
    fn default() -> Self {
        Self {
            working_directory: default_working_directory(),
            start_command: default_start_command(),
            handler: default_handler(),
            encoding: None,
            decoding: None,
            permission_file: default_permission_file(),
            tick_millis: default_tick_millis(),
            stream_close_ticks: default_stream_close_ticks(),
            stop_timeout_ticks: default_stop_timeout_ticks(),
            restart_delay_secs: default_restart_delay_secs(),
            debug: false,
        }
    }
}

impl McdrConfig {
    /// 預設設定檔路徑
    pub fn config_path() -> PathBuf {
        PathBuf::from("config").join("mcdr.json")
    }

    /// 從檔案載入，不存在時寫入預設設定
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            info!("已建立預設設定檔: {}", path.display());
            return Ok(config);
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// 儲存設定到檔案
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        ensure_parent_dir(path)?;
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis.max(1))
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }
}

/// 確保父目錄存在
fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
