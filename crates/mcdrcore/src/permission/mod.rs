//! 玩家權限
//!
//! 五個固定等級，玩家名單持久化為 JSON 檔案，每次變更後立即寫回

mod level;
mod store;

use std::io;

use thiserror::Error;

pub use level::PermissionLevel;
pub use store::PermissionStore;

/// 權限錯誤
#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("權限檔讀寫失敗: {0}")]
    Io(#[from] io::Error),

    #[error("權限檔格式錯誤: {0}")]
    Json(#[from] serde_json::Error),

    #[error("未知的權限等級: {0}")]
    UnknownLevel(String),
}
