//! 伺服器處理器模組
//!
//! 每種伺服器核心（原版、Bukkit、Forge、BungeeCord…）的輸出格式與控制指令不同，
//! 由 [`ServerHandler`] 負責把一行文字分類成 [`Record`]，並提供加入、離開、
//! 啟動完成等子偵測。子偵測由反應器按需呼叫，不會在分類時一次算完

mod basic;
mod dialect;
pub mod registry;

use thiserror::Error;

use crate::record::Record;
use crate::server_info::ServerInformation;

pub use basic::BasicHandler;
pub use dialect::{DialectHandler, DialectSpec, MessageStyle, BUILTIN_DIALECTS};
pub use registry::HandlerRegistry;

/// 處理器錯誤
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("處理器 {handler} 無法解析: {text}")]
    Unparseable { handler: String, text: String },

    #[error("處理器 {handler} 的正則表達式無效: {source}")]
    InvalidPattern {
        handler: String,
        #[source]
        source: regex::Error,
    },

    #[error("預處理失敗: {0}")]
    PreParse(String),

    #[error("處理器名稱重複: {0}")]
    NameConflict(String),

    #[error("無法建立處理器 {id}: {reason}")]
    Construction { id: String, reason: String },
}

/// 伺服器輸出處理器
pub trait ServerHandler: Send + Sync {
    /// 處理器名稱，同時作為設定檔中的識別字
    fn name(&self) -> &str;

    /// 關閉伺服器的指令
    fn stop_command(&self) -> &str {
        "stop"
    }

    /// 對單一玩家發送訊息的指令，不支援時回傳 None
    fn send_message_command(
        &self,
        _target: &str,
        _message: &str,
        _info: &ServerInformation,
    ) -> Option<String> {
        None
    }

    /// 對所有玩家廣播訊息的指令，不支援時回傳 None
    fn broadcast_message_command(&self, _message: &str, _info: &ServerInformation) -> Option<String> {
        None
    }

    /// 解析前的文字正規化
    fn pre_parse(&self, text: &str) -> Result<String, HandlerError> {
        Ok(text.to_string())
    }

    /// 將一行伺服器輸出分類為紀錄
    fn parse_server_stdout(&self, text: &str) -> Result<Record, HandlerError>;

    /// 將一行控制台輸入轉為紀錄
    fn parse_console_command(&self, text: &str) -> Record {
        Record::console(text)
    }

    /// 偵測玩家加入，回傳玩家名稱
    fn parse_player_joined(&self, _record: &Record) -> Option<String> {
        None
    }

    /// 偵測玩家離開，回傳玩家名稱
    fn parse_player_left(&self, _record: &Record) -> Option<String> {
        None
    }

    /// 偵測伺服器版本
    fn parse_server_version(&self, _record: &Record) -> Option<String> {
        None
    }

    /// 偵測伺服器監聽位址 (ip, port)
    fn parse_server_address(&self, _record: &Record) -> Option<(String, u16)> {
        None
    }

    /// 伺服器是否已啟動完成
    fn test_server_startup_done(&self, _record: &Record) -> bool {
        false
    }

    /// 伺服器是否正在關閉（同一次執行中可能出現多次）
    fn test_server_stopping(&self, _record: &Record) -> bool {
        false
    }
}
