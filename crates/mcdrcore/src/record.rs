//! 紀錄（Record）模組
//!
//! 每一行伺服器輸出或控制台輸入都會被分類成一筆 [`Record`]，
//! 在反應器管線處理完畢後即被丟棄

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::SystemTime;

use crate::server::Server;

/// 紀錄來源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordSource {
    /// 控制台輸入
    Console,
    /// 伺服器輸出
    Server,
}

impl fmt::Display for RecordSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordSource::Console => write!(f, "console"),
            RecordSource::Server => write!(f, "server"),
        }
    }
}

/// 一行已分類的文字
pub struct Record {
    id: u64,
    source: RecordSource,
    raw_content: String,
    content: Option<String>,
    player: Option<String>,
    /// `player` 是否為聊天訊息的發言者（而非加入/離開等事件的主角）
    chat: bool,
    logging_level: Option<String>,
    created_at: SystemTime,
    send_to_server: AtomicBool,
    server: OnceLock<Server>,
}

impl Record {
    fn new(source: RecordSource, raw_content: String, content: Option<String>) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
            source,
            raw_content,
            content,
            player: None,
            chat: false,
            logging_level: None,
            created_at: SystemTime::now(),
            send_to_server: AtomicBool::new(true),
            server: OnceLock::new(),
        }
    }

    /// 建立伺服器輸出紀錄
    pub fn server(raw_content: impl Into<String>, content: Option<String>) -> Self {
        Self::new(RecordSource::Server, raw_content.into(), content)
    }

    /// 建立無法分類的伺服器輸出紀錄（`content` 為 None）
    pub fn unclassified(raw_content: impl Into<String>) -> Self {
        Self::new(RecordSource::Server, raw_content.into(), None)
    }

    /// 建立控制台輸入紀錄，內容非空時標記為可轉送至伺服器
    pub fn console(text: impl Into<String>) -> Self {
        let text = text.into();
        let content = Some(text.clone());
        let record = Self::new(RecordSource::Console, text, content);
        if record.raw_content.is_empty() {
            record.cancel_send_to_server();
        }
        record
    }

    /// 設定聊天訊息的發言玩家
    pub fn with_chat_player(mut self, player: impl Into<String>) -> Self {
        self.player = Some(player.into());
        self.chat = true;
        self
    }

    /// 設定此行所描述的玩家（加入、離開等）
    pub fn with_subject_player(mut self, player: impl Into<String>) -> Self {
        self.player = Some(player.into());
        self.chat = false;
        self
    }

    pub fn with_logging_level(mut self, level: impl Into<String>) -> Self {
        self.logging_level = Some(level.into());
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn source(&self) -> RecordSource {
        self.source
    }

    pub fn raw_content(&self) -> &str {
        &self.raw_content
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn player(&self) -> Option<&str> {
        self.player.as_deref()
    }

    pub fn logging_level(&self) -> Option<&str> {
        self.logging_level.as_deref()
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn is_from_console(&self) -> bool {
        self.source == RecordSource::Console
    }

    pub fn is_from_server(&self) -> bool {
        self.source == RecordSource::Server
    }

    /// 是否為玩家的聊天訊息
    pub fn is_player(&self) -> bool {
        self.is_from_server() && self.chat && self.player.is_some()
    }

    /// 是否由真人（控制台操作者或玩家聊天）產生
    pub fn is_user(&self) -> bool {
        self.is_from_console() || self.is_player()
    }

    /// 是否應在管線處理後轉送到伺服器 stdin
    pub fn should_send_to_server(&self) -> bool {
        self.send_to_server.load(Ordering::Acquire)
    }

    /// 取消轉送（例如被插件當作 MCDR 指令處理）
    pub fn cancel_send_to_server(&self) {
        self.send_to_server.store(false, Ordering::Release);
    }

    /// 綁定所屬伺服器，只有第一次呼叫有效
    ///
    /// 回傳是否成功綁定
    pub fn attach_server(&self, server: Server) -> bool {
        self.server.set(server).is_ok()
    }

    pub fn attached_server(&self) -> Option<&Server> {
        self.server.get()
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("raw_content", &self.raw_content)
            .field("content", &self.content)
            .field("player", &self.player)
            .field("chat", &self.chat)
            .field("logging_level", &self.logging_level)
            .field("send_to_server", &self.should_send_to_server())
            .finish_non_exhaustive()
    }
}
