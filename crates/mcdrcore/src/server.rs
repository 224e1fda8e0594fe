//! 伺服器操作介面
//!
//! [`Server`] 是可複製的共享句柄，持有設定、處理器、伺服器資訊、權限名單、
//! 事件匯流排與反應器管線，並提供送出指令、查詢狀態等操作。
//! 子行程本身由 [`crate::supervisor::ProcessSupervisor`] 管理

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::command::CommandSource;
use crate::config::McdrConfig;
use crate::encoding::{Codec, CodecError};
use crate::event::EventBus;
use crate::handler::{HandlerError, HandlerRegistry, ServerHandler};
use crate::parser::LogParser;
use crate::permission::{PermissionError, PermissionLevel, PermissionStore};
use crate::reactor::EventPipeline;
use crate::record::Record;
use crate::server_info::ServerInformation;
use crate::supervisor::kill::process_tree;
use crate::text::truncate_for_log;

/// 建立伺服器句柄時的錯誤
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Permission(#[from] PermissionError),
}

/// 子行程狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessState {
    #[default]
    Stopped,
    Running,
    Stopping,
}

struct ServerInner {
    config: McdrConfig,
    codec: Codec,
    handlers: RwLock<HandlerRegistry>,
    information: Mutex<ServerInformation>,
    permissions: Mutex<PermissionStore>,
    bus: EventBus,
    pipeline: EventPipeline,
    stdin: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    state: Mutex<ProcessState>,
    pid: Mutex<Option<u32>>,
    /// 關閉意圖，設定後不再重新啟動
    exiting: AtomicBool,
    /// 本次執行是否已送出停止指令
    stop_sent: AtomicBool,
}

/// 伺服器句柄
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

/// 取得鎖，前一個持有者 panic 時沿用內部資料
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Server {
    /// 依設定建立句柄：載入權限檔、選擇處理器、建立內建反應器
    pub fn new(config: McdrConfig) -> Result<Self, ServerError> {
        let codec = Codec::from_labels(config.encoding.as_deref(), config.decoding.as_deref())?;
        let permissions = PermissionStore::load(config.permission_file.clone())?;
        let mut handlers = HandlerRegistry::new();
        handlers.select(&config.handler);

        Ok(Self {
            inner: Arc::new(ServerInner {
                config,
                codec,
                handlers: RwLock::new(handlers),
                information: Mutex::new(ServerInformation::new()),
                permissions: Mutex::new(permissions),
                bus: EventBus::new(),
                pipeline: EventPipeline::with_stock_reactors(),
                stdin: Mutex::new(None),
                state: Mutex::new(ProcessState::Stopped),
                pid: Mutex::new(None),
                exiting: AtomicBool::new(false),
                stop_sent: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &McdrConfig {
        &self.inner.config
    }

    pub fn codec(&self) -> &Codec {
        &self.inner.codec
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn pipeline(&self) -> &EventPipeline {
        &self.inner.pipeline
    }

    // ========================================================================
    // 處理器
    // ========================================================================

    /// 目前使用中的處理器
    pub fn handler(&self) -> Arc<dyn ServerHandler> {
        match self.inner.handlers.read() {
            Ok(registry) => registry.active(),
            Err(poisoned) => poisoned.into_inner().active(),
        }
    }

    /// 切換處理器，未知名稱時退回保底處理器
    pub fn select_handler(&self, name: &str) -> Arc<dyn ServerHandler> {
        match self.inner.handlers.write() {
            Ok(mut registry) => registry.select(name),
            Err(poisoned) => poisoned.into_inner().select(name),
        }
    }

    /// 註冊自訂處理器，失敗時記錄錯誤並回傳 false
    pub fn register_handler<F>(&self, id: &str, factory: F) -> bool
    where
        F: FnOnce() -> Result<Box<dyn ServerHandler>, HandlerError>,
    {
        match self.inner.handlers.write() {
            Ok(mut registry) => registry.register_custom(id, factory),
            Err(poisoned) => poisoned.into_inner().register_custom(id, factory),
        }
    }

    pub fn handler_names(&self) -> Vec<String> {
        match self.inner.handlers.read() {
            Ok(registry) => registry.names().into_iter().map(str::to_string).collect(),
            Err(poisoned) => poisoned
                .into_inner()
                .names()
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }

    // ========================================================================
    // 行程狀態
    // ========================================================================

    pub fn state(&self) -> ProcessState {
        *lock(&self.inner.state)
    }

    pub(crate) fn set_state(&self, state: ProcessState) {
        let mut current = lock(&self.inner.state);
        if *current != state {
            debug!("行程狀態: {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() != ProcessState::Stopped
    }

    pub fn pid(&self) -> Option<u32> {
        *lock(&self.inner.pid)
    }

    /// 伺服器行程及其所有子孫行程的 pid，根行程在最前面
    pub fn pid_all(&self) -> Vec<u32> {
        self.pid().map(process_tree).unwrap_or_default()
    }

    /// 綁定新啟動的行程
    pub(crate) fn attach_process(&self, pid: Option<u32>, stdin: mpsc::UnboundedSender<Bytes>) {
        *lock(&self.inner.pid) = pid;
        *lock(&self.inner.stdin) = Some(stdin);
        self.inner.stop_sent.store(false, Ordering::Release);
        self.set_state(ProcessState::Running);
    }

    /// 解除行程綁定
    pub(crate) fn detach_process(&self) {
        *lock(&self.inner.stdin) = None;
        *lock(&self.inner.pid) = None;
        self.set_state(ProcessState::Stopped);
    }

    /// 是否已有關閉意圖
    pub fn is_exiting(&self) -> bool {
        self.inner.exiting.load(Ordering::Acquire)
    }

    /// 設定關閉意圖，由監控工作送出停止指令
    ///
    /// 只有第一次呼叫會生效，回傳此次是否為第一次
    pub fn request_shutdown(&self) -> bool {
        let first = !self.inner.exiting.swap(true, Ordering::AcqRel);
        if first {
            info!("收到關閉請求");
            if self.state() == ProcessState::Running {
                self.set_state(ProcessState::Stopping);
            }
        }
        first
    }

    /// 標記本次執行已送出停止指令，回傳先前是否已送出
    pub(crate) fn mark_stop_sent(&self) -> bool {
        self.inner.stop_sent.swap(true, Ordering::AcqRel)
    }

    /// 送出本次執行的停止指令（只送一次）
    pub(crate) fn send_stop_command(&self) {
        if !self.mark_stop_sent() {
            let command = self.handler().stop_command().to_string();
            self.write_line(&command, None);
        }
    }

    // ========================================================================
    // 寫入 stdin
    // ========================================================================

    /// 送出一行文字到伺服器 stdin
    ///
    /// 伺服器未執行時記錄警告並捨棄。`stop` 或處理器的停止指令會設定關閉意圖；
    /// 只有處理器的停止指令算是已送出，否則監控工作仍會補送。回傳是否已排入寫入佇列
    pub fn send(&self, text: &str, encoding: Option<&str>) -> bool {
        let stop_command = self.handler().stop_command().to_string();
        if text == "stop" || text == stop_command {
            self.request_shutdown();
            if text == stop_command {
                self.mark_stop_sent();
            }
        }
        self.write_line(text, encoding)
    }

    fn write_line(&self, text: &str, encoding: Option<&str>) -> bool {
        let mut line = text.to_string();
        line.push('\n');
        match self.inner.codec.encode(&line, encoding) {
            Ok(bytes) => self.write_bytes(Bytes::from(bytes), text),
            Err(e) => {
                warn!("無法編碼指令 {}: {}", truncate_for_log(text, 32), e);
                false
            }
        }
    }

    /// 直接送出位元組（不加換行）
    pub fn send_bytes(&self, bytes: impl Into<Bytes>) -> bool {
        let bytes = bytes.into();
        let preview = String::from_utf8_lossy(&bytes).into_owned();
        self.write_bytes(bytes, &preview)
    }

    fn write_bytes(&self, bytes: Bytes, preview: &str) -> bool {
        let stdin = lock(&self.inner.stdin);
        let queued = match stdin.as_ref() {
            Some(tx) if self.is_running() => tx.send(bytes).is_ok(),
            _ => false,
        };
        if !queued {
            warn!("伺服器未執行，捨棄寫入: {}", truncate_for_log(preview, 32));
        }
        queued
    }

    // ========================================================================
    // 紀錄處理
    // ========================================================================

    /// 讓紀錄通過反應器管線
    pub fn process_record(&self, record: Record) -> Arc<Record> {
        record.attach_server(self.clone());
        let record = Arc::new(record);
        self.inner.pipeline.process(self, &record);
        record
    }

    /// 解析一行伺服器輸出並處理
    pub fn feed_server_line(&self, text: &str) -> Arc<Record> {
        let record = LogParser::parse(self.handler().as_ref(), text);
        LogParser::echo(&record);
        self.process_record(record)
    }

    /// 處理一行控制台輸入，非空的內容在管線處理後轉送到伺服器
    pub fn feed_console_input(&self, line: &str) -> Arc<Record> {
        let record = self.handler().parse_console_command(line);
        self.process_record(record)
    }

    /// 以控制台身分執行指令：先通過管線，再送到伺服器
    pub fn execute(&self, command: &str, encoding: Option<&str>) -> bool {
        let record = Record::console(command);
        record.cancel_send_to_server();
        self.process_record(record);
        self.send(command, encoding)
    }

    // ========================================================================
    // 遊戲內訊息
    // ========================================================================

    /// 對單一玩家發送訊息，處理器不支援時不做任何事
    pub fn tell(&self, player: &str, message: &str, encoding: Option<&str>) {
        let info = self.server_information();
        match self.handler().send_message_command(player, message, &info) {
            Some(command) => {
                self.send(&command, encoding);
            }
            None => debug!("處理器不支援私訊，略過: {}", truncate_for_log(message, 32)),
        }
    }

    /// 對所有玩家發送訊息
    pub fn say(&self, message: &str, encoding: Option<&str>) {
        let info = self.server_information();
        match self.handler().broadcast_message_command(message, &info) {
            Some(command) => {
                self.send(&command, encoding);
            }
            None => debug!("處理器不支援廣播，略過: {}", truncate_for_log(message, 32)),
        }
    }

    /// 廣播訊息並顯示在控制台
    pub fn broadcast(&self, message: &str, encoding: Option<&str>) {
        for line in message.lines() {
            info!(target: "console", "{}", line);
        }
        self.say(message, encoding);
    }

    /// 回覆紀錄的來源：玩家聊天以私訊回覆，其餘顯示在控制台
    pub fn reply(&self, record: &Record, message: &str) {
        match record.player() {
            Some(player) if record.is_player() => self.tell(player, message, None),
            _ => {
                for line in message.lines() {
                    info!(target: "console", "{}", line);
                }
            }
        }
    }

    // ========================================================================
    // 伺服器資訊
    // ========================================================================

    /// 伺服器資訊的副本
    pub fn server_information(&self) -> ServerInformation {
        lock(&self.inner.information).clone()
    }

    pub(crate) fn update_information<F>(&self, f: F)
    where
        F: FnOnce(&mut ServerInformation),
    {
        f(&mut lock(&self.inner.information));
    }

    // ========================================================================
    // 權限
    // ========================================================================

    /// 查詢玩家權限等級，`auto_enroll` 時未知玩家會被加入預設等級
    pub fn permission_level_of(&self, player: &str, auto_enroll: bool) -> Option<PermissionLevel> {
        lock(&self.inner.permissions).effective_level(player, auto_enroll)
    }

    pub(crate) fn touch_player(&self, player: &str) -> PermissionLevel {
        lock(&self.inner.permissions).touch_player(player)
    }

    pub fn set_permission_level(&self, player: &str, level: PermissionLevel) -> Result<(), PermissionError> {
        lock(&self.inner.permissions).set_level(player, level)
    }

    pub fn reload_permissions(&self) -> Result<(), PermissionError> {
        lock(&self.inner.permissions).reload()
    }

    /// 在鎖內操作權限名單
    pub fn with_permissions<R>(&self, f: impl FnOnce(&mut PermissionStore) -> R) -> R {
        f(&mut lock(&self.inner.permissions))
    }

    /// 插件使用的指令來源
    pub fn plugin_command_source(&self, plugin: Option<&str>) -> CommandSource {
        CommandSource::plugin(self, plugin)
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("state", &self.state())
            .field("pid", &self.pid())
            .field("exiting", &self.is_exiting())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::InfoEvent;
    use tempfile::tempdir;

    fn test_server(dir: &std::path::Path) -> Server {
        let config = McdrConfig {
            permission_file: dir.join("permission.json"),
            ..McdrConfig::default()
        };
        Server::new(config).unwrap()
    }

    /// 模擬已啟動的行程，回傳 stdin 的接收端
    fn attach_fake_process(server: &Server) -> mpsc::UnboundedReceiver<Bytes> {
        let (tx, rx) = mpsc::unbounded_channel();
        server.attach_process(Some(4242), tx);
        rx
    }

    #[test]
    fn test_stop_raises_intent_once() {
        let dir = tempdir().unwrap();
        let server = test_server(dir.path());
        assert!(!server.is_exiting());
        server.send("stop", None);
        assert!(server.is_exiting());
        server.send("stop", None);
        server.send("stop", None);
        assert!(server.is_exiting());
        // 已經設定過，不會再次生效
        assert!(!server.request_shutdown());
    }

    #[test]
    fn test_request_shutdown_first_only() {
        let dir = tempdir().unwrap();
        let server = test_server(dir.path());
        assert!(server.request_shutdown());
        assert!(!server.request_shutdown());
    }

    #[test]
    fn test_send_while_stopped_is_dropped() {
        let dir = tempdir().unwrap();
        let server = test_server(dir.path());
        assert_eq!(server.state(), ProcessState::Stopped);
        assert!(!server.send("list", None));
    }

    #[test]
    fn test_send_appends_newline() {
        let dir = tempdir().unwrap();
        let server = test_server(dir.path());
        let mut rx = attach_fake_process(&server);
        assert!(server.send("list", None));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"list\n"));
        assert_eq!(server.pid(), Some(4242));

        server.detach_process();
        assert!(!server.send("list", None));
    }

    #[test]
    fn test_send_stop_marks_stop_sent() {
        let dir = tempdir().unwrap();
        let server = test_server(dir.path());
        let mut rx = attach_fake_process(&server);
        server.send("stop", None);
        // 監控工作不會再送一次
        server.send_stop_command();
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"stop\n"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stop_on_proxy_still_sends_end() {
        let dir = tempdir().unwrap();
        let server = test_server(dir.path());
        server.select_handler("bungeecord_handler");
        let mut rx = attach_fake_process(&server);
        server.feed_console_input("stop");
        assert!(server.is_exiting());
        server.send_stop_command();
        server.send_stop_command();
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"stop\n"));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"end\n"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_console_input_forwarded() {
        let dir = tempdir().unwrap();
        let server = test_server(dir.path());
        let mut rx = attach_fake_process(&server);
        server.feed_console_input("list");
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"list\n"));

        server.feed_console_input("");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_cancel_forwarding() {
        let dir = tempdir().unwrap();
        let server = test_server(dir.path());
        let mut rx = attach_fake_process(&server);
        server.bus().subscribe::<InfoEvent, _>("mcdr_commands", |event| {
            if event.record.content().is_some_and(|c| c.starts_with("!!")) {
                event.record.cancel_send_to_server();
            }
            Ok(())
        });
        server.feed_console_input("!!help");
        assert!(rx.try_recv().is_err());
        server.feed_console_input("list");
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"list\n"));
    }

    #[test]
    fn test_execute_sends_once() {
        let dir = tempdir().unwrap();
        let server = test_server(dir.path());
        let mut rx = attach_fake_process(&server);
        assert!(server.execute("time set day", None));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"time set day\n"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_tell_and_say() {
        let dir = tempdir().unwrap();
        let server = test_server(dir.path());
        let mut rx = attach_fake_process(&server);
        server.tell("Steve", "hi", None);
        assert_eq!(
            rx.try_recv().unwrap(),
            Bytes::from_static(br#"tellraw Steve {"text":"hi"}
"#)
        );
        server.broadcast("hello", None);
        assert_eq!(
            rx.try_recv().unwrap(),
            Bytes::from_static(br#"tellraw @a {"text":"hello"}
"#)
        );
    }

    #[test]
    fn test_tell_unsupported_is_noop() {
        let dir = tempdir().unwrap();
        let server = test_server(dir.path());
        server.select_handler("velocity_handler");
        let mut rx = attach_fake_process(&server);
        server.tell("Steve", "hi", None);
        server.say("hi", None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_reply_to_player_record() {
        let dir = tempdir().unwrap();
        let server = test_server(dir.path());
        let mut rx = attach_fake_process(&server);
        let record = server.feed_server_line("[12:00:00] [Server thread/INFO]: <Steve> !!ping");
        server.reply(&record, "pong");
        assert_eq!(
            rx.try_recv().unwrap(),
            Bytes::from_static(br#"tellraw Steve {"text":"pong"}
"#)
        );
    }

    #[test]
    fn test_select_handler_changes_stop_command() {
        let dir = tempdir().unwrap();
        let server = test_server(dir.path());
        assert_eq!(server.handler().name(), "vanilla_handler");
        server.select_handler("bungeecord_handler");
        assert_eq!(server.handler().stop_command(), "end");
        server.send("end", None);
        assert!(server.is_exiting());
    }

    #[test]
    fn test_unknown_config_handler_falls_back() {
        let dir = tempdir().unwrap();
        let config = McdrConfig {
            permission_file: dir.path().join("permission.json"),
            handler: "missing_handler".to_string(),
            ..McdrConfig::default()
        };
        let server = Server::new(config).unwrap();
        assert_eq!(server.handler().name(), "basic_handler");
        assert!(server.handler_names().contains(&"vanilla_handler".to_string()));
    }

    #[test]
    fn test_record_attached_to_server() {
        let dir = tempdir().unwrap();
        let server = test_server(dir.path());
        let record = server.feed_console_input("");
        assert_eq!(record.attached_server().and_then(Server::pid), None);
        assert!(record.attached_server().is_some());
    }

    #[test]
    fn test_permission_operations() {
        let dir = tempdir().unwrap();
        let server = test_server(dir.path());
        server.set_permission_level("Steve", PermissionLevel::Admin).unwrap();
        assert_eq!(server.permission_level_of("Steve", false), Some(PermissionLevel::Admin));
        server.with_permissions(|store| store.remove_player("Steve")).unwrap();
        server.reload_permissions().unwrap();
        assert_eq!(server.permission_level_of("Steve", false), None);
        assert_eq!(
            server.plugin_command_source(Some("demo")).permission_level(),
            PermissionLevel::Owner
        );
    }
}
