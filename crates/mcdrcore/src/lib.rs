//! MCDR Core Library
//!
//! 提供 Minecraft 伺服器守護程式的核心功能：
//! - `supervisor`: 子行程啟動、stdin/stdout 管線、停止與強制終止
//! - `encoding`: 伺服器輸出的解碼與指令編碼
//! - `handler`: 各種伺服器核心的輸出格式解析
//! - `parser`: 逐行預處理與分類
//! - `reactor`: 依序處理每一筆紀錄的反應器管線
//! - `event`: 同步事件匯流排
//! - `permission`: 玩家權限等級與持久化
//! - `command`: 指令來源與回覆
//! - `server`: 供插件與控制台使用的伺服器操作介面

pub mod command;
pub mod config;
pub mod encoding;
pub mod event;
pub mod handler;
pub mod parser;
pub mod permission;
pub mod reactor;
pub mod record;
pub mod server;
pub mod server_info;
pub mod supervisor;
pub mod text;

pub use command::CommandSource;
pub use config::McdrConfig;
pub use encoding::Codec;
pub use event::{EventBus, PublishError};
pub use handler::{HandlerRegistry, ServerHandler};
pub use parser::LogParser;
pub use permission::{PermissionLevel, PermissionStore};
pub use reactor::{EventPipeline, Reactor};
pub use record::{Record, RecordSource};
pub use server::{ProcessState, Server, ServerError};
pub use server_info::ServerInformation;
pub use supervisor::{ProcessKiller, ProcessSupervisor, SupervisorError};
