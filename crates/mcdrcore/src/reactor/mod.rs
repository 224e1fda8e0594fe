//! 反應器管線
//!
//! 每一筆紀錄依註冊順序交給所有反應器處理。單一反應器失敗或 panic
//! 只會被記錄，不影響後續反應器。全部處理完後，可轉送的控制台紀錄
//! 才會寫入伺服器 stdin

mod general;
mod player;
mod server;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::{debug, error};

use crate::event::panic_message;
use crate::permission::PermissionError;
use crate::record::Record;
use crate::server::Server;

pub use general::GeneralReactor;
pub use player::PlayerReactor;
pub use server::ServerReactor;

/// 反應器錯誤
#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("{0}")]
    Failed(String),

    #[error("反應器 {reactor} panic: {message}")]
    Panicked { reactor: String, message: String },

    #[error("反應器名稱重複: {0}")]
    Registration(String),

    #[error(transparent)]
    Permission(#[from] PermissionError),
}

/// 反應器
pub trait Reactor: Send + Sync {
    fn name(&self) -> &str;

    /// 處理一筆紀錄
    fn react(&self, server: &Server, record: &Arc<Record>) -> Result<(), ReactorError>;

    /// 伺服器行程啟動時呼叫
    fn on_server_start(&self, _server: &Server) {}

    /// 伺服器行程結束時呼叫
    fn on_server_stop(&self, _server: &Server) {}
}

/// 反應器管線
#[derive(Default)]
pub struct EventPipeline {
    reactors: RwLock<Vec<Arc<dyn Reactor>>>,
}

impl EventPipeline {
    /// 空的管線
    pub fn new() -> Self {
        Self::default()
    }

    /// 包含三個內建反應器的管線
    pub fn with_stock_reactors() -> Self {
        let pipeline = Self::new();
        let stock: [Arc<dyn Reactor>; 3] = [
            Arc::new(GeneralReactor),
            Arc::new(ServerReactor),
            Arc::new(PlayerReactor),
        ];
        for reactor in stock {
            if let Err(e) = pipeline.register(reactor) {
                error!("{}", e);
            }
        }
        pipeline
    }

    /// 在管線尾端加入反應器，名稱重複時拒絕
    pub fn register(&self, reactor: Arc<dyn Reactor>) -> Result<(), ReactorError> {
        let mut reactors = match self.reactors.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if reactors.iter().any(|r| r.name() == reactor.name()) {
            return Err(ReactorError::Registration(reactor.name().to_string()));
        }
        debug!("註冊反應器: {}", reactor.name());
        reactors.push(reactor);
        Ok(())
    }

    /// 依順序列出反應器名稱
    pub fn names(&self) -> Vec<String> {
        self.snapshot().iter().map(|r| r.name().to_string()).collect()
    }

    fn snapshot(&self) -> Vec<Arc<dyn Reactor>> {
        match self.reactors.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// 依序處理紀錄，回傳失敗的反應器數量
    pub fn process(&self, server: &Server, record: &Arc<Record>) -> usize {
        let mut failures = 0;
        for reactor in self.snapshot() {
            if let Err(e) = guarded(reactor.as_ref(), || reactor.react(server, record)) {
                failures += 1;
                error!(
                    "反應器 {} 處理紀錄失敗: {} (紀錄: {})",
                    reactor.name(),
                    e,
                    record.raw_content()
                );
            }
        }

        if record.is_from_console() && record.should_send_to_server() {
            if let Some(content) = record.content().filter(|c| !c.is_empty()) {
                server.send(content, None);
            }
        }
        failures
    }

    pub fn on_server_start(&self, server: &Server) {
        for reactor in self.snapshot() {
            let result = guarded(reactor.as_ref(), || {
                reactor.on_server_start(server);
                Ok(())
            });
            if let Err(e) = result {
                error!("{}", e);
            }
        }
    }

    pub fn on_server_stop(&self, server: &Server) {
        for reactor in self.snapshot() {
            let result = guarded(reactor.as_ref(), || {
                reactor.on_server_stop(server);
                Ok(())
            });
            if let Err(e) = result {
                error!("{}", e);
            }
        }
    }
}

/// 執行反應器呼叫並把 panic 轉為錯誤
fn guarded<F>(reactor: &dyn Reactor, f: F) -> Result<(), ReactorError>
where
    F: FnOnce() -> Result<(), ReactorError>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic) => Err(ReactorError::Panicked {
            reactor: reactor.name().to_string(),
            message: panic_message(panic.as_ref()),
        }),
    }
}
