//! 同步事件匯流排
//!
//! 每種事件是一個具體型別，訂閱者依型別訂閱並從欄位取得需要的資料。
//! 發佈時依訂閱順序呼叫；單一訂閱者失敗（含 panic）不影響其他訂閱者，
//! 失敗會彙整後回傳給發佈者，由呼叫端決定如何記錄

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::command::CommandSource;
use crate::record::Record;
use crate::server::Server;

/// 訂閱者回傳值
pub type SubscriberResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Callback = Arc<dyn Fn(&dyn Any) -> SubscriberResult + Send + Sync>;

/// 可發佈的事件
pub trait Event: Any + Send + Sync {
    const NAME: &'static str;
}

/// 收到任何一行文字（伺服器輸出或控制台輸入）
#[derive(Clone)]
pub struct InfoEvent {
    pub server: Server,
    pub record: Arc<Record>,
}

/// 收到由真人產生的文字（控制台輸入或玩家聊天）
#[derive(Clone)]
pub struct UserInfoEvent {
    pub server: Server,
    pub record: Arc<Record>,
    pub source: CommandSource,
}

/// 玩家加入
#[derive(Clone)]
pub struct PlayerJoinedEvent {
    pub server: Server,
    pub record: Arc<Record>,
    pub player: String,
}

/// 玩家離開
#[derive(Clone)]
pub struct PlayerLeftEvent {
    pub server: Server,
    pub record: Arc<Record>,
    pub player: String,
}

/// 伺服器行程已啟動，正在載入
#[derive(Clone)]
pub struct ServerLaunchingEvent {
    pub server: Server,
    pub pid: Option<u32>,
}

/// 伺服器啟動完成
#[derive(Clone)]
pub struct ServerLaunchedEvent {
    pub server: Server,
    pub record: Arc<Record>,
}

/// 伺服器行程已結束
#[derive(Clone)]
pub struct ServerShutdownEvent {
    pub server: Server,
    /// 是否由關閉意圖觸發（否則為非預期結束）
    pub requested: bool,
    /// 被訊號終止時為 None
    pub exit_code: Option<i32>,
}

impl Event for InfoEvent {
    const NAME: &'static str = "info";
}

impl Event for UserInfoEvent {
    const NAME: &'static str = "user_info";
}

impl Event for PlayerJoinedEvent {
    const NAME: &'static str = "player_joined";
}

impl Event for PlayerLeftEvent {
    const NAME: &'static str = "player_left";
}

impl Event for ServerLaunchingEvent {
    const NAME: &'static str = "server_launching";
}

impl Event for ServerLaunchedEvent {
    const NAME: &'static str = "server_launched";
}

impl Event for ServerShutdownEvent {
    const NAME: &'static str = "server_shutdown";
}

/// 訂閱識別碼，用於取消訂閱
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    name: String,
    callback: Callback,
}

/// 單一訂閱者的失敗
#[derive(Debug, Clone)]
pub struct SubscriberFailure {
    pub subscriber: String,
    pub message: String,
}

/// 發佈時有訂閱者失敗
#[derive(Debug)]
pub struct PublishError {
    pub event: &'static str,
    pub failures: Vec<SubscriberFailure>,
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "事件 {} 有 {} 個訂閱者失敗", self.event, self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.subscriber, failure.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for PublishError {}

/// 事件匯流排
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<TypeId, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 訂閱某種事件
    pub fn subscribe<E, F>(&self, name: impl Into<String>, callback: F) -> SubscriptionId
    where
        E: Event,
        F: Fn(&E) -> SubscriberResult + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = name.into();
        debug!("訂閱事件 {}: {}", E::NAME, name);

        let callback: Callback = Arc::new(move |event: &dyn Any| match event.downcast_ref::<E>() {
            Some(event) => callback(event),
            None => Ok(()),
        });

        let mut subscribers = match self.subscribers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers
            .entry(TypeId::of::<E>())
            .or_default()
            .push(Subscriber { id, name, callback });
        id
    }

    /// 取消訂閱，回傳是否找到
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = match self.subscribers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for list in subscribers.values_mut() {
            if let Some(pos) = list.iter().position(|s| s.id == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// 某種事件的訂閱者數量
    pub fn subscriber_count<E: Event>(&self) -> usize {
        self.snapshot(TypeId::of::<E>()).len()
    }

    /// 發佈事件
    ///
    /// 訂閱者在鎖外呼叫，因此可以在回呼中再訂閱或發佈
    pub fn publish<E: Event>(&self, event: &E) -> Result<(), PublishError> {
        let mut failures = Vec::new();

        for (name, callback) in self.snapshot(TypeId::of::<E>()) {
            let result = catch_unwind(AssertUnwindSafe(|| callback(event as &dyn Any)));
            let message = match result {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => format!("panic: {}", panic_message(panic.as_ref())),
            };
            failures.push(SubscriberFailure {
                subscriber: name,
                message,
            });
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PublishError {
                event: E::NAME,
                failures,
            })
        }
    }

    fn snapshot(&self, type_id: TypeId) -> Vec<(String, Callback)> {
        let subscribers = match self.subscribers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers
            .get(&type_id)
            .map(|list| {
                list.iter()
                    .map(|s| (s.name.clone(), Arc::clone(&s.callback)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// 從 panic payload 取出訊息
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown".to_string()
    }
}
