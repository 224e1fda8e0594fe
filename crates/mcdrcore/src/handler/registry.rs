//! 處理器註冊表

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info};

use super::{BasicHandler, DialectHandler, HandlerError, ServerHandler, BUILTIN_DIALECTS};

/// 依名稱管理處理器，並記錄目前使用中的處理器
///
/// 保底的 [`BasicHandler`] 永遠存在，無法被覆蓋
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ServerHandler>>,
    /// 註冊順序
    order: Vec<String>,
    basic: Arc<dyn ServerHandler>,
    active: Arc<dyn ServerHandler>,
}

impl HandlerRegistry {
    /// 建立註冊表，包含保底處理器與所有內建方言
    ///
    /// 使用中的處理器預設為保底處理器
    pub fn new() -> Self {
        let basic: Arc<dyn ServerHandler> = Arc::new(BasicHandler);
        let mut registry = Self {
            handlers: HashMap::new(),
            order: Vec::new(),
            basic: Arc::clone(&basic),
            active: Arc::clone(&basic),
        };
        registry.insert(basic);

        for spec in BUILTIN_DIALECTS {
            match DialectHandler::from_spec(spec) {
                Ok(handler) => {
                    if let Err(e) = registry.register(Arc::new(handler)) {
                        error!("內建處理器註冊失敗: {}", e);
                    }
                }
                Err(e) => error!("內建處理器建立失敗: {}", e),
            }
        }
        registry
    }

    fn insert(&mut self, handler: Arc<dyn ServerHandler>) {
        let name = handler.name().to_string();
        self.order.push(name.clone());
        self.handlers.insert(name, handler);
    }

    /// 註冊處理器，名稱重複時拒絕
    pub fn register(&mut self, handler: Arc<dyn ServerHandler>) -> Result<(), HandlerError> {
        let name = handler.name();
        if self.handlers.contains_key(name) {
            return Err(HandlerError::NameConflict(name.to_string()));
        }
        debug!("註冊處理器: {}", name);
        self.insert(handler);
        Ok(())
    }

    /// 以識別字註冊自訂處理器
    ///
    /// 建構失敗、名稱與識別字不符或名稱重複時記錄錯誤並保留原有註冊，回傳是否成功
    pub fn register_custom<F>(&mut self, id: &str, factory: F) -> bool
    where
        F: FnOnce() -> Result<Box<dyn ServerHandler>, HandlerError>,
    {
        let handler = match factory() {
            Ok(handler) => handler,
            Err(e) => {
                error!("無法建立自訂處理器 {}: {}", id, e);
                return false;
            }
        };
        if handler.name() != id {
            let e = HandlerError::Construction {
                id: id.to_string(),
                reason: format!("處理器名稱為 {}", handler.name()),
            };
            error!("{}", e);
            return false;
        }
        match self.register(Arc::from(handler)) {
            Ok(()) => {
                info!("已註冊自訂處理器: {}", id);
                true
            }
            Err(e) => {
                error!("拒絕自訂處理器 {}: {}", id, e);
                false
            }
        }
    }

    /// 選擇使用中的處理器，未知名稱時退回保底處理器
    pub fn select(&mut self, name: &str) -> Arc<dyn ServerHandler> {
        self.active = match self.handlers.get(name) {
            Some(handler) => Arc::clone(handler),
            None => {
                error!(
                    "找不到處理器 {}，改用 {}",
                    name,
                    BasicHandler::NAME
                );
                Arc::clone(&self.basic)
            }
        };
        info!("使用處理器: {}", self.active.name());
        Arc::clone(&self.active)
    }

    pub fn active(&self) -> Arc<dyn ServerHandler> {
        Arc::clone(&self.active)
    }

    pub fn basic(&self) -> Arc<dyn ServerHandler> {
        Arc::clone(&self.basic)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ServerHandler>> {
        self.handlers.get(name).cloned()
    }

    /// 依註冊順序列出名稱
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;

    struct EchoHandler(&'static str);

    impl ServerHandler for EchoHandler {
        fn name(&self) -> &str {
            self.0
        }

        fn parse_server_stdout(&self, text: &str) -> Result<Record, HandlerError> {
            Ok(Record::server(text, Some(text.to_uppercase())))
        }
    }

    #[test]
    fn test_builtins_registered() {
        let registry = HandlerRegistry::new();
        let names = registry.names();
        assert_eq!(names[0], BasicHandler::NAME);
        assert!(names.contains(&"vanilla_handler"));
        assert!(names.contains(&"velocity_handler"));
        assert_eq!(names.len(), BUILTIN_DIALECTS.len() + 1);
    }

    #[test]
    fn test_default_active_is_basic() {
        let registry = HandlerRegistry::new();
        assert_eq!(registry.active().name(), BasicHandler::NAME);
    }

    #[test]
    fn test_select_known() {
        let mut registry = HandlerRegistry::new();
        let handler = registry.select("bukkit_handler");
        assert_eq!(handler.name(), "bukkit_handler");
        assert_eq!(registry.active().name(), "bukkit_handler");
    }

    #[test]
    fn test_select_unknown_falls_back() {
        let mut registry = HandlerRegistry::new();
        registry.select("vanilla_handler");
        let handler = registry.select("no_such_handler");
        assert_eq!(handler.name(), BasicHandler::NAME);
        assert_eq!(registry.active().name(), BasicHandler::NAME);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = HandlerRegistry::new();
        let result = registry.register(Arc::new(EchoHandler("vanilla_handler")));
        assert!(matches!(result, Err(HandlerError::NameConflict(_))));
        // 原本的註冊仍在
        let record = registry
            .get("vanilla_handler")
            .unwrap()
            .parse_server_stdout("[12:00:00] [Server thread/INFO]: hi")
            .unwrap();
        assert_eq!(record.content(), Some("hi"));
    }

    #[test]
    fn test_register_custom() {
        let mut registry = HandlerRegistry::new();
        assert!(registry.register_custom("echo_handler", || Ok(Box::new(EchoHandler("echo_handler")))));
        assert_eq!(registry.select("echo_handler").name(), "echo_handler");
    }

    #[test]
    fn test_register_custom_failure_keeps_existing() {
        let mut registry = HandlerRegistry::new();
        let before = registry.names().len();
        assert!(!registry.register_custom("broken_handler", || {
            Err(HandlerError::Construction {
                id: "broken_handler".to_string(),
                reason: "boom".to_string(),
            })
        }));
        assert!(!registry.register_custom("basic_handler", || Ok(Box::new(EchoHandler("basic_handler")))));
        assert!(!registry.register_custom("other", || Ok(Box::new(EchoHandler("mismatch")))));
        assert_eq!(registry.names().len(), before);
        assert!(registry.get("broken_handler").is_none());
        assert!(registry.get("mismatch").is_none());
    }
}
