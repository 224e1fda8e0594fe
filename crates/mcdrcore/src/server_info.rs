//! 伺服器資訊
//!
//! 由反應器從伺服器輸出推斷，每次行程（重新）啟動時清空

use serde::Serialize;

/// 目前伺服器的版本與監聽位址
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerInformation {
    pub version: Option<String>,
    pub ip: Option<String>,
    pub port: Option<u16>,
}

impl ServerInformation {
    pub fn new() -> Self {
        Self::default()
    }

    /// 清空所有欄位
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear() {
        let mut info = ServerInformation {
            version: Some("1.20.1".to_string()),
            ip: Some("0.0.0.0".to_string()),
            port: Some(25565),
        };
        info.clear();
        assert_eq!(info, ServerInformation::new());
    }
}
