//! 指令來源
//!
//! 代表是誰下達了指令，以及如何回覆對方

use std::sync::Arc;

use tracing::info;

use crate::permission::PermissionLevel;
use crate::record::Record;
use crate::server::Server;

/// 指令來源
#[derive(Debug, Clone)]
pub enum CommandSource {
    /// 控制台操作者
    Console {
        server: Server,
        record: Option<Arc<Record>>,
    },
    /// 遊戲內玩家
    Player {
        server: Server,
        record: Arc<Record>,
        player: String,
    },
    /// 插件自行發出，`plugin` 僅供診斷
    Plugin {
        server: Server,
        plugin: Option<String>,
    },
}

impl CommandSource {
    /// 由紀錄推斷來源，非真人產生的紀錄回傳 None
    pub fn from_record(server: &Server, record: &Arc<Record>) -> Option<Self> {
        if record.is_from_console() {
            return Some(CommandSource::Console {
                server: server.clone(),
                record: Some(Arc::clone(record)),
            });
        }
        match record.player() {
            Some(player) if record.is_player() => Some(CommandSource::Player {
                server: server.clone(),
                record: Arc::clone(record),
                player: player.to_string(),
            }),
            _ => None,
        }
    }

    pub fn console(server: &Server) -> Self {
        CommandSource::Console {
            server: server.clone(),
            record: None,
        }
    }

    pub fn plugin(server: &Server, plugin: Option<&str>) -> Self {
        CommandSource::Plugin {
            server: server.clone(),
            plugin: plugin.map(str::to_string),
        }
    }

    pub fn server(&self) -> &Server {
        match self {
            CommandSource::Console { server, .. }
            | CommandSource::Player { server, .. }
            | CommandSource::Plugin { server, .. } => server,
        }
    }

    pub fn player(&self) -> Option<&str> {
        match self {
            CommandSource::Player { player, .. } => Some(player.as_str()),
            _ => None,
        }
    }

    pub fn is_console(&self) -> bool {
        matches!(self, CommandSource::Console { .. })
    }

    pub fn is_player(&self) -> bool {
        matches!(self, CommandSource::Player { .. })
    }

    /// 權限等級
    ///
    /// 控制台與插件永遠是最高等級；玩家查詢權限名單，未知玩家會被加入預設等級
    pub fn permission_level(&self) -> PermissionLevel {
        match self {
            CommandSource::Console { .. } | CommandSource::Plugin { .. } => PermissionLevel::MAX,
            CommandSource::Player { server, player, .. } => server
                .permission_level_of(player, true)
                .unwrap_or_default(),
        }
    }

    pub fn permission_rank(&self) -> u8 {
        self.permission_level().rank()
    }

    pub fn has_permission(&self, level: PermissionLevel) -> bool {
        self.permission_level() >= level
    }

    /// 回覆訊息
    pub fn reply(&self, message: &str) {
        self.reply_with(message, None, None);
    }

    /// 回覆訊息
    ///
    /// `console_text` 會取代控制台上顯示的文字；`encoding` 只影響送往伺服器的玩家訊息
    pub fn reply_with(&self, message: &str, console_text: Option<&str>, encoding: Option<&str>) {
        match self {
            CommandSource::Console { .. } => {
                for line in console_text.unwrap_or(message).lines() {
                    info!(target: "console", "{}", line);
                }
            }
            CommandSource::Player { server, player, .. } => {
                server.tell(player, message, encoding);
            }
            CommandSource::Plugin { plugin, .. } => {
                info!(
                    target: "console",
                    "[{}] {}",
                    plugin.as_deref().unwrap_or("plugin"),
                    console_text.unwrap_or(message)
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::McdrConfig;
    use tempfile::tempdir;

    fn test_server(dir: &std::path::Path) -> Server {
        let config = McdrConfig {
            permission_file: dir.join("permission.json"),
            ..McdrConfig::default()
        };
        Server::new(config).unwrap()
    }

    #[test]
    fn test_console_and_plugin_are_max() {
        let dir = tempdir().unwrap();
        let server = test_server(dir.path());
        assert_eq!(CommandSource::console(&server).permission_level(), PermissionLevel::Owner);
        let plugin = CommandSource::plugin(&server, Some("demo"));
        assert_eq!(plugin.permission_rank(), 4);
        assert!(plugin.has_permission(PermissionLevel::Owner));
    }

    #[test]
    fn test_player_uses_store() {
        let dir = tempdir().unwrap();
        let server = test_server(dir.path());
        server
            .set_permission_level("Steve", PermissionLevel::Helper)
            .unwrap();
        let record = Arc::new(Record::server("<Steve> hi", Some("hi".to_string())).with_chat_player("Steve"));
        let source = CommandSource::from_record(&server, &record).unwrap();
        assert!(source.is_player());
        assert_eq!(source.player(), Some("Steve"));
        assert_eq!(source.permission_level(), PermissionLevel::Helper);
        assert!(source.has_permission(PermissionLevel::User));
        assert!(!source.has_permission(PermissionLevel::Admin));
    }

    #[test]
    fn test_unknown_player_is_enrolled() {
        let dir = tempdir().unwrap();
        let server = test_server(dir.path());
        let record = Arc::new(Record::server("<Alex> hi", Some("hi".to_string())).with_chat_player("Alex"));
        let source = CommandSource::from_record(&server, &record).unwrap();
        assert_eq!(source.permission_level(), PermissionLevel::User);
        assert_eq!(server.permission_level_of("Alex", false), Some(PermissionLevel::User));
    }

    #[test]
    fn test_from_record() {
        let dir = tempdir().unwrap();
        let server = test_server(dir.path());
        let console = Arc::new(Record::console("help"));
        assert!(CommandSource::from_record(&server, &console).unwrap().is_console());

        let join = Arc::new(
            Record::server("Steve joined the game", Some("Steve joined the game".to_string()))
                .with_subject_player("Steve"),
        );
        assert!(CommandSource::from_record(&server, &join).is_none());
    }

    #[test]
    fn test_player_reply_without_process_is_dropped() {
        let dir = tempdir().unwrap();
        let server = test_server(dir.path());
        let record = Arc::new(Record::server("<Steve> hi", Some("hi".to_string())).with_chat_player("Steve"));
        let source = CommandSource::from_record(&server, &record).unwrap();
        // 伺服器未執行：只記錄警告
        source.reply("hello");
        source.reply_with("hello", Some("console text"), Some("utf-8"));
    }
}
