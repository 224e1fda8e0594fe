use std::sync::Arc;

use tracing::{info, warn};

use super::{Reactor, ReactorError};
use crate::event::{PlayerJoinedEvent, PlayerLeftEvent};
use crate::record::Record;
use crate::server::Server;

/// 偵測玩家加入與離開；新玩家加入時登記到預設權限等級
pub struct PlayerReactor;

impl Reactor for PlayerReactor {
    fn name(&self) -> &str {
        "player"
    }

    fn react(&self, server: &Server, record: &Arc<Record>) -> Result<(), ReactorError> {
        if record.is_user() || record.content().is_none() {
            return Ok(());
        }
        let handler = server.handler();

        if let Some(player) = handler.parse_player_joined(record) {
            let level = server.touch_player(&player);
            info!("玩家 {} 加入伺服器，權限等級 {}", player, level);
            let event = PlayerJoinedEvent {
                server: server.clone(),
                record: Arc::clone(record),
                player,
            };
            if let Err(e) = server.bus().publish(&event) {
                warn!("{}", e);
            }
        } else if let Some(player) = handler.parse_player_left(record) {
            info!("玩家 {} 離開伺服器", player);
            let event = PlayerLeftEvent {
                server: server.clone(),
                record: Arc::clone(record),
                player,
            };
            if let Err(e) = server.bus().publish(&event) {
                warn!("{}", e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::McdrConfig;
    use crate::permission::PermissionLevel;
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn vanilla_server(dir: &std::path::Path) -> Server {
        let config = McdrConfig {
            permission_file: dir.join("permission.json"),
            handler: "vanilla_handler".to_string(),
            ..McdrConfig::default()
        };
        Server::new(config).unwrap()
    }

    #[test]
    fn test_join_publishes_and_enrolls() {
        let dir = tempdir().unwrap();
        let server = vanilla_server(dir.path());
        let joined = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&joined);
        server.bus().subscribe::<PlayerJoinedEvent, _>("test", move |event| {
            // 發佈時玩家已被登記
            let level = event.server.permission_level_of(&event.player, false);
            sink.lock().unwrap().push((event.player.clone(), level));
            Ok(())
        });

        assert_eq!(server.permission_level_of("Steve", false), None);
        let record = server.feed_server_line("[12:34:56] [Server thread/INFO]: Steve joined the game");

        assert!(record.is_from_server());
        assert_eq!(record.player(), Some("Steve"));
        assert_eq!(
            *joined.lock().unwrap(),
            vec![("Steve".to_string(), Some(PermissionLevel::User))]
        );
        assert_eq!(server.permission_level_of("Steve", false), Some(PermissionLevel::User));
    }

    #[test]
    fn test_known_player_keeps_level() {
        let dir = tempdir().unwrap();
        let server = vanilla_server(dir.path());
        server.set_permission_level("Steve", PermissionLevel::Admin).unwrap();
        server.feed_server_line("[12:34:56] [Server thread/INFO]: Steve joined the game");
        assert_eq!(server.permission_level_of("Steve", false), Some(PermissionLevel::Admin));
    }

    #[test]
    fn test_left_publishes() {
        let dir = tempdir().unwrap();
        let server = vanilla_server(dir.path());
        let left = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&left);
        server.bus().subscribe::<PlayerLeftEvent, _>("test", move |event| {
            sink.lock().unwrap().push(event.player.clone());
            Ok(())
        });
        server.feed_server_line("[12:40:00] [Server thread/INFO]: Alex left the game");
        assert_eq!(*left.lock().unwrap(), vec!["Alex".to_string()]);
        // 離開不會登記權限
        assert_eq!(server.permission_level_of("Alex", false), None);
    }

    #[test]
    fn test_chat_is_not_join() {
        let dir = tempdir().unwrap();
        let server = vanilla_server(dir.path());
        let joined = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&joined);
        server.bus().subscribe::<PlayerJoinedEvent, _>("test", move |_| {
            *sink.lock().unwrap() += 1;
            Ok(())
        });
        server.feed_server_line("[12:00:00] [Server thread/INFO]: <Steve> Alex joined the game");
        assert_eq!(*joined.lock().unwrap(), 0);
    }
}
