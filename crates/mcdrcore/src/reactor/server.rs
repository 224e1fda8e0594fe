use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{Reactor, ReactorError};
use crate::event::ServerLaunchedEvent;
use crate::record::Record;
use crate::server::{ProcessState, Server};

/// 追蹤伺服器生命週期：啟動完成、版本、監聽位址、正在關閉
pub struct ServerReactor;

impl Reactor for ServerReactor {
    fn name(&self) -> &str {
        "server"
    }

    fn react(&self, server: &Server, record: &Arc<Record>) -> Result<(), ReactorError> {
        if record.is_user() || record.content().is_none() {
            return Ok(());
        }
        let handler = server.handler();

        if let Some(version) = handler.parse_server_version(record) {
            info!("伺服器版本: {}", version);
            server.update_information(|info| info.version = Some(version));
        }

        if let Some((ip, port)) = handler.parse_server_address(record) {
            info!("伺服器位址: {}:{}", ip, port);
            server.update_information(|info| {
                info.ip = Some(ip);
                info.port = Some(port);
            });
        }

        if handler.test_server_startup_done(record) {
            info!("伺服器啟動完成");
            let event = ServerLaunchedEvent {
                server: server.clone(),
                record: Arc::clone(record),
            };
            if let Err(e) = server.bus().publish(&event) {
                warn!("{}", e);
            }
        }

        if handler.test_server_stopping(record) {
            debug!("伺服器正在關閉");
            server.set_state(ProcessState::Stopping);
        }
        Ok(())
    }

    fn on_server_start(&self, server: &Server) {
        server.update_information(|info| info.clear());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::McdrConfig;
    use tempfile::tempdir;

    #[test]
    fn test_updates_information() {
        let dir = tempdir().unwrap();
        let config = McdrConfig {
            permission_file: dir.path().join("permission.json"),
            ..McdrConfig::default()
        };
        let server = Server::new(config).unwrap();

        server.feed_server_line("[12:00:00] [Server thread/INFO]: Starting minecraft server version 1.20.1");
        server.feed_server_line("[12:00:00] [Server thread/INFO]: Starting Minecraft server on 0.0.0.0:25565");
        let info = server.server_information();
        assert_eq!(info.version.as_deref(), Some("1.20.1"));
        assert_eq!(info.ip.as_deref(), Some("0.0.0.0"));
        assert_eq!(info.port, Some(25565));

        ServerReactor.on_server_start(&server);
        assert_eq!(server.server_information(), Default::default());
    }

    #[test]
    fn test_chat_does_not_update_information() {
        let dir = tempdir().unwrap();
        let config = McdrConfig {
            permission_file: dir.path().join("permission.json"),
            ..McdrConfig::default()
        };
        let server = Server::new(config).unwrap();
        server.feed_server_line(
            "[12:00:00] [Server thread/INFO]: <Steve> Starting minecraft server version 9.9",
        );
        assert_eq!(server.server_information().version, None);
    }
}
