use std::sync::Arc;

use tracing::warn;

use super::{Reactor, ReactorError};
use crate::command::CommandSource;
use crate::event::{InfoEvent, UserInfoEvent};
use crate::record::Record;
use crate::server::Server;

/// 每筆紀錄都發佈 [`InfoEvent`]，真人產生的紀錄另外發佈 [`UserInfoEvent`]
pub struct GeneralReactor;

impl Reactor for GeneralReactor {
    fn name(&self) -> &str {
        "general"
    }

    fn react(&self, server: &Server, record: &Arc<Record>) -> Result<(), ReactorError> {
        let event = InfoEvent {
            server: server.clone(),
            record: Arc::clone(record),
        };
        if let Err(e) = server.bus().publish(&event) {
            warn!("{}", e);
        }

        if let Some(source) = CommandSource::from_record(server, record) {
            let event = UserInfoEvent {
                server: server.clone(),
                record: Arc::clone(record),
                source,
            };
            if let Err(e) = server.bus().publish(&event) {
                warn!("{}", e);
            }
        }
        Ok(())
    }
}
