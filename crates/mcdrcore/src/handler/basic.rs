use super::{HandlerError, ServerHandler};
use crate::record::Record;

/// 保底處理器
///
/// 不做任何格式假設，整行文字就是內容，永遠不會失敗
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicHandler;

impl BasicHandler {
    pub const NAME: &'static str = "basic_handler";
}

impl ServerHandler for BasicHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn parse_server_stdout(&self, text: &str) -> Result<Record, HandlerError> {
        Ok(Record::server(text, Some(text.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_never_fails() {
        let handler = BasicHandler;
        for line in ["", "random text", "[12:00:00] [Server thread/INFO]: Done"] {
            let record = handler.parse_server_stdout(line).unwrap();
            assert!(record.is_from_server());
            assert_eq!(record.content(), Some(line));
            assert_eq!(record.player(), None);
        }
    }

    #[test]
    fn test_basic_has_no_detections() {
        let handler = BasicHandler;
        let record = handler.parse_server_stdout("Steve joined the game").unwrap();
        assert_eq!(handler.parse_player_joined(&record), None);
        assert!(!handler.test_server_startup_done(&record));
    }
}
