//! 逐行解析
//!
//! 預處理與分類都不會讓整行處理失敗：預處理失敗時沿用原文，
//! 分類失敗時產生無法分類的紀錄

use tracing::{debug, info, warn};

use crate::handler::ServerHandler;
use crate::record::Record;

/// 伺服器輸出解析器
pub struct LogParser;

impl LogParser {
    /// 以指定的處理器解析一行文字
    pub fn parse(handler: &dyn ServerHandler, text: &str) -> Record {
        let normalized = match handler.pre_parse(text) {
            Ok(normalized) => normalized,
            Err(e) => {
                warn!("處理器 {} 預處理失敗，使用原文: {}", handler.name(), e);
                text.to_string()
            }
        };

        match handler.parse_server_stdout(&normalized) {
            Ok(record) => record,
            Err(e) => {
                debug!("{}", e);
                Record::unclassified(text)
            }
        }
    }

    /// 將伺服器輸出回顯到日誌
    pub fn echo(record: &Record) {
        match (record.is_player(), record.player(), record.content()) {
            (true, Some(player), Some(content)) => {
                info!(target: "server", "<{}> {}", player, content)
            }
            _ => info!(target: "server", "{}", record.raw_content()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{BasicHandler, DialectHandler, HandlerError, BUILTIN_DIALECTS};

    struct FlakyHandler;

    impl ServerHandler for FlakyHandler {
        fn name(&self) -> &str {
            "flaky_handler"
        }

        fn pre_parse(&self, _text: &str) -> Result<String, HandlerError> {
            Err(HandlerError::PreParse("bad input".to_string()))
        }

        fn parse_server_stdout(&self, text: &str) -> Result<Record, HandlerError> {
            Ok(Record::server(text, Some(format!("parsed:{}", text))))
        }
    }

    #[test]
    fn test_pre_parse_failure_uses_original() {
        let record = LogParser::parse(&FlakyHandler, "hello");
        assert_eq!(record.content(), Some("parsed:hello"));
    }

    #[test]
    fn test_classification_failure_is_unclassified() {
        let handler = DialectHandler::from_spec(&BUILTIN_DIALECTS[0]).unwrap();
        let record = LogParser::parse(&handler, "Loading libraries, please wait...");
        assert!(record.is_from_server());
        assert_eq!(record.content(), None);
        assert_eq!(record.raw_content(), "Loading libraries, please wait...");
    }

    #[test]
    fn test_basic_handler() {
        let record = LogParser::parse(&BasicHandler, "anything");
        assert_eq!(record.content(), Some("anything"));
    }
}
