//! 內建伺服器方言
//!
//! 每種方言以一組正則表達式描述，編譯後成為 [`DialectHandler`]

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::json;

use super::{HandlerError, ServerHandler};
use crate::record::Record;
use crate::server_info::ServerInformation;
use crate::text::{strip_ansi, strip_color_codes};

lazy_static! {
    static ref PLAYER_NAME: Regex = Regex::new(r"^[A-Za-z0-9_]{3,16}$").unwrap();
}

/// 遊戲內訊息指令的風格
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStyle {
    /// `tellraw <target> <json>`
    Tellraw,
    /// `tell <target> <text>` / `say <text>`（beta 1.8 之前沒有 tellraw）
    Legacy,
    /// 只能用 `alert <text>` 廣播（BungeeCord 系列代理）
    Alert,
    /// 不支援
    Unsupported,
}

/// 方言定義
///
/// `line` 必須包含名為 `content` 的擷取群組，可選 `level`；
/// `join`/`left` 需要 `name`；`version` 需要 `version`；`address` 需要 `ip` 與 `port`
#[derive(Debug, Clone, Copy)]
pub struct DialectSpec {
    pub name: &'static str,
    pub line: &'static str,
    pub chat: Option<&'static str>,
    pub join: &'static str,
    pub left: &'static str,
    pub startup: &'static str,
    pub version: &'static str,
    pub address: &'static str,
    pub stopping: Option<&'static str>,
    pub stop_command: &'static str,
    pub message_style: MessageStyle,
    /// 是否移除行首的 `>` 提示字元
    pub strip_prompt: bool,
}

const VANILLA_LINE: &str =
    r"^\[(?P<time>\d{2}:\d{2}:\d{2})\] \[(?P<thread>[^\]]+?)/(?P<level>[A-Z]+)\]: (?P<content>.*)$";
const BUKKIT_LINE: &str = r"^\[(?P<time>\d{2}:\d{2}:\d{2}) (?P<level>[A-Z]+)\]: (?P<content>.*)$";
const CHAT: &str = r"^(?:\[Not Secure\] )?<(?P<name>[^>]+)> (?P<message>.*)$";
const JOINED_THE_GAME: &str = r"^(?P<name>[^\s\[]+) joined the game$";
const LEFT_THE_GAME: &str = r"^(?P<name>[^\s\[]+) left the game$";
const MC_STARTUP: &str = r#"^Done \([0-9.]+s\)! For help, type "help""#;
const MC_VERSION: &str = r"^Starting minecraft server version (?P<version>.+)$";
const MC_ADDRESS: &str = r"^Starting Minecraft server on (?P<ip>\S*):(?P<port>\d+)$";
const MC_STOPPING: &str = r"^Stopping server$";
const PROXY_ADDRESS: &str = r"^Listening on /(?P<ip>[^\s:]+):(?P<port>\d+)$";
const BUNGEE_JOIN: &str = r"^\[(?P<name>[^,\]]+),\s?/[^\]]+\] <-> InitialHandler has connected$";
const BUNGEE_LEFT: &str = r"^\[(?P<name>[^\]/]+)\] -> UpstreamBridge has disconnected$";

const fn minecraft(name: &'static str, line: &'static str) -> DialectSpec {
    DialectSpec {
        name,
        line,
        chat: Some(CHAT),
        join: JOINED_THE_GAME,
        left: LEFT_THE_GAME,
        startup: MC_STARTUP,
        version: MC_VERSION,
        address: MC_ADDRESS,
        stopping: Some(MC_STOPPING),
        stop_command: "stop",
        message_style: MessageStyle::Tellraw,
        strip_prompt: false,
    }
}

pub const VANILLA: DialectSpec = minecraft("vanilla_handler", VANILLA_LINE);

pub const BUKKIT: DialectSpec = minecraft("bukkit_handler", BUKKIT_LINE);

pub const BUKKIT14: DialectSpec = minecraft("bukkit14_handler", BUKKIT_LINE);

pub const FORGE: DialectSpec = minecraft(
    "forge_handler",
    r"^\[(?P<time>\d{2}:\d{2}:\d{2})\] \[(?P<thread>[^\]]+?)/(?P<level>[A-Z]+)\] \[(?P<logger>[^\]]+)\]: (?P<content>.*)$",
);

pub const CAT_SERVER: DialectSpec = minecraft(
    "cat_server_handler",
    r"^\[(?P<time>\d{2}:\d{2}:\d{2}) (?P<level>[A-Z]+)\] \[(?P<logger>[^\]]+)\]: (?P<content>.*)$",
);

pub const BETA18: DialectSpec = DialectSpec {
    name: "beta18_handler",
    line: r"^(?P<date>\d{4}-\d{2}-\d{2}) (?P<time>\d{2}:\d{2}:\d{2}) \[(?P<level>[A-Z]+)\] (?P<content>.*)$",
    join: r"^(?P<name>\S+) \[/[^\]]+\] logged in with entity id \d+",
    left: r"^(?P<name>\S+) lost connection: .*$",
    message_style: MessageStyle::Legacy,
    ..minecraft("beta18_handler", "")
};

pub const BUNGEECORD: DialectSpec = DialectSpec {
    name: "bungeecord_handler",
    line: r"^(?P<time>\d{2}:\d{2}:\d{2}) \[(?P<level>[A-Z]+)\] (?P<content>.*)$",
    chat: None,
    join: BUNGEE_JOIN,
    left: BUNGEE_LEFT,
    startup: r"^Listening on /\S+$",
    version: r"^Enabled BungeeCord version (?P<version>\S+)$",
    address: PROXY_ADDRESS,
    stopping: Some(r"^Closing listener"),
    stop_command: "end",
    message_style: MessageStyle::Alert,
    strip_prompt: true,
};

pub const WATERFALL: DialectSpec = DialectSpec {
    name: "waterfall_handler",
    line: BUKKIT_LINE,
    version: r"^Enabled Waterfall version (?P<version>\S+)$",
    ..BUNGEECORD
};

pub const VELOCITY: DialectSpec = DialectSpec {
    name: "velocity_handler",
    line: BUKKIT_LINE,
    chat: None,
    join: r"^\[connected player\] (?P<name>\S+) \([^)]*\) has connected$",
    left: r"^\[connected player\] (?P<name>\S+) \([^)]*\) has disconnected$",
    startup: r"^Done \([0-9.]+s\)!",
    version: r"^Booting up Velocity (?P<version>\S+)\.\.\.$",
    address: PROXY_ADDRESS,
    stopping: Some(r"^Shutting down the proxy"),
    stop_command: "shutdown",
    message_style: MessageStyle::Unsupported,
    strip_prompt: true,
};

/// 內建方言（依註冊順序）
pub const BUILTIN_DIALECTS: &[DialectSpec] = &[
    VANILLA, BETA18, BUKKIT, BUKKIT14, FORGE, CAT_SERVER, BUNGEECORD, WATERFALL, VELOCITY,
];

/// 以正則表達式描述的伺服器處理器
#[derive(Debug, Clone)]
pub struct DialectHandler {
    name: String,
    stop_command: String,
    message_style: MessageStyle,
    strip_prompt: bool,
    line: Regex,
    chat: Option<Regex>,
    join: Regex,
    left: Regex,
    startup: Regex,
    version: Regex,
    address: Regex,
    stopping: Option<Regex>,
}

impl DialectHandler {
    /// 編譯方言定義
    pub fn from_spec(spec: &DialectSpec) -> Result<Self, HandlerError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|source| HandlerError::InvalidPattern {
                handler: spec.name.to_string(),
                source,
            })
        };

        Ok(Self {
            name: spec.name.to_string(),
            stop_command: spec.stop_command.to_string(),
            message_style: spec.message_style,
            strip_prompt: spec.strip_prompt,
            line: compile(spec.line)?,
            chat: spec.chat.map(compile).transpose()?,
            join: compile(spec.join)?,
            left: compile(spec.left)?,
            startup: compile(spec.startup)?,
            version: compile(spec.version)?,
            address: compile(spec.address)?,
            stopping: spec.stopping.map(compile).transpose()?,
        })
    }

    pub fn message_style(&self) -> MessageStyle {
        self.message_style
    }

    /// 在紀錄內容上套用正則，擷取 `name` 並驗證玩家名稱
    fn capture_player(&self, regex: &Regex, record: &Record) -> Option<String> {
        if record.is_user() {
            return None;
        }
        let content = record.content()?;
        let name = regex.captures(content)?.name("name")?.as_str();
        is_valid_player_name(name).then(|| name.to_string())
    }

    fn detect_chat(&self, content: &str, level: Option<&str>) -> Option<(String, String)> {
        if level.is_some_and(|level| level != "INFO") {
            return None;
        }
        let caps = self.chat.as_ref()?.captures(content)?;
        let name = caps.name("name")?.as_str();
        if !is_valid_player_name(name) {
            return None;
        }
        let message = caps.name("message").map_or("", |m| m.as_str());
        Some((name.to_string(), message.to_string()))
    }

    fn detect_subject(&self, content: &str) -> Option<String> {
        [&self.join, &self.left]
            .into_iter()
            .filter_map(|regex| regex.captures(content))
            .filter_map(|caps| caps.name("name").map(|m| m.as_str().to_string()))
            .find(|name| is_valid_player_name(name))
    }
}

impl ServerHandler for DialectHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn stop_command(&self) -> &str {
        &self.stop_command
    }

    fn send_message_command(
        &self,
        target: &str,
        message: &str,
        _info: &ServerInformation,
    ) -> Option<String> {
        match self.message_style {
            MessageStyle::Tellraw => Some(format!("tellraw {} {}", target, json!({ "text": message }))),
            MessageStyle::Legacy => Some(format!("tell {} {}", target, single_line(message))),
            MessageStyle::Alert | MessageStyle::Unsupported => None,
        }
    }

    fn broadcast_message_command(&self, message: &str, _info: &ServerInformation) -> Option<String> {
        match self.message_style {
            MessageStyle::Tellraw => Some(format!("tellraw @a {}", json!({ "text": message }))),
            MessageStyle::Legacy => Some(format!("say {}", single_line(message))),
            MessageStyle::Alert => Some(format!("alert {}", single_line(message))),
            MessageStyle::Unsupported => None,
        }
    }

    fn pre_parse(&self, text: &str) -> Result<String, HandlerError> {
        let cleaned = strip_color_codes(&strip_ansi(text));
        if self.strip_prompt {
            Ok(cleaned.trim_start_matches(|c: char| c == '>' || c.is_whitespace()).to_string())
        } else {
            Ok(cleaned)
        }
    }

    fn parse_server_stdout(&self, text: &str) -> Result<Record, HandlerError> {
        let caps = self.line.captures(text).ok_or_else(|| HandlerError::Unparseable {
            handler: self.name.clone(),
            text: text.to_string(),
        })?;
        let content = caps.name("content").map_or("", |m| m.as_str());
        let level = caps.name("level").map(|m| m.as_str());

        let record = if let Some((player, message)) = self.detect_chat(content, level) {
            Record::server(text, Some(message)).with_chat_player(player)
        } else if let Some(player) = self.detect_subject(content) {
            Record::server(text, Some(content.to_string())).with_subject_player(player)
        } else {
            Record::server(text, Some(content.to_string()))
        };

        Ok(match level {
            Some(level) => record.with_logging_level(level),
            None => record,
        })
    }

    fn parse_player_joined(&self, record: &Record) -> Option<String> {
        self.capture_player(&self.join, record)
    }

    fn parse_player_left(&self, record: &Record) -> Option<String> {
        self.capture_player(&self.left, record)
    }

    fn parse_server_version(&self, record: &Record) -> Option<String> {
        if record.is_user() {
            return None;
        }
        let caps = self.version.captures(record.content()?)?;
        caps.name("version").map(|m| m.as_str().to_string())
    }

    fn parse_server_address(&self, record: &Record) -> Option<(String, u16)> {
        if record.is_user() {
            return None;
        }
        let caps: Captures<'_> = self.address.captures(record.content()?)?;
        let ip = caps.name("ip").map_or("", |m| m.as_str()).to_string();
        let port = caps.name("port")?.as_str().parse().ok()?;
        Some((ip, port))
    }

    fn test_server_startup_done(&self, record: &Record) -> bool {
        !record.is_user()
            && record
                .content()
                .is_some_and(|content| self.startup.is_match(content))
    }

    fn test_server_stopping(&self, record: &Record) -> bool {
        match (&self.stopping, record.content()) {
            (Some(regex), Some(content)) if !record.is_user() => regex.is_match(content),
            _ => false,
        }
    }
}

/// 驗證 Minecraft 玩家名稱
pub fn is_valid_player_name(name: &str) -> bool {
    PLAYER_NAME.is_match(name)
}

fn single_line(message: &str) -> String {
    message.lines().collect::<Vec<_>>().join(" ")
}
