use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::{PermissionError, PermissionLevel};

/// 權限檔內容
#[derive(Debug, Serialize, Deserialize)]
struct PermissionFile {
    #[serde(default = "default_level")]
    default_level: PermissionLevel,
    #[serde(default)]
    owner: Option<Vec<String>>,
    #[serde(default)]
    admin: Option<Vec<String>>,
    #[serde(default)]
    helper: Option<Vec<String>>,
    #[serde(default)]
    user: Option<Vec<String>>,
    #[serde(default)]
    guest: Option<Vec<String>>,
}

fn default_level() -> PermissionLevel {
    PermissionLevel::User
}

/// 玩家權限名單
///
/// 同一名玩家可以同時出現在多個等級中，有效等級取最高者
#[derive(Debug)]
pub struct PermissionStore {
    path: PathBuf,
    default_level: PermissionLevel,
    levels: BTreeMap<PermissionLevel, Vec<String>>,
}

impl PermissionStore {
    /// 建立空的名單（不寫入磁碟）
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            default_level: default_level(),
            levels: PermissionLevel::ALL.into_iter().map(|l| (l, Vec::new())).collect(),
        }
    }

    /// 從檔案載入，檔案不存在時以預設內容建立
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, PermissionError> {
        let mut store = Self::new(path);
        store.reload()?;
        Ok(store)
    }

    /// 重新讀取權限檔
    pub fn reload(&mut self) -> Result<(), PermissionError> {
        if !self.path.exists() {
            info!("權限檔不存在，建立預設檔案: {}", self.path.display());
            *self = Self::new(self.path.clone());
            return self.save();
        }

        let content = fs::read_to_string(&self.path)?;
        let file: PermissionFile = serde_json::from_str(&content)?;
        self.default_level = file.default_level;
        self.levels = [
            (PermissionLevel::Owner, file.owner),
            (PermissionLevel::Admin, file.admin),
            (PermissionLevel::Helper, file.helper),
            (PermissionLevel::User, file.user),
            (PermissionLevel::Guest, file.guest),
        ]
        .into_iter()
        .map(|(level, players)| (level, dedup(players.unwrap_or_default())))
        .collect();
        debug!("已載入權限檔: {}", self.path.display());
        Ok(())
    }

    /// 寫回權限檔
    pub fn save(&self) -> Result<(), PermissionError> {
        ensure_parent_dir(&self.path)?;
        let file = PermissionFile {
            default_level: self.default_level,
            owner: Some(self.members(PermissionLevel::Owner).to_vec()),
            admin: Some(self.members(PermissionLevel::Admin).to_vec()),
            helper: Some(self.members(PermissionLevel::Helper).to_vec()),
            user: Some(self.members(PermissionLevel::User).to_vec()),
            guest: Some(self.members(PermissionLevel::Guest).to_vec()),
        };
        let content = serde_json::to_string_pretty(&file)?;
        fs::write(&self.path, content)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn default_level(&self) -> PermissionLevel {
        self.default_level
    }

    pub fn set_default_level(&mut self, level: PermissionLevel) -> Result<(), PermissionError> {
        self.default_level = level;
        self.save()
    }

    /// 某個等級的玩家名單
    pub fn members(&self, level: PermissionLevel) -> &[String] {
        self.levels.get(&level).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 所有出現在名單中的玩家（不重複）
    pub fn players(&self) -> Vec<&str> {
        let mut players: Vec<&str> = Vec::new();
        for name in self.levels.values().flatten() {
            if !players.contains(&name.as_str()) {
                players.push(name);
            }
        }
        players
    }

    /// 查詢玩家的有效等級（不寫入）
    pub fn level_of(&self, player: &str) -> Option<PermissionLevel> {
        PermissionLevel::ALL
            .into_iter()
            .rev()
            .find(|level| self.members(*level).iter().any(|p| p == player))
    }

    /// 取得玩家的有效等級
    ///
    /// 名單中沒有此玩家時，若 `auto_enroll` 則加入預設等級並寫回，否則回傳 None。
    /// 寫回失敗只記錄錯誤，仍回傳預設等級
    pub fn effective_level(&mut self, player: &str, auto_enroll: bool) -> Option<PermissionLevel> {
        if let Some(level) = self.level_of(player) {
            return Some(level);
        }
        if !auto_enroll {
            return None;
        }

        let level = self.default_level;
        self.insert(player, level);
        info!("新玩家 {} 加入權限等級 {}", player, level);
        if let Err(e) = self.save() {
            error!("寫入權限檔失敗: {}", e);
        }
        Some(level)
    }

    /// 確保玩家在名單中，回傳其有效等級
    pub fn touch_player(&mut self, player: &str) -> PermissionLevel {
        self.effective_level(player, true).unwrap_or(self.default_level)
    }

    /// 將玩家移到指定等級（只保留這一個等級），一次寫回
    pub fn set_level(&mut self, player: &str, level: PermissionLevel) -> Result<(), PermissionError> {
        self.strip(player);
        self.insert(player, level);
        info!("玩家 {} 的權限等級設為 {}", player, level);
        self.save()
    }

    /// 將玩家加入某個等級（不影響其他等級）
    pub fn add_player(&mut self, player: &str, level: PermissionLevel) -> Result<(), PermissionError> {
        self.insert(player, level);
        self.save()
    }

    /// 從所有等級移除玩家，回傳玩家原本是否存在
    pub fn remove_player(&mut self, player: &str) -> Result<bool, PermissionError> {
        let removed = self.strip(player);
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    fn insert(&mut self, player: &str, level: PermissionLevel) {
        let members = self.levels.entry(level).or_default();
        if !members.iter().any(|p| p == player) {
            members.push(player.to_string());
        }
    }

    fn strip(&mut self, player: &str) -> bool {
        let mut removed = false;
        for members in self.levels.values_mut() {
            let before = members.len();
            members.retain(|p| p != player);
            removed |= members.len() != before;
        }
        removed
    }
}

fn dedup(players: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::with_capacity(players.len());
    for player in players {
        if !result.contains(&player) {
            result.push(player);
        }
    }
    result
}

/// 確保父目錄存在
fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
