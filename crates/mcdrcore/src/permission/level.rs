use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::PermissionError;

/// 權限等級，rank 越大權限越高
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    #[default]
    Guest = 0,
    User = 1,
    Helper = 2,
    Admin = 3,
    Owner = 4,
}

impl PermissionLevel {
    /// 由低到高
    pub const ALL: [PermissionLevel; 5] = [
        PermissionLevel::Guest,
        PermissionLevel::User,
        PermissionLevel::Helper,
        PermissionLevel::Admin,
        PermissionLevel::Owner,
    ];

    pub const MAX: PermissionLevel = PermissionLevel::Owner;

    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            PermissionLevel::Guest => "guest",
            PermissionLevel::User => "user",
            PermissionLevel::Helper => "helper",
            PermissionLevel::Admin => "admin",
            PermissionLevel::Owner => "owner",
        }
    }

    pub fn from_rank(rank: u8) -> Option<Self> {
        Self::ALL.get(usize::from(rank)).copied()
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.rank(), self.name())
    }
}

impl FromStr for PermissionLevel {
    type Err = PermissionError;

    /// 接受名稱（不分大小寫）或 rank 數字
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(rank) = s.parse::<u8>() {
            return Self::from_rank(rank).ok_or_else(|| PermissionError::UnknownLevel(s.to_string()));
        }
        Self::ALL
            .into_iter()
            .find(|level| level.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| PermissionError::UnknownLevel(s.to_string()))
    }
}
