use serde::{Deserialize, Serialize};

/// Account privilege tier. Variant order is the privilege order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    #[serde(rename = "admin_level_1")]
    AdminLevel1,
    #[serde(rename = "admin_level_2")]
    AdminLevel2,
}

impl Role {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "admin_level_1" => Some(Self::AdminLevel1),
            "admin_level_2" => Some(Self::AdminLevel2),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::AdminLevel1 => "admin_level_1",
            Self::AdminLevel2 => "admin_level_2",
        }
    }

    /// Either admin tier.
    pub fn is_admin(&self) -> bool {
        *self >= Self::AdminLevel1
    }

    pub fn is_top_tier(&self) -> bool {
        *self == Self::AdminLevel2
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db())
    }
}
