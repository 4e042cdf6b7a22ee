use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum MapperError {
    #[error("hero payload is missing {field}")]
    MissingField { field: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Tank,
    Damage,
    Support,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tank => "tank",
            Self::Damage => "damage",
            Self::Support => "support",
        }
    }
}

impl TryFrom<&str> for Role {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Ok(match value.trim().to_ascii_lowercase().as_str() {
            "tank" => Self::Tank,
            "damage" => Self::Damage,
            "support" => Self::Support,
            _ => return Err(()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbilityType {
    Skill,
    PerkMajor,
    PerkMinor,
}

impl AbilityType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skill => "skill",
            Self::PerkMajor => "perk_major",
            Self::PerkMinor => "perk_minor",
        }
    }

    /// Maps the upstream perk `type` field ("major" / "minor").
    pub fn from_perk_type(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "major" | "perk_major" => Some(Self::PerkMajor),
            "minor" | "perk_minor" => Some(Self::PerkMinor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameMode {
    Competitive,
    Quickplay,
}

impl GameMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Competitive => "competitive",
            Self::Quickplay => "quickplay",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Asia,
    Europe,
    Americas,
}

impl Region {
    pub const ALL: [Region; 3] = [Region::Asia, Region::Europe, Region::Americas];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asia => "asia",
            Self::Europe => "europe",
            Self::Americas => "americas",
        }
    }
}

/// Competitive divisions in rank order, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Division {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
    Master,
    Grandmaster,
}

impl Division {
    pub const ALL: [Division; 7] = [
        Division::Bronze,
        Division::Silver,
        Division::Gold,
        Division::Platinum,
        Division::Diamond,
        Division::Master,
        Division::Grandmaster,
    ];

    /// Stored in place of a division when a task covers every division.
    pub const ALL_LABEL: &'static str = "all";

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
            Self::Platinum => "platinum",
            Self::Diamond => "diamond",
            Self::Master => "master",
            Self::Grandmaster => "grandmaster",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Success,
    Failed,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
