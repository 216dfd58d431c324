use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

#[cfg(feature = "sqlx")]
use sqlx::FromRow;

/// Storage tier of an album. Upgraded albums get larger quotas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "storage_tier", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    #[default]
    Base,
    Upgraded,
}

impl StorageTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageTier::Base => "base",
            StorageTier::Upgraded => "upgraded",
        }
    }
}

impl Display for StorageTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageTier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "base" => Ok(StorageTier::Base),
            "upgraded" => Ok(StorageTier::Upgraded),
            _ => Err(anyhow::anyhow!("Invalid storage tier: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct Album {
    pub id: i64,
    pub title: String,
    pub tier: StorageTier,
    pub created_at: DateTime<Utc>,
}
