use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Every table name that may be chosen by a caller.
const ALLOWED_TABLES: &[&str] = &[
    "Members",
    "Affiliates",
    "Admins",
    "MembersLogSess",
    "AffiliatesLogSess",
    "AdminsLogSess",
    "MembersInfo",
    "AffiliatesInfo",
];

/// Rejects any table name outside the allow-list.
pub fn validate_table(name: &str) -> Result<&'static str> {
    ALLOWED_TABLES
        .iter()
        .copied()
        .find(|allowed| *allowed == name)
        .ok_or_else(|| AppError::InvalidIdentifier(format!("Table not allowed: {}", name)))
}

/// A partition of identity tables sharing one schema shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Realm {
    #[default]
    Members,
    Affiliates,
    Admins,
}

impl Realm {
    pub fn table(&self) -> &'static str {
        match self {
            Realm::Members => "Members",
            Realm::Affiliates => "Affiliates",
            Realm::Admins => "Admins",
        }
    }

    pub fn log_table(&self) -> &'static str {
        match self {
            Realm::Members => "MembersLogSess",
            Realm::Affiliates => "AffiliatesLogSess",
            Realm::Admins => "AdminsLogSess",
        }
    }

    /// Admins carry no info fields.
    pub fn info_table(&self) -> Option<&'static str> {
        match self {
            Realm::Members => Some("MembersInfo"),
            Realm::Affiliates => Some("AffiliatesInfo"),
            Realm::Admins => None,
        }
    }
}

impl FromStr for Realm {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match validate_table(s)? {
            "Members" => Ok(Realm::Members),
            "Affiliates" => Ok(Realm::Affiliates),
            "Admins" => Ok(Realm::Admins),
            other => Err(AppError::InvalidIdentifier(format!("Not a realm table: {}", other))),
        }
    }
}

impl fmt::Display for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}
