//! Building (tenant) model.

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// A building is the tenant boundary: every WhatsApp instance, claim and
/// owner belongs to exactly one building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Building {
    pub id: String,
    pub name: String,
}

impl Building {
    /// Builds a tenant reference, rejecting a blank id or name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(Error::Validation("Building id must not be empty".into()));
        }
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(Error::Validation("Building name must not be empty".into()));
        }
        Ok(Self { id, name })
    }

    /// Identifier sent to the messaging provider for this building's instance.
    ///
    /// Format: `"<buildingName> - <buildingId>"`.
    pub fn instance_name(&self) -> String {
        format!("{} - {}", self.name, self.id)
    }
}
