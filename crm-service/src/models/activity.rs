//! Append-only audit log entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    /// `invoice_created` or `invoice_paid`.
    #[serde(rename = "type")]
    pub activity_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub message: String,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
}

impl Activity {
    pub fn new(
        activity_type: &str,
        entity_type: &str,
        entity_id: &str,
        message: String,
        actor: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            activity_type: activity_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            message,
            actor: actor.to_string(),
            timestamp: Utc::now(),
        }
    }
}
