use serde::{Deserialize, Serialize};

use crate::models::Booking;

/// A change pushed by a realtime-capable store, already mapped into the
/// booking model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "record", rename_all = "UPPERCASE")]
pub enum ChangeEvent {
    Insert(Booking),
    Update(Booking),
    Delete {
        id: String,
        #[serde(rename = "userId")]
        user_id: Option<String>,
    },
}

impl ChangeEvent {
    pub fn id(&self) -> &str {
        match self {
            ChangeEvent::Insert(b) | ChangeEvent::Update(b) => &b.id,
            ChangeEvent::Delete { id, .. } => id,
        }
    }

    pub fn owner(&self) -> Option<&str> {
        match self {
            ChangeEvent::Insert(b) | ChangeEvent::Update(b) => b.user_id.as_deref(),
            ChangeEvent::Delete { user_id, .. } => user_id.as_deref(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Insert(_) => "INSERT",
            ChangeEvent::Update(_) => "UPDATE",
            ChangeEvent::Delete { .. } => "DELETE",
        }
    }
}
