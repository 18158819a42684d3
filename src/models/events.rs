use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order-lifecycle events published by the order service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OrderEvent {
    #[serde(rename_all = "camelCase")]
    NewOrder { order_id: Uuid },
    #[serde(rename_all = "camelCase")]
    HandOvered { order_id: Uuid },
}

impl OrderEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            OrderEvent::NewOrder { .. } => "newOrder",
            OrderEvent::HandOvered { .. } => "handOvered",
        }
    }

    pub fn order_id(&self) -> Uuid {
        match self {
            OrderEvent::NewOrder { order_id } | OrderEvent::HandOvered { order_id } => *order_id,
        }
    }
}
