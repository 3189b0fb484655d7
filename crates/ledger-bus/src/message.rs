use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// A single unit of delivery from the bus.
///
/// Shape matches the wire layout used by the ingester: `receiptHandle`
/// identifies this specific delivery (not the message itself) and is what
/// [`crate::MessageBus::complete`]/`abandon`/`dead_letter` settle against.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub message_id: String,
    pub body: String,
    pub body_bytes: Vec<u8>,
    pub enqueued_time: DateTime<Utc>,
    pub receipt_handle: String,
    pub delivery_count: u32,
    pub properties: BTreeMap<String, String>,
    pub subscription_name: Option<String>,
}

impl Message {
    /// Convenience constructor for bus implementations and test doubles;
    /// `body_bytes` defaults to the UTF-8 encoding of `body`.
    pub fn new(message_id: impl Into<String>, body: impl Into<String>) -> Self {
        let body = body.into();
        let body_bytes = body.clone().into_bytes();

        Self {
            message_id: message_id.into(),
            body,
            body_bytes,
            enqueued_time: Utc::now(),
            receipt_handle: String::new(),
            delivery_count: 1,
            properties: BTreeMap::new(),
            subscription_name: None,
        }
    }
}
