//! Read tracking and delivery status.
//!
//! Two read models sit behind [`ReadTracker`]:
//!
//! - [`WatermarkTracker`]: shipment threads keep one high-water-mark per
//!   (shipment, user). A message is `seen` by a viewer who did not send it
//!   once the viewer's mark reaches its id, and `delivered` otherwise.
//! - [`FlagTracker`]: conversation messages carry their own `delivered_at`
//!   and `read_at` stamps. Status is `read`, then `delivered`, then `sent`.
//!
//! Conversation delivery is inferred on view. Listings that return messages
//! addressed to the viewer call [`FlagTracker::mark_delivered_on_view`]
//! before statuses are resolved.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::storage::{Database, MessageRecord, ShipmentMessageRecord};

/// Display status of a message for one viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
    Seen,
}

impl DeliveryStatus {
    /// Conversation rule: `read_at` wins over `delivered_at`.
    pub fn from_flags(read_at: Option<i64>, delivered_at: Option<i64>) -> Self {
        match (read_at, delivered_at) {
            (Some(_), _) => DeliveryStatus::Read,
            (None, Some(_)) => DeliveryStatus::Delivered,
            (None, None) => DeliveryStatus::Sent,
        }
    }

    /// Shipment rule: there is no `sent` state, delivery is immediate.
    pub fn from_watermark(sender_id: i64, message_id: i64, viewer_id: i64, watermark: i64) -> Self {
        if sender_id != viewer_id && watermark >= message_id {
            DeliveryStatus::Seen
        } else {
            DeliveryStatus::Delivered
        }
    }
}

/// One read model.
pub trait ReadTracker {
    type Message;

    /// Record that `user_id` has read `message_id` in the thread.
    ///
    /// Returns the read mark now stored: the watermark for shipment threads,
    /// the `read_at` stamp for conversation messages.
    fn mark_read(&self, thread_id: i64, user_id: i64, message_id: i64) -> Result<i64>;

    /// Statuses of `messages` as `viewer_id` sees them, in the same order.
    fn resolve(
        &self,
        thread_id: i64,
        viewer_id: i64,
        messages: &[Self::Message],
    ) -> Result<Vec<DeliveryStatus>>;
}

// ── Watermark Model ───────────────────────────────────────────────────────────

/// Per-(shipment, user) high-water-mark.
#[derive(Clone)]
pub struct WatermarkTracker {
    db: Database,
}

impl WatermarkTracker {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// The viewer's current mark, 0 when nothing was read yet.
    pub fn position(&self, shipment_id: i64, user_id: i64) -> Result<i64> {
        self.db.read_position(shipment_id, user_id)
    }
}

impl ReadTracker for WatermarkTracker {
    type Message = ShipmentMessageRecord;

    fn mark_read(&self, shipment_id: i64, user_id: i64, message_id: i64) -> Result<i64> {
        if message_id < 1 {
            return Err(Error::validation("last_read_id", "must be a positive message id"));
        }
        if !self.db.shipment_message_in_thread(shipment_id, message_id)? {
            return Err(Error::InvalidReference {
                field: "last_read_id".to_string(),
                message: "The last_read_id must belong to this shipment.".to_string(),
            });
        }

        let stored = self.db.advance_read_position(shipment_id, user_id, message_id)?;
        tracing::debug!(
            shipment_id = shipment_id,
            user_id = user_id,
            proposed = message_id,
            stored = stored,
            "Read position advanced"
        );
        Ok(stored)
    }

    fn resolve(
        &self,
        shipment_id: i64,
        viewer_id: i64,
        messages: &[ShipmentMessageRecord],
    ) -> Result<Vec<DeliveryStatus>> {
        let watermark = self.position(shipment_id, viewer_id)?;
        Ok(messages
            .iter()
            .map(|m| DeliveryStatus::from_watermark(m.sender_id, m.id, viewer_id, watermark))
            .collect())
    }
}

// ── Flag Model ────────────────────────────────────────────────────────────────

/// Per-message `delivered_at` / `read_at` stamps.
#[derive(Clone)]
pub struct FlagTracker {
    db: Database,
}

impl FlagTracker {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Stamp `delivered_at` on every listed message the viewer did not send.
    ///
    /// Records in `messages` are patched in place so the caller resolves
    /// statuses against what is now stored.
    pub fn mark_delivered_on_view(&self, viewer_id: i64, messages: &mut [MessageRecord]) -> Result<()> {
        let pending: Vec<i64> = messages
            .iter()
            .filter(|m| m.user_id != viewer_id && m.delivered_at.is_none())
            .map(|m| m.id)
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let stamped_at = self.db.mark_delivered(viewer_id, &pending)?;
        for message in messages.iter_mut().filter(|m| pending.contains(&m.id)) {
            message.delivered_at = Some(stamped_at);
            message.updated_at = stamped_at;
        }
        Ok(())
    }
}

impl ReadTracker for FlagTracker {
    type Message = MessageRecord;

    fn mark_read(&self, conversation_id: i64, user_id: i64, message_id: i64) -> Result<i64> {
        let message = self
            .db
            .get_message(message_id)?
            .filter(|m| m.conversation_id == conversation_id)
            .ok_or(Error::MessageNotFound)?;

        if !self.db.is_participant(conversation_id, user_id)? {
            return Err(Error::Forbidden("not a participant of this conversation".into()));
        }
        if message.user_id == user_id {
            return Err(Error::Forbidden("cannot mark your own message as read".into()));
        }

        let updated = self.db.mark_message_read(message_id)?;
        tracing::debug!(message_id = message_id, user_id = user_id, "Message marked read");
        updated
            .read_at
            .ok_or_else(|| Error::Internal("read_at missing after update".into()))
    }

    fn resolve(
        &self,
        _conversation_id: i64,
        _viewer_id: i64,
        messages: &[MessageRecord],
    ) -> Result<Vec<DeliveryStatus>> {
        Ok(messages
            .iter()
            .map(|m| DeliveryStatus::from_flags(m.read_at, m.delivered_at))
            .collect())
    }
}
