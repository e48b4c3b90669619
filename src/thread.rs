//! The thread capability shared by shipment threads and conversations.
//!
//! Both kinds of thread authorize a principal, append a message and list
//! history. Every mutating call authorizes and validates before it writes.

use crate::auth::Principal;
use crate::error::{Error, Result};
use crate::pagination::Cursored;
use crate::tracking::DeliveryStatus;

/// Longest accepted message body, in characters.
pub const MAX_BODY_CHARS: usize = 2000;

pub trait Thread {
    /// A stored message of this thread kind.
    type Message;
    /// How a caller selects a slice of history.
    type Selector;
    /// What a listing returns.
    type Listing;

    fn id(&self) -> i64;

    /// Fail with `Forbidden` unless the principal may use the thread.
    fn authorize(&self, principal: &Principal) -> Result<()>;

    fn append(&self, principal: &Principal, body: &str) -> Result<Listed<Self::Message>>;

    fn list(&self, principal: &Principal, selector: Self::Selector) -> Result<Self::Listing>;
}

/// A message paired with its status for the viewer.
#[derive(Debug, Clone)]
pub struct Listed<M> {
    pub message: M,
    pub status: DeliveryStatus,
}

impl<M: Cursored> Cursored for Listed<M> {
    fn cursor_id(&self) -> i64 {
        self.message.cursor_id()
    }
}

/// Zip messages with the statuses resolved for them.
pub fn with_statuses<M>(messages: Vec<M>, statuses: Vec<DeliveryStatus>) -> Vec<Listed<M>> {
    messages
        .into_iter()
        .zip(statuses)
        .map(|(message, status)| Listed { message, status })
        .collect()
}

/// Validate a message body: required, not blank, at most [`MAX_BODY_CHARS`].
///
/// The body is stored as sent; only the checks trim.
pub fn validate_body(field: &str, body: &str) -> Result<()> {
    if body.trim().is_empty() {
        return Err(Error::validation(field, format!("The {field} field is required.")));
    }
    if body.chars().count() > MAX_BODY_CHARS {
        return Err(Error::validation(
            field,
            format!("The {field} field must not be greater than {MAX_BODY_CHARS} characters."),
        ));
    }
    Ok(())
}
