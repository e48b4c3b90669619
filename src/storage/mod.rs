//! Persistent storage.
//!
//! A single SQLite database holds users, shipments, both message logs and
//! the read positions. See [`schema`] for the table layout.

mod database;
pub mod schema;

pub use database::{
    ConversationRecord, Database, Folder, MessageRecord, NewShipment, NewUser, ShipmentMessageRecord,
    ShipmentRecord, ShipmentStatus, UserRecord, ADMIN_ROLE_ID,
};
