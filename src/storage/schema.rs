//! # Database Schema
//!
//! SQL schema definitions for the shipdesk database.
//!
//! ## Schema Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         DATABASE SCHEMA                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐    ┌──────────────────┐    ┌──────────────────────┐│
//! │  │    shipments    │    │shipment_messages │    │shipment_message_reads││
//! │  ├─────────────────┤    ├──────────────────┤    ├──────────────────────┤│
//! │  │ id              │◄───│ shipment_id      │    │ shipment_id          ││
//! │  │ pic_user_id     │    │ sender_id        │    │ user_id              ││
//! │  │ approved_by_... │    │ text             │    │ last_read_id (max)   ││
//! │  │ status          │    │ created_at       │    │ UNIQUE(shipment,user)││
//! │  └─────────────────┘    └──────────────────┘    └──────────────────────┘│
//! │                                                                         │
//! │  ┌─────────────────┐    ┌──────────────────┐    ┌──────────────────────┐│
//! │  │  conversations  │    │conversation_user │    │      messages        ││
//! │  ├─────────────────┤    ├──────────────────┤    ├──────────────────────┤│
//! │  │ id              │◄───│ conversation_id  │    │ conversation_id      ││
//! │  │ name            │    │ user_id          │    │ user_id (sender)     ││
//! │  │ is_group        │    └──────────────────┘    │ body                 ││
//! │  │ direct_key      │                            │ read_at              ││
//! │  │ created_by      │                            │ delivered_at         ││
//! │  └─────────────────┘                            │ updated_at           ││
//! │                                                 └──────────────────────┘│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All timestamps are Unix milliseconds.

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL to create all tables
pub const CREATE_TABLES: &str = r#"
PRAGMA foreign_keys = ON;

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- Users table
-- Owned by the back office; the messaging core only reads names and roles
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    first_name TEXT,
    last_name TEXT,
    -- Blob-store path of the profile picture
    profile_picture TEXT,
    -- 1 = administrator (privileged for shipment threads)
    role_id INTEGER NOT NULL DEFAULT 2,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Shipments table
CREATE TABLE IF NOT EXISTS shipments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type TEXT NOT NULL,
    jenis TEXT NOT NULL,
    merk TEXT NOT NULL,
    qty INTEGER NOT NULL,
    -- e.g. Udara, Darat
    delivery_by TEXT NOT NULL,
    destination TEXT NOT NULL,
    pic_user_id INTEGER NOT NULL REFERENCES users(id),
    approved_by_user_id INTEGER REFERENCES users(id),
    -- Submitted, On Going, Approved, Completed, Cancelled
    status TEXT NOT NULL DEFAULT 'Submitted',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Shipment discussion log
-- Append-only; id is the ordering key and the pagination cursor
CREATE TABLE IF NOT EXISTS shipment_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    shipment_id INTEGER NOT NULL REFERENCES shipments(id) ON DELETE CASCADE,
    sender_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    text TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_shipment_messages_thread ON shipment_messages(shipment_id, id);
CREATE INDEX IF NOT EXISTS idx_shipment_messages_created ON shipment_messages(shipment_id, created_at);

-- Read positions (high-water-mark per shipment and user)
CREATE TABLE IF NOT EXISTS shipment_message_reads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    shipment_id INTEGER NOT NULL REFERENCES shipments(id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    last_read_id INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (shipment_id, user_id)
);
CREATE INDEX IF NOT EXISTS idx_shipment_reads_position ON shipment_message_reads(shipment_id, last_read_id);

-- Conversations table
-- direct_key is "min:max" of the two participant ids for non-group
-- conversations and NULL for groups; it serialises first contact
CREATE TABLE IF NOT EXISTS conversations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT,
    is_group INTEGER NOT NULL DEFAULT 0,
    created_by INTEGER NOT NULL REFERENCES users(id),
    direct_key TEXT UNIQUE,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_conversations_updated ON conversations(updated_at DESC);

-- Conversation participants
CREATE TABLE IF NOT EXISTS conversation_user (
    conversation_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (conversation_id, user_id)
);
CREATE INDEX IF NOT EXISTS idx_conversation_user_user ON conversation_user(user_id);

-- Conversation messages
-- read_at and delivered_at are set once; updated_at moves on every status change
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    body TEXT NOT NULL,
    read_at INTEGER,
    delivered_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, created_at);
CREATE INDEX IF NOT EXISTS idx_messages_conversation_updated ON messages(conversation_id, updated_at);
"#;
