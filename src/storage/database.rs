//! # Database
//!
//! SQLite database wrapper for the messaging core.
//!
//! ## Database Operations
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      DATABASE OPERATIONS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐                                                   │
//! │  │ Thread services │  shipment threads, conversations, folders         │
//! │  └────────┬────────┘                                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ┌─────────────────┐                                                   │
//! │  │    Database     │  High-level API                                   │
//! │  │   (this file)   │  - Users / shipments (read side)                  │
//! │  │                 │  - Shipment message log + read positions          │
//! │  │                 │  - Conversations, participants, messages          │
//! │  └────────┬────────┘                                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ┌─────────────────┐                                                   │
//! │  │    rusqlite     │  One connection behind a mutex; every multi-step  │
//! │  │                 │  sequence runs inside a single lock or a          │
//! │  │                 │  transaction                                      │
//! │  └─────────────────┘                                                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql, TransactionBehavior};
use std::sync::Arc;
use std::time::Duration;

use super::schema;
use crate::error::{Error, Result};
use crate::pagination::{Cursored, PageRequest, SortOrder};
use crate::time::now_timestamp_millis;

/// Role id with access to every shipment thread.
pub const ADMIN_ROLE_ID: i64 = 1;

/// The main database handle
///
/// Cloning shares the underlying connection.
#[derive(Clone)]
pub struct Database {
    /// The underlying SQLite connection
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create a database
    ///
    /// If path is None, creates an in-memory database (useful for testing).
    pub fn open(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(p) if p != ":memory:" => {
                let conn = Connection::open(p)
                    .map_err(|e| Error::DatabaseError(format!("Failed to open database: {}", e)))?;
                conn.busy_timeout(Duration::from_secs(5))?;
                conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
                conn
            }
            _ => Connection::open_in_memory().map_err(|e| {
                Error::DatabaseError(format!("Failed to create in-memory database: {}", e))
            })?,
        };

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Initialize the database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(schema::CREATE_TABLES)
            .map_err(|e| Error::DatabaseError(format!("Failed to create tables: {}", e)))?;

        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
            .optional()?;

        match version {
            None => {
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    params![schema::SCHEMA_VERSION],
                )?;
                tracing::info!("Database schema created (version {})", schema::SCHEMA_VERSION);
            }
            Some(v) => {
                tracing::debug!("Database schema version: {}", v);
            }
        }

        Ok(())
    }

    // ========================================================================
    // USER OPERATIONS
    // ========================================================================

    /// Insert a user row (back-office seeding and tests)
    pub fn create_user(&self, user: &NewUser) -> Result<i64> {
        let conn = self.conn.lock();
        let now = now_timestamp_millis();

        conn.execute(
            "INSERT INTO users (name, first_name, last_name, profile_picture, role_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                user.name,
                user.first_name,
                user.last_name,
                user.profile_picture,
                user.role_id,
                now,
                now,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Get a user by id
    pub fn get_user(&self, id: i64) -> Result<Option<UserRecord>> {
        let conn = self.conn.lock();
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"),
                params![id],
                UserRecord::from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// Check which of the given ids exist
    pub fn missing_user_ids(&self, ids: &[i64]) -> Result<Vec<i64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT 1 FROM users WHERE id = ?")?;
        let mut missing = Vec::new();
        for id in ids {
            if !stmt.exists(params![id])? {
                missing.push(*id);
            }
        }
        Ok(missing)
    }

    // ========================================================================
    // SHIPMENT OPERATIONS
    // ========================================================================

    /// Insert a shipment row (back-office seeding and tests)
    pub fn create_shipment(&self, shipment: &NewShipment) -> Result<i64> {
        let conn = self.conn.lock();
        let now = now_timestamp_millis();

        conn.execute(
            "INSERT INTO shipments (type, jenis, merk, qty, delivery_by, destination,
                                    pic_user_id, approved_by_user_id, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                shipment.kind,
                shipment.jenis,
                shipment.merk,
                shipment.qty,
                shipment.delivery_by,
                shipment.destination,
                shipment.pic_user_id,
                shipment.approved_by_user_id,
                shipment.status.as_str(),
                now,
                now,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Get a shipment by id
    pub fn get_shipment(&self, id: i64) -> Result<Option<ShipmentRecord>> {
        let conn = self.conn.lock();
        let shipment = conn
            .query_row(
                "SELECT id, type, jenis, merk, qty, delivery_by, destination,
                        pic_user_id, approved_by_user_id, status, created_at, updated_at
                 FROM shipments WHERE id = ?",
                params![id],
                |row| {
                    let status: String = row.get(9)?;
                    Ok(ShipmentRecord {
                        id: row.get(0)?,
                        kind: row.get(1)?,
                        jenis: row.get(2)?,
                        merk: row.get(3)?,
                        qty: row.get(4)?,
                        delivery_by: row.get(5)?,
                        destination: row.get(6)?,
                        pic_user_id: row.get(7)?,
                        approved_by_user_id: row.get(8)?,
                        status: ShipmentStatus::parse(&status).unwrap_or(ShipmentStatus::Submitted),
                        created_at: row.get(10)?,
                        updated_at: row.get(11)?,
                    })
                },
            )
            .optional()?;
        Ok(shipment)
    }

    /// Delete a shipment; its messages and read positions go with it
    pub fn delete_shipment(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute("DELETE FROM shipments WHERE id = ?", params![id])?;
        Ok(rows > 0)
    }

    // ========================================================================
    // SHIPMENT MESSAGE OPERATIONS
    // ========================================================================

    /// Append a message to a shipment thread
    pub fn insert_shipment_message(
        &self,
        shipment_id: i64,
        sender_id: i64,
        text: &str,
    ) -> Result<ShipmentMessageRecord> {
        let conn = self.conn.lock();
        let now = now_timestamp_millis();

        conn.execute(
            "INSERT INTO shipment_messages (shipment_id, sender_id, text, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
            params![shipment_id, sender_id, text, now, now],
        )?;
        let id = conn.last_insert_rowid();

        let record = conn.query_row(
            &format!("{SHIPMENT_MESSAGE_SELECT} WHERE m.id = ?"),
            params![id],
            ShipmentMessageRecord::from_row,
        )?;
        Ok(record)
    }

    /// Whether `message_id` is a message of `shipment_id`
    pub fn shipment_message_in_thread(&self, shipment_id: i64, message_id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let exists = conn
            .prepare_cached("SELECT 1 FROM shipment_messages WHERE shipment_id = ? AND id = ?")?
            .exists(params![shipment_id, message_id])?;
        Ok(exists)
    }

    /// Newest-first batch of at most `limit` messages with `id < before`
    pub fn shipment_messages_before(
        &self,
        shipment_id: i64,
        before: Option<i64>,
        limit: u32,
    ) -> Result<Vec<ShipmentMessageRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "{SHIPMENT_MESSAGE_SELECT}
             WHERE m.shipment_id = ?1 AND (?2 IS NULL OR m.id < ?2)
             ORDER BY m.id DESC
             LIMIT ?3"
        ))?;
        let rows = stmt.query_map(
            params![shipment_id, before, i64::from(limit)],
            ShipmentMessageRecord::from_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Whether the thread holds any message older than `id`
    pub fn shipment_has_messages_before(&self, shipment_id: i64, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let exists = conn
            .prepare_cached("SELECT 1 FROM shipment_messages WHERE shipment_id = ? AND id < ? LIMIT 1")?
            .exists(params![shipment_id, id])?;
        Ok(exists)
    }

    /// Every message with `id > after`, oldest first (live stream feed)
    pub fn shipment_messages_after(
        &self,
        shipment_id: i64,
        after: i64,
    ) -> Result<Vec<ShipmentMessageRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "{SHIPMENT_MESSAGE_SELECT}
             WHERE m.shipment_id = ? AND m.id > ?
             ORDER BY m.id ASC"
        ))?;
        let rows = stmt.query_map(params![shipment_id, after], ShipmentMessageRecord::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Current high-water-mark for (shipment, user); 0 when never read
    pub fn read_position(&self, shipment_id: i64, user_id: i64) -> Result<i64> {
        let conn = self.conn.lock();
        let position: Option<i64> = conn
            .query_row(
                "SELECT last_read_id FROM shipment_message_reads WHERE shipment_id = ? AND user_id = ?",
                params![shipment_id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(position.unwrap_or(0))
    }

    /// Raise the high-water-mark to `max(current, proposed)` in one statement
    ///
    /// Returns the stored value, which is below `proposed` only if a
    /// concurrent call already moved the mark further.
    pub fn advance_read_position(&self, shipment_id: i64, user_id: i64, proposed: i64) -> Result<i64> {
        let conn = self.conn.lock();
        let now = now_timestamp_millis();

        let stored: i64 = conn.query_row(
            "INSERT INTO shipment_message_reads (shipment_id, user_id, last_read_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT (shipment_id, user_id) DO UPDATE SET
                 last_read_id = MAX(last_read_id, excluded.last_read_id),
                 updated_at = excluded.updated_at
             RETURNING last_read_id",
            params![shipment_id, user_id, proposed, now],
            |row| row.get(0),
        )?;

        Ok(stored)
    }

    // ========================================================================
    // CONVERSATION OPERATIONS
    // ========================================================================

    /// Create a conversation with its participant set in one transaction
    ///
    /// A non-group conversation for a pair that already has one returns the
    /// existing id instead of creating a duplicate.
    pub fn create_conversation(
        &self,
        name: Option<&str>,
        is_group: bool,
        created_by: i64,
        participant_ids: &[i64],
    ) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_timestamp_millis();

        let direct_key = if is_group {
            None
        } else {
            match participant_ids {
                [a, b] => Some(direct_key(*a, *b)),
                _ => {
                    return Err(Error::validation(
                        "participant_ids",
                        "a direct conversation needs exactly two participants",
                    ))
                }
            }
        };

        if let Some(key) = &direct_key {
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM conversations WHERE direct_key = ?",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(id) = existing {
                return Ok(id);
            }
        }

        tx.execute(
            "INSERT INTO conversations (name, is_group, created_by, direct_key, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![name, is_group, created_by, direct_key, now, now],
        )?;
        let id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO conversation_user (conversation_id, user_id, created_at) VALUES (?, ?, ?)",
            )?;
            for user_id in participant_ids {
                stmt.execute(params![id, user_id, now])?;
            }
        }

        tx.commit()?;
        Ok(id)
    }

    /// Find the direct conversation of a pair, creating it if absent
    ///
    /// Runs as one transaction keyed on the canonical pair so concurrent
    /// first contacts converge on a single conversation.
    pub fn find_or_create_direct_conversation(&self, user_a: i64, user_b: i64) -> Result<(i64, bool)> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_timestamp_millis();
        let key = direct_key(user_a, user_b);

        let inserted = tx.execute(
            "INSERT INTO conversations (name, is_group, created_by, direct_key, created_at, updated_at)
             VALUES (NULL, 0, ?, ?, ?, ?)
             ON CONFLICT (direct_key) DO NOTHING",
            params![user_a, key, now, now],
        )?;

        let id: i64 = tx.query_row(
            "SELECT id FROM conversations WHERE direct_key = ?",
            params![key],
            |row| row.get(0),
        )?;

        if inserted > 0 {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO conversation_user (conversation_id, user_id, created_at) VALUES (?, ?, ?)",
            )?;
            stmt.execute(params![id, user_a, now])?;
            stmt.execute(params![id, user_b, now])?;
        }

        tx.commit()?;
        Ok((id, inserted > 0))
    }

    /// Look up the direct conversation of a pair without creating it
    pub fn find_direct_conversation(&self, user_a: i64, user_b: i64) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let id = conn
            .query_row(
                "SELECT id FROM conversations WHERE direct_key = ? AND is_group = 0",
                params![direct_key(user_a, user_b)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Get a conversation by id
    pub fn get_conversation(&self, id: i64) -> Result<Option<ConversationRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?"),
                params![id],
                ConversationRecord::from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Membership check, always answered from the store
    pub fn is_participant(&self, conversation_id: i64, user_id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let exists = conn
            .prepare_cached("SELECT 1 FROM conversation_user WHERE conversation_id = ? AND user_id = ?")?
            .exists(params![conversation_id, user_id])?;
        Ok(exists)
    }

    /// All participants of a conversation, by id
    pub fn participants(&self, conversation_id: i64) -> Result<Vec<UserRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {USER_COLUMNS_U} FROM users u
             JOIN conversation_user cu ON cu.user_id = u.id
             WHERE cu.conversation_id = ?
             ORDER BY u.id"
        ))?;
        let rows = stmt.query_map(params![conversation_id], UserRecord::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// The other participant of a direct conversation, from `user_id`'s side
    pub fn conversation_partner(&self, conversation_id: i64, user_id: i64) -> Result<Option<UserRecord>> {
        let conn = self.conn.lock();
        let partner = conn
            .query_row(
                &format!(
                    "SELECT {USER_COLUMNS_U} FROM users u
                     JOIN conversation_user cu ON cu.user_id = u.id
                     WHERE cu.conversation_id = ? AND u.id <> ?
                     ORDER BY u.id LIMIT 1"
                ),
                params![conversation_id, user_id],
                UserRecord::from_row,
            )
            .optional()?;
        Ok(partner)
    }

    /// Conversations the user participates in, newest id first
    ///
    /// `page = None` returns every conversation.
    pub fn conversations_for_user(
        &self,
        user_id: i64,
        page: Option<&PageRequest>,
    ) -> Result<(Vec<ConversationRecord>, i64)> {
        self.user_conversations(user_id, false, "c.id DESC", page)
    }

    /// Direct conversations of the user, most recently active first
    pub fn direct_conversations_for_user(
        &self,
        user_id: i64,
        page: &PageRequest,
    ) -> Result<(Vec<ConversationRecord>, i64)> {
        self.user_conversations(user_id, true, "c.updated_at DESC, c.id DESC", Some(page))
    }

    fn user_conversations(
        &self,
        user_id: i64,
        direct_only: bool,
        order_by: &str,
        page: Option<&PageRequest>,
    ) -> Result<(Vec<ConversationRecord>, i64)> {
        let conn = self.conn.lock();
        let filter = if direct_only { "AND c.is_group = 0" } else { "" };

        let total: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM conversations c
                 JOIN conversation_user cu ON cu.conversation_id = c.id
                 WHERE cu.user_id = ? {filter}"
            ),
            params![user_id],
            |row| row.get(0),
        )?;

        let (limit, offset) = page.map_or((-1, 0), |p| (p.limit(), p.offset()));
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONVERSATION_COLUMNS_C} FROM conversations c
             JOIN conversation_user cu ON cu.conversation_id = c.id
             WHERE cu.user_id = ? {filter}
             ORDER BY {order_by}
             LIMIT ? OFFSET ?"
        ))?;
        let rows = stmt.query_map(params![user_id, limit, offset], ConversationRecord::from_row)?;

        Ok((rows.collect::<rusqlite::Result<Vec<_>>>()?, total))
    }

    // ========================================================================
    // MESSAGE OPERATIONS
    // ========================================================================

    /// Append a message to a conversation and bump the conversation's activity
    pub fn insert_message(&self, conversation_id: i64, user_id: i64, body: &str) -> Result<MessageRecord> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = now_timestamp_millis();

        tx.execute(
            "INSERT INTO messages (conversation_id, user_id, body, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
            params![conversation_id, user_id, body, now, now],
        )?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "UPDATE conversations SET updated_at = ? WHERE id = ?",
            params![now, conversation_id],
        )?;

        let record = tx.query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"),
            params![id],
            MessageRecord::from_row,
        )?;

        tx.commit()?;
        Ok(record)
    }

    /// Get a message by id
    pub fn get_message(&self, id: i64) -> Result<Option<MessageRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"),
                params![id],
                MessageRecord::from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Most recent message of a conversation
    pub fn last_message(&self, conversation_id: i64) -> Result<Option<MessageRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?
                     ORDER BY created_at DESC, id DESC LIMIT 1"
                ),
                params![conversation_id],
                MessageRecord::from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Messages of one conversation in `order` of creation
    ///
    /// `page = None` returns the whole history.
    pub fn conversation_messages(
        &self,
        conversation_id: i64,
        order: SortOrder,
        page: Option<&PageRequest>,
    ) -> Result<(Vec<MessageRecord>, i64)> {
        let dir = order.as_sql();
        self.query_messages(
            "m.conversation_id = ?",
            vec![Box::new(conversation_id)],
            &format!("m.created_at {dir}, m.id {dir}"),
            page,
        )
    }

    /// Direct-thread history, oldest first, optionally only rows updated after `since`
    pub fn direct_messages(
        &self,
        conversation_id: i64,
        since: Option<i64>,
        page: &PageRequest,
    ) -> Result<(Vec<MessageRecord>, i64)> {
        let mut filter = String::from("m.conversation_id = ?");
        let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(conversation_id)];
        if let Some(since) = since {
            filter.push_str(" AND m.updated_at > ?");
            values.push(Box::new(since));
        }
        self.query_messages(&filter, values, "m.created_at ASC, m.id ASC", Some(page))
    }

    /// Folder listing across every conversation the user participates in
    pub fn folder_messages(
        &self,
        user_id: i64,
        folder: Folder,
        search: Option<&str>,
        page: &PageRequest,
    ) -> Result<(Vec<MessageRecord>, i64)> {
        let mut filter = String::from(
            "m.conversation_id IN (SELECT conversation_id FROM conversation_user WHERE user_id = ?)",
        );
        let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(user_id)];

        match folder {
            Folder::Inbox => {
                filter.push_str(" AND m.user_id <> ?");
                values.push(Box::new(user_id));
            }
            Folder::Sent => {
                filter.push_str(" AND m.user_id = ?");
                values.push(Box::new(user_id));
            }
            Folder::History => {}
        }

        if let Some(term) = search.filter(|t| !t.is_empty()) {
            filter.push_str(" AND m.body LIKE '%' || ? || '%'");
            values.push(Box::new(term.to_string()));
        }

        self.query_messages(&filter, values, "m.created_at DESC, m.id DESC", Some(page))
    }

    /// Incremental sync: rows changed after the watermark, oldest change first
    pub fn message_updates(
        &self,
        user_id: i64,
        updated_after: Option<i64>,
        limit: u32,
    ) -> Result<Vec<MessageRecord>> {
        let mut filter = String::from(
            "m.conversation_id IN (SELECT conversation_id FROM conversation_user WHERE user_id = ?)",
        );
        let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(user_id)];
        if let Some(after) = updated_after {
            filter.push_str(" AND m.updated_at > ?");
            values.push(Box::new(after));
        }
        let page = PageRequest {
            page: 1,
            per_page: limit,
        };
        let (rows, _) = self.query_messages(&filter, values, "m.updated_at ASC, m.id ASC", Some(&page))?;
        Ok(rows)
    }

    fn query_messages(
        &self,
        filter: &str,
        mut values: Vec<Box<dyn ToSql>>,
        order_by: &str,
        page: Option<&PageRequest>,
    ) -> Result<(Vec<MessageRecord>, i64)> {
        let conn = self.conn.lock();

        let total: i64 = {
            let params: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
            conn.query_row(
                &format!("SELECT COUNT(*) FROM messages m WHERE {filter}"),
                params.as_slice(),
                |row| row.get(0),
            )?
        };

        let (limit, offset) = page.map_or((-1, 0), |p| (p.limit(), p.offset()));
        values.push(Box::new(limit));
        values.push(Box::new(offset));
        let params: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();

        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS_M} FROM messages m WHERE {filter}
             ORDER BY {order_by}
             LIMIT ? OFFSET ?"
        ))?;
        let rows = stmt.query_map(params.as_slice(), MessageRecord::from_row)?;

        Ok((rows.collect::<rusqlite::Result<Vec<_>>>()?, total))
    }

    /// Stamp `delivered_at` on the given messages the viewer did not send
    ///
    /// Only rows whose `delivered_at` is still NULL change. Returns the
    /// timestamp written so callers can patch records already in memory.
    pub fn mark_delivered(&self, viewer_id: i64, message_ids: &[i64]) -> Result<i64> {
        let now = now_timestamp_millis();
        if message_ids.is_empty() {
            return Ok(now);
        }

        let conn = self.conn.lock();
        let placeholders = vec!["?"; message_ids.len()].join(", ");
        let sql = format!(
            "UPDATE messages SET delivered_at = ?, updated_at = ?
             WHERE delivered_at IS NULL AND user_id <> ? AND id IN ({placeholders})"
        );

        let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(now), Box::new(now), Box::new(viewer_id)];
        for id in message_ids {
            values.push(Box::new(*id));
        }
        let params: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();

        let rows = conn.execute(&sql, params.as_slice())?;
        if rows > 0 {
            tracing::debug!(viewer_id = viewer_id, rows = rows, "Marked messages delivered");
        }

        Ok(now)
    }

    /// Set `read_at` once and return the row as stored
    pub fn mark_message_read(&self, message_id: i64) -> Result<MessageRecord> {
        let conn = self.conn.lock();
        let now = now_timestamp_millis();

        conn.execute(
            "UPDATE messages SET read_at = ?, updated_at = ? WHERE id = ? AND read_at IS NULL",
            params![now, now, message_id],
        )?;

        conn.query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"),
            params![message_id],
            MessageRecord::from_row,
        )
        .optional()?
        .ok_or(Error::MessageNotFound)
    }

    /// Unread messages addressed to the user, optionally within one conversation
    pub fn unread_count(&self, user_id: i64, conversation_id: Option<i64>) -> Result<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM messages m
             WHERE m.conversation_id IN (SELECT conversation_id FROM conversation_user WHERE user_id = ?1)
               AND (?2 IS NULL OR m.conversation_id = ?2)
               AND m.user_id <> ?1
               AND m.read_at IS NULL",
            params![user_id, conversation_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

/// Canonical key of an unordered user pair.
fn direct_key(a: i64, b: i64) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{}", lo, hi)
}

// ============================================================================
// RECORD TYPES
// ============================================================================

const USER_COLUMNS: &str = "id, name, first_name, last_name, profile_picture, role_id";
const USER_COLUMNS_U: &str = "u.id, u.name, u.first_name, u.last_name, u.profile_picture, u.role_id";
const CONVERSATION_COLUMNS: &str = "id, name, is_group, created_by, created_at, updated_at";
const CONVERSATION_COLUMNS_C: &str =
    "c.id, c.name, c.is_group, c.created_by, c.created_at, c.updated_at";
const MESSAGE_COLUMNS: &str =
    "id, conversation_id, user_id, body, read_at, delivered_at, created_at, updated_at";
const MESSAGE_COLUMNS_M: &str =
    "m.id, m.conversation_id, m.user_id, m.body, m.read_at, m.delivered_at, m.created_at, m.updated_at";
const SHIPMENT_MESSAGE_SELECT: &str =
    "SELECT m.id, m.shipment_id, m.sender_id, u.name, m.text, m.created_at
     FROM shipment_messages m LEFT JOIN users u ON u.id = m.sender_id";

/// Fields for inserting a user
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_picture: Option<String>,
    pub role_id: i64,
}

impl NewUser {
    /// A regular (non-admin) user whose display name is split on the first space
    pub fn named(name: &str) -> Self {
        let (first, last) = match name.split_once(' ') {
            Some((f, l)) => (f.to_string(), Some(l.to_string())),
            None => (name.to_string(), None),
        };
        Self {
            name: name.to_string(),
            first_name: Some(first),
            last_name: last,
            profile_picture: None,
            role_id: 2,
        }
    }

    pub fn admin(mut self) -> Self {
        self.role_id = ADMIN_ROLE_ID;
        self
    }
}

/// A user record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_picture: Option<String>,
    pub role_id: i64,
}

impl UserRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            first_name: row.get(2)?,
            last_name: row.get(3)?,
            profile_picture: row.get(4)?,
            role_id: row.get(5)?,
        })
    }

    /// "first last", trimmed; either half may be missing
    pub fn full_name(&self) -> String {
        format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        )
        .trim()
        .to_string()
    }
}

/// Shipment lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShipmentStatus {
    Submitted,
    OnGoing,
    Approved,
    Completed,
    Cancelled,
}

impl ShipmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::Submitted => "Submitted",
            ShipmentStatus::OnGoing => "On Going",
            ShipmentStatus::Approved => "Approved",
            ShipmentStatus::Completed => "Completed",
            ShipmentStatus::Cancelled => "Cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Submitted" => Some(ShipmentStatus::Submitted),
            "On Going" => Some(ShipmentStatus::OnGoing),
            "Approved" => Some(ShipmentStatus::Approved),
            "Completed" => Some(ShipmentStatus::Completed),
            "Cancelled" => Some(ShipmentStatus::Cancelled),
            _ => None,
        }
    }
}

/// Fields for inserting a shipment
#[derive(Debug, Clone)]
pub struct NewShipment {
    pub kind: String,
    pub jenis: String,
    pub merk: String,
    pub qty: i64,
    pub delivery_by: String,
    pub destination: String,
    pub pic_user_id: i64,
    pub approved_by_user_id: Option<i64>,
    pub status: ShipmentStatus,
}

/// A shipment record
#[derive(Debug, Clone)]
pub struct ShipmentRecord {
    pub id: i64,
    pub kind: String,
    pub jenis: String,
    pub merk: String,
    pub qty: i64,
    pub delivery_by: String,
    pub destination: String,
    pub pic_user_id: i64,
    pub approved_by_user_id: Option<i64>,
    pub status: ShipmentStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A message in a shipment thread, joined with its sender's name
#[derive(Debug, Clone)]
pub struct ShipmentMessageRecord {
    pub id: i64,
    pub shipment_id: i64,
    pub sender_id: i64,
    pub sender_name: Option<String>,
    pub text: String,
    pub created_at: i64,
}

impl ShipmentMessageRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            shipment_id: row.get(1)?,
            sender_id: row.get(2)?,
            sender_name: row.get(3)?,
            text: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

impl Cursored for ShipmentMessageRecord {
    fn cursor_id(&self) -> i64 {
        self.id
    }
}

/// A conversation record
#[derive(Debug, Clone)]
pub struct ConversationRecord {
    pub id: i64,
    pub name: Option<String>,
    pub is_group: bool,
    pub created_by: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ConversationRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            is_group: row.get(2)?,
            created_by: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

/// A conversation message record
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: i64,
    pub conversation_id: i64,
    pub user_id: i64,
    pub body: String,
    pub read_at: Option<i64>,
    pub delivered_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl MessageRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            user_id: row.get(2)?,
            body: row.get(3)?,
            read_at: row.get(4)?,
            delivered_at: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

/// Direct-message folder selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Folder {
    /// Messages sent to the user
    #[default]
    Inbox,
    /// Messages the user sent
    Sent,
    /// Both directions
    History,
}

impl Folder {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("sent") => Folder::Sent,
            Some("history") => Folder::History,
            _ => Folder::Inbox,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_shipment(db: &Database) -> (i64, i64, i64) {
        let pic = db.create_user(&NewUser::named("Pia Chandra")).unwrap();
        let approver = db.create_user(&NewUser::named("Aldo Pratama")).unwrap();
        let shipment = db
            .create_shipment(&NewShipment {
                kind: "Outbound".into(),
                jenis: "Router".into(),
                merk: "Mikrotik".into(),
                qty: 4,
                delivery_by: "Darat".into(),
                destination: "Gudang Bekasi".into(),
                pic_user_id: pic,
                approved_by_user_id: Some(approver),
                status: ShipmentStatus::OnGoing,
            })
            .unwrap();
        (shipment, pic, approver)
    }

    #[test]
    fn test_database_creation() {
        let db = Database::open(None).unwrap();
        assert!(db.get_user(1).unwrap().is_none());
        assert!(db.get_shipment(1).unwrap().is_none());
    }

    #[test]
    fn test_user_operations() {
        let db = Database::open(None).unwrap();
        let id = db.create_user(&NewUser::named("Rina Wulandari").admin()).unwrap();

        let user = db.get_user(id).unwrap().unwrap();
        assert_eq!(user.full_name(), "Rina Wulandari");
        assert_eq!(user.role_id, ADMIN_ROLE_ID);

        assert_eq!(db.missing_user_ids(&[id, 999]).unwrap(), vec![999]);
    }

    #[test]
    fn test_shipment_round_trip() {
        let db = Database::open(None).unwrap();
        let (id, pic, approver) = seed_shipment(&db);

        let shipment = db.get_shipment(id).unwrap().unwrap();
        assert_eq!(shipment.pic_user_id, pic);
        assert_eq!(shipment.approved_by_user_id, Some(approver));
        assert_eq!(shipment.status, ShipmentStatus::OnGoing);
        assert_eq!(shipment.status.as_str(), "On Going");
    }

    #[test]
    fn test_shipment_message_log() {
        let db = Database::open(None).unwrap();
        let (shipment, pic, _) = seed_shipment(&db);

        let first = db.insert_shipment_message(shipment, pic, "loaded").unwrap();
        let second = db.insert_shipment_message(shipment, pic, "departed").unwrap();
        assert!(second.id > first.id);
        assert_eq!(first.sender_name.as_deref(), Some("Pia Chandra"));

        assert!(db.shipment_message_in_thread(shipment, first.id).unwrap());
        assert!(!db.shipment_message_in_thread(shipment + 1, first.id).unwrap());

        let newest = db.shipment_messages_before(shipment, None, 10).unwrap();
        assert_eq!(newest.iter().map(|m| m.id).collect::<Vec<_>>(), vec![second.id, first.id]);

        let older = db.shipment_messages_before(shipment, Some(second.id), 10).unwrap();
        assert_eq!(older.len(), 1);
        assert!(db.shipment_has_messages_before(shipment, second.id).unwrap());
        assert!(!db.shipment_has_messages_before(shipment, first.id).unwrap());

        let after = db.shipment_messages_after(shipment, first.id).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].text, "departed");
    }

    #[test]
    fn test_read_position_never_regresses() {
        let db = Database::open(None).unwrap();
        let (shipment, pic, _) = seed_shipment(&db);

        assert_eq!(db.read_position(shipment, pic).unwrap(), 0);
        assert_eq!(db.advance_read_position(shipment, pic, 7).unwrap(), 7);
        assert_eq!(db.advance_read_position(shipment, pic, 3).unwrap(), 7);
        assert_eq!(db.advance_read_position(shipment, pic, 9).unwrap(), 9);
        assert_eq!(db.read_position(shipment, pic).unwrap(), 9);
    }

    #[test]
    fn test_shipment_delete_cascades() {
        let db = Database::open(None).unwrap();
        let (shipment, pic, _) = seed_shipment(&db);
        let msg = db.insert_shipment_message(shipment, pic, "hello").unwrap();
        db.advance_read_position(shipment, pic, msg.id).unwrap();

        assert!(db.delete_shipment(shipment).unwrap());
        assert!(db.shipment_messages_after(shipment, 0).unwrap().is_empty());
        assert_eq!(db.read_position(shipment, pic).unwrap(), 0);
    }

    #[test]
    fn test_direct_conversation_is_unique_per_pair() {
        let db = Database::open(None).unwrap();
        let a = db.create_user(&NewUser::named("Ani")).unwrap();
        let b = db.create_user(&NewUser::named("Budi")).unwrap();

        let (first, created) = db.find_or_create_direct_conversation(a, b).unwrap();
        assert!(created);
        let (second, created) = db.find_or_create_direct_conversation(b, a).unwrap();
        assert!(!created);
        assert_eq!(first, second);

        let explicit = db.create_conversation(None, false, a, &[a, b]).unwrap();
        assert_eq!(explicit, first);

        assert_eq!(db.find_direct_conversation(a, b).unwrap(), Some(first));
        assert_eq!(db.participants(first).unwrap().len(), 2);
        assert_eq!(db.conversation_partner(first, a).unwrap().map(|u| u.id), Some(b));
    }

    #[test]
    fn test_group_conversation() {
        let db = Database::open(None).unwrap();
        let a = db.create_user(&NewUser::named("Ani")).unwrap();
        let b = db.create_user(&NewUser::named("Budi")).unwrap();
        let c = db.create_user(&NewUser::named("Citra")).unwrap();

        let id = db.create_conversation(Some("Gudang"), true, a, &[a, b, c]).unwrap();
        let conv = db.get_conversation(id).unwrap().unwrap();
        assert!(conv.is_group);
        assert_eq!(conv.name.as_deref(), Some("Gudang"));
        assert!(db.is_participant(id, c).unwrap());

        let (list, total) = db.conversations_for_user(b, None).unwrap();
        assert_eq!(total, 1);
        assert_eq!(list[0].id, id);
    }

    #[test]
    fn test_direct_conversation_needs_two_participants() {
        let db = Database::open(None).unwrap();
        let a = db.create_user(&NewUser::named("Ani")).unwrap();
        let err = db.create_conversation(None, false, a, &[a]).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_mark_delivered_skips_own_and_already_delivered() {
        let db = Database::open(None).unwrap();
        let a = db.create_user(&NewUser::named("Ani")).unwrap();
        let b = db.create_user(&NewUser::named("Budi")).unwrap();
        let (conv, _) = db.find_or_create_direct_conversation(a, b).unwrap();

        let from_a = db.insert_message(conv, a, "halo").unwrap();
        let from_b = db.insert_message(conv, b, "hai").unwrap();

        db.mark_delivered(b, &[from_a.id, from_b.id]).unwrap();

        let from_a = db.get_message(from_a.id).unwrap().unwrap();
        let from_b = db.get_message(from_b.id).unwrap().unwrap();
        assert!(from_a.delivered_at.is_some());
        assert!(from_b.delivered_at.is_none());

        let first_stamp = from_a.delivered_at;
        db.mark_delivered(b, &[from_a.id]).unwrap();
        assert_eq!(db.get_message(from_a.id).unwrap().unwrap().delivered_at, first_stamp);
    }

    #[test]
    fn test_mark_read_sets_once() {
        let db = Database::open(None).unwrap();
        let a = db.create_user(&NewUser::named("Ani")).unwrap();
        let b = db.create_user(&NewUser::named("Budi")).unwrap();
        let (conv, _) = db.find_or_create_direct_conversation(a, b).unwrap();
        let msg = db.insert_message(conv, a, "halo").unwrap();

        assert_eq!(db.unread_count(b, None).unwrap(), 1);
        let read = db.mark_message_read(msg.id).unwrap();
        let again = db.mark_message_read(msg.id).unwrap();
        assert!(read.read_at.is_some());
        assert_eq!(read.read_at, again.read_at);
        assert_eq!(db.unread_count(b, None).unwrap(), 0);
        assert_eq!(db.unread_count(a, Some(conv)).unwrap(), 0);

        assert!(matches!(db.mark_message_read(9999), Err(Error::MessageNotFound)));
    }

    #[test]
    fn test_folder_listing() {
        let db = Database::open(None).unwrap();
        let a = db.create_user(&NewUser::named("Ani")).unwrap();
        let b = db.create_user(&NewUser::named("Budi")).unwrap();
        let (conv, _) = db.find_or_create_direct_conversation(a, b).unwrap();
        db.insert_message(conv, a, "kirim invoice").unwrap();
        db.insert_message(conv, b, "sudah dikirim").unwrap();
        db.insert_message(conv, b, "cek email").unwrap();

        let page = PageRequest::new(None, None, 10);
        let (inbox, total) = db.folder_messages(a, Folder::Inbox, None, &page).unwrap();
        assert_eq!(total, 2);
        assert_eq!(inbox[0].body, "cek email");

        let (sent, _) = db.folder_messages(a, Folder::Sent, None, &page).unwrap();
        assert_eq!(sent.len(), 1);

        let (history, _) = db.folder_messages(a, Folder::History, Some("kirim"), &page).unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_folder_parse() {
        assert_eq!(Folder::parse(Some("sent")), Folder::Sent);
        assert_eq!(Folder::parse(Some("history")), Folder::History);
        assert_eq!(Folder::parse(Some("spam")), Folder::Inbox);
        assert_eq!(Folder::parse(None), Folder::Inbox);
    }

    #[test]
    fn test_direct_key_is_order_independent() {
        assert_eq!(direct_key(3, 9), direct_key(9, 3));
        assert_eq!(direct_key(3, 9), "3:9");
    }
}
