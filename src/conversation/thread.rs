//! Conversation threads (direct and group).

use std::collections::HashMap;

use super::push::PushEvent;
use crate::auth::Principal;
use crate::broker::{Broker, Subscription};
use crate::error::{Error, Result};
use crate::pagination::{PageRequest, SortOrder};
use crate::state::AppState;
use crate::storage::{ConversationRecord, Database, MessageRecord, UserRecord};
use crate::thread::{validate_body, with_statuses, Listed, Thread};
use crate::tracking::{DeliveryStatus, FlagTracker, ReadTracker};

/// Which slice of a conversation's history to return.
#[derive(Debug, Clone, Copy)]
pub struct HistorySelector {
    pub order: SortOrder,
    /// `None` returns the whole history.
    pub page: Option<PageRequest>,
}

/// A slice of history plus the conversation's total message count.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub items: Vec<Listed<MessageRecord>>,
    pub total: i64,
}

/// One conversation, bound to its loaded row.
#[derive(Clone)]
pub struct ConversationThread {
    db: Database,
    tracker: FlagTracker,
    hub: Broker<PushEvent>,
    conversation: ConversationRecord,
}

impl ConversationThread {
    /// Load the conversation or fail with `ConversationNotFound`.
    pub fn open(state: &AppState, conversation_id: i64) -> Result<Self> {
        let conversation = state
            .db
            .get_conversation(conversation_id)?
            .ok_or(Error::ConversationNotFound)?;

        Ok(Self {
            db: state.db.clone(),
            tracker: FlagTracker::new(state.db.clone()),
            hub: state.conversation_hub.clone(),
            conversation,
        })
    }

    /// Authorize and attach to the push topic.
    pub fn subscribe(&self, principal: &Principal) -> Result<Subscription<PushEvent>> {
        self.authorize(principal)?;
        Ok(self.hub.subscribe(self.conversation.id))
    }

    /// Participants keyed by id.
    pub fn participants_by_id(&self) -> Result<HashMap<i64, UserRecord>> {
        Ok(self
            .db
            .participants(self.conversation.id)?
            .into_iter()
            .map(|u| (u.id, u))
            .collect())
    }
}

impl Thread for ConversationThread {
    type Message = MessageRecord;
    type Selector = HistorySelector;
    type Listing = HistoryPage;

    fn id(&self) -> i64 {
        self.conversation.id
    }

    /// Membership is read from the store on every call.
    fn authorize(&self, principal: &Principal) -> Result<()> {
        if self.db.is_participant(self.conversation.id, principal.id())? {
            Ok(())
        } else {
            Err(Error::Forbidden(
                "You are not a participant of this conversation".into(),
            ))
        }
    }

    fn append(&self, principal: &Principal, body: &str) -> Result<Listed<MessageRecord>> {
        self.authorize(principal)?;
        validate_body("body", body)?;

        let message = self.db.insert_message(self.conversation.id, principal.id(), body)?;

        let reached = self
            .hub
            .publish(self.conversation.id, PushEvent::message_sent(&message, &principal.user));
        tracing::info!(
            conversation_id = self.conversation.id,
            user_id = principal.id(),
            message_id = message.id,
            subscribers = reached,
            "Conversation message sent"
        );

        let status = DeliveryStatus::from_flags(message.read_at, message.delivered_at);
        Ok(Listed { message, status })
    }

    /// Listing marks the viewer's incoming messages delivered first.
    fn list(&self, principal: &Principal, selector: HistorySelector) -> Result<HistoryPage> {
        self.authorize(principal)?;

        let (mut messages, total) =
            self.db
                .conversation_messages(self.conversation.id, selector.order, selector.page.as_ref())?;

        self.tracker.mark_delivered_on_view(principal.id(), &mut messages)?;
        let statuses = self.tracker.resolve(self.conversation.id, principal.id(), &messages)?;

        Ok(HistoryPage {
            items: with_statuses(messages, statuses),
            total,
        })
    }
}
