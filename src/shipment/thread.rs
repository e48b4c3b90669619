//! Shipment discussion threads.

use crate::auth::Principal;
use crate::broker::{Broker, Subscription};
use crate::error::{Error, Result};
use crate::pagination::{CursorPage, CursorRequest};
use crate::state::AppState;
use crate::storage::{Database, ShipmentMessageRecord, ShipmentRecord};
use crate::thread::{validate_body, with_statuses, Listed, Thread};
use crate::tracking::{DeliveryStatus, ReadTracker, WatermarkTracker};

/// One shipment's message log, bound to a loaded shipment row.
#[derive(Clone)]
pub struct ShipmentThread {
    db: Database,
    tracker: WatermarkTracker,
    notifier: Broker<i64>,
    shipment: ShipmentRecord,
}

impl ShipmentThread {
    /// Load the shipment or fail with `ShipmentNotFound`.
    pub fn open(state: &AppState, shipment_id: i64) -> Result<Self> {
        let shipment = state
            .db
            .get_shipment(shipment_id)?
            .ok_or(Error::ShipmentNotFound)?;

        Ok(Self {
            db: state.db.clone(),
            tracker: WatermarkTracker::new(state.db.clone()),
            notifier: state.shipment_notifier.clone(),
            shipment,
        })
    }

    /// Advance the principal's read position; returns the stored mark.
    pub fn mark_read(&self, principal: &Principal, last_read_id: i64) -> Result<i64> {
        self.authorize(principal)?;
        let stored = self.tracker.mark_read(self.shipment.id, principal.id(), last_read_id)?;
        tracing::info!(
            shipment_id = self.shipment.id,
            user_id = principal.id(),
            last_read_id = stored,
            "Shipment thread marked read"
        );
        Ok(stored)
    }

    /// Authorize and attach to the thread's wake-up topic.
    pub fn subscribe(&self, principal: &Principal) -> Result<Subscription<i64>> {
        self.authorize(principal)?;
        Ok(self.notifier.subscribe(self.shipment.id))
    }

    /// Messages newer than `after`, oldest first, with the viewer's statuses.
    pub fn messages_after(&self, viewer_id: i64, after: i64) -> Result<Vec<Listed<ShipmentMessageRecord>>> {
        let messages = self.db.shipment_messages_after(self.shipment.id, after)?;
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        let statuses = self.tracker.resolve(self.shipment.id, viewer_id, &messages)?;
        Ok(with_statuses(messages, statuses))
    }
}

impl Thread for ShipmentThread {
    type Message = ShipmentMessageRecord;
    type Selector = CursorRequest;
    type Listing = CursorPage<Listed<ShipmentMessageRecord>>;

    fn id(&self) -> i64 {
        self.shipment.id
    }

    /// The PIC, the approver and administrators may use the thread.
    fn authorize(&self, principal: &Principal) -> Result<()> {
        let user_id = principal.id();
        let related = self.shipment.pic_user_id == user_id
            || self.shipment.approved_by_user_id == Some(user_id)
            || principal.is_privileged();

        if related {
            Ok(())
        } else {
            Err(Error::Forbidden(
                "You are not authorized to access messages for this shipment".into(),
            ))
        }
    }

    fn append(&self, principal: &Principal, text: &str) -> Result<Listed<ShipmentMessageRecord>> {
        self.authorize(principal)?;
        validate_body("text", text)?;

        let message = self
            .db
            .insert_shipment_message(self.shipment.id, principal.id(), text)?;

        let woken = self.notifier.publish(self.shipment.id, message.id);
        tracing::info!(
            shipment_id = self.shipment.id,
            user_id = principal.id(),
            message_id = message.id,
            streams = woken,
            "Shipment message appended"
        );

        // Never "seen" by its own sender.
        Ok(Listed {
            message,
            status: DeliveryStatus::Delivered,
        })
    }

    fn list(&self, principal: &Principal, request: CursorRequest) -> Result<Self::Listing> {
        self.authorize(principal)?;

        let shipment_id = self.shipment.id;
        let batch = self
            .db
            .shipment_messages_before(shipment_id, request.cursor, request.limit)?;
        let page = request.resolve(batch, |oldest| {
            self.db.shipment_has_messages_before(shipment_id, oldest)
        })?;

        let statuses = self.tracker.resolve(shipment_id, principal.id(), &page.items)?;
        Ok(CursorPage {
            items: with_statuses(page.items, statuses),
            has_more: page.has_more,
            next_cursor: page.next_cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ServerConfig;
    use crate::storage::{NewShipment, NewUser, ShipmentStatus};

    struct Fixture {
        state: AppState,
        shipment: i64,
        pic: Principal,
        approver: Principal,
        admin: Principal,
        outsider: Principal,
    }

    fn principal(state: &AppState, user: NewUser) -> Principal {
        let id = state.db.create_user(&user).unwrap();
        Principal::from(state.db.get_user(id).unwrap().unwrap())
    }

    fn fixture() -> Fixture {
        let state = AppState::new(Database::open(None).unwrap(), ServerConfig::default());
        let pic = principal(&state, NewUser::named("Pia Chandra"));
        let approver = principal(&state, NewUser::named("Aldo Pratama"));
        let admin = principal(&state, NewUser::named("Rina Admin").admin());
        let outsider = principal(&state, NewUser::named("Omar Luar"));
        let shipment = state
            .db
            .create_shipment(&NewShipment {
                kind: "Outbound".into(),
                jenis: "Laptop".into(),
                merk: "Lenovo".into(),
                qty: 10,
                delivery_by: "Darat".into(),
                destination: "Bandung".into(),
                pic_user_id: pic.id(),
                approved_by_user_id: Some(approver.id()),
                status: ShipmentStatus::Submitted,
            })
            .unwrap();
        Fixture {
            state,
            shipment,
            pic,
            approver,
            admin,
            outsider,
        }
    }

    #[test]
    fn test_open_unknown_shipment() {
        let f = fixture();
        assert!(matches!(
            ShipmentThread::open(&f.state, f.shipment + 100),
            Err(Error::ShipmentNotFound)
        ));
    }

    #[test]
    fn test_authorize_related_users_only() {
        let f = fixture();
        let thread = ShipmentThread::open(&f.state, f.shipment).unwrap();

        assert!(thread.authorize(&f.pic).is_ok());
        assert!(thread.authorize(&f.approver).is_ok());
        assert!(thread.authorize(&f.admin).is_ok());
        assert!(matches!(thread.authorize(&f.outsider), Err(Error::Forbidden(_))));
    }

    #[test]
    fn test_forbidden_append_writes_nothing() {
        let f = fixture();
        let thread = ShipmentThread::open(&f.state, f.shipment).unwrap();

        assert!(thread.append(&f.outsider, "hello").is_err());
        assert!(f.state.db.shipment_messages_after(f.shipment, 0).unwrap().is_empty());
    }

    #[test]
    fn test_append_then_list_round_trip() {
        let f = fixture();
        let thread = ShipmentThread::open(&f.state, f.shipment).unwrap();

        let sent = thread.append(&f.pic, "barang sudah dikemas").unwrap();
        assert_eq!(sent.status, DeliveryStatus::Delivered);

        let request = CursorRequest::new(None, None, 20).unwrap();
        let page = thread.list(&f.approver, request).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].message.id, sent.message.id);
        assert_eq!(page.items[0].status, DeliveryStatus::Delivered);
        assert!(!page.has_more);
    }

    #[test]
    fn test_seen_scenario_after_mark_read() {
        let f = fixture();
        let thread = ShipmentThread::open(&f.state, f.shipment).unwrap();
        let ids: Vec<i64> = ["satu", "dua", "tiga"]
            .iter()
            .map(|t| thread.append(&f.pic, t).unwrap().message.id)
            .collect();

        thread.mark_read(&f.approver, ids[1]).unwrap();

        let page = thread
            .list(&f.approver, CursorRequest::new(None, None, 20).unwrap())
            .unwrap();
        let statuses: Vec<DeliveryStatus> = page.items.iter().map(|l| l.status).collect();
        assert_eq!(
            statuses,
            vec![DeliveryStatus::Seen, DeliveryStatus::Seen, DeliveryStatus::Delivered]
        );
    }

    #[test]
    fn test_mark_read_never_regresses() {
        let f = fixture();
        let thread = ShipmentThread::open(&f.state, f.shipment).unwrap();
        let first = thread.append(&f.pic, "a").unwrap().message.id;
        let second = thread.append(&f.pic, "b").unwrap().message.id;

        assert_eq!(thread.mark_read(&f.admin, second).unwrap(), second);
        assert_eq!(thread.mark_read(&f.admin, first).unwrap(), second);
    }

    #[test]
    fn test_cursor_listing_walks_backwards() {
        let f = fixture();
        let thread = ShipmentThread::open(&f.state, f.shipment).unwrap();
        let ids: Vec<i64> = (0..5)
            .map(|i| thread.append(&f.pic, &format!("m{i}")).unwrap().message.id)
            .collect();

        let first = thread
            .list(&f.pic, CursorRequest::new(None, Some(2), 20).unwrap())
            .unwrap();
        let first_ids: Vec<i64> = first.items.iter().map(|l| l.message.id).collect();
        assert_eq!(first_ids, vec![ids[3], ids[4]]);
        assert_eq!(first.next_cursor, Some(ids[3]));

        let second = thread
            .list(&f.pic, CursorRequest::new(first.next_cursor, Some(2), 20).unwrap())
            .unwrap();
        let second_ids: Vec<i64> = second.items.iter().map(|l| l.message.id).collect();
        assert_eq!(second_ids, vec![ids[1], ids[2]]);
        assert!(second.has_more);
    }

    #[tokio::test]
    async fn test_append_wakes_subscribers() {
        let f = fixture();
        let thread = ShipmentThread::open(&f.state, f.shipment).unwrap();
        let mut wake = thread.subscribe(&f.approver).unwrap();

        let sent = thread.append(&f.pic, "on the way").unwrap();
        assert_eq!(wake.recv().await.unwrap(), sent.message.id);
        assert!(thread.subscribe(&f.outsider).is_err());
    }
}
