//! Connection registry and room-scoped broadcast

use std::collections::HashSet;

use dashmap::DashMap;
use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::Job;
use crate::websocket::message::{
    create_message, Envelope, EVENT_SCHEDULER_STATUS,
};

/// Unique connection identifier
pub type ConnectionId = Uuid;

#[derive(Debug)]
struct ConnectionInfo {
    room: String,
    account_id: Option<String>,
    tx: UnboundedSender<Envelope>,
}

/// Fan-out hub: every websocket subscriber registers here and lifecycle
/// events are pushed to the members of its room.
///
/// A socket subscribes to exactly one room. When a broadcast carries an
/// account id, a member receives it iff the member declared no account
/// (catch-all) or declared the same account.
#[derive(Debug, Default)]
pub struct FanOutHub {
    connections: DashMap<ConnectionId, ConnectionInfo>,
    rooms: DashMap<String, HashSet<ConnectionId>>,
}

impl FanOutHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; the returned receiver yields everything routed
    /// to this connection.
    pub fn connect(
        &self,
        room: &str,
        account_id: Option<String>,
    ) -> (ConnectionId, UnboundedReceiver<Envelope>) {
        let id = ConnectionId::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        self.connections.insert(
            id,
            ConnectionInfo {
                room: room.to_string(),
                account_id: account_id.clone(),
                tx,
            },
        );
        self.rooms.entry(room.to_string()).or_default().insert(id);

        info!(
            connection_id = %id,
            room,
            account_id = account_id.as_deref().unwrap_or("-"),
            total = self.connections.len(),
            "websocket connected"
        );
        (id, rx)
    }

    /// Remove a subscriber from both maps; idempotent.
    pub fn disconnect(&self, id: ConnectionId) {
        let Some((_, info)) = self.connections.remove(&id) else {
            return;
        };

        if let Some(mut members) = self.rooms.get_mut(&info.room) {
            members.remove(&id);
            let emptied = members.is_empty();
            drop(members);
            if emptied {
                self.rooms.remove(&info.room);
            }
        }

        info!(
            connection_id = %id,
            room = %info.room,
            total = self.connections.len(),
            "websocket disconnected"
        );
    }

    /// Deliver a message to one connection; false when it is gone.
    pub fn send_to(&self, id: ConnectionId, message: Envelope) -> bool {
        let delivered = self
            .connections
            .get(&id)
            .map(|info| info.tx.send(message).is_ok())
            .unwrap_or(false);
        if !delivered {
            self.disconnect(id);
        }
        delivered
    }

    /// Broadcast to every member of a room, honouring the account filter.
    ///
    /// Returns the number of sockets reached. Failed sends mark the socket
    /// for disconnection after the loop.
    pub fn broadcast_to_room(
        &self,
        message: &Envelope,
        room: &str,
        account_id: Option<&str>,
    ) -> usize {
        let members: Vec<ConnectionId> = match self.rooms.get(room) {
            Some(members) => members.iter().copied().collect(),
            None => return 0,
        };

        let mut sent = 0;
        let mut dead = Vec::new();
        for id in members {
            let Some(info) = self.connections.get(&id) else {
                continue;
            };

            // A member with no account is a catch-all subscriber; a member
            // with an account only sees that account's events.
            if let (Some(filter), Some(member_account)) = (account_id, info.account_id.as_deref())
            {
                if member_account != filter {
                    continue;
                }
            }

            if info.tx.send(message.clone()).is_ok() {
                sent += 1;
            } else {
                dead.push(id);
            }
        }

        for id in dead {
            self.disconnect(id);
        }

        if sent > 0 {
            debug!(room, recipients = sent, event = %message.event, "broadcast to room");
        }
        sent
    }

    /// Broadcast to every connection regardless of room
    pub fn broadcast(&self, message: &Envelope) -> usize {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| *e.key()).collect();

        let mut sent = 0;
        let mut dead = Vec::new();
        for id in ids {
            let Some(info) = self.connections.get(&id) else {
                continue;
            };
            if info.tx.send(message.clone()).is_ok() {
                sent += 1;
            } else {
                dead.push(id);
            }
        }
        for id in dead {
            self.disconnect(id);
        }
        sent
    }

    /// Push a job lifecycle event to the scheduler room
    pub fn broadcast_job_event(&self, event: &str, job: &Job) {
        let data = serde_json::to_value(job).unwrap_or_else(|_| json!({"job_id": job.job_id}));
        let message = create_message(event, data, job.account_id.clone());
        self.broadcast_to_room(&message, "scheduler", job.account_id.as_deref());
    }

    /// Push a scheduler run/stop status change
    pub fn broadcast_scheduler_status(&self, running: bool, active_jobs_count: usize) {
        let message = create_message(
            EVENT_SCHEDULER_STATUS,
            json!({"running": running, "active_jobs_count": active_jobs_count}),
            None,
        );
        self.broadcast_to_room(&message, "scheduler", None);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_count(&self, room: &str) -> usize {
        self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::message::EVENT_JOB_UPDATED;
    use serde_json::json;

    fn ping() -> Envelope {
        create_message("ping", json!({}), None)
    }

    #[test]
    fn test_connect_disconnect() {
        let hub = FanOutHub::new();
        let (id, _rx) = hub.connect("scheduler", None);

        assert_eq!(hub.connection_count(), 1);
        assert_eq!(hub.room_count("scheduler"), 1);

        hub.disconnect(id);
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.room_count("scheduler"), 0);

        // Idempotent
        hub.disconnect(id);
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn test_broadcast_to_room_scopes_by_room() {
        let hub = FanOutHub::new();
        let (_a, mut rx_a) = hub.connect("scheduler", None);
        let (_b, mut rx_b) = hub.connect("dashboard", None);

        let sent = hub.broadcast_to_room(&ping(), "scheduler", None);
        assert_eq!(sent, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_account_filter() {
        let hub = FanOutHub::new();
        let (_catch_all, mut rx_all) = hub.connect("scheduler", None);
        let (_mine, mut rx_mine) = hub.connect("scheduler", Some("acct".to_string()));
        let (_other, mut rx_other) = hub.connect("scheduler", Some("someone".to_string()));

        let sent = hub.broadcast_to_room(&ping(), "scheduler", Some("acct"));
        assert_eq!(sent, 2);
        // Catch-all and matching subscriber receive; the other account does not
        assert!(rx_all.try_recv().is_ok());
        assert!(rx_mine.try_recv().is_ok());
        assert!(rx_other.try_recv().is_err());
    }

    #[test]
    fn test_unfiltered_broadcast_reaches_everyone_in_room() {
        let hub = FanOutHub::new();
        let (_a, mut rx_a) = hub.connect("scheduler", Some("acct".to_string()));
        let (_b, mut rx_b) = hub.connect("scheduler", None);

        let sent = hub.broadcast_to_room(&ping(), "scheduler", None);
        assert_eq!(sent, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_dead_subscriber_is_dropped_after_broadcast() {
        let hub = FanOutHub::new();
        let (_live, _rx_live) = hub.connect("scheduler", None);
        let (_dead, rx_dead) = hub.connect("scheduler", None);
        drop(rx_dead);

        let sent = hub.broadcast_to_room(&ping(), "scheduler", None);
        assert_eq!(sent, 1);
        assert_eq!(hub.connection_count(), 1);
    }

    #[test]
    fn test_job_event_routes_to_scheduler_room() {
        use crate::models::{JobPriority, Platform};
        use chrono::Utc;

        let hub = FanOutHub::new();
        let (_id, mut rx) = hub.connect("scheduler", None);

        let job = Job::new(
            Some("acct".to_string()),
            "hello",
            Utc::now(),
            JobPriority::Normal,
            Platform::Threads,
            3,
            None,
        );
        hub.broadcast_job_event(EVENT_JOB_UPDATED, &job);

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.event, EVENT_JOB_UPDATED);
        assert_eq!(msg.account_id.as_deref(), Some("acct"));
        assert_eq!(msg.data["job_id"], job.job_id);
    }
}
