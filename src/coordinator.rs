//! Coordinator actor implementation
//!
//! The single serial authority over membership and routing. Every change to
//! the directory happens inside `run`, one command at a time, so nothing in
//! here needs a lock.
//!
//! Mailbox writes are always `try_send`. A connection whose mailbox is full
//! or closed is evicted on the spot instead of being waited on, so one slow
//! reader can never hold up delivery to everyone else.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::directory::Directory;
use crate::message::{DeliveryRequest, Envelope, Route};
use crate::types::{ClientId, Payload, Roster, SessionId};

/// Commands sent from connection tasks to the coordinator
#[derive(Debug)]
pub enum Command {
    /// Connection finished its handshake
    Register { connection: Connection },
    /// Connection's read loop exited
    ///
    /// `session` names the instance that is leaving; a notice from a handle
    /// that never made it into the directory leaves the live entry alone.
    Unregister {
        client_id: ClientId,
        session: SessionId,
    },
    /// Route a payload
    Deliver(DeliveryRequest),
    /// Read-only roster query
    Roster { reply: oneshot::Sender<Roster> },
}

/// The coordinator actor
///
/// Owns the directory and the receiving end of the control channel.
pub struct Coordinator {
    directory: Directory,
    receiver: mpsc::Receiver<Command>,
}

impl Coordinator {
    pub fn new(receiver: mpsc::Receiver<Command>) -> Self {
        Self {
            directory: Directory::new(),
            receiver,
        }
    }

    /// Run the coordinator event loop
    ///
    /// Processes commands in receipt order until every sender is dropped.
    pub async fn run(mut self) {
        info!("Coordinator started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("Coordinator shutting down");
    }

    /// Process a single command
    pub fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Register { connection } => self.handle_register(connection),
            Command::Unregister { client_id, session } => {
                self.handle_unregister(&client_id, session)
            }
            Command::Deliver(request) => self.handle_deliver(request),
            Command::Roster { reply } => {
                let _ = reply.send(self.directory.roster());
            }
        }
    }

    fn handle_register(&mut self, connection: Connection) {
        let client_id = connection.id.clone();
        let display_name = connection.display_name.clone();

        if let Err(rejected) = self.directory.insert(connection) {
            warn!(
                "Duplicate registration for {} ignored ({})",
                rejected.id, rejected.display_name
            );
            return;
        }

        info!(
            "Client {} ({}) joined, {} online",
            client_id,
            display_name,
            self.directory.len()
        );
        self.broadcast_roster(Some(&client_id));
    }

    fn handle_unregister(&mut self, client_id: &ClientId, session: SessionId) {
        if self.directory.remove_session(client_id, session).is_none() {
            debug!(
                "Unregister for {} (session {}) ignored, not registered",
                client_id, session
            );
            return;
        }

        info!("Client {} left, {} online", client_id, self.directory.len());
        self.broadcast_roster(None);
    }

    fn handle_deliver(&mut self, request: DeliveryRequest) {
        let DeliveryRequest { payload, route } = request;

        let failed = match route {
            Route::Broadcast => self.fan_out(|_| payload.clone()),
            Route::Direct(target) => {
                let Some(connection) = self.directory.get(&target) else {
                    debug!("Recipient {} is offline, message dropped", target);
                    return;
                };
                match connection.try_deliver(payload) {
                    Ok(()) => Vec::new(),
                    Err(e) => {
                        warn!("Delivery to {} failed: {}", target, e);
                        vec![target]
                    }
                }
            }
        };

        if self.evict(failed) {
            self.broadcast_roster(None);
        }
    }

    /// Send the current roster to every member
    ///
    /// The copy for `joiner` also carries its own identity. Members whose
    /// mailbox rejects the roster are evicted and the (now smaller) roster
    /// goes out again, until one round reaches everybody.
    fn broadcast_roster(&mut self, joiner: Option<&ClientId>) {
        let mut joiner = joiner.cloned();

        loop {
            let roster = self.directory.roster();
            let shared = match Envelope::roster(roster.clone(), None).encode() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Failed to encode roster: {}", e);
                    return;
                }
            };
            let personal = joiner.as_ref().and_then(|id| {
                Envelope::roster(roster, Some(id.clone()))
                    .encode()
                    .ok()
                    .map(|payload| (id.clone(), payload))
            });

            let failed = self.fan_out(|connection| match &personal {
                Some((id, payload)) if *id == connection.id => payload.clone(),
                _ => shared.clone(),
            });

            if !self.evict(failed) {
                return;
            }
            // Join notice already attempted; later rounds are plain updates.
            joiner = None;
        }
    }

    /// Try-enqueue into every live mailbox
    ///
    /// Returns the identities whose mailbox refused the payload.
    fn fan_out<F>(&self, mut payload_for: F) -> Vec<ClientId>
    where
        F: FnMut(&Connection) -> Payload,
    {
        let mut failed = Vec::new();
        for connection in self.directory.iter() {
            if let Err(e) = connection.try_deliver(payload_for(connection)) {
                warn!("Delivery to {} failed: {}", connection.id, e);
                failed.push(connection.id.clone());
            }
        }
        failed
    }

    /// Remove dead consumers, returns whether anyone was evicted
    fn evict(&mut self, ids: Vec<ClientId>) -> bool {
        let mut evicted = false;
        for id in ids {
            if self.directory.remove(&id).is_some() {
                warn!("Client {} evicted, {} online", id, self.directory.len());
                evicted = true;
            }
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{DeliveryType, InboundMessage};

    struct Peer {
        id: ClientId,
        session: SessionId,
        rx: mpsc::Receiver<Payload>,
    }

    impl Peer {
        /// Everything currently queued, without waiting
        fn drain(&mut self) -> Vec<serde_json::Value> {
            let mut out = Vec::new();
            while let Ok(payload) = self.rx.try_recv() {
                out.push(serde_json::from_str(&payload).unwrap());
            }
            out
        }

        fn chats(&mut self) -> Vec<serde_json::Value> {
            self.drain()
                .into_iter()
                .filter(|v| v.get("User").is_none())
                .collect()
        }

        fn leave(&self) -> Command {
            Command::Unregister {
                client_id: self.id.clone(),
                session: self.session,
            }
        }

        fn is_released(&mut self) -> bool {
            while self.rx.try_recv().is_ok() {}
            matches!(
                self.rx.try_recv(),
                Err(mpsc::error::TryRecvError::Disconnected)
            )
        }
    }

    fn coordinator() -> Coordinator {
        let (_tx, rx) = mpsc::channel(8);
        Coordinator::new(rx)
    }

    fn register(coord: &mut Coordinator, id: &str, name: &str, capacity: usize) -> Peer {
        let (tx, rx) = mpsc::channel(capacity);
        let connection = Connection::new(ClientId::from(id), name.to_string(), tx);
        let (id, session) = (connection.id.clone(), connection.session);
        coord.handle_command(Command::Register { connection });
        Peer { id, session, rx }
    }

    fn deliver(coord: &mut Coordinator, from: &str, raw: &str) {
        let inbound = InboundMessage::parse(raw).unwrap();
        let route = inbound.route();
        let payload = Envelope::chat(&ClientId::from(from), inbound)
            .encode()
            .unwrap();
        coord.handle_command(Command::Deliver(DeliveryRequest { payload, route }));
    }

    fn live_ids(coord: &Coordinator) -> Vec<String> {
        coord
            .directory
            .roster()
            .keys()
            .map(|id| id.to_string())
            .collect()
    }

    #[test]
    fn test_register_adds_to_directory() {
        let mut coord = coordinator();
        let _a = register(&mut coord, "a", "alice", 16);
        let _b = register(&mut coord, "b", "bob", 16);

        assert_eq!(live_ids(&coord), vec!["a", "b"]);
    }

    #[test]
    fn test_register_sends_roster_with_own_id_to_joiner() {
        let mut coord = coordinator();
        let mut a = register(&mut coord, "a", "alice", 16);
        a.drain();
        let mut b = register(&mut coord, "b", "bob", 16);

        let to_b = b.drain();
        assert_eq!(to_b.len(), 1);
        assert_eq!(to_b[0]["NowUID"], "b");
        assert_eq!(to_b[0]["User"]["a"], "alice");
        assert_eq!(to_b[0]["User"]["b"], "bob");

        let to_a = a.drain();
        assert_eq!(to_a.len(), 1);
        assert!(to_a[0].get("NowUID").is_none());
        assert_eq!(to_a[0]["User"]["b"], "bob");
    }

    #[test]
    fn test_duplicate_register_ignored() {
        let mut coord = coordinator();
        let mut a = register(&mut coord, "a", "alice", 16);
        let mut impostor = register(&mut coord, "a", "mallory", 16);

        assert_eq!(coord.directory.len(), 1);
        assert_eq!(coord.directory.roster()[&a.id], "alice");
        assert!(impostor.is_released());
        assert!(!a.is_released());
    }

    #[test]
    fn test_unregister_from_rejected_duplicate_keeps_original() {
        let mut coord = coordinator();
        let mut a = register(&mut coord, "a", "alice", 16);
        let impostor = register(&mut coord, "a", "mallory", 16);
        a.drain();

        coord.handle_command(impostor.leave());

        assert_eq!(live_ids(&coord), vec!["a"]);
        assert_eq!(coord.directory.roster()[&a.id], "alice");
        assert!(a.drain().is_empty());
        assert!(!a.is_released());

        coord.handle_command(a.leave());
        assert!(live_ids(&coord).is_empty());
        assert!(a.is_released());
    }

    #[test]
    fn test_broadcast_reaches_everyone_including_sender() {
        let mut coord = coordinator();
        let mut a = register(&mut coord, "a", "alice", 16);
        let mut b = register(&mut coord, "b", "bob", 16);
        let mut c = register(&mut coord, "c", "carol", 16);

        deliver(&mut coord, "a", r#"{"Content":"hi","MsgTo":"ALL"}"#);

        for peer in [&mut a, &mut b, &mut c] {
            let chats = peer.chats();
            assert_eq!(chats.len(), 1, "peer {}", peer.id);
            assert_eq!(chats[0]["Content"], "hi");
            assert_eq!(chats[0]["From"], "a");
            assert_eq!(chats[0]["Rtype"], DeliveryType::Broadcast as u8);
        }
    }

    #[test]
    fn test_direct_reaches_only_target() {
        let mut coord = coordinator();
        let mut a = register(&mut coord, "a", "alice", 16);
        let mut b = register(&mut coord, "b", "bob", 16);
        let mut c = register(&mut coord, "c", "carol", 16);

        deliver(&mut coord, "a", r#"{"Content":"yo","MsgTo":"b"}"#);

        let to_b = b.chats();
        assert_eq!(to_b.len(), 1);
        assert_eq!(to_b[0]["Content"], "yo");
        assert_eq!(to_b[0]["Rtype"], 2);
        assert!(a.chats().is_empty());
        assert!(c.chats().is_empty());
    }

    #[test]
    fn test_unregister_removes_and_updates_roster() {
        let mut coord = coordinator();
        let mut a = register(&mut coord, "a", "alice", 16);
        let mut b = register(&mut coord, "b", "bob", 16);
        let mut c = register(&mut coord, "c", "carol", 16);
        a.drain();
        c.drain();

        coord.handle_command(b.leave());

        assert_eq!(live_ids(&coord), vec!["a", "c"]);
        assert!(b.is_released());
        for peer in [&mut a, &mut c] {
            let update = peer.drain();
            assert_eq!(update.len(), 1);
            assert!(update[0]["User"].get("b").is_none());
            assert_eq!(update[0]["User"]["a"], "alice");
            assert_eq!(update[0]["User"]["c"], "carol");
        }
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let mut coord = coordinator();
        let mut a = register(&mut coord, "a", "alice", 16);
        let b = register(&mut coord, "b", "bob", 16);
        a.drain();

        coord.handle_command(b.leave());
        assert_eq!(a.drain().len(), 1);

        coord.handle_command(b.leave());
        assert!(a.drain().is_empty());
        assert_eq!(live_ids(&coord), vec!["a"]);
    }

    #[test]
    fn test_saturated_mailbox_evicted_without_blocking_others() {
        let mut coord = coordinator();
        let mut a = register(&mut coord, "a", "alice", 16);
        let mut b = register(&mut coord, "b", "bob", 16);
        // Capacity 1: the join roster fills it and nothing drains it.
        let mut c = register(&mut coord, "c", "carol", 1);

        deliver(&mut coord, "a", r#"{"Content":"hi","MsgTo":"ALL"}"#);

        assert_eq!(live_ids(&coord), vec!["a", "b"]);
        assert!(c.is_released());
        for peer in [&mut a, &mut b] {
            let msgs = peer.drain();
            let chats: Vec<_> = msgs.iter().filter(|v| v.get("User").is_none()).collect();
            assert_eq!(chats.len(), 1);
            assert_eq!(chats[0]["Content"], "hi");
            let last = msgs.last().unwrap();
            assert!(last["User"].get("c").is_none());
        }
    }

    #[test]
    fn test_closed_mailbox_evicted_on_direct() {
        let mut coord = coordinator();
        let mut a = register(&mut coord, "a", "alice", 16);
        let b = register(&mut coord, "b", "bob", 16);
        a.drain();
        drop(b.rx);

        deliver(&mut coord, "a", r#"{"Content":"yo","MsgTo":"b"}"#);

        assert_eq!(live_ids(&coord), vec!["a"]);
        let update = a.drain();
        assert_eq!(update.len(), 1);
        assert!(update[0]["User"].get("b").is_none());
    }

    #[test]
    fn test_direct_to_just_evicted_is_silent() {
        let mut coord = coordinator();
        let mut a = register(&mut coord, "a", "alice", 16);
        let mut b = register(&mut coord, "b", "bob", 16);
        let c = register(&mut coord, "c", "carol", 1);

        deliver(&mut coord, "a", r#"{"Content":"hi","MsgTo":"ALL"}"#);
        assert!(!coord.directory.contains(&c.id));
        a.drain();
        b.drain();

        deliver(&mut coord, "a", r#"{"Content":"late","MsgTo":"c"}"#);

        assert!(a.drain().is_empty());
        assert!(b.drain().is_empty());
        assert_eq!(live_ids(&coord), vec!["a", "b"]);
    }

    #[test]
    fn test_direct_to_unknown_is_noop() {
        let mut coord = coordinator();
        let mut a = register(&mut coord, "a", "alice", 16);
        a.drain();

        deliver(&mut coord, "a", r#"{"Content":"?","MsgTo":"ghost"}"#);

        assert!(a.drain().is_empty());
        assert_eq!(live_ids(&coord), vec!["a"]);
    }

    #[test]
    fn test_roster_failure_cascades_until_consistent() {
        let mut coord = coordinator();
        let mut a = register(&mut coord, "a", "alice", 16);
        let b = register(&mut coord, "b", "bob", 16);
        let c = register(&mut coord, "c", "carol", 16);
        a.drain();
        drop(c.rx);

        coord.handle_command(b.leave());

        assert_eq!(live_ids(&coord), vec!["a"]);
        let updates = a.drain();
        let last = updates.last().unwrap();
        assert_eq!(last["User"].as_object().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_answers_roster_query() {
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(Coordinator::new(rx).run());

        let (mailbox, _mailbox_rx) = mpsc::channel(4);
        tx.send(Command::Register {
            connection: Connection::new(ClientId::from("a"), "alice".to_string(), mailbox),
        })
        .await
        .unwrap();

        let (reply, roster) = oneshot::channel();
        tx.send(Command::Roster { reply }).await.unwrap();
        let roster = roster.await.unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[&ClientId::from("a")], "alice");
    }
}
