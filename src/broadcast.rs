use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::protocol::Frame;
use crate::registry::{ClientHandle, Outgoing, Registry};
use crate::types::ConnectionId;

/// Fans frames out to every registered client.
///
/// Delivery always works from a registry snapshot: the lock is held only to
/// copy the entries, never while queueing writes. A recipient whose writer
/// has gone away is pruned from the registry and does not stop delivery to
/// the rest.
///
/// Roster passes take turns: a pass snapshots and queues under one lock, so
/// every client's queue receives rosters in snapshot order and the last one
/// it sees matches the registry.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
    roster_turn: Arc<Mutex<()>>,
}

struct Delivery {
    delivered: usize,
    failed: Vec<(String, ConnectionId)>,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            roster_turn: Arc::new(Mutex::new(())),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Deliver `frame` to everyone registered right now, the sender included.
    /// Returns how many recipients accepted it.
    pub fn broadcast(&self, frame: &Frame<'_>) -> usize {
        let snapshot = self.registry.snapshot();
        let delivery = deliver(&snapshot, Arc::from(frame.encode()));

        if self.prune(delivery.failed) {
            self.broadcast_roster();
        }
        delivery.delivered
    }

    /// Send the current roster to everyone on it.
    ///
    /// Each pass sends to one snapshot exactly once. Failures found during a
    /// pass are pruned and the next pass announces the smaller roster; a pass
    /// only follows removals, so the loop ends once a pass delivers cleanly.
    pub fn broadcast_roster(&self) {
        loop {
            let delivery = {
                // `deliver` only does non-blocking enqueues, so holding this
                // across it never waits on a socket.
                let _turn = self.roster_turn.lock();
                let snapshot = self.registry.snapshot();
                let roster = Frame::roster(snapshot.iter().map(|(name, _)| name.as_str()));
                debug!(clients = snapshot.len(), "broadcasting roster");
                deliver(&snapshot, Arc::from(roster.encode()))
            };
            if !self.prune(delivery.failed) {
                break;
            }
        }
    }

    /// Evict `name` and announce the smaller roster.
    ///
    /// The evicted connection's outbound queue loses its last sender, so its
    /// writer stops and the handler closes the socket. Returns false if the
    /// name was not registered.
    pub fn remove(&self, name: &str) -> bool {
        let Some(handle) = self.registry.remove(name) else {
            return false;
        };
        info!(id = %handle.id(), %name, "client removed");
        drop(handle);
        self.broadcast_roster();
        true
    }

    /// Remove failed recipients. True if anything actually left the registry.
    fn prune(&self, failed: Vec<(String, ConnectionId)>) -> bool {
        let mut removed = false;
        for (name, id) in failed {
            if self.registry.remove_connection(&name, id) {
                warn!(%id, %name, "pruned unreachable client");
                removed = true;
            }
        }
        removed
    }
}

fn deliver(snapshot: &[(String, ClientHandle)], line: Outgoing) -> Delivery {
    let mut delivery = Delivery {
        delivered: 0,
        failed: Vec::new(),
    };

    for (name, handle) in snapshot {
        match handle.send(Arc::clone(&line)) {
            Ok(()) => delivery.delivered += 1,
            Err(e) => {
                warn!(id = %handle.id(), %name, error = %e, "delivery failed");
                delivery.failed.push((name.clone(), handle.id()));
            }
        }
    }
    delivery
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use tokio::sync::mpsc;

    use super::*;

    fn join(registry: &Registry, id: u64, name: &str) -> mpsc::Receiver<Outgoing> {
        join_with_queue(registry, id, name, 64)
    }

    fn join_with_queue(
        registry: &Registry,
        id: u64,
        name: &str,
        capacity: usize,
    ) -> mpsc::Receiver<Outgoing> {
        let (handle, rx) = ClientHandle::channel(ConnectionId::new(id), capacity);
        registry.register(name, handle).unwrap();
        rx
    }

    fn drain(rx: &mut mpsc::Receiver<Outgoing>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line.to_string());
        }
        lines
    }

    #[test]
    fn every_client_gets_one_copy_including_sender() {
        let registry = Arc::new(Registry::new());
        let mut ann = join(&registry, 1, "Ann");
        let mut ben = join(&registry, 2, "Ben");
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let delivered = broadcaster.broadcast(&Frame::text("Ann: hi"));

        assert_eq!(delivered, 2);
        assert_eq!(drain(&mut ann), vec!["tAnn: hi\n"]);
        assert_eq!(drain(&mut ben), vec!["tAnn: hi\n"]);
    }

    #[test]
    fn failed_recipient_is_pruned_and_others_get_roster() {
        let registry = Arc::new(Registry::new());
        let mut ann = join(&registry, 1, "Ann");
        let ben = join(&registry, 2, "Ben");
        let mut cat = join(&registry, 3, "Cat");
        drop(ben);
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let delivered = broadcaster.broadcast(&Frame::text("Ann: hi"));

        assert_eq!(delivered, 2);
        assert_eq!(registry.names(), vec!["Ann", "Cat"]);
        assert_eq!(drain(&mut ann), vec!["tAnn: hi\n", "nAnn Cat\n"]);
        assert_eq!(drain(&mut cat), vec!["tAnn: hi\n", "nAnn Cat\n"]);
    }

    #[test]
    fn roster_passes_stop_once_delivery_is_clean() {
        let registry = Arc::new(Registry::new());
        let mut ann = join(&registry, 1, "Ann");
        drop(join(&registry, 2, "Ben"));
        drop(join(&registry, 3, "Cat"));
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        broadcaster.broadcast_roster();

        assert_eq!(registry.names(), vec!["Ann"]);
        assert_eq!(drain(&mut ann), vec!["nAnn Ben Cat\n", "nAnn\n"]);
    }

    #[test]
    fn recipient_with_full_queue_is_pruned() {
        let registry = Arc::new(Registry::new());
        let mut ann = join(&registry, 1, "Ann");
        // Ben never drains, and his queue holds a single line.
        let _ben = join_with_queue(&registry, 2, "Ben", 1);
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        assert_eq!(broadcaster.broadcast(&Frame::text("Ann: one")), 2);
        assert_eq!(broadcaster.broadcast(&Frame::text("Ann: two")), 1);

        assert_eq!(registry.names(), vec!["Ann"]);
        assert_eq!(
            drain(&mut ann),
            vec!["tAnn: one\n", "tAnn: two\n", "nAnn\n"]
        );
    }

    #[test]
    fn remove_evicts_and_announces() {
        let registry = Arc::new(Registry::new());
        let mut ann = join(&registry, 1, "Ann");
        let mut ben = join(&registry, 2, "Ben");
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        assert!(broadcaster.remove("Ben"));
        assert!(!broadcaster.remove("Ben"));

        assert_eq!(registry.names(), vec!["Ann"]);
        assert_eq!(drain(&mut ann), vec!["nAnn\n"]);
        // Ben's queue lost its only sender.
        assert!(drain(&mut ben).is_empty());
        assert!(matches!(
            ben.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn last_roster_matches_registry_under_concurrent_churn() {
        const OBSERVERS: u64 = 4;
        const CHURNERS: u64 = 8;
        const ROUNDS: u64 = 50;

        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let mut observers: Vec<_> = (0..OBSERVERS)
            .map(|i| join_with_queue(&registry, i, &format!("Obs{i}"), 4096))
            .collect();

        let start = Arc::new(Barrier::new(CHURNERS as usize));
        let threads: Vec<_> = (0..CHURNERS)
            .map(|t| {
                let registry = Arc::clone(&registry);
                let broadcaster = broadcaster.clone();
                let start = Arc::clone(&start);
                std::thread::spawn(move || {
                    start.wait();
                    for round in 0..ROUNDS {
                        let id = ConnectionId::new(1000 + t * ROUNDS + round);
                        let name = format!("User{t}");
                        let (handle, rx) = ClientHandle::channel(id, 4096);
                        registry.register(&name, handle).unwrap();
                        broadcaster.broadcast_roster();
                        assert!(registry.remove_connection(&name, id));
                        broadcaster.broadcast_roster();
                        drop(rx);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let expected = Frame::roster(registry.names()).encode();
        assert_eq!(expected, "nObs0 Obs1 Obs2 Obs3\n");
        for rx in &mut observers {
            let lines = drain(rx);
            assert_eq!(lines.last(), Some(&expected));
        }
    }

    #[test]
    fn empty_registry_is_fine() {
        let broadcaster = Broadcaster::new(Arc::new(Registry::new()));
        assert_eq!(broadcaster.broadcast(&Frame::text("nobody: here")), 0);
        broadcaster.broadcast_roster();
    }
}
