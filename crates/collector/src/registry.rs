//! At most one running collection per (video, kind).
//!
//! An entry lives exactly as long as its [`Ticket`]: the holder unregisters
//! by dropping it. [`CollectionRegistry::cancel`] only asks the holder to
//! stop, so the key stays claimed until the cancelled task has finished.

use domain::CollectionKind;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TicketKey {
    video_id: String,
    kind: CollectionKind,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<TicketKey, CancellationToken>,
}

/// Shared table of in-flight collections.
///
/// Cloning is cheap and every clone sees the same table.
#[derive(Clone, Default)]
pub struct CollectionRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl CollectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `(video_id, kind)`. Returns `None` while a ticket for the same
    /// key is held, including one that was cancelled but not yet dropped.
    pub fn try_register(&self, video_id: &str, kind: CollectionKind) -> Option<Ticket> {
        let key = TicketKey {
            video_id: video_id.to_string(),
            kind,
        };
        let mut state = self.lock();
        if state.entries.contains_key(&key) {
            return None;
        }
        let token = CancellationToken::new();
        state.entries.insert(key.clone(), token.clone());
        Some(Ticket {
            key,
            token,
            registry: self.clone(),
        })
    }

    /// Cancel the ticket for `(video_id, kind)`. Returns false when none is
    /// held or it was already cancelled. The key is freed once the holder
    /// drops the ticket.
    pub fn cancel(&self, video_id: &str, kind: CollectionKind) -> bool {
        let key = TicketKey {
            video_id: video_id.to_string(),
            kind,
        };
        match self.lock().entries.get(&key) {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn is_registered(&self, video_id: &str, kind: CollectionKind) -> bool {
        let key = TicketKey {
            video_id: video_id.to_string(),
            kind,
        };
        self.lock().entries.contains_key(&key)
    }

    pub fn active_count(&self) -> usize {
        self.lock().entries.len()
    }

    /// Cancel every held ticket. Entries go away as their holders finish.
    pub fn cancel_all(&self) {
        for token in self.lock().entries.values() {
            token.cancel();
        }
    }

    fn release(&self, key: &TicketKey) {
        self.lock().entries.remove(key);
    }
}

/// Exclusive claim on a `(video, kind)` pair, unregistered when dropped.
pub struct Ticket {
    key: TicketKey,
    token: CancellationToken,
    registry: CollectionRegistry,
}

impl Ticket {
    pub fn video_id(&self) -> &str {
        &self.key.video_id
    }

    pub fn kind(&self) -> CollectionKind {
        self.key.kind
    }

    /// Fires on [`CollectionRegistry::cancel`] or when the registry shuts down
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}

impl std::fmt::Debug for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticket")
            .field("video_id", &self.key.video_id)
            .field("kind", &self.key.kind)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    #[test]
    fn test_register_is_exclusive_per_key() {
        let registry = CollectionRegistry::new();
        let ticket = registry.try_register("v1", CollectionKind::Active).unwrap();
        assert_eq!(ticket.video_id(), "v1");
        assert_eq!(ticket.kind(), CollectionKind::Active);

        assert!(registry.try_register("v1", CollectionKind::Active).is_none());
        // Other kind and other video are independent
        let archive = registry.try_register("v1", CollectionKind::Archive);
        let other = registry.try_register("v2", CollectionKind::Active);
        assert!(archive.is_some());
        assert!(other.is_some());
        assert_eq!(registry.active_count(), 3);
    }

    #[test]
    fn test_drop_releases_ticket() {
        let registry = CollectionRegistry::new();
        let ticket = registry.try_register("v1", CollectionKind::Archive).unwrap();
        assert!(registry.is_registered("v1", CollectionKind::Archive));

        drop(ticket);
        assert!(!registry.is_registered("v1", CollectionKind::Archive));
        assert!(registry.try_register("v1", CollectionKind::Archive).is_some());
    }

    #[test]
    fn test_cancel_signals_holder() {
        let registry = CollectionRegistry::new();
        let ticket = registry.try_register("v1", CollectionKind::Active).unwrap();

        assert!(registry.cancel("v1", CollectionKind::Active));
        assert!(ticket.cancellation_token().is_cancelled());
        // Still claimed until the holder lets go
        assert!(registry.is_registered("v1", CollectionKind::Active));
        assert!(!registry.cancel("v1", CollectionKind::Active));

        drop(ticket);
        assert!(!registry.is_registered("v1", CollectionKind::Active));
        assert!(!registry.cancel("v1", CollectionKind::Active));
    }

    #[test]
    fn test_cancelled_key_stays_claimed_until_holder_exits() {
        let registry = CollectionRegistry::new();
        let stopping = registry.try_register("v1", CollectionKind::Active).unwrap();
        registry.cancel("v1", CollectionKind::Active);

        assert!(registry.try_register("v1", CollectionKind::Active).is_none());
        drop(stopping);

        let fresh = registry.try_register("v1", CollectionKind::Active).unwrap();
        assert!(!fresh.cancellation_token().is_cancelled());
        assert!(registry.is_registered("v1", CollectionKind::Active));
    }

    #[test]
    fn test_cancel_all() {
        let registry = CollectionRegistry::new();
        let a = registry.try_register("v1", CollectionKind::Active).unwrap();
        let b = registry.try_register("v2", CollectionKind::Archive).unwrap();

        registry.cancel_all();
        assert!(a.cancellation_token().is_cancelled());
        assert!(b.cancellation_token().is_cancelled());

        drop((a, b));
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_concurrent_register_single_winner() {
        let registry = CollectionRegistry::new();
        let barrier = Barrier::new(16);

        let winners: Vec<Ticket> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        registry.try_register("v1", CollectionKind::Active)
                    })
                })
                .collect();
            handles
                .into_iter()
                .filter_map(|h| h.join().unwrap())
                .collect()
        });

        assert_eq!(winners.len(), 1);
        assert_eq!(registry.active_count(), 1);
    }
}
