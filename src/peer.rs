//! Tracks currently-known remote peers by id and role.

use std::collections::HashMap;

use crate::connection::Role;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub peer_id: String,
    pub role: Role,
}

/// Returns `true` when `a` and `b` are complementary roles (one appender,
/// one reader). Same-role pairs are never connected.
pub fn is_complementary(a: Role, b: Role) -> bool {
    !matches!((a, b), (Role::Appender, Role::Appender) | (Role::Reader, Role::Reader))
}

/// Registry of currently-known peers, keyed by `peerId`.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<String, PeerInfo>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, peer: PeerInfo) {
        self.peers.insert(peer.peer_id.clone(), peer);
    }

    pub fn remove(&mut self, peer_id: &str) -> Option<PeerInfo> {
        self.peers.remove(peer_id)
    }

    pub fn get(&self, peer_id: &str) -> Option<&PeerInfo> {
        self.peers.get(peer_id)
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerInfo> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complementary_roles() {
        assert!(is_complementary(Role::Appender, Role::Reader));
        assert!(is_complementary(Role::Reader, Role::Appender));
        assert!(!is_complementary(Role::Appender, Role::Appender));
        assert!(!is_complementary(Role::Reader, Role::Reader));
    }

    #[test]
    fn registry_insert_and_remove() {
        let mut reg = PeerRegistry::new();
        reg.insert(PeerInfo {
            peer_id: "p1".into(),
            role: Role::Reader,
        });
        assert!(reg.contains("p1"));
        assert_eq!(reg.len(), 1);

        let removed = reg.remove("p1").unwrap();
        assert_eq!(removed.peer_id, "p1");
        assert!(reg.is_empty());
    }
}
