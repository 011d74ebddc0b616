//! In-process storage for challenges and credentials
//!
//! Both stores are built on `DashMap`, whose entry API holds the shard lock
//! for the key while we decide what to do. That gives the same guarantees as
//! the SQLite implementations: one winner per challenge consume, and an
//! atomic uniqueness check on credential insert.
//!
//! Nothing here survives a restart.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::db::models::{CeremonyKind, ChallengeRecord, CredentialRecord, Transport};
use crate::db::{
    challenge_window, generate_nonce, ChallengeStore, CredentialRepository, DEFAULT_CHALLENGE_TTL,
};
use crate::error::{CeremonyError, StorageError};

/// Challenge store keyed by (identity id, ceremony kind)
pub struct MemoryChallengeStore {
    challenges: DashMap<(String, CeremonyKind), ChallengeRecord>,
    ttl: Duration,
}

impl MemoryChallengeStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            challenges: DashMap::new(),
            ttl,
        }
    }

    /// Number of pending challenges
    pub fn len(&self) -> usize {
        self.challenges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }
}

impl Default for MemoryChallengeStore {
    fn default() -> Self {
        Self::new(DEFAULT_CHALLENGE_TTL)
    }
}

impl std::fmt::Debug for MemoryChallengeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChallengeStore")
            .field("pending", &self.challenges.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[async_trait]
impl ChallengeStore for MemoryChallengeStore {
    async fn issue(
        &self,
        identity_id: &str,
        kind: CeremonyKind,
    ) -> Result<ChallengeRecord, CeremonyError> {
        let (created_at, expires_at) = challenge_window(self.ttl)?;
        let record = ChallengeRecord {
            identity_id: identity_id.to_string(),
            kind,
            nonce: generate_nonce(),
            created_at,
            expires_at,
        };

        self.challenges
            .insert((identity_id.to_string(), kind), record.clone());

        Ok(record)
    }

    async fn consume(
        &self,
        identity_id: &str,
        kind: CeremonyKind,
        nonce: &[u8],
    ) -> Result<ChallengeRecord, CeremonyError> {
        match self.challenges.entry((identity_id.to_string(), kind)) {
            Entry::Vacant(_) => Err(CeremonyError::NoActiveChallenge),
            Entry::Occupied(entry) => {
                if entry.get().is_expired_at(Utc::now()) {
                    entry.remove();
                    return Err(CeremonyError::ChallengeExpired);
                }
                if entry.get().nonce.as_slice() != nonce {
                    return Err(CeremonyError::ChallengeMismatch);
                }
                Ok(entry.remove())
            }
        }
    }

    async fn purge_expired(&self) -> Result<u64, StorageError> {
        let now = Utc::now();
        let before = self.challenges.len();
        self.challenges.retain(|_, record| !record.is_expired_at(now));
        Ok(before.saturating_sub(self.challenges.len()) as u64)
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}

struct StoredCredential {
    /// Insertion sequence, used to list credentials in registration order
    seq: u64,
    record: CredentialRecord,
}

/// Credential repository keyed by credential id
#[derive(Default)]
pub struct MemoryCredentialRepository {
    credentials: DashMap<Vec<u8>, StoredCredential>,
    next_seq: AtomicU64,
}

impl MemoryCredentialRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

impl std::fmt::Debug for MemoryCredentialRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCredentialRepository")
            .field("credentials", &self.credentials.len())
            .finish()
    }
}

#[async_trait]
impl CredentialRepository for MemoryCredentialRepository {
    async fn find_by_credential_id(
        &self,
        credential_id: &[u8],
    ) -> Result<Option<CredentialRecord>, StorageError> {
        Ok(self
            .credentials
            .get(credential_id)
            .map(|entry| entry.record.clone()))
    }

    async fn list_for_identity(
        &self,
        identity_id: &str,
    ) -> Result<Vec<CredentialRecord>, StorageError> {
        let mut owned: Vec<(u64, CredentialRecord)> = self
            .credentials
            .iter()
            .filter(|entry| entry.record.identity_id == identity_id)
            .map(|entry| (entry.seq, entry.record.clone()))
            .collect();
        owned.sort_by_key(|(seq, _)| *seq);

        Ok(owned.into_iter().map(|(_, record)| record).collect())
    }

    async fn insert(&self, mut record: CredentialRecord) -> Result<(), CeremonyError> {
        record.transports.retain(|t| *t != Transport::Unknown);

        match self.credentials.entry(record.credential_id.clone()) {
            Entry::Occupied(_) => Err(CeremonyError::DuplicateCredential),
            Entry::Vacant(slot) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                slot.insert(StoredCredential { seq, record });
                Ok(())
            }
        }
    }

    async fn update_counter(
        &self,
        credential_id: &[u8],
        new_counter: u32,
    ) -> Result<(), CeremonyError> {
        let mut entry = self
            .credentials
            .get_mut(credential_id)
            .ok_or(CeremonyError::UnknownCredential)?;
        let stored = entry.record.counter;
        if stored != 0 && new_counter <= stored {
            return Err(CeremonyError::PossibleCloneDetected {
                stored,
                reported: new_counter,
            });
        }
        entry.record.counter = new_counter;
        entry.record.last_used_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(id: &[u8], identity_id: &str) -> CredentialRecord {
        CredentialRecord {
            credential_id: id.to_vec(),
            identity_id: identity_id.to_string(),
            public_key: vec![1, 2, 3],
            algorithm: -7,
            counter: 0,
            transports: Vec::new(),
            created_at: Utc::now(),
            last_used_at: None,
        }
    }

    #[tokio::test]
    async fn test_consume_is_single_use() {
        let store = MemoryChallengeStore::default();
        let issued = store.issue("u1", CeremonyKind::Registration).await.unwrap();

        store
            .consume("u1", CeremonyKind::Registration, &issued.nonce)
            .await
            .unwrap();

        for nonce in [issued.nonce.clone(), vec![0u8; 32]] {
            let result = store.consume("u1", CeremonyKind::Registration, &nonce).await;
            assert!(matches!(result, Err(CeremonyError::NoActiveChallenge)));
        }
    }

    #[tokio::test]
    async fn test_expired_regardless_of_nonce() {
        let store = MemoryChallengeStore::new(Duration::ZERO);

        let issued = store.issue("u1", CeremonyKind::Authentication).await.unwrap();
        let wrong = store
            .consume("u1", CeremonyKind::Authentication, b"wrong")
            .await;
        assert!(matches!(wrong, Err(CeremonyError::ChallengeExpired)));

        let issued_again = store.issue("u1", CeremonyKind::Authentication).await.unwrap();
        assert_ne!(issued.nonce, issued_again.nonce);
        let right = store
            .consume("u1", CeremonyKind::Authentication, &issued_again.nonce)
            .await;
        assert!(matches!(right, Err(CeremonyError::ChallengeExpired)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_reissue_replaces() {
        let store = MemoryChallengeStore::default();
        let first = store.issue("u1", CeremonyKind::Registration).await.unwrap();
        let second = store.issue("u1", CeremonyKind::Registration).await.unwrap();
        assert_eq!(store.len(), 1);

        let stale = store
            .consume("u1", CeremonyKind::Registration, &first.nonce)
            .await;
        assert!(matches!(stale, Err(CeremonyError::ChallengeMismatch)));
        store
            .consume("u1", CeremonyKind::Registration, &second.nonce)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryChallengeStore::new(Duration::ZERO);
        store.issue("u1", CeremonyKind::Registration).await.unwrap();
        store.issue("u2", CeremonyKind::Registration).await.unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 2);
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consume_has_single_winner() {
        let store = Arc::new(MemoryChallengeStore::default());
        let issued = store.issue("u1", CeremonyKind::Registration).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                let nonce = issued.nonce.clone();
                tokio::spawn(async move {
                    store
                        .consume("u1", CeremonyKind::Registration, &nonce)
                        .await
                        .is_ok()
                })
            })
            .collect();

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_duplicate_credential_across_identities() {
        let repo = MemoryCredentialRepository::new();
        repo.insert(record(b"cred", "u1")).await.unwrap();

        let result = repo.insert(record(b"cred", "u2")).await;
        assert!(matches!(result, Err(CeremonyError::DuplicateCredential)));
        assert_eq!(repo.len(), 1);
        assert_eq!(
            repo.find_by_credential_id(b"cred")
                .await
                .unwrap()
                .unwrap()
                .identity_id,
            "u1"
        );
    }

    #[tokio::test]
    async fn test_list_in_insertion_order() {
        let repo = MemoryCredentialRepository::new();
        for id in [b"c3".as_slice(), b"c1", b"c2"] {
            repo.insert(record(id, "u1")).await.unwrap();
        }
        repo.insert(record(b"other", "u2")).await.unwrap();

        let ids: Vec<_> = repo
            .list_for_identity("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.credential_id)
            .collect();
        assert_eq!(ids, vec![b"c3".to_vec(), b"c1".to_vec(), b"c2".to_vec()]);
    }

    #[tokio::test]
    async fn test_update_counter_unknown() {
        let repo = MemoryCredentialRepository::new();
        let result = repo.update_counter(b"missing", 3).await;
        assert!(matches!(result, Err(CeremonyError::UnknownCredential)));
    }

    #[tokio::test]
    async fn test_update_counter_never_moves_backwards() {
        let repo = MemoryCredentialRepository::new();
        repo.insert(record(b"cred", "u1")).await.unwrap();
        repo.update_counter(b"cred", 5).await.unwrap();

        for stale in [3, 5] {
            let result = repo.update_counter(b"cred", stale).await;
            assert!(matches!(
                result,
                Err(CeremonyError::PossibleCloneDetected { stored: 5, reported }) if reported == stale
            ));
        }

        let found = repo.find_by_credential_id(b"cred").await.unwrap().unwrap();
        assert_eq!(found.counter, 5);
    }

    #[tokio::test]
    async fn test_update_counter_zero_stays_allowed() {
        let repo = MemoryCredentialRepository::new();
        repo.insert(record(b"cred", "u1")).await.unwrap();

        repo.update_counter(b"cred", 0).await.unwrap();

        let found = repo.find_by_credential_id(b"cred").await.unwrap().unwrap();
        assert_eq!(found.counter, 0);
        assert!(found.last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_insert_drops_unknown_transports() {
        let repo = MemoryCredentialRepository::new();
        let mut cred = record(b"cred", "u1");
        cred.transports = vec![Transport::Usb, Transport::Unknown, Transport::Nfc];
        repo.insert(cred).await.unwrap();

        let found = repo.find_by_credential_id(b"cred").await.unwrap().unwrap();
        assert_eq!(found.transports, vec![Transport::Usb, Transport::Nfc]);
    }

    #[tokio::test]
    async fn test_issued_record_matches_consumed() {
        let store = MemoryChallengeStore::default();
        let issued = store.issue("u1", CeremonyKind::Registration).await.unwrap();
        assert_eq!(issued.created_at.timestamp_subsec_nanos() % 1_000_000, 0);

        let consumed = store
            .consume("u1", CeremonyKind::Registration, &issued.nonce)
            .await
            .unwrap();
        assert_eq!(consumed, issued);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_issue_leaves_one_live_nonce() {
        let store = Arc::new(MemoryChallengeStore::default());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .issue("u1", CeremonyKind::Authentication)
                        .await
                        .unwrap()
                        .nonce
                })
            })
            .collect();

        let mut nonces = Vec::new();
        for handle in handles {
            nonces.push(handle.await.unwrap());
        }
        assert_eq!(store.len(), 1);

        let mut wins = 0;
        for nonce in &nonces {
            if store
                .consume("u1", CeremonyKind::Authentication, nonce)
                .await
                .is_ok()
            {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_insert_same_id_has_single_owner() {
        let repo = Arc::new(MemoryCredentialRepository::new());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let repo = repo.clone();
                tokio::spawn(async move {
                    repo.insert(record(b"contested", &format!("u{}", i)))
                        .await
                })
            })
            .collect();

        let mut inserted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => inserted += 1,
                Err(CeremonyError::DuplicateCredential) => {}
                Err(e) => panic!("unexpected error: {:?}", e),
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(repo.len(), 1);
    }
}
