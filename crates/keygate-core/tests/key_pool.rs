mod common;

use std::collections::HashMap;
use std::sync::Arc;

use keygate_channel::ChannelFactory;
use keygate_common::{ChannelType, EffectiveConfig};
use keygate_core::{AesGcmEncryption, CoreError, EncryptionService, KeyPool, PlainEncryption};
use keygate_storage::{KeyStatus, Storage as _};

use common::{MemoryStorage, MockClient, test_group};

fn pool(
    storage: Arc<MemoryStorage>,
    encryption: Arc<dyn EncryptionService>,
    client: Arc<MockClient>,
) -> KeyPool {
    KeyPool::new(
        storage,
        encryption,
        Arc::new(ChannelFactory::with_builtins(client)),
        EffectiveConfig::default(),
    )
}

#[tokio::test]
async fn acquire_fails_when_no_active_keys() {
    let group = test_group(1, ChannelType::OpenAI);
    let storage = MemoryStorage::with_group(group.clone());
    let pool = pool(storage.clone(), Arc::new(PlainEncryption), MockClient::new(vec![]));

    match pool.acquire(&group).await {
        Err(CoreError::NoActiveKeys(name)) => assert_eq!(name, group.name),
        other => panic!("expected NoActiveKeys, got {other:?}"),
    }

    // An invalid key does not count as available.
    let id = storage.add_key(group.id, "sk-1");
    storage.set_status(id, KeyStatus::Invalid);
    assert!(matches!(
        pool.acquire(&group).await,
        Err(CoreError::NoActiveKeys(_))
    ));
}

#[tokio::test]
async fn acquire_returns_decrypted_plaintext() {
    let group = test_group(1, ChannelType::OpenAI);
    let storage = MemoryStorage::with_group(group.clone());
    let encryption = Arc::new(AesGcmEncryption::new(&[9u8; 32]));
    let ciphertext = encryption.encrypt("sk-plain").unwrap();
    storage.add_key(group.id, &ciphertext);

    let pool = pool(storage, encryption, MockClient::new(vec![]));
    let (record, plaintext) = pool.acquire(&group).await.unwrap();
    assert_eq!(plaintext, "sk-plain");
    assert_eq!(record.key_value, ciphertext);
}

#[tokio::test]
async fn selection_is_uniform_across_the_active_set() {
    let group = test_group(1, ChannelType::OpenAI);
    let storage = MemoryStorage::with_group(group.clone());
    let ids: Vec<i64> = (0..3)
        .map(|i| storage.add_key(group.id, &format!("sk-{i}")))
        .collect();

    let pool = pool(storage, Arc::new(PlainEncryption), MockClient::new(vec![]));

    const DRAWS: usize = 1200;
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for _ in 0..DRAWS {
        let (record, _) = pool.acquire(&group).await.unwrap();
        *counts.entry(record.id).or_default() += 1;
    }

    // Expected 400 per key; a ±100 band is ~6 sigma, loose enough to never
    // flake while catching any biased selector.
    for id in &ids {
        let n = counts.get(id).copied().unwrap_or(0);
        assert!(
            (300..=500).contains(&n),
            "key {id} drawn {n} times out of {DRAWS}; selection looks biased: {counts:?}"
        );
    }
}

#[tokio::test]
async fn decryption_failure_surfaces_without_invalidating_the_key() {
    let group = test_group(1, ChannelType::OpenAI);
    let storage = MemoryStorage::with_group(group.clone());
    let id = storage.add_key(group.id, "not-a-valid-ciphertext");

    let encryption = Arc::new(AesGcmEncryption::new(&[9u8; 32]));
    let pool = pool(storage.clone(), encryption, MockClient::new(vec![]));

    match pool.acquire(&group).await {
        Err(CoreError::Decryption { key_id }) => assert_eq!(key_id, id),
        other => panic!("expected Decryption, got {other:?}"),
    }
    // System fault, not a credential fault.
    assert_eq!(storage.key_status(id), Some(KeyStatus::Active));
}

#[tokio::test]
async fn validate_success_reactivates_an_invalid_key() {
    let group = test_group(1, ChannelType::OpenAI);
    let storage = MemoryStorage::with_group(group.clone());
    let id = storage.add_key(group.id, "sk-1");
    storage.set_status(id, KeyStatus::Invalid);

    let client = MockClient::new(vec![(200, "{}")]);
    let pool = pool(storage.clone(), Arc::new(PlainEncryption), client);

    let key = storage.get_key(id).await.unwrap().unwrap();
    let outcome = pool.validate(&group, &key).await.unwrap();
    assert!(outcome.valid);
    assert!(outcome.reason.is_none());
    assert_eq!(storage.key_status(id), Some(KeyStatus::Active));
}

#[tokio::test]
async fn validate_failure_marks_invalid_with_upstream_reason() {
    let group = test_group(1, ChannelType::OpenAI);
    let storage = MemoryStorage::with_group(group.clone());
    let id = storage.add_key(group.id, "sk-1");

    let client = MockClient::new(vec![(401, r#"{"error":{"message":"bad key"}}"#)]);
    let pool = pool(storage.clone(), Arc::new(PlainEncryption), client);

    let key = storage.get_key(id).await.unwrap().unwrap();
    let outcome = pool.validate(&group, &key).await.unwrap();
    assert!(!outcome.valid);
    assert_eq!(outcome.reason.as_deref(), Some("[status 401] bad key"));
    assert_eq!(storage.key_status(id), Some(KeyStatus::Invalid));
}

#[tokio::test]
async fn rotate_hands_out_a_fresh_key() {
    let group = test_group(1, ChannelType::OpenAI);
    let storage = MemoryStorage::with_group(group.clone());
    storage.add_key(group.id, "sk-1");

    let pool = pool(storage, Arc::new(PlainEncryption), MockClient::new(vec![]));
    let (_, plaintext) = pool.rotate(&group).await.unwrap();
    assert_eq!(plaintext, "sk-1");
}
