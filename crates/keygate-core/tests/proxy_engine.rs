mod common;

use std::sync::Arc;

use bytes::Bytes;

use keygate_channel::{
    ChannelFactory, HttpMethod, UpstreamFailure, UpstreamTransportErrorKind, header_get,
};
use keygate_common::{ChannelType, EffectiveConfig};
use keygate_core::{CoreError, InboundRequest, KeyPool, PlainEncryption, ProxyEngine};
use keygate_storage::KeyStatus;

use common::{MemoryStorage, MockClient, test_group};

fn engine(storage: Arc<MemoryStorage>, client: Arc<MockClient>) -> ProxyEngine {
    let factory = Arc::new(ChannelFactory::with_builtins(client.clone()));
    let key_pool = Arc::new(KeyPool::new(
        storage.clone(),
        Arc::new(PlainEncryption),
        factory.clone(),
        EffectiveConfig::default(),
    ));
    ProxyEngine::new(
        storage,
        key_pool,
        factory,
        client,
        EffectiveConfig::default(),
    )
}

fn inbound(body: &str) -> InboundRequest {
    InboundRequest {
        method: HttpMethod::Post,
        path: "/v1/chat/completions".to_string(),
        query: None,
        headers: vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Authorization".to_string(), "Bearer downstream".to_string()),
            ("Host".to_string(), "keygate.local".to_string()),
        ],
        body: Bytes::from(body.to_string()),
    }
}

#[tokio::test]
async fn forwards_with_rewritten_auth_and_upstream_url() {
    let group = test_group(1, ChannelType::OpenAI);
    let storage = MemoryStorage::with_group(group.clone());
    let id = storage.add_key(group.id, "sk-upstream");
    let client = MockClient::new(vec![(200, r#"{"ok":true}"#)]);
    let engine = engine(storage.clone(), client.clone());

    let resp = engine
        .handle(&group.name, inbound(r#"{"model":"gpt-4o"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status, 200);

    let sent = client.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].url, "https://upstream.example/v1/chat/completions");
    // The downstream bearer is replaced by the selected pool key.
    assert_eq!(
        header_get(&sent[0].headers, "authorization"),
        Some("Bearer sk-upstream")
    );
    assert!(header_get(&sent[0].headers, "host").is_none());
    assert_eq!(storage.key_status(id), Some(KeyStatus::Active));
}

#[tokio::test]
async fn unknown_group_is_not_found() {
    let storage = MemoryStorage::new();
    let engine = engine(storage, MockClient::new(vec![]));
    assert!(matches!(
        engine.handle("ghost", inbound("{}")).await,
        Err(CoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn rotates_on_credential_fatal_status_and_succeeds() {
    let group = test_group(1, ChannelType::OpenAI);
    let storage = MemoryStorage::with_group(group.clone());
    let first = storage.add_key(group.id, "sk-a");
    let second = storage.add_key(group.id, "sk-b");
    let client = MockClient::new(vec![
        (401, r#"{"error":{"message":"revoked"}}"#),
        (200, r#"{"ok":true}"#),
    ]);
    let engine = engine(storage.clone(), client.clone());

    let resp = engine
        .handle(&group.name, inbound(r#"{"model":"gpt-4o"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(client.call_count(), 2);

    // Exactly one of the two keys was burned by the 401.
    let statuses = [storage.key_status(first), storage.key_status(second)];
    assert_eq!(
        statuses
            .iter()
            .filter(|s| **s == Some(KeyStatus::Invalid))
            .count(),
        1,
        "one key should be invalid after rotation: {statuses:?}"
    );
}

#[tokio::test]
async fn pool_exhaustion_surfaces_no_active_keys() {
    let group = test_group(1, ChannelType::OpenAI);
    let storage = MemoryStorage::with_group(group.clone());
    storage.add_key(group.id, "sk-a");
    storage.add_key(group.id, "sk-b");
    let client = MockClient::new(vec![
        (401, r#"{"error":{"message":"revoked"}}"#),
        (401, r#"{"error":{"message":"revoked"}}"#),
    ]);
    let engine = engine(storage.clone(), client.clone());

    assert!(matches!(
        engine.handle(&group.name, inbound("{}")).await,
        Err(CoreError::NoActiveKeys(_))
    ));
    assert_eq!(client.call_count(), 2);
}

#[tokio::test]
async fn non_fatal_errors_are_forwarded_unchanged() {
    let group = test_group(1, ChannelType::OpenAI);
    let storage = MemoryStorage::with_group(group.clone());
    let id = storage.add_key(group.id, "sk-a");
    let client = MockClient::new(vec![(500, r#"{"error":{"message":"server broke"}}"#)]);
    let engine = engine(storage.clone(), client.clone());

    let resp = engine.handle(&group.name, inbound("{}")).await.unwrap();
    assert_eq!(resp.status, 500);
    assert_eq!(client.call_count(), 1, "5xx must not trigger rotation");
    assert_eq!(storage.key_status(id), Some(KeyStatus::Active));
}

#[tokio::test]
async fn transport_failure_rotates_and_retries() {
    let group = test_group(1, ChannelType::OpenAI);
    let storage = MemoryStorage::with_group(group.clone());
    let first = storage.add_key(group.id, "sk-a");

    // One key only: the transport failure invalidates it and the rotation
    // finds the pool empty.
    let client = MockClient::with_failure(UpstreamFailure::Transport {
        kind: UpstreamTransportErrorKind::Connect,
        message: "connection refused".to_string(),
    });
    let engine = engine(storage.clone(), client);

    assert!(matches!(
        engine.handle(&group.name, inbound("{}")).await,
        Err(CoreError::NoActiveKeys(_))
    ));
    assert_eq!(storage.key_status(first), Some(KeyStatus::Invalid));
}

#[tokio::test]
async fn stream_intent_is_propagated_to_the_client() {
    let group = test_group(1, ChannelType::OpenAI);
    let storage = MemoryStorage::with_group(group.clone());
    storage.add_key(group.id, "sk-a");
    let client = MockClient::new(vec![(200, "data: [DONE]\n\n")]);
    let engine = engine(storage, client.clone());

    let mut req = inbound(r#"{"model":"gpt-4o","stream":true}"#);
    req.headers
        .push(("Accept".to_string(), "text/event-stream".to_string()));
    engine.handle(&group.name, req).await.unwrap();

    assert!(client.sent()[0].is_stream);
}

#[tokio::test]
async fn query_string_is_preserved_on_the_upstream_url() {
    let group = test_group(1, ChannelType::Gemini);
    let storage = MemoryStorage::with_group(group.clone());
    storage.add_key(group.id, "gk-1");
    let client = MockClient::new(vec![(200, "{}")]);
    let engine = engine(storage, client.clone());

    let mut req = inbound("{}");
    req.path = "/v1beta/models/gemini-1.5-flash:generateContent".to_string();
    req.query = Some("alt=sse".to_string());
    engine.handle(&group.name, req).await.unwrap();

    // Inbound query preserved, pool key appended by the channel.
    assert_eq!(
        client.sent()[0].url,
        "https://upstream.example/v1beta/models/gemini-1.5-flash:generateContent?alt=sse&key=gk-1"
    );
}
