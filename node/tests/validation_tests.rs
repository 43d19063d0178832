// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::SigningKey;
use popstore_kernel::types::Link;
use popstore_node::context::Context;
use popstore_node::errors::ErrorKind;
use popstore_node::store::{LinkWriter, MemoryStore};
use popstore_node::validation::{build_multi_validator, parse_rules, sign_link, MultiValidator, PluginRegistry, Validator};
use rand::rngs::OsRng;
use serde_json::json;

fn auction_rules(seller_key: &SigningKey, registry: &PluginRegistry) -> MultiValidator {
    let doc = json!({
        "auction": {
            "pki": {
                "alice": {
                    "keys": [STANDARD.encode(seller_key.verifying_key().as_bytes())],
                    "roles": ["seller"]
                }
            },
            "types": {
                "init": {
                    "schema": { "type": "object", "required": ["item"] },
                    "signatures": ["seller"],
                    "transitions": [""]
                },
                "bid": {
                    "schema": {
                        "type": "object",
                        "properties": { "amount": { "type": "number", "exclusiveMinimum": 0 } },
                        "required": ["amount"]
                    },
                    "transitions": ["init", "bid"],
                    "script": { "file": "bid.so", "type": "go" }
                },
                "review": { "transitions": ["init"] },
                "close": { "transitions": ["bid"] }
            }
        }
    });
    let rules = parse_rules(doc.to_string().as_bytes()).unwrap();
    build_multi_validator(&rules, registry).unwrap()
}

fn registry() -> PluginRegistry {
    let registry = PluginRegistry::new();
    registry.register("auction", "bid", |link: &Link| {
        match link.state.get("amount").and_then(|a| a.as_f64()) {
            Some(a) if a > 1_000_000.0 => Err("bid too large".to_string()),
            _ => Ok(()),
        }
    });
    registry
}

fn signed_init(key: &SigningKey) -> Link {
    let mut link = Link::new("auction", "lot-1", "init").with_state(json!({ "item": "lamp" }));
    link.signatures.push(sign_link(&link, key, "[state]").unwrap());
    link
}

#[tokio::test]
async fn test_transition_chain_is_accepted() {
    let ctx = Context::background();
    let store = MemoryStore::new();
    let key = SigningKey::generate(&mut OsRng);
    let validator = auction_rules(&key, &registry());

    let init = signed_init(&key);
    validator.validate(&ctx, &store, &init).await.unwrap();
    let init_hash = store.create_link(&ctx, init).await.unwrap();

    let bid = Link::new("auction", "lot-1", "bid")
        .with_prev(init_hash)
        .with_state(json!({ "amount": 12 }));
    validator.validate(&ctx, &store, &bid).await.unwrap();
    let bid_hash = store.create_link(&ctx, bid).await.unwrap();

    let outbid = Link::new("auction", "lot-1", "bid")
        .with_prev(bid_hash)
        .with_state(json!({ "amount": 15 }));
    validator.validate(&ctx, &store, &outbid).await.unwrap();
}

#[tokio::test]
async fn test_transition_from_wrong_type_is_rejected() {
    let ctx = Context::background();
    let store = MemoryStore::new();
    let key = SigningKey::generate(&mut OsRng);
    let validator = auction_rules(&key, &registry());

    let init_hash = store.create_link(&ctx, signed_init(&key)).await.unwrap();
    let review = Link::new("auction", "lot-1", "review").with_prev(init_hash);
    validator.validate(&ctx, &store, &review).await.unwrap();
    let review_hash = store.create_link(&ctx, review).await.unwrap();

    let bid = Link::new("auction", "lot-1", "bid")
        .with_prev(review_hash)
        .with_state(json!({ "amount": 3 }));
    let err = validator.validate(&ctx, &store, &bid).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransitionViolation);
    assert!(err.to_string().contains("review --> bid"), "{err}");

    let close_on_root = Link::new("auction", "lot-2", "close");
    let err = validator.validate(&ctx, &store, &close_on_root).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransitionViolation);
}

#[tokio::test]
async fn test_signature_over_state_detects_tampering() {
    let ctx = Context::background();
    let store = MemoryStore::new();
    let key = SigningKey::generate(&mut OsRng);
    let validator = auction_rules(&key, &registry());

    let mut link = signed_init(&key);
    validator.validate(&ctx, &store, &link).await.unwrap();

    link.state = json!({ "item": "lamq" });
    let err = validator.validate(&ctx, &store, &link).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SignatureInvalid);
}

#[tokio::test]
async fn test_signer_policy_and_missing_signatures() {
    let ctx = Context::background();
    let store = MemoryStore::new();
    let seller = SigningKey::generate(&mut OsRng);
    let stranger = SigningKey::generate(&mut OsRng);
    let validator = auction_rules(&seller, &registry());

    let unsigned = Link::new("auction", "lot-1", "init").with_state(json!({ "item": "lamp" }));
    let err = validator.validate(&ctx, &store, &unsigned).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingSignature);

    let err = validator.validate(&ctx, &store, &signed_init(&stranger)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PkiViolation);
}

#[tokio::test]
async fn test_schema_and_plugin_run_for_their_type_only() {
    let ctx = Context::background();
    let store = MemoryStore::new();
    let key = SigningKey::generate(&mut OsRng);
    let validator = auction_rules(&key, &registry());
    let init_hash = store.create_link(&ctx, signed_init(&key)).await.unwrap();

    let negative = Link::new("auction", "lot-1", "bid")
        .with_prev(init_hash)
        .with_state(json!({ "amount": -4 }));
    let err = validator.validate(&ctx, &store, &negative).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaViolation);

    let huge = Link::new("auction", "lot-1", "bid")
        .with_prev(init_hash)
        .with_state(json!({ "amount": 5_000_000 }));
    let err = validator.validate(&ctx, &store, &huge).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PluginRejected);

    // Other processes are not governed by these rules.
    let chat = Link::new("chat", "room", "message").with_state(json!({ "amount": -4 }));
    validator.validate(&ctx, &store, &chat).await.unwrap();
}

#[tokio::test]
async fn test_predecessor_must_exist_in_same_map() {
    let ctx = Context::background();
    let store = MemoryStore::new();
    let key = SigningKey::generate(&mut OsRng);
    let validator = auction_rules(&key, &registry());

    let dangling = Link::new("auction", "lot-1", "bid")
        .with_prev(Link::new("auction", "lot-1", "ghost").hash().unwrap())
        .with_state(json!({ "amount": 1 }));
    let err = validator.validate(&ctx, &store, &dangling).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

    let init_hash = store.create_link(&ctx, signed_init(&key)).await.unwrap();
    let other_map = Link::new("auction", "lot-9", "bid")
        .with_prev(init_hash)
        .with_state(json!({ "amount": 1 }));
    let err = validator.validate(&ctx, &store, &other_map).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
}

#[tokio::test]
async fn test_missing_plugin_fails_to_build() {
    let key = SigningKey::generate(&mut OsRng);
    let doc = json!({
        "auction": { "types": { "bid": { "script": { "file": "bid.so", "type": "go" } } } }
    });
    let rules = parse_rules(doc.to_string().as_bytes()).unwrap();
    let err = build_multi_validator(&rules, &PluginRegistry::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PluginLoadFailed);

    // Validators hash the same for the same rules.
    let a = auction_rules(&key, &registry());
    let b = auction_rules(&key, &registry());
    assert!(!a.is_empty());
    assert_eq!(a.hash(), b.hash());
}
