// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Required signers.
//!
//! A requirement is a base64 public key, the name of an identity of the PKI,
//! or a role held by some identity. Names and roles compare case-insensitively.
//! Each requirement needs at least one signature from a matching key.

use std::sync::Arc;

use async_trait::async_trait;
use popstore_kernel::types::{Hash32, Link};
use serde_json::json;

use super::rules::Pki;
use super::validator::{config_hash, BaseConfig, Validator};
use super::ValidationError;
use crate::context::Context;
use crate::errors::Result;
use crate::store::SegmentReader;

pub struct PkiValidator {
    config: BaseConfig,
    required: Vec<String>,
    pki: Arc<Pki>,
}

impl PkiValidator {
    pub fn new(config: BaseConfig, required: Vec<String>, pki: Arc<Pki>) -> Self {
        PkiValidator { config, required, pki }
    }

    fn is_satisfied(&self, requirement: &str, signer: &str) -> bool {
        if requirement == signer {
            return true;
        }
        self.pki.iter().any(|(name, identity)| {
            identity.keys.iter().any(|k| k == signer)
                && (name.eq_ignore_ascii_case(requirement)
                    || identity.roles.iter().any(|r| r.eq_ignore_ascii_case(requirement)))
        })
    }
}

#[async_trait]
impl Validator for PkiValidator {
    fn should_validate(&self, link: &Link) -> bool {
        self.config.matches(link)
    }

    async fn validate(&self, _ctx: &Context, _reader: &dyn SegmentReader, link: &Link) -> Result<()> {
        for requirement in &self.required {
            let met = link
                .signatures
                .iter()
                .any(|s| self.is_satisfied(requirement, &s.public_key));
            if !met {
                return Err(ValidationError::PkiViolation {
                    process: self.config.process.clone(),
                    link_type: self.config.link_type.clone(),
                    required: requirement.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn hash(&self) -> Hash32 {
        config_hash(
            "pki",
            &json!({
                "process": self.config.process,
                "type": self.config.link_type,
                "signatures": self.required,
                "pki": *self.pki,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::store::MemoryStore;
    use crate::validation::rules::Identity;
    use crate::validation::signature::sign_link;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    struct Fixture {
        alice: SigningKey,
        bob: SigningKey,
        pki: Arc<Pki>,
    }

    fn fixture() -> Fixture {
        let alice = SigningKey::generate(&mut OsRng);
        let bob = SigningKey::generate(&mut OsRng);
        let key_of = |k: &SigningKey| sign_link(&Link::new("p", "m", "t"), k, "meta").unwrap().public_key;
        let mut pki = Pki::new();
        pki.insert(
            "Alice Van den Budenmayer".into(),
            Identity {
                keys: vec![key_of(&alice)],
                roles: vec!["employee".into()],
            },
        );
        pki.insert(
            "Bob Wagner".into(),
            Identity {
                keys: vec![key_of(&bob)],
                roles: vec!["manager".into(), "it".into()],
            },
        );
        Fixture {
            alice,
            bob,
            pki: Arc::new(pki),
        }
    }

    fn signed_by(key: &SigningKey) -> Link {
        let mut link = Link::new("p", "m", "test");
        link.signatures.push(sign_link(&link, key, "[state, meta]").unwrap());
        link
    }

    async fn check(f: &Fixture, required: &[&str], link: &Link) -> Result<()> {
        let v = PkiValidator::new(
            BaseConfig::new("p", "test").unwrap(),
            required.iter().map(|s| s.to_string()).collect(),
            f.pki.clone(),
        );
        v.validate(&Context::background(), &MemoryStore::new(), link).await
    }

    #[tokio::test]
    async fn test_requirement_by_key_name_or_role() {
        let f = fixture();
        let link = signed_by(&f.alice);
        let alice_key = link.signatures[0].public_key.clone();

        check(&f, &[&alice_key], &link).await.unwrap();
        check(&f, &["alice van den budenmayer"], &link).await.unwrap();
        check(&f, &["EMPLOYEE"], &link).await.unwrap();
    }

    #[tokio::test]
    async fn test_unmet_requirement() {
        let f = fixture();
        let link = signed_by(&f.alice);
        let err = check(&f, &["manager"], &link).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PkiViolation);
        assert!(err.to_string().contains("signature from manager is required"));
    }

    #[tokio::test]
    async fn test_all_requirements_must_hold() {
        let f = fixture();
        let mut link = signed_by(&f.alice);
        assert!(check(&f, &["employee", "it"], &link).await.is_err());

        let bob_sig = sign_link(&link, &f.bob, "[state, meta]").unwrap();
        link.signatures.push(bob_sig);
        check(&f, &["employee", "it"], &link).await.unwrap();
    }
}
