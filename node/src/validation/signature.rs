// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Link signatures.
//!
//! A signature covers the canonical encoding of whatever its JMESPath
//! `payload` selects from the link's JSON form.
//!
//! | scheme     | public key            | signature                          |
//! |------------|-----------------------|------------------------------------|
//! | `ED25519`  | raw 32 bytes          | raw 64 bytes                       |
//! | `ECDSA256` | SEC1 point on P-256   | ASN.1 DER, SHA-256 message digest  |
//! | `RSA`      | PKCS#1 DER            | PKCS#1 v1.5 over SHA-512           |
//!
//! Keys and signatures are base64. Scheme names are case-insensitive.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use popstore_kernel::canonical;
use popstore_kernel::types::{Hash32, Link, Signature};
use serde_json::{json, Value};
use sha2::{Digest, Sha512};

use super::validator::{config_hash, BaseConfig, Validator};
use super::ValidationError;
use crate::context::Context;
use crate::errors::Result;
use crate::store::SegmentReader;

pub const ED25519: &str = "ED25519";
pub const ECDSA256: &str = "ECDSA256";
pub const RSA: &str = "RSA";

type Verdict = std::result::Result<(), ValidationError>;

/// Verifies every signature carried by a link.
///
/// The unbound instance applies to all links and accepts unsigned ones. An
/// instance bound to a `(process, type)` also refuses links without signatures.
pub struct SignatureValidator {
    config: Option<BaseConfig>,
    required: bool,
}

impl SignatureValidator {
    pub fn builtin() -> Self {
        SignatureValidator {
            config: None,
            required: false,
        }
    }

    pub fn required(config: BaseConfig) -> Self {
        SignatureValidator {
            config: Some(config),
            required: true,
        }
    }
}

#[async_trait]
impl Validator for SignatureValidator {
    fn should_validate(&self, link: &Link) -> bool {
        self.config.as_ref().map_or(true, |c| c.matches(link))
    }

    async fn validate(&self, _ctx: &Context, _reader: &dyn SegmentReader, link: &Link) -> Result<()> {
        if link.signatures.is_empty() {
            if self.required {
                return Err(ValidationError::MissingSignature(format!(
                    "links of type {} in process {} must be signed",
                    link.meta.link_type, link.meta.process
                ))
                .into());
            }
            return Ok(());
        }
        let document = link.to_value()?;
        for signature in &link.signatures {
            verify_signature(&document, signature)?;
        }
        Ok(())
    }

    fn hash(&self) -> Hash32 {
        config_hash(
            "signature",
            &json!({
                "process": self.config.as_ref().map(|c| c.process.as_str()),
                "type": self.config.as_ref().map(|c| c.link_type.as_str()),
                "required": self.required,
            }),
        )
    }
}

/// Canonical bytes of the part of `document` selected by `expression`.
pub fn signed_payload(document: &Value, expression: &str) -> std::result::Result<Vec<u8>, ValidationError> {
    let compiled = jmespath::compile(expression)
        .map_err(|e| ValidationError::SignatureInvalid(format!("invalid payload expression {expression:?}: {e}")))?;
    let selected = compiled
        .search(document.clone())
        .map_err(|e| ValidationError::SignatureInvalid(format!("cannot evaluate payload {expression:?}: {e}")))?;
    if selected.is_null() {
        return Err(ValidationError::EmptyPayload(expression.to_string()));
    }
    let selected = serde_json::to_value(&*selected)
        .map_err(|e| ValidationError::SignatureInvalid(format!("cannot encode payload: {e}")))?;
    Ok(canonical::encode(&selected))
}

/// Checks one signature against the link's JSON form.
pub fn verify_signature(document: &Value, signature: &Signature) -> Verdict {
    let message = signed_payload(document, &signature.payload)?;
    let key = decode("public key", &signature.public_key)?;
    let sig = decode("signature", &signature.signature)?;

    match signature.scheme.to_ascii_uppercase().as_str() {
        ED25519 => verify_ed25519(&key, &sig, &message),
        ECDSA256 => verify_ecdsa(&key, &sig, &message),
        RSA => verify_rsa(&key, &sig, &message),
        other => Err(ValidationError::SignatureInvalid(format!("unhandled signature scheme: {other}"))),
    }
}

fn decode(what: &str, encoded: &str) -> std::result::Result<Vec<u8>, ValidationError> {
    STANDARD
        .decode(encoded)
        .map_err(|e| ValidationError::SignatureInvalid(format!("{what} is not valid base64: {e}")))
}

fn invalid(scheme: &str) -> ValidationError {
    ValidationError::SignatureInvalid(format!("{scheme} signature does not match payload"))
}

fn verify_ed25519(key: &[u8], sig: &[u8], message: &[u8]) -> Verdict {
    use ed25519_dalek::Verifier;

    let key: [u8; 32] = key
        .try_into()
        .map_err(|_| ValidationError::SignatureInvalid("ed25519 public key must be 32 bytes".into()))?;
    let key = ed25519_dalek::VerifyingKey::from_bytes(&key)
        .map_err(|e| ValidationError::SignatureInvalid(format!("bad ed25519 public key: {e}")))?;
    let sig = ed25519_dalek::Signature::from_slice(sig)
        .map_err(|e| ValidationError::SignatureInvalid(format!("bad ed25519 signature: {e}")))?;
    key.verify(message, &sig).map_err(|_| invalid(ED25519))
}

fn verify_ecdsa(key: &[u8], sig: &[u8], message: &[u8]) -> Verdict {
    use p256::ecdsa::signature::Verifier;

    let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(key)
        .map_err(|e| ValidationError::SignatureInvalid(format!("bad ecdsa public key: {e}")))?;
    let sig = p256::ecdsa::Signature::from_der(sig)
        .map_err(|e| ValidationError::SignatureInvalid(format!("bad ecdsa signature: {e}")))?;
    key.verify(message, &sig).map_err(|_| invalid(ECDSA256))
}

fn verify_rsa(key: &[u8], sig: &[u8], message: &[u8]) -> Verdict {
    use rsa::pkcs1::DecodeRsaPublicKey;

    let key = rsa::RsaPublicKey::from_pkcs1_der(key)
        .map_err(|e| ValidationError::SignatureInvalid(format!("bad rsa public key: {e}")))?;
    let digest = Sha512::digest(message);
    key.verify(rsa::Pkcs1v15Sign::new::<Sha512>(), &digest, sig)
        .map_err(|_| invalid(RSA))
}

/// Signs `payload` of `link` with an Ed25519 key.
pub fn sign_link(link: &Link, key: &SigningKey, payload: &str) -> Result<Signature> {
    let message = signed_payload(&link.to_value()?, payload)?;
    let sig = key.sign(&message);
    Ok(Signature {
        scheme: ED25519.to_string(),
        public_key: STANDARD.encode(key.verifying_key().as_bytes()),
        signature: STANDARD.encode(sig.to_bytes()),
        payload: payload.to_string(),
    })
}
