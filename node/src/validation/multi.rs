// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::sync::Arc;

use async_trait::async_trait;
use popstore_kernel::types::{Hash32, Link};

use super::signature::SignatureValidator;
use super::validator::Validator;
use super::ValidationError;
use crate::context::Context;
use crate::errors::{Result, StoreError};
use crate::store::SegmentReader;

/// Ordered composition of validators.
///
/// Runs every child whose `should_validate` accepts the link and stops at the
/// first failure. Before any child, a link with a predecessor must point to
/// an existing link of the same map and process.
pub struct MultiValidator {
    validators: Vec<Arc<dyn Validator>>,
}

impl std::fmt::Debug for MultiValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiValidator").field("validators", &self.validators.len()).finish()
    }
}

impl Default for MultiValidator {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl MultiValidator {
    /// Appends the signature check over every signature present.
    pub fn new(mut validators: Vec<Arc<dyn Validator>>) -> Self {
        validators.push(Arc::new(SignatureValidator::builtin()));
        MultiValidator { validators }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    async fn check_predecessor(&self, ctx: &Context, reader: &dyn SegmentReader, link: &Link) -> Result<()> {
        let Some(prev) = &link.meta.prev_link_hash else {
            return Ok(());
        };
        let Some(parent) = reader.get_segment(ctx, prev).await? else {
            return Err(ValidationError::PreconditionFailed(format!("previous segment not found: {prev}")).into());
        };
        if parent.link.meta.map_id != link.meta.map_id || parent.link.meta.process != link.meta.process {
            return Err(ValidationError::PreconditionFailed(format!(
                "previous link {prev} belongs to map {} of process {}",
                parent.link.meta.map_id, parent.link.meta.process
            ))
            .into());
        }
        Ok(())
    }

    async fn run(&self, ctx: &Context, reader: &dyn SegmentReader, link: &Link) -> Result<()> {
        self.check_predecessor(ctx, reader, link).await?;
        for child in self.validators.iter().filter(|v| v.should_validate(link)) {
            ctx.check()?;
            child.validate(ctx, reader, link).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Validator for MultiValidator {
    fn should_validate(&self, _link: &Link) -> bool {
        true
    }

    async fn validate(&self, ctx: &Context, reader: &dyn SegmentReader, link: &Link) -> Result<()> {
        let res = self.run(ctx, reader, link).await;
        if let Err(StoreError::Validation(e)) = &res {
            tracing::debug!(process = %link.meta.process, link_type = %link.meta.link_type, error = %e, "link rejected");
            metrics::counter!("popstore_validation_failures_total", 1, "kind" => e.label());
        }
        res
    }

    /// SHA-256 over the concatenated child hashes.
    fn hash(&self) -> Hash32 {
        let children: Vec<Hash32> = self.validators.iter().map(|v| v.hash()).collect();
        let parts: Vec<&[u8]> = children.iter().map(|h| h.as_bytes().as_slice()).collect();
        Hash32::digest_concat(&parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::store::{LinkWriter, MemoryStore};
    use crate::validation::{BaseConfig, SchemaValidator, TransitionValidator};
    use serde_json::json;

    fn auction() -> MultiValidator {
        let schema = SchemaValidator::new(
            BaseConfig::new("auction", "init").unwrap(),
            json!({"type": "object", "required": ["seller"]}),
        )
        .unwrap();
        let transition = TransitionValidator::new(BaseConfig::new("auction", "bid").unwrap(), vec!["init".into()]);
        MultiValidator::new(vec![Arc::new(schema), Arc::new(transition)])
    }

    #[test]
    fn test_builtin_signature_check_is_appended() {
        assert_eq!(MultiValidator::default().len(), 1);
        assert_eq!(auction().len(), 3);
    }

    #[tokio::test]
    async fn test_matching_children_run() {
        let ctx = Context::background();
        let store = MemoryStore::new();
        let v = auction();

        let bad_init = Link::new("auction", "m", "init");
        let err = v.validate(&ctx, &store, &bad_init).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaViolation);

        let other = Link::new("other", "m", "init");
        v.validate(&ctx, &store, &other).await.unwrap();
    }

    #[tokio::test]
    async fn test_predecessor_must_share_map_and_process() {
        let ctx = Context::background();
        let store = MemoryStore::new();
        let v = MultiValidator::default();

        let root = store.create_link(&ctx, Link::new("p", "m1", "init")).await.unwrap();
        v.validate(&ctx, &store, &Link::new("p", "m1", "next").with_prev(root))
            .await
            .unwrap();

        let err = v
            .validate(&ctx, &store, &Link::new("p", "m2", "next").with_prev(root))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

        let err = v
            .validate(&ctx, &store, &Link::new("q", "m1", "next").with_prev(root))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    }

    #[test]
    fn test_hash_changes_with_children() {
        assert_ne!(auction().hash(), MultiValidator::default().hash());
        assert_eq!(auction().hash(), auction().hash());
    }
}
