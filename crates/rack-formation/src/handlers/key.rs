use async_trait::async_trait;
use tracing::{info, warn};

use super::{HandlerContext, ResourceHandler};
use crate::error::FormationResult;
use crate::properties::{KeyProperties, decode};
use crate::request::{Outcome, Request};

/// Waiting period before a scheduled key deletion takes effect.
pub const KEY_DELETION_DAYS: u32 = 7;

pub struct KmsKey;

#[async_trait]
impl ResourceHandler for KmsKey {
    async fn create(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        let props: KeyProperties = decode(&req.resource_properties)?;
        let arn = ctx.cloud.kms.create_key(&props.description).await?;
        if props.enable_key_rotation {
            ctx.cloud.kms.enable_key_rotation(&arn).await?;
        }
        info!(key = %arn, rotation = props.enable_key_rotation, "key created");
        Ok(Outcome::new(arn.clone()).output("Arn", arn))
    }

    async fn update(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        let props: KeyProperties = decode(&req.resource_properties)?;
        let arn = req.physical_id();
        if props.enable_key_rotation {
            ctx.cloud.kms.enable_key_rotation(arn).await?;
        }
        Ok(Outcome::new(arn).output("Arn", arn))
    }

    async fn delete(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        let arn = req.physical_id();
        match ctx.cloud.kms.schedule_key_deletion(arn, KEY_DELETION_DAYS).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() || e.code() == "KMSInvalidStateException" => {
                warn!(key = %arn, error = %e, "key already gone or pending deletion");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(Outcome::new(arn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{context, request};
    use serde_json::json;

    #[tokio::test]
    async fn create_rotate_and_delete_twice() {
        let (ctx, cloud) = context();
        let req = request(
            "Custom::KMSKey",
            "Create",
            None,
            json!({"Description": "app key", "EnableKeyRotation": "true"}),
        );
        let arn = KmsKey.create(&ctx, &req).await.unwrap().physical_id;
        assert!(cloud.state().keys[&arn].rotation);

        let del = request("Custom::KMSKey", "Delete", Some(&arn), json!({}));
        KmsKey.delete(&ctx, &del).await.unwrap();
        KmsKey.delete(&ctx, &del).await.unwrap();
        assert!(cloud.state().keys[&arn].pending_deletion);

        let gone = request("Custom::KMSKey", "Delete", Some("arn:aws:kms:key/none"), json!({}));
        KmsKey.delete(&ctx, &gone).await.unwrap();
    }
}
