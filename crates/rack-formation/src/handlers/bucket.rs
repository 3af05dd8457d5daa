//! Empties a bucket before the engine deletes it; the object store refuses
//! to remove a bucket that still holds objects.

use async_trait::async_trait;
use tracing::info;

use super::{HandlerContext, ResourceHandler, ignore_not_found};
use crate::error::FormationResult;
use crate::properties::{BucketProperties, decode};
use crate::request::{Outcome, Request};

pub struct BucketCleanup;

#[async_trait]
impl ResourceHandler for BucketCleanup {
    async fn create(&self, _ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        let props: BucketProperties = decode(&req.resource_properties)?;
        Ok(Outcome::new(props.bucket))
    }

    async fn update(&self, _ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        let props: BucketProperties = decode(&req.resource_properties)?;
        Ok(Outcome::new(props.bucket))
    }

    async fn delete(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        let props: BucketProperties = decode(&req.resource_properties)?;
        let objects = &ctx.cloud.objects;
        let keys = match objects.list_objects(&props.bucket, "").await {
            Ok(keys) => keys,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        for key in &keys {
            ignore_not_found(objects.delete_object(&props.bucket, key).await)?;
        }
        info!(bucket = %props.bucket, objects = keys.len(), "bucket emptied");
        Ok(Outcome::new(req.physical_id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{context, request};
    use rack_cloud::ObjectStore;
    use serde_json::json;

    #[tokio::test]
    async fn empties_only_its_bucket() {
        let (ctx, cloud) = context();
        cloud.put_object("settings", "a", b"1".to_vec()).await.unwrap();
        cloud.put_object("settings", "releases/R1/env", b"2".to_vec()).await.unwrap();
        cloud.put_object("other", "keep", b"3".to_vec()).await.unwrap();

        let del = request("Custom::S3BucketCleanup", "Delete", Some("settings"), json!({"Bucket": "settings"}));
        BucketCleanup.delete(&ctx, &del).await.unwrap();
        BucketCleanup.delete(&ctx, &del).await.unwrap();

        let state = cloud.state();
        assert_eq!(state.objects.len(), 1);
        assert!(state.objects.contains_key(&("other".to_string(), "keep".to_string())));
    }
}
