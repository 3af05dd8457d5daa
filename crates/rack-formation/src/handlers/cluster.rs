use async_trait::async_trait;
use tracing::warn;

use super::{HandlerContext, ResourceHandler};
use crate::error::{FormationError, FormationResult};
use crate::properties::{ClusterProperties, decode};
use crate::request::{Outcome, Request};

pub struct EcsCluster;

#[async_trait]
impl ResourceHandler for EcsCluster {
    async fn create(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        let props: ClusterProperties = decode(&req.resource_properties)?;
        let arn = ctx.cloud.scheduler.create_cluster(&props.name).await?;
        Ok(Outcome::new(arn))
    }

    async fn update(&self, _ctx: &HandlerContext, _req: &Request) -> FormationResult<Outcome> {
        Err(FormationError::Failed("could not update".into()))
    }

    /// Failures are logged and reported as success so the stack can finish
    /// tearing down.
    async fn delete(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        if let Err(e) = ctx.cloud.scheduler.delete_cluster(req.physical_id()).await {
            warn!(cluster = %req.physical_id(), error = %e, "cluster delete failed");
        }
        Ok(Outcome::new(req.physical_id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{context, request};
    use serde_json::json;

    #[tokio::test]
    async fn create_then_delete_twice() {
        let (ctx, cloud) = context();
        let req = request("Custom::ECSCluster", "Create", None, json!({"Name": "convox-cluster"}));
        let arn = EcsCluster.create(&ctx, &req).await.unwrap().physical_id;
        assert!(arn.ends_with("cluster/convox-cluster"));

        let del = request("Custom::ECSCluster", "Delete", Some(&arn), json!({}));
        EcsCluster.delete(&ctx, &del).await.unwrap();
        EcsCluster.delete(&ctx, &del).await.unwrap();
        assert!(cloud.state().clusters.is_empty());
    }

    #[tokio::test]
    async fn update_is_refused() {
        let (ctx, _) = context();
        let req = request("Custom::ECSCluster", "Update", Some("arn"), json!({"Name": "x"}));
        let err = EcsCluster.update(&ctx, &req).await.unwrap_err();
        assert_eq!(err.to_string(), "could not update");
    }
}
