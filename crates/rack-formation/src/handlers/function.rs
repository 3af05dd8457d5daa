use async_trait::async_trait;
use rack_cloud::FunctionSpec;
use rack_core::id::random_id;
use tracing::info;

use super::{HandlerContext, ResourceHandler, ignore_not_found};
use crate::error::FormationResult;
use crate::properties::{FunctionProperties, decode};
use crate::request::{Outcome, Request};

const DEFAULT_TIMEOUT_SECS: u32 = 3;

pub struct LambdaFunction;

#[async_trait]
impl ResourceHandler for LambdaFunction {
    async fn create(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        let props: FunctionProperties = decode(&req.resource_properties)?;
        let name = props
            .function_name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("{}-{}", req.logical_resource_id, random_id('F', 10)));
        let arn = ctx
            .cloud
            .functions
            .create_function(&FunctionSpec {
                name: name.clone(),
                handler: props.handler,
                role: props.role,
                runtime: props.runtime,
                timeout_secs: props.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS),
                code: (props.code.s3_bucket, props.code.s3_key),
            })
            .await?;
        info!(function = %name, "function created");
        Ok(Outcome::new(name).output("Arn", arn))
    }

    async fn update(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        let props: FunctionProperties = decode(&req.resource_properties)?;
        let code = (props.code.s3_bucket, props.code.s3_key);
        ctx.cloud
            .functions
            .update_function_code(req.physical_id(), &code)
            .await?;
        Ok(Outcome::new(req.physical_id()))
    }

    async fn delete(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        ignore_not_found(ctx.cloud.functions.delete_function(req.physical_id()).await)?;
        Ok(Outcome::new(req.physical_id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{context, request};
    use serde_json::json;

    fn props(key: &str) -> serde_json::Value {
        json!({
            "FunctionName": "convox-myapp-hook",
            "Code": {"S3Bucket": "code", "S3Key": key},
            "Handler": "index.handler",
            "Role": "arn:aws:iam::1:role/fn",
            "Runtime": "nodejs",
            "Timeout": "30",
        })
    }

    #[tokio::test]
    async fn lifecycle() {
        let (ctx, cloud) = context();
        let out = LambdaFunction
            .create(&ctx, &request("Custom::LambdaFunction", "Create", None, props("v1.zip")))
            .await
            .unwrap();
        assert_eq!(out.physical_id, "convox-myapp-hook");
        assert_eq!(cloud.state().functions["convox-myapp-hook"].timeout_secs, 30);

        let upd = request("Custom::LambdaFunction", "Update", Some("convox-myapp-hook"), props("v2.zip"));
        LambdaFunction.update(&ctx, &upd).await.unwrap();
        assert_eq!(cloud.state().functions["convox-myapp-hook"].code.1, "v2.zip");

        let del = request("Custom::LambdaFunction", "Delete", Some("convox-myapp-hook"), json!({}));
        LambdaFunction.delete(&ctx, &del).await.unwrap();
        LambdaFunction.delete(&ctx, &del).await.unwrap();
        assert!(cloud.state().functions.is_empty());
    }
}
