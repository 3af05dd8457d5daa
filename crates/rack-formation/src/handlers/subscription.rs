use async_trait::async_trait;

use super::{HandlerContext, ResourceHandler, ignore_not_found};
use crate::error::FormationResult;
use crate::properties::{SubscriptionProperties, decode};
use crate::request::{Outcome, Request};

pub struct SnsSubscription;

impl SnsSubscription {
    async fn subscribe(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        let props: SubscriptionProperties = decode(&req.resource_properties)?;
        let arn = ctx
            .cloud
            .notifications
            .subscribe(&props.topic_arn, &props.protocol, &props.endpoint)
            .await?;
        Ok(Outcome::new(arn))
    }
}

#[async_trait]
impl ResourceHandler for SnsSubscription {
    async fn create(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        self.subscribe(ctx, req).await
    }

    /// A new subscription replaces the old one; the engine then deletes the
    /// previous physical id.
    async fn update(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        self.subscribe(ctx, req).await
    }

    async fn delete(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        ignore_not_found(ctx.cloud.notifications.unsubscribe(req.physical_id()).await)?;
        Ok(Outcome::new(req.physical_id()))
    }
}
