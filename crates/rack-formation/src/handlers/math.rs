//! Integer helpers for templates that derive one parameter from two others.

use async_trait::async_trait;

use super::{HandlerContext, ResourceHandler};
use crate::error::FormationResult;
use crate::properties::{MathProperties, decode};
use crate::request::{Outcome, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Math {
    Max,
    Min,
}

impl Math {
    pub fn apply(self, x: i64, y: i64) -> i64 {
        match self {
            Math::Max => x.max(y),
            Math::Min => x.min(y),
        }
    }

    fn evaluate(self, req: &Request) -> FormationResult<Outcome> {
        let props: MathProperties = decode(&req.resource_properties)?;
        let value = self.apply(props.x, props.y).to_string();
        Ok(Outcome::new(value.clone()).output("Value", value))
    }
}

#[async_trait]
impl ResourceHandler for Math {
    async fn create(&self, _ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        self.evaluate(req)
    }

    async fn update(&self, _ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        self.evaluate(req)
    }

    async fn delete(&self, _ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        Ok(Outcome::new(req.physical_id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{context, request};
    use serde_json::json;

    #[tokio::test]
    async fn max_and_min() {
        let (ctx, _) = context();
        let req = request("Custom::MathMax", "Create", None, json!({"X": "3", "Y": "7"}));
        assert_eq!(Math::Max.create(&ctx, &req).await.unwrap().outputs["Value"], "7");
        assert_eq!(Math::Min.update(&ctx, &req).await.unwrap().outputs["Value"], "3");
    }

    #[tokio::test]
    async fn delete_twice_succeeds() {
        let (ctx, _) = context();
        let create = request("Custom::MathMin", "Create", None, json!({"X": "3", "Y": "7"}));
        let id = Math::Min.create(&ctx, &create).await.unwrap().physical_id;
        assert_eq!(id, "3");

        let del = request("Custom::MathMin", "Delete", Some(&id), json!({"X": "3", "Y": "7"}));
        assert_eq!(Math::Min.delete(&ctx, &del).await.unwrap().physical_id, "3");
        assert_eq!(Math::Min.delete(&ctx, &del).await.unwrap().physical_id, "3");
    }
}
