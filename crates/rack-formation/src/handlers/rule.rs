//! Scheduled event rules, used for manifest timers.

use async_trait::async_trait;
use rack_cloud::RuleTarget;
use tracing::debug;

use super::{HandlerContext, ResourceHandler, ignore_not_found};
use crate::error::FormationResult;
use crate::properties::{RuleProperties, decode};
use crate::request::{Outcome, Request};

pub struct EventsRule;

impl EventsRule {
    async fn put(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        let props: RuleProperties = decode(&req.resource_properties)?;
        let rules = &ctx.cloud.rules;
        let arn = rules.put_rule(&props.name, &props.schedule_expression).await?;

        let targets: Vec<RuleTarget> = props
            .targets
            .iter()
            .map(|t| RuleTarget {
                id: t.id.clone(),
                arn: t.arn.clone(),
                input: t.input.clone(),
                task_definition: t.task_definition.clone(),
            })
            .collect();
        let stale: Vec<String> = rules
            .list_target_ids(&props.name)
            .await?
            .into_iter()
            .filter(|id| !targets.iter().any(|t| &t.id == id))
            .collect();
        if !stale.is_empty() {
            rules.remove_targets(&props.name, &stale).await?;
        }
        if !targets.is_empty() {
            rules.put_targets(&props.name, &targets).await?;
        }
        debug!(rule = %props.name, targets = targets.len(), "rule applied");
        Ok(Outcome::new(props.name).output("Arn", arn))
    }
}

#[async_trait]
impl ResourceHandler for EventsRule {
    async fn create(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        self.put(ctx, req).await
    }

    async fn update(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        self.put(ctx, req).await
    }

    async fn delete(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        let name = req.physical_id();
        let rules = &ctx.cloud.rules;
        match rules.list_target_ids(name).await {
            Ok(ids) if !ids.is_empty() => ignore_not_found(rules.remove_targets(name, &ids).await)?,
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(Outcome::new(name)),
            Err(e) => return Err(e.into()),
        }
        ignore_not_found(rules.delete_rule(name).await)?;
        Ok(Outcome::new(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{context, request};
    use serde_json::json;

    fn props(targets: serde_json::Value) -> serde_json::Value {
        json!({"Name": "convox-myapp-cleanup", "ScheduleExpression": "cron(0 * * * ? *)", "Targets": targets})
    }

    #[tokio::test]
    async fn update_replaces_targets_and_delete_is_idempotent() {
        let (ctx, cloud) = context();
        let req = request(
            "Custom::CloudWatchEventsRule",
            "Create",
            None,
            props(json!([{"Id": "a", "Arn": "cluster", "TaskDefinition": "td:1"}])),
        );
        let name = EventsRule.create(&ctx, &req).await.unwrap().physical_id;

        let upd = request(
            "Custom::CloudWatchEventsRule",
            "Update",
            Some(&name),
            props(json!([{"Id": "b", "Arn": "cluster", "Input": "{}"}])),
        );
        EventsRule.update(&ctx, &upd).await.unwrap();
        let ids: Vec<String> = cloud.state().rules[&name].1.iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, vec!["b"]);

        let del = request("Custom::CloudWatchEventsRule", "Delete", Some(&name), json!({}));
        EventsRule.delete(&ctx, &del).await.unwrap();
        EventsRule.delete(&ctx, &del).await.unwrap();
        assert!(cloud.state().rules.is_empty());
    }
}
