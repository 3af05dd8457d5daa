use async_trait::async_trait;
use rack_cloud::IngressRule;

use super::{HandlerContext, ResourceHandler, ignore_not_found};
use crate::error::{FormationError, FormationResult};
use crate::properties::{IngressProperties, decode};
use crate::request::{Outcome, Request};

pub struct SgIngress;

fn rule(props: IngressProperties) -> FormationResult<IngressRule> {
    let port = |p: u32| {
        u16::try_from(p).map_err(|_| FormationError::Properties(format!("port out of range: {p}")))
    };
    Ok(IngressRule {
        group_id: props.group_id,
        protocol: props.ip_protocol,
        from_port: port(props.from_port)?,
        to_port: port(props.to_port)?,
        cidr: props.cidr_ip,
    })
}

fn physical_id(rule: &IngressRule) -> String {
    format!(
        "ingress-{}-{}-{}-{}-{}",
        rule.group_id, rule.protocol, rule.from_port, rule.to_port, rule.cidr
    )
}

#[async_trait]
impl ResourceHandler for SgIngress {
    async fn create(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        let rule = rule(decode(&req.resource_properties)?)?;
        match ctx.cloud.firewall.authorize_ingress(&rule).await {
            Ok(()) => {}
            Err(e) if e.code() == "InvalidPermission.Duplicate" => {}
            Err(e) => return Err(e.into()),
        }
        Ok(Outcome::new(physical_id(&rule)))
    }

    /// Authorises the new rule and returns a new id when it differs, so the
    /// engine revokes the old one.
    async fn update(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        self.create(ctx, req).await
    }

    async fn delete(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        let rule = rule(decode(&req.resource_properties)?)?;
        ignore_not_found(ctx.cloud.firewall.revoke_ingress(&rule).await)?;
        Ok(Outcome::new(req.physical_id()))
    }
}
