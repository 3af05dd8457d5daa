//! Availability-zone discovery.
//!
//! There is no zone listing call scoped to what a VPC can use, so create
//! asks for a subnet in a zone that cannot exist and reads the valid zones
//! back out of the rejection.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::{HandlerContext, ResourceHandler};
use crate::error::{FormationError, FormationResult};
use crate::properties::{ZonesProperties, decode};
use crate::request::{Outcome, Request};

const INVALID_ZONE: &str = "garbage";
const SCRATCH_CIDR: &str = "10.200.0.0/16";

static ZONES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"following availability zones: ([^.]+)").expect("valid")
});

pub struct AvailabilityZones;

/// Zones named in a subnet-create rejection, in the order given.
pub fn zones_from_error(message: &str) -> FormationResult<Vec<String>> {
    let caps = ZONES_RE
        .captures(message)
        .ok_or_else(|| FormationError::Failed("could not discover availability zones".into()))?;
    let zones: Vec<String> = caps[1]
        .split(',')
        .map(|z| z.trim().to_string())
        .filter(|z| !z.is_empty())
        .collect();
    if zones.is_empty() {
        return Err(FormationError::Failed("could not discover availability zones".into()));
    }
    Ok(zones)
}

fn outcome(zones: &[String]) -> Outcome {
    zones
        .iter()
        .enumerate()
        .fold(Outcome::new(zones.join(",")), |o, (i, z)| {
            o.output(format!("AvailabilityZone{i}"), z.clone())
        })
}

#[async_trait]
impl ResourceHandler for AvailabilityZones {
    async fn create(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        let props: ZonesProperties = decode(&req.resource_properties)?;
        let err = match ctx
            .cloud
            .compute
            .create_subnet(&props.vpc, INVALID_ZONE, SCRATCH_CIDR)
            .await
        {
            Ok(subnet) => {
                return Err(FormationError::Failed(format!(
                    "zone lookup unexpectedly created subnet {subnet}"
                )));
            }
            Err(e) => e,
        };
        let zones = zones_from_error(&err.message())?;
        debug!(vpc = %props.vpc, zones = %zones.join(","), "availability zones discovered");
        Ok(outcome(&zones))
    }

    async fn update(&self, _ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        let zones: Vec<String> = req.physical_id().split(',').map(String::from).collect();
        Ok(outcome(&zones))
    }

    async fn delete(&self, _ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        Ok(Outcome::new(req.physical_id()))
    }
}
