use async_trait::async_trait;
use rack_core::id::random_id;
use tracing::info;

use super::{HandlerContext, ResourceHandler, ignore_not_found};
use crate::error::FormationResult;
use crate::properties::{RepositoryProperties, decode};
use crate::request::{Outcome, Request};

pub struct EcrRepository;

#[async_trait]
impl ResourceHandler for EcrRepository {
    async fn create(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        let props: RepositoryProperties = decode(&req.resource_properties)?;
        let name = props
            .repository_name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| {
                format!("{}-{}", req.stack_name(), random_id('r', 10)).to_lowercase()
            });
        let repo = ctx.cloud.registry.create_repository(&name).await?;
        info!(repository = %repo.name, "repository created");
        Ok(Outcome::new(repo.name.clone())
            .output("RegistryId", repo.registry_id)
            .output("RepositoryName", repo.name))
    }

    async fn update(&self, _ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        Ok(Outcome::new(req.physical_id()))
    }

    /// Images go first; the registry refuses to drop a non-empty repository.
    async fn delete(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        let name = req.physical_id();
        let registry = &ctx.cloud.registry;
        match registry.list_images(name).await {
            Ok(images) if !images.is_empty() => {
                ignore_not_found(registry.delete_images(name, &images).await)?
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(Outcome::new(name)),
            Err(e) => return Err(e.into()),
        }
        ignore_not_found(registry.delete_repository(name).await)?;
        Ok(Outcome::new(name))
    }
}
