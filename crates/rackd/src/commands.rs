//! One-shot entry points: template fixtures and env sealing.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use clap::ValueEnum;
use rack_cloud::Cloud;
use rack_core::RackConfig;
use rack_state::{App, Release};
use rack_template::{TemplateInput, synthesise};
use rack_vault::Crypt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EnvAction {
    Encrypt,
    Decrypt,
}

/// Release id fixtures are rendered under unless one is given.
pub const FIXTURE_RELEASE: &str = "RFIXTURE";

/// The template `app` would be promoted with for `manifest`. Bare env
/// references resolve against this process's environment.
pub fn fixture(
    config: &RackConfig,
    manifest: &str,
    app: &str,
    bound: bool,
    build: Option<&str>,
    release_id: &str,
) -> anyhow::Result<String> {
    let env: BTreeMap<String, String> = std::env::vars().collect();
    let parsed = rack_manifest::load(manifest, &env)?;

    let mut a = App::new(app);
    if bound {
        a.tags.insert("Rack".into(), config.rack.clone());
    }
    let mut release = Release::new(app);
    release.id = release_id.to_string();
    release.manifest = manifest.to_string();
    release.build = build.map(String::from);

    let template = synthesise(&TemplateInput {
        manifest: &parsed,
        release: &release,
        app: &a,
        rack: config,
    })?;
    Ok(template)
}

/// Seal or open stdin to stdout under `key`.
pub async fn env(cloud: &Cloud, action: EnvAction, key: &str) -> anyhow::Result<()> {
    let mut input = Vec::new();
    std::io::stdin().read_to_end(&mut input)?;
    let output = transform(cloud, action, key, &input).await?;
    std::io::stdout().write_all(&output)?;
    Ok(())
}

async fn transform(cloud: &Cloud, action: EnvAction, key: &str, input: &[u8]) -> anyhow::Result<Vec<u8>> {
    let crypt = Crypt::new(cloud.kms.clone());
    let output = match action {
        EnvAction::Encrypt => crypt.encrypt(key, input).await?,
        EnvAction::Decrypt => crypt.decrypt(key, input).await?,
    };
    Ok(output)
}
