//! Self-signed CA plus a server certificate it signs, for racks that have
//! not been given a real one.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

use super::{HandlerContext, ResourceHandler};
use crate::error::{FormationError, FormationResult};
use crate::properties::{CertificateProperties, decode};
use crate::request::{Outcome, Request};

const KEY_BITS: usize = 2048;
const VALIDITY_DAYS: i64 = 3 * 365;

pub struct SelfSignedCertificate;

/// PEM material produced for one request.
#[derive(Debug, Clone)]
pub struct CertificateBundle {
    pub ca_cert: String,
    pub ca_key: String,
    pub cert: String,
    pub key: String,
}

fn cert_err(e: impl std::fmt::Display) -> FormationError {
    FormationError::Certificate(e.to_string())
}

fn rsa_key() -> FormationResult<KeyPair> {
    let key = RsaPrivateKey::new(&mut rand::thread_rng(), KEY_BITS).map_err(cert_err)?;
    let pem = key.to_pkcs8_pem(LineEnding::LF).map_err(cert_err)?;
    KeyPair::from_pem_and_sign_algo(&pem, &rcgen::PKCS_RSA_SHA256).map_err(cert_err)
}

fn params(common_name: &str, organization: &str) -> FormationResult<CertificateParams> {
    let mut params = CertificateParams::new(vec![common_name.to_string()]).map_err(cert_err)?;
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    params
        .distinguished_name
        .push(DnType::OrganizationName, organization);
    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::hours(1);
    params.not_after = now + Duration::days(VALIDITY_DAYS);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    Ok(params)
}

pub fn generate(common_name: &str, organization: &str) -> FormationResult<CertificateBundle> {
    let ca_key = rsa_key()?;
    let mut ca_params = params(&format!("ca.{common_name}"), organization)?;
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages.push(KeyUsagePurpose::KeyCertSign);
    let ca_cert = ca_params.self_signed(&ca_key).map_err(cert_err)?;

    let key = rsa_key()?;
    let cert = params(common_name, organization)?
        .signed_by(&key, &ca_cert, &ca_key)
        .map_err(cert_err)?;

    Ok(CertificateBundle {
        ca_cert: ca_cert.pem(),
        ca_key: ca_key.serialize_pem(),
        cert: cert.pem(),
        key: key.serialize_pem(),
    })
}

impl SelfSignedCertificate {
    fn issue(&self, req: &Request) -> FormationResult<Outcome> {
        let props: CertificateProperties = decode(&req.resource_properties)?;
        let organization = props
            .rack
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| req.stack_name().to_string());
        let common_name = props
            .common_name
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| format!("*.{organization}.internal"));

        let bundle = generate(&common_name, &organization)?;
        let id = hex::encode(&Sha256::digest(bundle.cert.as_bytes())[..8]);
        Ok(Outcome::new(format!("cert-{id}"))
            .output("CACert", STANDARD.encode(bundle.ca_cert))
            .output("CAKey", STANDARD.encode(bundle.ca_key))
            .output("Cert", STANDARD.encode(bundle.cert))
            .output("Key", STANDARD.encode(bundle.key)))
    }
}

#[async_trait]
impl ResourceHandler for SelfSignedCertificate {
    async fn create(&self, _ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        self.issue(req)
    }

    async fn update(&self, _ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        self.issue(req)
    }

    async fn delete(&self, _ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        Ok(Outcome::new(req.physical_id()))
    }
}
