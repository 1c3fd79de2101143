//! Self-signed certificate renewal
//!
//! Every run looks for [`WebsiteCertificate`]s maintained by the self-signed
//! editor that expire within `renew_before`, signs a fresh certificate with
//! the same key and submits it through the engine. Each certificate is its
//! own batch, so one failure leaves the others renewed.

use super::TimerTask;
use crate::plugin::types::{SELF_SIGNED_EDITOR, WebsiteCertificate};
use crate::runner;
use anyhow::{Context, Result};
use chrono::{DateTime, Months, TimeDelta, Utc};
use declarative::AlertSink;
use graphstore::{ChangeExecutionEngine, ChangesContext, GraphReader, Query, Resource, TypedResource};
use std::collections::BTreeSet;
use std::sync::Arc;

/// A private key, as loaded by a [`CertificateAuthority`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key_pem: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningRequest {
    pub common_name: String,
    pub subject_names: BTreeSet<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedCertificate {
    pub certificate_pem: String,
    pub thumbprint: String,
}

/// Certificate math, kept behind a trait.
pub trait CertificateAuthority: Send + Sync {
    fn load_key_pair(&self, private_key_pem: &str) -> Result<KeyPair>;

    fn self_sign(&self, key: &KeyPair, request: &SigningRequest) -> Result<SignedCertificate>;
}

/// [`CertificateAuthority`] backed by the `openssl` command.
#[derive(Debug, Clone)]
pub struct OpensslAuthority {
    binary: String,
}

impl Default for OpensslAuthority {
    fn default() -> Self {
        Self {
            binary: "openssl".to_string(),
        }
    }
}

impl OpensslAuthority {
    pub fn is_available(&self) -> bool {
        runner::command_exists(&self.binary)
    }
}

impl CertificateAuthority for OpensslAuthority {
    fn load_key_pair(&self, private_key_pem: &str) -> Result<KeyPair> {
        let normalized = runner::run_with_input(&self.binary, &["pkey"], private_key_pem.as_bytes())
            .context("Could not load private key")?;
        Ok(KeyPair {
            private_key_pem: normalized,
        })
    }

    fn self_sign(&self, key: &KeyPair, request: &SigningRequest) -> Result<SignedCertificate> {
        let days = (request.end - request.start).num_days().max(1).to_string();
        let subject = format!("/CN={}", request.common_name);
        let mut names: BTreeSet<&str> = request.subject_names.iter().map(String::as_str).collect();
        names.insert(&request.common_name);
        let san = format!(
            "subjectAltName={}",
            names
                .iter()
                .map(|name| format!("DNS:{name}"))
                .collect::<Vec<_>>()
                .join(",")
        );

        let certificate_pem = runner::run_with_input(
            &self.binary,
            &[
                "req", "-x509", "-new", "-key", "/dev/stdin", "-subj", &subject, "-days", &days,
                "-addext", &san,
            ],
            key.private_key_pem.as_bytes(),
        )
        .with_context(|| format!("Could not sign certificate for {}", request.common_name))?;

        let fingerprint = runner::run_with_input(
            &self.binary,
            &["x509", "-noout", "-fingerprint", "-sha256"],
            certificate_pem.as_bytes(),
        )?;
        // "sha256 Fingerprint=AB:CD:..."
        let thumbprint = fingerprint
            .split_once('=')
            .map_or(fingerprint.as_str(), |(_, hex)| hex)
            .replace(':', "")
            .to_lowercase();

        Ok(SignedCertificate {
            certificate_pem,
            thumbprint,
        })
    }
}

/// Outcome of one renewal run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenewalSummary {
    /// Domains renewed
    pub renewed: Vec<String>,
    /// Domains that failed, with the error
    pub failed: Vec<(String, String)>,
}

pub struct CertificateRenewalTimer {
    authority: Arc<dyn CertificateAuthority>,
    renew_before: TimeDelta,
    validity: Months,
}

impl CertificateRenewalTimer {
    pub fn new(authority: Arc<dyn CertificateAuthority>) -> Self {
        Self {
            authority,
            renew_before: TimeDelta::days(7),
            validity: Months::new(1),
        }
    }

    pub fn with_renew_before(mut self, renew_before: TimeDelta) -> Self {
        self.renew_before = renew_before;
        self
    }

    pub fn with_validity(mut self, validity: Months) -> Self {
        self.validity = validity;
        self
    }

    /// Self-signed certificates ending within the renewal window.
    pub fn due(&self, reader: &GraphReader, now: DateTime<Utc>) -> Result<Vec<Resource>> {
        let query = Query::of_type(WebsiteCertificate::TYPE)
            .editor(SELF_SIGNED_EDITOR)
            .property_lesser_equal("end", now + self.renew_before);
        Ok(reader.find(&query)?)
    }

    pub fn renew_due(
        &self,
        engine: &ChangeExecutionEngine,
        alerts: &dyn AlertSink,
        now: DateTime<Utc>,
    ) -> Result<RenewalSummary> {
        let mut summary = RenewalSummary::default();

        for resource in self.due(&engine.reader(), now)? {
            let domain = resource.text("domain").unwrap_or("?").to_string();
            // Every renewal signs a new batch, so failures are counted per certificate
            let key = format!("certificate-renewal:{domain}");
            match self.renew_one(engine, &resource, now) {
                Ok(()) => {
                    engine.report_success(&key);
                    log::info!("Renewed certificate for {domain}");
                    summary.renewed.push(domain);
                }
                Err(err) => {
                    let detail = format!("{err:#}");
                    let mut attempted = ChangesContext::new();
                    if let Some(id) = resource.internal_id {
                        attempted.resource_update(id, resource.clone());
                    }
                    let reported = engine.report_failure(&key, &attempted, graphstore::Error::task(&key, &detail));
                    let subject = if matches!(reported, graphstore::Error::RepeatedFailure { .. }) {
                        format!("certificate renewal keeps failing for {domain}")
                    } else {
                        format!("certificate renewal failed for {domain}")
                    };
                    log::error!("Could not renew certificate for {domain}: {detail}");
                    alerts.alerting_error(&subject, &detail);
                    summary.failed.push((domain, detail));
                }
            }
        }

        Ok(summary)
    }

    fn renew_one(&self, engine: &ChangeExecutionEngine, resource: &Resource, now: DateTime<Utc>) -> Result<()> {
        let internal_id = resource
            .internal_id
            .with_context(|| format!("{resource} is not persisted"))?;
        let mut certificate = WebsiteCertificate::try_from_resource(resource)?;

        let key = self.authority.load_key_pair(&certificate.private_key)?;
        let end = now
            .checked_add_months(self.validity)
            .context("Certificate validity is out of range")?;
        let signed = self.authority.self_sign(
            &key,
            &SigningRequest {
                common_name: certificate.domain.clone(),
                subject_names: certificate.subject_names.clone(),
                start: now,
                end,
            },
        )?;

        certificate.certificate = signed.certificate_pem;
        certificate.thumbprint = signed.thumbprint;
        certificate.ca_chain = None;
        certificate.start = now;
        certificate.end = end;

        let mut changes = ChangesContext::new();
        changes.resource_update(internal_id, certificate.to_resource());
        engine.apply(&mut changes)?;
        Ok(())
    }
}

impl TimerTask for CertificateRenewalTimer {
    fn run(&self, engine: &ChangeExecutionEngine, alerts: &dyn AlertSink) -> Result<String> {
        let summary = self.renew_due(engine, alerts, Utc::now())?;
        Ok(format!(
            "{} renewed, {} failed",
            summary.renewed.len(),
            summary.failed.len()
        ))
    }
}
