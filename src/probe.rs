// File: probe.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

//! Pre-flight check that a WAF sits in front of the target.
//!
//! Sends one harmless GET and one GET carrying obvious attack payloads in
//! the query. A differing status means something is filtering requests, and
//! the status of the attack request is taken as the block status code.

use crate::config::Target;
use anyhow::{Context, Result};
use log::{debug, info};
use reqwest::header::HOST;
use reqwest::redirect::Policy;
use std::time::Duration;
use url::Url;

pub const PROBE_PATH: &str = "/abcdefg/hijklmn/a.html";
/// SQL injection, XSS and command injection packed into one raw query.
pub const INJECTED_QUERY: &str = "1%20AND%201=1%20UNION%20ALL%20SELECT%201,NULL,%27<script>alert(\"XSS\")</script>%27,table_name%20FROM%20information_schema.tables%20WHERE%202>1--/**/;%20EXEC%20xp_cmdshell(%27cat%20../../../etc/passwd%27)#";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub normal_status: u16,
    pub injected_status: u16,
}

impl ProbeOutcome {
    pub fn is_waf(&self) -> bool {
        self.normal_status != self.injected_status
    }

    pub fn block_status(&self) -> Option<u16> {
        self.is_waf().then_some(self.injected_status)
    }
}

#[derive(Debug, Clone)]
pub struct WafProbe {
    client: reqwest::Client,
    base: String,
    host_override: Option<String>,
}

impl WafProbe {
    pub fn new(target: &Target, host_override: Option<&str>, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .redirect(Policy::none())
            .timeout(Duration::from_millis(timeout_ms.max(1)))
            .build()
            .context("Failed to build reqwest client")?;
        Url::parse(target.url())
            .with_context(|| format!("Invalid target URL {}", target.url()))?;
        Ok(Self {
            client,
            base: target.url().trim_end_matches('/').to_string(),
            host_override: host_override.map(str::to_string),
        })
    }

    /// The probe path appended to the target, keeping any base path.
    pub fn normal_url(&self) -> Result<Url> {
        let url = format!("{}{}", self.base, PROBE_PATH);
        Url::parse(&url).with_context(|| format!("Failed to build probe URL {}", url))
    }

    pub fn injected_url(&self) -> Result<Url> {
        let url = format!("{}{}?{}", self.base, PROBE_PATH, INJECTED_QUERY);
        Url::parse(&url).with_context(|| format!("Failed to build probe URL {}", url))
    }

    async fn status_of(&self, url: Url) -> Result<u16> {
        let mut request = self.client.get(url.clone());
        if let Some(host) = &self.host_override {
            request = request.header(HOST, host.as_str());
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("Probe request to {} failed", url))?;
        let status = response.status().as_u16();
        debug!("probe {} -> {}", url, status);
        Ok(status)
    }

    pub async fn detect(&self) -> Result<ProbeOutcome> {
        let normal_status = self.status_of(self.normal_url()?).await?;
        let injected_status = self.status_of(self.injected_url()?).await?;
        let outcome = ProbeOutcome {
            normal_status,
            injected_status,
        };
        if outcome.is_waf() {
            info!(
                "WAF detected: normal request {}, injected request {}",
                normal_status, injected_status
            );
        } else {
            info!("no WAF detected, both probes returned {}", normal_status);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_waf_present() {
        let outcome = ProbeOutcome {
            normal_status: 404,
            injected_status: 403,
        };
        assert!(outcome.is_waf());
        assert_eq!(outcome.block_status(), Some(403));
    }

    #[test]
    fn test_outcome_no_waf() {
        let outcome = ProbeOutcome {
            normal_status: 404,
            injected_status: 404,
        };
        assert!(!outcome.is_waf());
        assert_eq!(outcome.block_status(), None);
    }

    #[test]
    fn test_urls_keep_base_path() {
        let target = Target::parse("https://example.com:8443/app").unwrap();
        let detector = WafProbe::new(&target, None, 1000).unwrap();

        let normal = detector.normal_url().unwrap();
        assert_eq!(
            normal.as_str(),
            "https://example.com:8443/app/abcdefg/hijklmn/a.html"
        );
        assert_eq!(normal.query(), None);

        let injected = detector.injected_url().unwrap();
        assert_eq!(injected.path(), "/app/abcdefg/hijklmn/a.html");
        let query = injected.query().unwrap();
        assert!(query.starts_with("1%20AND%201=1%20UNION%20ALL%20SELECT%201,NULL,%27"));
        assert!(query.contains("information_schema.tables"));
        assert!(query.ends_with("EXEC%20xp_cmdshell(%27cat%20../../../etc/passwd%27)"));
    }

    #[test]
    fn test_urls_on_bare_host() {
        let target = Target::parse("http://10.0.0.5:8080").unwrap();
        let detector = WafProbe::new(&target, None, 1000).unwrap();
        assert_eq!(
            detector.normal_url().unwrap().as_str(),
            "http://10.0.0.5:8080/abcdefg/hijklmn/a.html"
        );
        assert_eq!(detector.injected_url().unwrap().path(), PROBE_PATH);
    }
}
