//! Parses the main and management ConfigMaps.

use anyhow::{bail, Result};
use nginx_ingress_controller_core::{ConfigParams, MgmtConfigParams};
use nginx_ingress_controller_k8s_api::ConfigMap;
use std::{collections::BTreeMap, time::Duration};

const EXTERNAL_STATUS_ADDRESS: &str = "external-status-address";

const LICENSE_TOKEN_SECRET: &str = "license-token-secret-name";
const CLIENT_AUTH_SECRET: &str = "ssl-certificate-secret-name";
const TRUSTED_CERT_SECRET: &str = "ssl-trusted-certificate-secret-name";
const USAGE_REPORT_INTERVAL: &str = "usage-report-interval";
const BOOL_KEYS: [&str; 3] = ["ssl-verify", "resolver-ipv6", "enforce-initial-report"];

const MIN_USAGE_REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Global parameters from the main ConfigMap. A missing ConfigMap yields
/// the defaults.
pub fn config_params(cm: Option<&ConfigMap>) -> ConfigParams {
    let values = data(cm);
    let external_status_address = values
        .get(EXTERNAL_STATUS_ADDRESS)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    ConfigParams {
        values,
        external_status_address,
    }
}

/// Parameters from the management ConfigMap, along with warnings about
/// values that were ignored. Fails if no license secret is named.
pub fn mgmt_config_params(cm: &ConfigMap) -> Result<(MgmtConfigParams, Vec<String>)> {
    let mut values = data(Some(cm));
    let id = nginx_ingress_controller_k8s_api::key(cm);

    let license = values
        .get(LICENSE_TOKEN_SECRET)
        .map(|v| v.trim().to_string())
        .unwrap_or_default();
    if license.is_empty() {
        bail!(
            "Configmap {}: Missing or empty value for the {} key. Failing.",
            id,
            LICENSE_TOKEN_SECRET
        );
    }

    let mut warnings = Vec::new();
    for key in BOOL_KEYS {
        if let Some(value) = values.get(key) {
            if value.parse::<bool>().is_err() {
                warnings.push(format!(
                    "Configmap {}: Invalid value for the {} key: got {:?}. Ignoring.",
                    id, key, value
                ));
                values.remove(key);
            }
        }
    }

    if let Some(interval) = values.get(USAGE_REPORT_INTERVAL).map(|v| v.trim().to_string()) {
        match parse_duration(&interval) {
            Some(d) if d >= MIN_USAGE_REPORT_INTERVAL => {
                values.insert(USAGE_REPORT_INTERVAL.to_string(), interval);
            }
            Some(_) => {
                warnings.push(format!(
                    "Configmap {}: Value too low for the interval key, got: {}, need higher than {}s. Ignoring.",
                    id,
                    interval,
                    MIN_USAGE_REPORT_INTERVAL.as_secs()
                ));
                values.remove(USAGE_REPORT_INTERVAL);
            }
            None => {
                warnings.push(format!(
                    "Configmap {}: Invalid value for the interval key: got {:?}. Ignoring.",
                    id, interval
                ));
                values.remove(USAGE_REPORT_INTERVAL);
            }
        }
    }

    let trimmed = |key: &str| {
        values
            .get(key)
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    };
    let params = MgmtConfigParams {
        license_token_secret: license,
        client_auth_secret: trimmed(CLIENT_AUTH_SECRET),
        trusted_cert_secret: trimmed(TRUSTED_CERT_SECRET),
        values,
    };
    Ok((params, warnings))
}

fn data(cm: Option<&ConfigMap>) -> BTreeMap<String, String> {
    cm.and_then(|cm| cm.data.clone()).unwrap_or_default()
}

/// Parses durations such as `90s`, `30m`, or `1h30m`.
fn parse_duration(s: &str) -> Option<Duration> {
    if s.is_empty() {
        return None;
    }
    let mut total = 0u64;
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let n = digits.parse::<u64>().ok()?;
        digits.clear();
        total += match c {
            'h' => n * 3600,
            'm' => n * 60,
            's' => n,
            _ => return None,
        };
    }
    if !digits.is_empty() {
        return None;
    }
    Some(Duration::from_secs(total))
}
