//! App-Protect WAF resources.
//!
//! APPolicy, APLogConf and APUserSig objects are kept alongside their
//! validation state. User-defined signatures are shared by every policy, so
//! a change to one of them is reported as a single [`UserSigChange`]
//! carrying the policies whose validity changed and the full set of valid
//! signatures.

pub mod dos;

#[cfg(test)]
mod tests;

use crate::configuration::{by_age, created};
use anyhow::{bail, Result};
use nginx_ingress_controller_core::{
    extended::AppProtectResource, Kind, Operation, Problem, ResourceId,
};
use nginx_ingress_controller_k8s_api::{
    app_protect::{APLogConf, APPolicy, APUserSig, Unstructured},
    ResourceExt,
};
use serde_json::Value;
use std::{collections::BTreeMap, net::IpAddr, sync::Arc};

#[derive(Clone, Debug, PartialEq)]
pub struct AppProtectChange {
    pub op: Operation,
    pub resource: AppProtectResource,
}

/// The effect of a user-signature update on the policies that require
/// signatures.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UserSigChange {
    pub policy_adds_or_updates: Vec<Arc<APPolicy>>,
    pub policy_deletions: Vec<Arc<APPolicy>>,
    /// Every valid user signature after the update.
    pub user_sigs: Vec<Arc<APUserSig>>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AppResourceError {
    #[error("{kind} {id} not found")]
    NotFound { kind: Kind, id: ResourceId },

    #[error("{kind} {id} is invalid: {error}")]
    Invalid {
        kind: Kind,
        id: ResourceId,
        error: String,
    },

    #[error("unknown App Protect resource kind {0}")]
    UnknownKind(Kind),
}

#[derive(Debug, Default)]
pub struct AppProtectConfiguration {
    policies: BTreeMap<ResourceId, Entry<APPolicy>>,
    log_confs: BTreeMap<ResourceId, Entry<APLogConf>>,
    user_sigs: BTreeMap<ResourceId, Entry<APUserSig>>,
}

#[derive(Debug)]
struct Entry<T> {
    obj: Arc<T>,
    error: Option<String>,
}

/// A signature tag that a policy requires, optionally bounded by revision.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct SignatureRequirement {
    tag: String,
    min_revision: Option<String>,
    max_revision: Option<String>,
}

type Changes = (Vec<AppProtectChange>, Vec<Problem>);

// === impl Entry ===

impl<T> Entry<T> {
    fn is_valid(&self) -> bool {
        self.error.is_none()
    }
}

// === impl AppProtectConfiguration ===

impl AppProtectConfiguration {
    pub fn add_or_update_policy(&mut self, policy: Arc<APPolicy>) -> Changes {
        let id = ResourceId::of(&*policy);
        let was_valid = self.policies.get(&id).map(Entry::is_valid).unwrap_or(false);
        let error = self.validate_policy(&policy).err().map(|e| e.to_string());
        self.policies.insert(
            id.clone(),
            Entry {
                obj: policy.clone(),
                error: error.clone(),
            },
        );
        let resource = AppProtectResource::Policy(policy);
        transition(Kind::AppProtectPolicy, id, resource, was_valid, error)
    }

    pub fn delete_policy(&mut self, id: &ResourceId) -> Changes {
        let changes = match self.policies.remove(id) {
            Some(entry) if entry.is_valid() => vec![AppProtectChange {
                op: Operation::Delete,
                resource: AppProtectResource::Policy(entry.obj),
            }],
            _ => Vec::new(),
        };
        (changes, Vec::new())
    }

    pub fn add_or_update_log_conf(&mut self, conf: Arc<APLogConf>) -> Changes {
        let id = ResourceId::of(&*conf);
        let was_valid = self.log_confs.get(&id).map(Entry::is_valid).unwrap_or(false);
        let error = validate_log_conf(&conf).err().map(|e| e.to_string());
        self.log_confs.insert(
            id.clone(),
            Entry {
                obj: conf.clone(),
                error: error.clone(),
            },
        );
        let resource = AppProtectResource::LogConf(conf);
        transition(Kind::AppProtectLogConf, id, resource, was_valid, error)
    }

    pub fn delete_log_conf(&mut self, id: &ResourceId) -> Changes {
        let changes = match self.log_confs.remove(id) {
            Some(entry) if entry.is_valid() => vec![AppProtectChange {
                op: Operation::Delete,
                resource: AppProtectResource::LogConf(entry.obj),
            }],
            _ => Vec::new(),
        };
        (changes, Vec::new())
    }

    pub fn add_or_update_user_sig(&mut self, sig: Arc<APUserSig>) -> (UserSigChange, Vec<Problem>) {
        let id = ResourceId::of(&*sig);
        self.user_sigs.insert(id, Entry { obj: sig, error: None });
        self.refresh_user_sigs()
    }

    pub fn delete_user_sig(&mut self, id: &ResourceId) -> (UserSigChange, Vec<Problem>) {
        if self.user_sigs.remove(id).is_none() {
            return (UserSigChange::default(), Vec::new());
        }
        self.refresh_user_sigs()
    }

    /// Looks up a valid App-Protect resource.
    pub fn get_app_resource(
        &self,
        kind: Kind,
        id: &ResourceId,
    ) -> Result<AppProtectResource, AppResourceError> {
        match kind {
            Kind::AppProtectPolicy => {
                lookup(&self.policies, kind, id).map(AppProtectResource::Policy)
            }
            Kind::AppProtectLogConf => {
                lookup(&self.log_confs, kind, id).map(AppProtectResource::LogConf)
            }
            kind => Err(AppResourceError::UnknownKind(kind)),
        }
    }

    pub fn policy(&self, id: &ResourceId) -> Result<Arc<APPolicy>, AppResourceError> {
        lookup(&self.policies, Kind::AppProtectPolicy, id)
    }

    pub fn log_conf(&self, id: &ResourceId) -> Result<Arc<APLogConf>, AppResourceError> {
        lookup(&self.log_confs, Kind::AppProtectLogConf, id)
    }

    /// Every valid user signature, ordered by id.
    pub fn user_sigs(&self) -> Vec<Arc<APUserSig>> {
        self.user_sigs
            .values()
            .filter(|e| e.is_valid())
            .map(|e| e.obj.clone())
            .collect()
    }

    /// Re-evaluates user-signature tags and every policy's signature
    /// requirements. Of several signatures with the same tag the oldest is
    /// valid.
    fn refresh_user_sigs(&mut self) -> (UserSigChange, Vec<Problem>) {
        let mut problems = Vec::new();

        let mut order = self
            .user_sigs
            .iter()
            .map(|(id, e)| (created(&*e.obj).clone(), id.clone()))
            .collect::<Vec<_>>();
        order.sort_by(|(a_ts, a_id), (b_ts, b_id)| by_age((a_ts, a_id), (b_ts, b_id)));

        let mut tags = BTreeMap::<String, ResourceId>::new();
        for (_, id) in order {
            let Some(entry) = self.user_sigs.get_mut(&id) else {
                continue;
            };
            let was_valid = entry.is_valid();
            let error = match validate_user_sig(&entry.obj) {
                Err(error) => Some(error.to_string()),
                Ok(()) => {
                    let tag = user_sig_tag(&entry.obj);
                    match tags.get(&tag) {
                        Some(holder) => Some(format!(
                            "Duplicate tag set: tag {:?} is used by {}",
                            tag, holder
                        )),
                        None => {
                            tags.insert(tag, id.clone());
                            None
                        }
                    }
                }
            };
            if let Some(error) = &error {
                if was_valid || entry.error.as_ref() != Some(error) {
                    problems.push(Problem::rejected(
                        Kind::AppProtectUserSig,
                        id.clone(),
                        error.clone(),
                    ));
                }
            }
            entry.error = error;
        }

        let mut change = UserSigChange::default();
        let ids = self.policies.keys().cloned().collect::<Vec<_>>();
        for id in ids {
            let Some(entry) = self.policies.get(&id) else {
                continue;
            };
            let obj = entry.obj.clone();
            let was_valid = entry.is_valid();
            let error = self.validate_policy(&obj).err().map(|e| e.to_string());
            match (&error, was_valid) {
                (None, false) => change.policy_adds_or_updates.push(obj.clone()),
                (Some(error), true) => {
                    change.policy_deletions.push(obj.clone());
                    problems.push(Problem::rejected(
                        Kind::AppProtectPolicy,
                        id.clone(),
                        error.clone(),
                    ));
                }
                _ => {}
            }
            if let Some(entry) = self.policies.get_mut(&id) {
                entry.error = error;
            }
        }

        change.user_sigs = self.user_sigs();
        (change, problems)
    }

    fn validate_policy(&self, policy: &APPolicy) -> Result<()> {
        if !is_object(policy.spec_field(&["policy"])) {
            bail!(
                "Error validating App Protect Policy {}: Required field spec.policy not found",
                policy.name_any()
            );
        }
        for req in signature_requirements(policy) {
            let satisfied = self.user_sigs.values().any(|sig| {
                sig.is_valid()
                    && user_sig_tag(&sig.obj) == req.tag
                    && req.is_satisfied_by(user_sig_revision(&sig.obj).as_deref())
            });
            if !satisfied {
                bail!(
                    "Policy has unsatisfied signature requirements: tag {:?}",
                    req.tag
                );
            }
        }
        Ok(())
    }
}

// === impl SignatureRequirement ===

impl SignatureRequirement {
    /// Revisions are RFC 3339 timestamps, which order lexically.
    fn is_satisfied_by(&self, revision: Option<&str>) -> bool {
        let in_bounds = |rev: &str| {
            self.min_revision.as_deref().map(|min| rev >= min).unwrap_or(true)
                && self.max_revision.as_deref().map(|max| rev <= max).unwrap_or(true)
        };
        match revision {
            Some(rev) => in_bounds(rev),
            None => self.min_revision.is_none() && self.max_revision.is_none(),
        }
    }
}

fn transition(
    kind: Kind,
    id: ResourceId,
    resource: AppProtectResource,
    was_valid: bool,
    error: Option<String>,
) -> Changes {
    match error {
        None => (
            vec![AppProtectChange {
                op: Operation::AddOrUpdate,
                resource,
            }],
            Vec::new(),
        ),
        Some(error) => {
            let changes = if was_valid {
                vec![AppProtectChange {
                    op: Operation::Delete,
                    resource,
                }]
            } else {
                Vec::new()
            };
            (changes, vec![Problem::rejected(kind, id, error)])
        }
    }
}

fn lookup<T>(
    entries: &BTreeMap<ResourceId, Entry<T>>,
    kind: Kind,
    id: &ResourceId,
) -> Result<Arc<T>, AppResourceError> {
    let entry = entries.get(id).ok_or_else(|| AppResourceError::NotFound {
        kind,
        id: id.clone(),
    })?;
    match &entry.error {
        Some(error) => Err(AppResourceError::Invalid {
            kind,
            id: id.clone(),
            error: error.clone(),
        }),
        None => Ok(entry.obj.clone()),
    }
}

fn validate_log_conf(conf: &APLogConf) -> Result<()> {
    for field in ["content", "filter"] {
        if !is_object(conf.spec_field(&[field])) {
            bail!(
                "Error validating App Protect Log Configuration {}: Required field spec.{} not found",
                conf.name_any(),
                field
            );
        }
    }
    Ok(())
}

fn validate_user_sig(sig: &APUserSig) -> Result<()> {
    if !matches!(sig.spec_field(&["signatures"]), Some(Value::Array(_))) {
        bail!(
            "Error validating App Protect User Signature {}: Required field spec.signatures not found",
            sig.name_any()
        );
    }
    Ok(())
}

fn is_object(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::Object(_)))
}

fn user_sig_tag(sig: &APUserSig) -> String {
    sig.spec_field(&["tag"])
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn user_sig_revision(sig: &APUserSig) -> Option<String> {
    sig.spec_field(&["revisionDatetime"])
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn signature_requirements(policy: &APPolicy) -> Vec<SignatureRequirement> {
    let reqs = match policy.spec_field(&["policy", "signature-requirements"]) {
        Some(Value::Array(reqs)) => reqs,
        _ => return Vec::new(),
    };
    let string = |req: &Value, key: &str| req.get(key).and_then(Value::as_str).map(str::to_string);
    reqs.iter()
        .filter_map(|req| {
            Some(SignatureRequirement {
                tag: string(req, "tag")?,
                min_revision: string(req, "minRevisionDatetime"),
                max_revision: string(req, "maxRevisionDatetime"),
            })
        })
        .collect()
}

/// Validates a security log destination: `syslog:server=<ip|localhost>:<port>`,
/// `stderr`, or an absolute file path.
pub fn validate_log_destination(dest: &str) -> Result<()> {
    const FORMAT: &str = "Error parsing App Protect Log config: Destination must follow format: \
                          syslog:server=<ip-address | localhost>:<port> or stderr or absolute path to file";

    if dest == "stderr" {
        return Ok(());
    }
    if dest.starts_with('/') && dest.len() > 1 && !dest.contains(char::is_whitespace) {
        return Ok(());
    }

    let Some(server) = dest.strip_prefix("syslog:server=") else {
        bail!("{} Log Destination did not follow format", FORMAT);
    };
    let Some((host, port)) = server.rsplit_once(':') else {
        bail!("{} Log Destination did not follow format", FORMAT);
    };
    if port.is_empty() || port.len() > 5 || !port.bytes().all(|b| b.is_ascii_digit()) {
        bail!("{} Log Destination did not follow format", FORMAT);
    }
    match port.parse::<u32>() {
        Ok(p) if (1..=65535).contains(&p) => {}
        _ => bail!("Error parsing port: {} not a valid port number", port),
    }
    if host != "localhost" && host.parse::<IpAddr>().is_err() {
        bail!("Error parsing host: {} is not a valid ip address", host);
    }
    Ok(())
}
