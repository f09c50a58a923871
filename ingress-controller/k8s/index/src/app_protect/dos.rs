//! App-Protect DoS resources.

use super::validate_log_destination;
use crate::validation::{validate_reference, FieldErrors};
use anyhow::{bail, Result};
use nginx_ingress_controller_core::{
    extended::DosEx, Kind, Operation, Problem, ResourceId,
};
use nginx_ingress_controller_k8s_api::{
    app_protect::{APDosLogConf, APDosPolicy, Unstructured},
    dos::DosProtectedResource,
    ResourceExt,
};
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc};

#[derive(Clone, Debug, PartialEq)]
pub enum DosResource {
    Policy(Arc<APDosPolicy>),
    LogConf(Arc<APDosLogConf>),
    Protected(Arc<DosProtectedResource>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct DosChange {
    pub op: Operation,
    pub resource: DosResource,
}

#[derive(Debug, Default)]
pub struct DosConfiguration {
    policies: BTreeMap<ResourceId, Entry<APDosPolicy>>,
    log_confs: BTreeMap<ResourceId, Entry<APDosLogConf>>,
    protected: BTreeMap<ResourceId, Entry<DosProtectedResource>>,
}

#[derive(Debug)]
struct Entry<T> {
    obj: Arc<T>,
    error: Option<String>,
}

type Changes = (Vec<DosChange>, Vec<Problem>);

/// Selects the reference a protected resource holds to a dependency.
type RefField = fn(&DosProtectedResource) -> &String;

// === impl DosResource ===

impl DosResource {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Policy(_) => Kind::AppProtectDosPolicy,
            Self::LogConf(_) => Kind::AppProtectDosLogConf,
            Self::Protected(_) => Kind::DosProtectedResource,
        }
    }

    pub fn id(&self) -> ResourceId {
        match self {
            Self::Policy(p) => ResourceId::of(&**p),
            Self::LogConf(c) => ResourceId::of(&**c),
            Self::Protected(r) => ResourceId::of(&**r),
        }
    }
}

// === impl DosConfiguration ===

impl DosConfiguration {
    pub fn add_or_update_policy(&mut self, policy: Arc<APDosPolicy>) -> Changes {
        let id = ResourceId::of(&*policy);
        let error = validate_dos_policy(&policy).err().map(|e| e.to_string());
        self.policies.insert(
            id.clone(),
            Entry {
                obj: policy.clone(),
                error: error.clone(),
            },
        );
        self.dependency_changed(
            Kind::AppProtectDosPolicy,
            id,
            DosResource::Policy(policy),
            error,
            policy_ref,
        )
    }

    pub fn delete_policy(&mut self, id: &ResourceId) -> Changes {
        match self.policies.remove(id) {
            Some(entry) => self.dependency_deleted(DosResource::Policy(entry.obj), policy_ref),
            None => Default::default(),
        }
    }

    pub fn add_or_update_log_conf(&mut self, conf: Arc<APDosLogConf>) -> Changes {
        let id = ResourceId::of(&*conf);
        let error = validate_dos_log_conf(&conf).err().map(|e| e.to_string());
        self.log_confs.insert(
            id.clone(),
            Entry {
                obj: conf.clone(),
                error: error.clone(),
            },
        );
        self.dependency_changed(
            Kind::AppProtectDosLogConf,
            id,
            DosResource::LogConf(conf),
            error,
            log_conf_ref,
        )
    }

    pub fn delete_log_conf(&mut self, id: &ResourceId) -> Changes {
        match self.log_confs.remove(id) {
            Some(entry) => self.dependency_deleted(DosResource::LogConf(entry.obj), log_conf_ref),
            None => Default::default(),
        }
    }

    pub fn add_or_update_protected_resource(&mut self, resource: Arc<DosProtectedResource>) -> Changes {
        let id = ResourceId::of(&*resource);
        let error = validate_dos_protected(&resource).err().map(|e| e.to_string());
        self.protected.insert(
            id.clone(),
            Entry {
                obj: resource.clone(),
                error: error.clone(),
            },
        );
        let change = DosChange {
            op: Operation::AddOrUpdate,
            resource: DosResource::Protected(resource),
        };
        match error {
            None => (vec![change], Vec::new()),
            Some(error) => (
                vec![change],
                vec![Problem::rejected(Kind::DosProtectedResource, id, error)],
            ),
        }
    }

    pub fn delete_protected_resource(&mut self, id: &ResourceId) -> Changes {
        match self.protected.remove(id) {
            Some(entry) => (
                vec![DosChange {
                    op: Operation::Delete,
                    resource: DosResource::Protected(entry.obj),
                }],
                Vec::new(),
            ),
            None => Default::default(),
        }
    }

    /// Resolves a reference to a DosProtectedResource along with its policy
    /// and log configuration. A disabled resource resolves to nothing.
    pub fn get_valid_dos_ex(&self, parent_namespace: &str, reference: &str) -> Result<Option<DosEx>> {
        let id = ResourceId::parse_ref(reference, parent_namespace);
        let Some(entry) = self.protected.get(&id) else {
            bail!("DosProtectedResource {} not found", id);
        };
        if let Some(error) = &entry.error {
            bail!("DosProtectedResource {} is invalid: {}", id, error);
        }
        let resource = entry.obj.clone();
        if !resource.spec.enable {
            return Ok(None);
        }

        let namespace = resource.namespace().unwrap_or_default();
        let policy = match resource.spec.ap_dos_policy.as_str() {
            "" => None,
            reference => {
                let policy_id = ResourceId::parse_ref(reference, &namespace);
                match self.policies.get(&policy_id) {
                    Some(Entry { obj, error: None }) => Some(obj.clone()),
                    _ => bail!(
                        "DosProtectedResource {} references an invalid or missing APDosPolicy {}",
                        id,
                        policy_id
                    ),
                }
            }
        };

        let log_conf = match log_conf_ref(&resource).as_str() {
            "" => None,
            reference => {
                let conf_id = ResourceId::parse_ref(reference, &namespace);
                match self.log_confs.get(&conf_id) {
                    Some(Entry { obj, error: None }) => Some(obj.clone()),
                    _ => bail!(
                        "DosProtectedResource {} references an invalid or missing APDosLogConf {}",
                        id,
                        conf_id
                    ),
                }
            }
        };

        Ok(Some(DosEx {
            resource,
            policy,
            log_conf,
        }))
    }

    /// Reports a policy or log configuration along with every protected
    /// resource referencing it, so that the resources using them are
    /// reapplied.
    fn dependency_changed(
        &self,
        kind: Kind,
        id: ResourceId,
        resource: DosResource,
        error: Option<String>,
        reference: RefField,
    ) -> Changes {
        let op = if error.is_some() {
            Operation::Delete
        } else {
            Operation::AddOrUpdate
        };
        let mut changes = vec![DosChange { op, resource }];
        changes.extend(self.referencing(&id, reference));
        let problems = error
            .map(|error| vec![Problem::rejected(kind, id, error)])
            .unwrap_or_default();
        (changes, problems)
    }

    fn dependency_deleted(
        &self,
        resource: DosResource,
        reference: RefField,
    ) -> Changes {
        let id = resource.id();
        let mut changes = vec![DosChange {
            op: Operation::Delete,
            resource,
        }];
        changes.extend(self.referencing(&id, reference));
        (changes, Vec::new())
    }

    fn referencing<'a>(
        &'a self,
        id: &'a ResourceId,
        reference: RefField,
    ) -> impl Iterator<Item = DosChange> + 'a {
        self.protected
            .values()
            .filter(|e| e.error.is_none())
            .filter(move |e| {
                let ns = e.obj.namespace().unwrap_or_default();
                let r = reference(&e.obj);
                !r.is_empty() && ResourceId::parse_ref(r, &ns) == *id
            })
            .map(|e| DosChange {
                op: Operation::AddOrUpdate,
                resource: DosResource::Protected(e.obj.clone()),
            })
    }
}

fn policy_ref(resource: &DosProtectedResource) -> &String {
    &resource.spec.ap_dos_policy
}

fn log_conf_ref(resource: &DosProtectedResource) -> &String {
    static EMPTY: String = String::new();
    match &resource.spec.dos_security_log {
        Some(log) if log.enable => &log.ap_dos_log_conf,
        _ => &EMPTY,
    }
}

fn validate_dos_policy(policy: &APDosPolicy) -> Result<()> {
    if policy.spec_fields().is_empty() {
        bail!(
            "Error validating DosPolicy {}: Required field spec not found",
            policy.name_any()
        );
    }
    Ok(())
}

fn validate_dos_log_conf(conf: &APDosLogConf) -> Result<()> {
    for field in ["content", "filter"] {
        if !matches!(conf.spec_field(&[field]), Some(Value::Object(_))) {
            bail!(
                "Error validating App Protect Dos Log Configuration {}: Required field spec.{} not found",
                conf.name_any(),
                field
            );
        }
    }
    Ok(())
}

fn validate_dos_protected(resource: &DosProtectedResource) -> Result<()> {
    let spec = &resource.spec;
    let mut errs = FieldErrors::default();

    if spec.name.is_empty() {
        errs.required("spec.name");
    } else if spec.name.contains(|c: char| c.is_whitespace() || c == '"' || c == '\\') {
        errs.invalid("spec.name", &spec.name, "must not contain whitespace, quotes or backslashes");
    }
    if !spec.ap_dos_policy.is_empty() {
        validate_reference(&mut errs, "spec.apDosPolicy", &spec.ap_dos_policy);
    }
    if let Some(monitor) = &spec.ap_dos_monitor {
        if monitor.uri.is_empty() {
            errs.required("spec.apDosMonitor.uri");
        }
    }
    if !spec.dos_access_log_dest.is_empty() && !is_host_port(&spec.dos_access_log_dest) {
        errs.invalid(
            "spec.dosAccessLogDest",
            &spec.dos_access_log_dest,
            "must be in the format <host>:<port>",
        );
    }
    if let Some(log) = spec.dos_security_log.as_ref().filter(|l| l.enable) {
        if log.ap_dos_log_conf.is_empty() {
            errs.required("spec.dosSecurityLog.apDosLogConf");
        } else {
            validate_reference(&mut errs, "spec.dosSecurityLog.apDosLogConf", &log.ap_dos_log_conf);
        }
        if let Err(error) = validate_log_destination(&log.dos_log_dest) {
            errs.invalid("spec.dosSecurityLog.dosLogDest", &log.dos_log_dest, error);
        }
    }

    errs.into_result()
}

fn is_host_port(value: &str) -> bool {
    match value.rsplit_once(':') {
        Some((host, port)) => {
            !host.is_empty() && matches!(port.parse::<u16>(), Ok(p) if p > 0)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::mk_meta;
    use nginx_ingress_controller_k8s_api::dos::{DosProtectedResourceSpec, DosSecurityLog};

    fn mk_dos_policy(name: &str) -> APDosPolicy {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "appprotectdos.f5.com/v1beta1",
            "kind": "APDosPolicy",
            "metadata": { "name": name, "namespace": "default" },
            "spec": { "mitigation_mode": "standard" },
        }))
        .expect("valid APDosPolicy")
    }

    fn mk_dos_log_conf(name: &str, filter: bool) -> APDosLogConf {
        let mut spec = serde_json::json!({ "content": { "format": "splunk" } });
        if filter {
            spec["filter"] = serde_json::json!({ "traffic-mitigation-stats": "all" });
        }
        serde_json::from_value(serde_json::json!({
            "apiVersion": "appprotectdos.f5.com/v1beta1",
            "kind": "APDosLogConf",
            "metadata": { "name": name, "namespace": "default" },
            "spec": spec,
        }))
        .expect("valid APDosLogConf")
    }

    fn mk_protected(name: &str, policy: &str, log_conf: &str) -> DosProtectedResource {
        DosProtectedResource {
            metadata: mk_meta("default", name, None),
            spec: DosProtectedResourceSpec {
                enable: true,
                name: "webapp".to_string(),
                ap_dos_policy: policy.to_string(),
                dos_security_log: Some(DosSecurityLog {
                    enable: true,
                    ap_dos_log_conf: log_conf.to_string(),
                    dos_log_dest: "syslog:server=127.0.0.1:5561".to_string(),
                }),
                ..Default::default()
            },
        }
    }

    fn summary(changes: &[DosChange]) -> Vec<(Operation, Kind, String)> {
        changes
            .iter()
            .map(|c| (c.op, c.resource.kind(), c.resource.id().to_string()))
            .collect()
    }

    #[test]
    fn protected_resource_joins_dependencies() {
        let mut dos = DosConfiguration::default();
        dos.add_or_update_policy(Arc::new(mk_dos_policy("policy")));
        dos.add_or_update_log_conf(Arc::new(mk_dos_log_conf("log", true)));
        let (changes, problems) =
            dos.add_or_update_protected_resource(Arc::new(mk_protected("pr", "policy", "default/log")));
        assert!(problems.is_empty(), "{:?}", problems);
        assert_eq!(
            summary(&changes),
            vec![(
                Operation::AddOrUpdate,
                Kind::DosProtectedResource,
                "default/pr".to_string()
            )]
        );

        let ex = dos
            .get_valid_dos_ex("default", "pr")
            .expect("resource must resolve")
            .expect("resource is enabled");
        assert!(ex.policy.is_some());
        assert!(ex.log_conf.is_some());

        let err = dos
            .get_valid_dos_ex("other", "pr")
            .expect_err("resolves in the parent namespace");
        assert_eq!(err.to_string(), "DosProtectedResource other/pr not found");
    }

    #[test]
    fn dependency_updates_reapply_protected_resources() {
        let mut dos = DosConfiguration::default();
        dos.add_or_update_protected_resource(Arc::new(mk_protected("pr", "policy", "log")));

        let (changes, problems) = dos.add_or_update_policy(Arc::new(mk_dos_policy("policy")));
        assert!(problems.is_empty());
        assert_eq!(
            summary(&changes),
            vec![
                (Operation::AddOrUpdate, Kind::AppProtectDosPolicy, "default/policy".to_string()),
                (Operation::AddOrUpdate, Kind::DosProtectedResource, "default/pr".to_string()),
            ]
        );

        let (changes, problems) = dos.add_or_update_log_conf(Arc::new(mk_dos_log_conf("log", false)));
        assert_eq!(problems.len(), 1);
        assert!(problems[0].message.contains("spec.filter"), "{}", problems[0].message);
        assert_eq!(
            summary(&changes),
            vec![
                (Operation::Delete, Kind::AppProtectDosLogConf, "default/log".to_string()),
                (Operation::AddOrUpdate, Kind::DosProtectedResource, "default/pr".to_string()),
            ]
        );
        let err = dos.get_valid_dos_ex("default", "pr").expect_err("log conf is invalid");
        assert!(err.to_string().contains("APDosLogConf default/log"), "{}", err);

        let (changes, _) = dos.delete_policy(&ResourceId::new("default", "policy"));
        assert_eq!(
            summary(&changes),
            vec![
                (Operation::Delete, Kind::AppProtectDosPolicy, "default/policy".to_string()),
                (Operation::AddOrUpdate, Kind::DosProtectedResource, "default/pr".to_string()),
            ]
        );

        let (changes, _) = dos.delete_protected_resource(&ResourceId::new("default", "pr"));
        assert_eq!(
            summary(&changes),
            vec![(Operation::Delete, Kind::DosProtectedResource, "default/pr".to_string())]
        );
        assert_eq!(dos.delete_protected_resource(&ResourceId::new("default", "pr")), Default::default());
    }

    #[test]
    fn invalid_protected_resources() {
        let mut dos = DosConfiguration::default();

        let mut unnamed = mk_protected("pr", "policy", "log");
        unnamed.spec.name.clear();
        let mut bad_access_log = mk_protected("pr", "policy", "log");
        bad_access_log.spec.dos_access_log_dest = "collector".to_string();
        let mut bad_security_log = mk_protected("pr", "policy", "log");
        if let Some(log) = bad_security_log.spec.dos_security_log.as_mut() {
            log.dos_log_dest = "syslog:server=10.0.0.1:99999".to_string();
        }

        for (pr, msg) in [
            (unnamed, "spec.name: Required value"),
            (bad_access_log, "spec.dosAccessLogDest"),
            (bad_security_log, "spec.dosSecurityLog.dosLogDest"),
        ] {
            let (_, problems) = dos.add_or_update_protected_resource(Arc::new(pr));
            assert_eq!(problems.len(), 1, "{}", msg);
            assert!(problems[0].message.contains(msg), "{}", problems[0].message);
            let err = dos.get_valid_dos_ex("default", "pr").expect_err(msg);
            assert!(err.to_string().contains("is invalid"), "{}", err);
        }

        let mut disabled = mk_protected("pr", "", "");
        disabled.spec.enable = false;
        disabled.spec.dos_security_log = None;
        dos.add_or_update_protected_resource(Arc::new(disabled));
        assert!(matches!(dos.get_valid_dos_ex("default", "pr"), Ok(None)));
    }
}
