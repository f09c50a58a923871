//! App Protect WAF and DoS resources.

use super::{dedup, Dispatcher};
use crate::{
    core::{
        extended::AppProtectResource, Kind, Operation, Problem, Reason, Resource, ResourceId,
        Warnings,
    },
    index::app_protect::{
        dos::{DosChange, DosResource},
        AppProtectChange, UserSigChange,
    },
    k8s::{
        app_protect::{APDosLogConf, APDosPolicy, APLogConf, APPolicy, APUserSig},
        configuration::Policy,
        dos::DosProtectedResource,
    },
};
use anyhow::Result;

impl Dispatcher {
    pub(super) async fn sync_app_protect_policy(&mut self, id: &ResourceId) -> Result<bool> {
        let policy = self.cache.read().get::<APPolicy>(id);
        let (changes, problems) = match policy {
            Some(policy) => self.app_protect.add_or_update_policy(policy),
            None => self.app_protect.delete_policy(id),
        };
        self.apply_app_protect_changes(changes, problems).await;
        Ok(true)
    }

    pub(super) async fn sync_app_protect_log_conf(&mut self, id: &ResourceId) -> Result<bool> {
        let conf = self.cache.read().get::<APLogConf>(id);
        let (changes, problems) = match conf {
            Some(conf) => self.app_protect.add_or_update_log_conf(conf),
            None => self.app_protect.delete_log_conf(id),
        };
        self.apply_app_protect_changes(changes, problems).await;
        Ok(true)
    }

    pub(super) async fn sync_app_protect_user_sig(&mut self, id: &ResourceId) -> Result<bool> {
        let sig = self.cache.read().get::<APUserSig>(id);
        let (change, problems) = match sig {
            Some(sig) => self.app_protect.add_or_update_user_sig(sig),
            None => self.app_protect.delete_user_sig(id),
        };
        self.report_problems(&problems);
        if change == UserSigChange::default() {
            return Ok(false);
        }

        let UserSigChange {
            policy_adds_or_updates,
            policy_deletions,
            user_sigs,
        } = change;
        let resources = dedup(
            policy_adds_or_updates
                .iter()
                .chain(&policy_deletions)
                .flat_map(|p| self.resources_for_app_protect(Kind::AppProtectPolicy, &ResourceId::of(&**p))),
        );
        let (extended, warnings) = self.build(&resources);
        let result = self
            .configurator
            .refresh_app_protect_user_sigs(&user_sigs, &policy_deletions, &extended)
            .await
            .map(|()| Warnings::default());
        if let Err(error) = &result {
            tracing::error!(%id, %error, "Failed to refresh user signatures");
        }
        self.report_applied(&resources, warnings, result, Reason::AddedOrUpdated);
        Ok(true)
    }

    async fn apply_app_protect_changes(&mut self, changes: Vec<AppProtectChange>, problems: Vec<Problem>) {
        for AppProtectChange { op, resource } in changes {
            let (kind, id) = match &resource {
                AppProtectResource::Policy(p) => (Kind::AppProtectPolicy, ResourceId::of(&**p)),
                AppProtectResource::LogConf(c) => (Kind::AppProtectLogConf, ResourceId::of(&**c)),
            };
            let resources = self.resources_for_app_protect(kind, &id);
            let (extended, warnings) = self.build(&resources);

            let result = match op {
                Operation::AddOrUpdate => {
                    self.configurator
                        .add_or_update_app_protect_resource(&resource, &extended)
                        .await
                }
                Operation::Delete if kind == Kind::AppProtectPolicy => self
                    .configurator
                    .delete_app_protect_policy(&id, &extended)
                    .await
                    .map(|()| Warnings::default()),
                Operation::Delete => self
                    .configurator
                    .delete_app_protect_log_conf(&id, &extended)
                    .await
                    .map(|()| Warnings::default()),
            };
            if let Err(error) = &result {
                tracing::error!(%kind, %id, %error, "Failed to apply App Protect resource");
            }

            if op == Operation::AddOrUpdate && !has_problem(&problems, kind, &id) {
                let message = format!("{} {} was added or updated", kind, id);
                match &resource {
                    AppProtectResource::Policy(p) => {
                        self.status.event(&**p, Reason::AddedOrUpdated, message)
                    }
                    AppProtectResource::LogConf(c) => {
                        self.status.event(&**c, Reason::AddedOrUpdated, message)
                    }
                }
            }
            self.report_applied(&resources, warnings, result, Reason::AddedOrUpdated);
        }
        self.report_problems(&problems);
    }

    /// Resources using an App Protect policy or log configuration, either
    /// through Ingress annotations or through a WAF Policy.
    fn resources_for_app_protect(&self, kind: Kind, id: &ResourceId) -> Vec<Resource> {
        let waf_policies = self
            .cache
            .read()
            .list::<Policy>()
            .into_iter()
            .filter(|p| references_app_protect(p, kind, id))
            .map(|p| ResourceId::of(&*p))
            .collect::<Vec<_>>();
        let config = self.config.read();
        let mut resources = if kind == Kind::AppProtectPolicy {
            config.find_resources_for_app_protect_policy_annotation(&id.namespace, &id.name)
        } else {
            config.find_resources_for_app_protect_log_conf_annotation(&id.namespace, &id.name)
        };
        resources.extend(config.find_resources_for_policies(&waf_policies));
        dedup(resources)
    }

    pub(super) async fn sync_dos_policy(&mut self, id: &ResourceId) -> Result<bool> {
        let policy = self.cache.read().get::<APDosPolicy>(id);
        let (changes, problems) = match policy {
            Some(policy) => self.dos.add_or_update_policy(policy),
            None => self.dos.delete_policy(id),
        };
        self.apply_dos_changes(changes, problems).await;
        Ok(true)
    }

    pub(super) async fn sync_dos_log_conf(&mut self, id: &ResourceId) -> Result<bool> {
        let conf = self.cache.read().get::<APDosLogConf>(id);
        let (changes, problems) = match conf {
            Some(conf) => self.dos.add_or_update_log_conf(conf),
            None => self.dos.delete_log_conf(id),
        };
        self.apply_dos_changes(changes, problems).await;
        Ok(true)
    }

    pub(super) async fn sync_dos_protected_resource(&mut self, id: &ResourceId) -> Result<bool> {
        let resource = self.cache.read().get::<DosProtectedResource>(id);
        let (changes, problems) = match resource {
            Some(resource) => self.dos.add_or_update_protected_resource(resource),
            None => self.dos.delete_protected_resource(id),
        };
        self.apply_dos_changes(changes, problems).await;
        Ok(true)
    }

    /// Writes DoS policies and log configurations, then regenerates every
    /// resource protected by a changed DosProtectedResource.
    async fn apply_dos_changes(&mut self, changes: Vec<DosChange>, problems: Vec<Problem>) {
        let mut protected = Vec::new();
        for DosChange { op, resource } in changes {
            let (kind, id) = (resource.kind(), resource.id());
            let result = match (op, &resource) {
                (Operation::AddOrUpdate, DosResource::Policy(p)) => {
                    self.configurator.add_or_update_app_protect_dos_policy(p).await
                }
                (Operation::Delete, DosResource::Policy(_)) => {
                    self.configurator.delete_app_protect_dos_policy(&id).await
                }
                (Operation::AddOrUpdate, DosResource::LogConf(c)) => {
                    self.configurator.add_or_update_app_protect_dos_log_conf(c).await
                }
                (Operation::Delete, DosResource::LogConf(_)) => {
                    self.configurator.delete_app_protect_dos_log_conf(&id).await
                }
                (_, DosResource::Protected(_)) => {
                    protected.push(id.clone());
                    Ok(())
                }
            };
            if let Err(error) = result {
                tracing::error!(%kind, %id, %error, "Failed to apply DoS resource");
                continue;
            }

            if op == Operation::AddOrUpdate && !has_problem(&problems, kind, &id) {
                let message = format!("{} {} was added or updated", kind, id);
                match &resource {
                    DosResource::Policy(p) => self.status.event(&**p, Reason::AddedOrUpdated, message),
                    DosResource::LogConf(c) => self.status.event(&**c, Reason::AddedOrUpdated, message),
                    DosResource::Protected(r) => {
                        self.status.event(&**r, Reason::AddedOrUpdated, message)
                    }
                }
            }
        }

        let resources = {
            let config = self.config.read();
            dedup(protected.iter().flat_map(|id| {
                config.find_resources_for_app_protect_dos_protected(&id.namespace, &id.name)
            }))
        };
        if !resources.is_empty() {
            let (extended, warnings) = self.build(&resources);
            let result = self
                .configurator
                .add_or_update_resources_that_use_dos_protected(&extended)
                .await;
            if let Err(error) = &result {
                tracing::error!(%error, "Failed to apply DoS protected resources");
            }
            self.report_applied(&resources, warnings, result, Reason::AddedOrUpdated);
        }
        self.report_problems(&problems);
    }
}

fn has_problem(problems: &[Problem], kind: Kind, id: &ResourceId) -> bool {
    problems.iter().any(|p| p.kind == kind && p.id == *id)
}

/// Whether a WAF Policy references an App Protect policy or log
/// configuration.
fn references_app_protect(policy: &Policy, kind: Kind, id: &ResourceId) -> bool {
    let Some(waf) = policy.spec.waf.as_ref() else {
        return false;
    };
    let ns = policy.metadata.namespace.as_deref().unwrap_or_default();
    let refers = |reference: &str| {
        !reference.is_empty() && ResourceId::parse_ref(reference, ns) == *id
    };
    if kind == Kind::AppProtectPolicy {
        return refers(&waf.ap_policy);
    }
    waf.security_log
        .iter()
        .chain(&waf.security_logs)
        .any(|log| refers(&log.ap_log_conf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::{
        configuration::{
            policy::{SecurityLog, Waf},
            PolicySpec,
        },
        ObjectMeta,
    };

    fn waf_policy(waf: Waf) -> Policy {
        Policy {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some("waf".to_string()),
                ..Default::default()
            },
            spec: PolicySpec {
                waf: Some(waf),
                ..Default::default()
            },
            status: None,
        }
    }

    #[test]
    fn waf_references() {
        let policy = waf_policy(Waf {
            ap_policy: "dataguard".to_string(),
            security_logs: vec![SecurityLog {
                ap_log_conf: "security/logconf".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        });
        assert!(references_app_protect(
            &policy,
            Kind::AppProtectPolicy,
            &ResourceId::new("default", "dataguard")
        ));
        assert!(!references_app_protect(
            &policy,
            Kind::AppProtectPolicy,
            &ResourceId::new("security", "dataguard")
        ));
        assert!(references_app_protect(
            &policy,
            Kind::AppProtectLogConf,
            &ResourceId::new("security", "logconf")
        ));
        assert!(!references_app_protect(
            &policy,
            Kind::AppProtectLogConf,
            &ResourceId::new("default", "logconf")
        ));
    }
}
