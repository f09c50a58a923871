//! App-Protect resources.
//!
//! These are owned by the App-Protect modules and have schemas that evolve
//! independently of this controller, so they are modeled as unstructured
//! specs and validated by required-field checks.

use kube::CustomResource;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const WAF_GROUP: &str = "appprotect.f5.com";
pub const DOS_GROUP: &str = "appprotectdos.f5.com";

#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "appprotect.f5.com",
    version = "v1beta1",
    kind = "APPolicy",
    schema = "disabled",
    derive = "PartialEq",
    namespaced
)]
pub struct APPolicySpec {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "appprotect.f5.com",
    version = "v1beta1",
    kind = "APLogConf",
    schema = "disabled",
    derive = "PartialEq",
    namespaced
)]
pub struct APLogConfSpec {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "appprotect.f5.com",
    version = "v1beta1",
    kind = "APUserSig",
    schema = "disabled",
    derive = "PartialEq",
    namespaced
)]
pub struct APUserSigSpec {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "appprotectdos.f5.com",
    version = "v1beta1",
    kind = "APDosPolicy",
    schema = "disabled",
    derive = "PartialEq",
    namespaced
)]
pub struct APDosPolicySpec {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "appprotectdos.f5.com",
    version = "v1beta1",
    kind = "APDosLogConf",
    schema = "disabled",
    derive = "PartialEq",
    namespaced
)]
pub struct APDosLogConfSpec {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Access to the unstructured spec of an App-Protect resource.
pub trait Unstructured {
    fn spec_fields(&self) -> &Map<String, Value>;

    /// Looks up a nested spec field, e.g. `["policy", "name"]`.
    fn spec_field(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut value = self.spec_fields().get(*first)?;
        for segment in rest {
            value = value.as_object()?.get(*segment)?;
        }
        Some(value)
    }
}

macro_rules! impl_unstructured {
    ($($ty:ty),+) => {
        $(
            impl Unstructured for $ty {
                fn spec_fields(&self) -> &Map<String, Value> {
                    &self.spec.fields
                }
            }
        )+
    };
}

impl_unstructured!(APPolicy, APLogConf, APUserSig, APDosPolicy, APDosLogConf);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_spec_fields() {
        let policy: APPolicy = serde_json::from_value(serde_json::json!({
            "apiVersion": "appprotect.f5.com/v1beta1",
            "kind": "APPolicy",
            "metadata": { "name": "waf", "namespace": "default" },
            "spec": { "policy": { "name": "waf", "signature-requirements": [] } },
        }))
        .expect("policy must deserialize");

        assert_eq!(
            policy.spec_field(&["policy", "name"]),
            Some(&Value::String("waf".to_string()))
        );
        assert!(policy.spec_field(&["policy", "missing"]).is_none());
        assert!(policy.spec_field(&[]).is_none());
    }
}
