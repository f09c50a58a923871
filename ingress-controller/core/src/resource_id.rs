use nginx_ingress_controller_k8s_api::ResourceExt;
use std::fmt;

/// Identifies an object by namespace and name. Cluster-scoped objects have an
/// empty namespace.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct ResourceId {
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self::new(String::new(), name)
    }

    pub fn of<T: ResourceExt>(resource: &T) -> Self {
        Self::new(resource.namespace().unwrap_or_default(), resource.name_any())
    }

    /// Parses a `namespace/name` reference; unqualified names resolve in
    /// `default_ns`.
    pub fn parse_ref(reference: &str, default_ns: &str) -> Self {
        let (ns, name) = nginx_ingress_controller_k8s_api::split_ref(reference, default_ns);
        Self::new(ns, name)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            return f.write_str(&self.name);
        }
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl std::str::FromStr for ResourceId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.split_once('/') {
            Some((ns, name)) => Self::new(ns, name),
            None => Self::cluster(s),
        })
    }
}
