use crate::ResourceId;
use std::fmt;

/// The kind of object a sync task refers to.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum Kind {
    Ingress,
    ConfigMap,
    EndpointSlice,
    Secret,
    Service,
    Namespace,
    VirtualServer,
    VirtualServerRoute,
    GlobalConfiguration,
    TransportServer,
    Policy,
    AppProtectPolicy,
    AppProtectLogConf,
    AppProtectUserSig,
    AppProtectDosPolicy,
    AppProtectDosLogConf,
    DosProtectedResource,
}

/// A unit of work for the sync dispatcher.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Task {
    pub kind: Kind,
    pub id: ResourceId,
}

// === impl Kind ===

impl Kind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ingress => "Ingress",
            Self::ConfigMap => "ConfigMap",
            Self::EndpointSlice => "EndpointSlice",
            Self::Secret => "Secret",
            Self::Service => "Service",
            Self::Namespace => "Namespace",
            Self::VirtualServer => "VirtualServer",
            Self::VirtualServerRoute => "VirtualServerRoute",
            Self::GlobalConfiguration => "GlobalConfiguration",
            Self::TransportServer => "TransportServer",
            Self::Policy => "Policy",
            Self::AppProtectPolicy => "APPolicy",
            Self::AppProtectLogConf => "APLogConf",
            Self::AppProtectUserSig => "APUserSig",
            Self::AppProtectDosPolicy => "APDosPolicy",
            Self::AppProtectDosLogConf => "APDosLogConf",
            Self::DosProtectedResource => "DosProtectedResource",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Task ===

impl Task {
    pub fn new(kind: Kind, id: ResourceId) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}
