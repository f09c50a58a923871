use nginx_ingress_controller_k8s_api::configuration::{STATE_INVALID, STATE_VALID, STATE_WARNING};
use std::fmt;

/// Event reasons reported on resources.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum Reason {
    AddedOrUpdated,
    AddedOrUpdatedWithWarning,
    AddedOrUpdatedWithError,
    Rejected,
    RejectedWithError,
    Updated,
    UpdatedWithError,
    NoIngressMasterFound,
    NoVirtualServersFound,
    Ignored,
    SecretDeleted,
}

/// The `status.state` of a custom resource.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum State {
    Valid,
    Warning,
    Invalid,
}

// === impl Reason ===

impl Reason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AddedOrUpdated => "AddedOrUpdated",
            Self::AddedOrUpdatedWithWarning => "AddedOrUpdatedWithWarning",
            Self::AddedOrUpdatedWithError => "AddedOrUpdatedWithError",
            Self::Rejected => "Rejected",
            Self::RejectedWithError => "RejectedWithError",
            Self::Updated => "Updated",
            Self::UpdatedWithError => "UpdatedWithError",
            Self::NoIngressMasterFound => "NoIngressMasterFound",
            Self::NoVirtualServersFound => "NoVirtualServersFound",
            Self::Ignored => "Ignored",
            Self::SecretDeleted => "SecretDeleted",
        }
    }

    /// The status state a resource is left in after an event with this reason.
    pub const fn state(&self) -> State {
        match self {
            Self::AddedOrUpdated | Self::Updated => State::Valid,
            Self::AddedOrUpdatedWithWarning | Self::Ignored | Self::SecretDeleted => {
                State::Warning
            }
            Self::AddedOrUpdatedWithError
            | Self::Rejected
            | Self::RejectedWithError
            | Self::UpdatedWithError
            | Self::NoIngressMasterFound
            | Self::NoVirtualServersFound => State::Invalid,
        }
    }

    /// Whether the event is reported with the `Warning` event type.
    pub const fn is_warning(&self) -> bool {
        !matches!(self, Self::AddedOrUpdated | Self::Updated)
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl State ===

impl State {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => STATE_VALID,
            Self::Warning => STATE_WARNING,
            Self::Invalid => STATE_INVALID,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
