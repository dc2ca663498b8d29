// ── Bundle status ──
//
// The module's own operational phase, announced on `sys/bundle_status`.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::instance::ConfigMap;

/// Lifecycle phase of the module.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BundleState {
    /// No module config yet.
    Idling,
    /// A `set_config` payload is being checked.
    Validating,
    /// Config accepted; module logic has not started.
    Ready,
    /// Initial discovery or sync in progress.
    Starting,
    /// Fully operational.
    Active,
    /// Config rejected, init failed, or connectivity lost.
    Error,
}

impl BundleState {
    /// Whether moving from `self` to `next` is allowed.
    ///
    /// `validating` and `error` are reachable from anywhere, and
    /// re-announcing the current state is always fine.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }
        match next {
            Self::Validating | Self::Error => true,
            Self::Ready => matches!(self, Self::Validating),
            Self::Starting => matches!(self, Self::Ready | Self::Idling),
            Self::Active => matches!(self, Self::Starting),
            Self::Idling => false,
        }
    }
}

/// State plus human-readable context and, when relevant, the active config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleStatus {
    pub state: BundleState,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigMap>,
}

impl BundleStatus {
    pub fn new(state: BundleState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
            config: None,
        }
    }

    pub fn with_config(mut self, config: ConfigMap) -> Self {
        self.config = Some(config);
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn config_cycle_transitions() {
        use BundleState as S;
        assert!(S::Idling.can_transition_to(S::Validating));
        assert!(S::Validating.can_transition_to(S::Ready));
        assert!(S::Validating.can_transition_to(S::Error));
        assert!(S::Ready.can_transition_to(S::Validating));
        assert!(S::Error.can_transition_to(S::Validating));
    }

    #[test]
    fn module_driven_transitions() {
        use BundleState as S;
        assert!(S::Ready.can_transition_to(S::Starting));
        assert!(S::Idling.can_transition_to(S::Starting));
        assert!(S::Starting.can_transition_to(S::Active));
        assert!(S::Active.can_transition_to(S::Error));
        assert!(S::Active.can_transition_to(S::Active));

        assert!(!S::Idling.can_transition_to(S::Active));
        assert!(!S::Error.can_transition_to(S::Ready));
        assert!(!S::Ready.can_transition_to(S::Idling));
    }

    #[test]
    fn wire_names_are_lowercase() {
        assert_eq!(BundleState::Validating.to_string(), "validating");
        assert_eq!(BundleState::from_str("active").unwrap(), BundleState::Active);
        assert_eq!(
            serde_json::to_value(BundleState::Error).unwrap(),
            serde_json::json!("error")
        );
    }

    #[test]
    fn status_omits_empty_parts() {
        let status = BundleStatus::new(BundleState::Idling, "");
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value, serde_json::json!({"state": "idling"}));
    }
}
