//! Severity-to-channel routing policy

use super::{Channel, Severity};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Mapping of each severity to the channels it notifies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutingPolicy {
    routes: BTreeMap<Severity, BTreeSet<Channel>>,
}

impl RoutingPolicy {
    /// Policy with no routes at all
    pub fn empty() -> Self {
        Self {
            routes: BTreeMap::new(),
        }
    }

    /// Replace the channel set for one severity
    pub fn route(mut self, severity: Severity, channels: impl IntoIterator<Item = Channel>) -> Self {
        self.routes.insert(severity, channels.into_iter().collect());
        self
    }

    pub fn channels(&self, severity: Severity) -> BTreeSet<Channel> {
        self.routes.get(&severity).cloned().unwrap_or_default()
    }
}

impl Default for RoutingPolicy {
    /// Escalating fan-out: every severity reaches the dashboard, and each
    /// step up adds louder channels.
    fn default() -> Self {
        use Channel::*;
        Self::empty()
            .route(Severity::Info, [Dashboard])
            .route(Severity::Warning, [Dashboard, Email])
            .route(Severity::Urgent, [Dashboard, Email, Chat])
            .route(Severity::Critical, [Dashboard, Email, Chat, Sms, Push])
    }
}

/// Pure channel-selection policy
#[derive(Debug, Clone, Default)]
pub struct AlertRouter {
    policy: RoutingPolicy,
}

impl AlertRouter {
    pub fn new(policy: RoutingPolicy) -> Self {
        Self { policy }
    }

    /// Channels that should receive an alert of the given severity
    pub fn channels_for(&self, severity: Severity) -> BTreeSet<Channel> {
        self.policy.channels(severity)
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let router = AlertRouter::default();

        assert_eq!(router.channels_for(Severity::Info).len(), 1);
        assert_eq!(
            router.channels_for(Severity::Warning).into_iter().collect::<Vec<_>>(),
            vec![Channel::Dashboard, Channel::Email]
        );
        assert_eq!(router.channels_for(Severity::Urgent).len(), 3);
        assert_eq!(router.channels_for(Severity::Critical).len(), 5);
    }

    #[test]
    fn test_severity_sets_are_nested() {
        let router = AlertRouter::default();
        let order = [Severity::Info, Severity::Warning, Severity::Urgent, Severity::Critical];
        for pair in order.windows(2) {
            let lower = router.channels_for(pair[0]);
            let higher = router.channels_for(pair[1]);
            assert!(lower.is_subset(&higher), "{} ⊄ {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_custom_policy() {
        let router = AlertRouter::new(RoutingPolicy::empty().route(Severity::Critical, [Channel::Sms]));
        assert!(router.channels_for(Severity::Info).is_empty());
        assert_eq!(
            router.channels_for(Severity::Critical).into_iter().collect::<Vec<_>>(),
            vec![Channel::Sms]
        );
    }

    #[test]
    fn test_policy_serialization() {
        let json = serde_json::to_string(&RoutingPolicy::default()).unwrap();
        assert!(json.contains("\"info\":[\"dashboard\"]"));

        let parsed: RoutingPolicy =
            serde_json::from_str(r#"{"urgent": ["chat", "email"]}"#).unwrap();
        assert_eq!(parsed.channels(Severity::Urgent).len(), 2);
        assert!(parsed.channels(Severity::Info).is_empty());
    }
}
