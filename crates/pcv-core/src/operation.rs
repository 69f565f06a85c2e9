//! State-changing provider operations.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ResourceState;

/// What a resize should change the resource to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeTarget {
    /// Switch to another catalog product.
    Product { product_id: String },
    /// Change the raw shape, for providers that size instances directly.
    Shape { cpu_count: u32, memory_mb: u64 },
}

/// A state-changing request against a single resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Start,
    Stop { force: bool },
    Pause,
    Unpause,
    Suspend,
    Resume,
    Reboot,
    Delete,
    Resize { target: ResizeTarget },
    /// Turn extended monitoring on or off.
    SetAnalytics { enabled: bool },
}

impl Operation {
    /// Graceful stop.
    #[must_use]
    pub const fn stop() -> Self {
        Self::Stop { force: false }
    }

    /// Payload-free tag for capability lookups.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::Start => OperationKind::Start,
            Self::Stop { .. } => OperationKind::Stop,
            Self::Pause => OperationKind::Pause,
            Self::Unpause => OperationKind::Unpause,
            Self::Suspend => OperationKind::Suspend,
            Self::Resume => OperationKind::Resume,
            Self::Reboot => OperationKind::Reboot,
            Self::Delete => OperationKind::Delete,
            Self::Resize { .. } => OperationKind::Resize,
            Self::SetAnalytics { .. } => OperationKind::Analytics,
        }
    }

    /// Steady state the resource should settle in once the operation completes.
    ///
    /// `None` for resizes and analytics toggles, which leave the state alone.
    #[must_use]
    pub const fn expected_state(&self) -> Option<ResourceState> {
        match self {
            Self::Start | Self::Unpause | Self::Resume | Self::Reboot => {
                Some(ResourceState::Running)
            }
            Self::Stop { .. } => Some(ResourceState::Stopped),
            Self::Pause => Some(ResourceState::Paused),
            Self::Suspend => Some(ResourceState::Suspended),
            Self::Delete => Some(ResourceState::Terminated),
            Self::Resize { .. } | Self::SetAnalytics { .. } => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stop { force: true } => f.write_str("stop(force)"),
            Self::SetAnalytics { enabled: true } => f.write_str("enable_analytics"),
            Self::SetAnalytics { enabled: false } => f.write_str("disable_analytics"),
            other => f.write_str(other.kind().as_str()),
        }
    }
}

/// Operation tag without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Start,
    Stop,
    Pause,
    Unpause,
    Suspend,
    Resume,
    Reboot,
    Delete,
    Resize,
    Analytics,
}

impl OperationKind {
    /// Get the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Pause => "pause",
            Self::Unpause => "unpause",
            Self::Suspend => "suspend",
            Self::Resume => "resume",
            Self::Reboot => "reboot",
            Self::Delete => "delete",
            Self::Resize => "resize",
            Self::Analytics => "analytics",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single operation that moves a resource from `from` to `to`.
///
/// Only steady states are planned; transitional sources and unreachable
/// targets yield `None`. Leaving a paused or suspended resource for anything
/// other than running requires two hops, so the first hop (back to running)
/// is returned.
#[must_use]
pub fn plan_transition(from: ResourceState, to: ResourceState) -> Option<Operation> {
    use ResourceState as S;

    if from == to || from.is_transitional() {
        return None;
    }
    match (from, to) {
        (_, S::Terminated) => Some(Operation::Delete),
        (S::Stopped, S::Running) => Some(Operation::Start),
        (S::Paused, S::Running) => Some(Operation::Unpause),
        (S::Suspended, S::Running) => Some(Operation::Resume),
        (S::Running, S::Stopped) => Some(Operation::stop()),
        (S::Running, S::Paused) => Some(Operation::Pause),
        (S::Running, S::Suspended) => Some(Operation::Suspend),
        (S::Paused, S::Stopped | S::Suspended) => Some(Operation::Unpause),
        (S::Suspended, S::Stopped | S::Paused) => Some(Operation::Resume),
        (S::Stopped, S::Paused | S::Suspended) => Some(Operation::Start),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_states() {
        assert_eq!(Operation::Start.expected_state(), Some(ResourceState::Running));
        assert_eq!(Operation::stop().expected_state(), Some(ResourceState::Stopped));
        assert_eq!(Operation::Delete.expected_state(), Some(ResourceState::Terminated));
        let resize = Operation::Resize {
            target: ResizeTarget::Product {
                product_id: "large".into(),
            },
        };
        assert_eq!(resize.expected_state(), None);
        assert_eq!(resize.kind(), OperationKind::Resize);
        let analytics = Operation::SetAnalytics { enabled: true };
        assert_eq!(analytics.expected_state(), None);
        assert_eq!(analytics.kind(), OperationKind::Analytics);
    }

    #[test]
    fn plans_direct_hops() {
        use ResourceState as S;
        assert_eq!(plan_transition(S::Running, S::Stopped), Some(Operation::stop()));
        assert_eq!(plan_transition(S::Stopped, S::Running), Some(Operation::Start));
        assert_eq!(plan_transition(S::Paused, S::Running), Some(Operation::Unpause));
        assert_eq!(plan_transition(S::Running, S::Suspended), Some(Operation::Suspend));
    }

    #[test]
    fn plans_first_hop_of_two() {
        use ResourceState as S;
        assert_eq!(plan_transition(S::Stopped, S::Paused), Some(Operation::Start));
        assert_eq!(plan_transition(S::Suspended, S::Stopped), Some(Operation::Resume));
    }

    #[test]
    fn no_plan_from_transitional_or_same_state() {
        use ResourceState as S;
        assert_eq!(plan_transition(S::Running, S::Running), None);
        assert_eq!(plan_transition(S::Stopping, S::Running), None);
        assert_eq!(plan_transition(S::Running, S::Pending), None);
    }

    #[test]
    fn display_marks_forced_stop() {
        assert_eq!(Operation::Stop { force: true }.to_string(), "stop(force)");
        assert_eq!(Operation::Reboot.to_string(), "reboot");
        assert_eq!(
            Operation::SetAnalytics { enabled: false }.to_string(),
            "disable_analytics"
        );
    }
}
