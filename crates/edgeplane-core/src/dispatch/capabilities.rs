use edgeplane_api::AgentVersions;

/// How an agent takes device configuration changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyShape {
    /// One task per changed interface.
    PerField,
    /// One `modify-device` task carrying the full desired document.
    Consolidated,
}

/// What the dispatcher may send to one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub modify: ModifyShape,
}

/// Lowest agent major version for each capability set, highest first.
const VERSION_TABLE: &[(u64, Capabilities)] = &[
    (
        2,
        Capabilities {
            modify: ModifyShape::Consolidated,
        },
    ),
    (
        0,
        Capabilities {
            modify: ModifyShape::PerField,
        },
    ),
];

const FALLBACK: Capabilities = Capabilities {
    modify: ModifyShape::PerField,
};

impl Capabilities {
    /// Pick capabilities from the agent's major version. Unparseable
    /// versions get the oldest shape.
    pub fn negotiate(versions: &AgentVersions) -> Self {
        let Some(major) = versions.agent_major() else {
            return FALLBACK;
        };
        VERSION_TABLE
            .iter()
            .find(|(min, _)| major >= *min)
            .map_or(FALLBACK, |(_, caps)| *caps)
    }
}
