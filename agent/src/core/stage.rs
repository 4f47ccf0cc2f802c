//! Fixed set of pipeline stages and the slots each one binds.

use std::fmt;

use crate::core::phase::{ArrayField, MapField, ScalarField, Slots};

/// A named step of the main loop whose phase list comes from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    LoopStart,
    CheckForAction,
    TestAttributeDiscovery,
    Discovery,
    BrokenDiscovery,
    GetStatus,
    UpdateStatus,
    BeforeGetTest,
    GetTest,
    RunTest,
    NoTest,
    Cleanup,
}

impl Stage {
    pub const ALL: [Stage; 12] = [
        Stage::LoopStart,
        Stage::CheckForAction,
        Stage::TestAttributeDiscovery,
        Stage::Discovery,
        Stage::BrokenDiscovery,
        Stage::GetStatus,
        Stage::UpdateStatus,
        Stage::BeforeGetTest,
        Stage::GetTest,
        Stage::RunTest,
        Stage::NoTest,
        Stage::Cleanup,
    ];

    /// Configuration key of the stage's phase list.
    pub fn name(self) -> &'static str {
        match self {
            Stage::LoopStart => "loop-start",
            Stage::CheckForAction => "check-for-action",
            Stage::TestAttributeDiscovery => "test-attribute-discovery",
            Stage::Discovery => "discovery",
            Stage::BrokenDiscovery => "broke-discovery",
            Stage::GetStatus => "get-status",
            Stage::UpdateStatus => "update-status",
            Stage::BeforeGetTest => "before-get-test",
            Stage::GetTest => "get-test",
            Stage::RunTest => "run-test",
            Stage::NoTest => "no-test",
            Stage::Cleanup => "cleanup",
        }
    }

    /// Status fields static phases in this stage write to.
    pub fn slots(self) -> Slots {
        match self {
            Stage::CheckForAction => Slots::scalar(ScalarField::Action),
            Stage::TestAttributeDiscovery => Slots::map(MapField::RequiredTestAttributes),
            Stage::Discovery => Slots::array(ArrayField::Provides),
            Stage::BrokenDiscovery => Slots::array(ArrayField::BrokenProvides),
            Stage::GetStatus => Slots::scalar(ScalarField::RunStatus),
            Stage::LoopStart
            | Stage::UpdateStatus
            | Stage::BeforeGetTest
            | Stage::GetTest
            | Stage::RunTest
            | Stage::NoTest
            | Stage::Cleanup => Slots::NONE,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One step of the fixed discovery prefix every iteration runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Run(Stage),
    /// Run the action-map entry named by `status.action`, when non-empty.
    PerformAction,
    /// Run `update-status` and push the status to the reporter.
    Report,
}

/// Steps executed before the idle/test branch, in order.
pub const DISCOVERY_STEPS: [Step; 10] = [
    Step::Run(Stage::LoopStart),
    Step::Run(Stage::CheckForAction),
    Step::PerformAction,
    Step::Run(Stage::TestAttributeDiscovery),
    Step::Run(Stage::Discovery),
    Step::Report,
    Step::Run(Stage::BrokenDiscovery),
    Step::Report,
    Step::Run(Stage::GetStatus),
    Step::Report,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_discovery_stages_bind_slots() {
        let bound: Vec<&str> = Stage::ALL
            .iter()
            .filter(|stage| stage.slots() != Slots::NONE)
            .map(|stage| stage.name())
            .collect();
        assert_eq!(
            bound,
            vec![
                "check-for-action",
                "test-attribute-discovery",
                "discovery",
                "broke-discovery",
                "get-status"
            ]
        );
    }

    #[test]
    fn discovery_reports_after_each_capability_stage() {
        let reports_follow: Vec<Stage> = DISCOVERY_STEPS
            .windows(2)
            .filter_map(|pair| match pair {
                [Step::Run(stage), Step::Report] => Some(*stage),
                _ => None,
            })
            .collect();
        assert_eq!(
            reports_follow,
            vec![Stage::Discovery, Stage::BrokenDiscovery, Stage::GetStatus]
        );
    }
}
