//! The main loop: one iteration threads a fresh status record through the
//! fixed stage sequence, asks the queue for work, and reports progress.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::core::phase::Slots;
use crate::core::stage::{DISCOVERY_STEPS, Stage, Step};
use crate::core::status::{RunStatus, StatusRecord};
use crate::core::test_info::{TestInfo, result_outcome};
use crate::io::config::ConfigStore;
use crate::io::phase::{PhaseApplier, apply_all};
use crate::io::queue::{Queue, request_next};
use crate::io::reporter::ReportStatus;

/// What a single iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationOutcome {
    pub ran_test: bool,
    /// How long to sleep before the next iteration.
    pub sleep: Duration,
    pub should_exit: bool,
}

/// Summary of a [`Agent::run`] invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopOutcome {
    pub iterations: u64,
}

/// Long-running agent state: configuration, collaborators, and the status of
/// the current (or last finished) iteration.
pub struct Agent<Q, R> {
    store: ConfigStore,
    applier: PhaseApplier,
    queue: Q,
    reporter: Option<R>,
    groups: Vec<String>,
    status: StatusRecord,
}

impl<Q: Queue, R: ReportStatus> Agent<Q, R> {
    pub fn new(
        store: ConfigStore,
        applier: PhaseApplier,
        queue: Q,
        reporter: Option<R>,
        groups: Vec<String>,
    ) -> Self {
        Self {
            store,
            applier,
            queue,
            reporter,
            groups,
            status: StatusRecord::default(),
        }
    }

    pub fn status(&self) -> &StatusRecord {
        &self.status
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn reporter(&self) -> Option<&R> {
        self.reporter.as_ref()
    }

    /// Run iterations until one ends with `shouldExit`, sleeping between them.
    pub fn run<F: FnMut(&IterationOutcome)>(&mut self, mut on_iteration: F) -> LoopOutcome {
        let mut iterations = 0u64;
        loop {
            let outcome = self.run_iteration();
            iterations += 1;
            on_iteration(&outcome);
            debug!(sleep = ?outcome.sleep, ran_test = outcome.ran_test, "sleeping");
            std::thread::sleep(outcome.sleep);
            if outcome.should_exit {
                info!(iterations, "agent requested to exit");
                return LoopOutcome { iterations };
            }
        }
    }

    /// Execute one iteration without the trailing sleep.
    pub fn run_iteration(&mut self) -> IterationOutcome {
        debug!("top of loop, initializing status");
        let config = self.store.config();
        self.status = StatusRecord::fresh(&self.groups, &config.projects, &config.slick.agent_name);
        self.store.maybe_reload(Instant::now());

        for step in DISCOVERY_STEPS {
            match step {
                Step::Run(stage) => self.run_stage(stage),
                Step::PerformAction => self.perform_action(),
                Step::Report => self.report(),
            }
        }

        if self.status.is_idle() {
            self.run_stage(Stage::BeforeGetTest);
            self.fetch_test();
            self.report();
            if self.status.result_to_run.is_some() {
                self.status.ran_test = true;
                self.status.run_status = RunStatus::Running;
                self.report();
                self.run_test();
            } else {
                self.status.ran_test = false;
                self.run_stage(Stage::NoTest);
            }
            self.report();
        }
        self.run_stage(Stage::Cleanup);

        let parsed = self.store.parsed();
        IterationOutcome {
            ran_test: self.status.ran_test,
            sleep: if self.status.ran_test {
                parsed.after_test_sleep
            } else {
                parsed.no_test_sleep
            },
            should_exit: self.status.should_exit,
        }
    }

    fn run_stage(&mut self, stage: Stage) {
        apply_all(
            &self.applier,
            stage.name(),
            self.store.config().phases(stage),
            &mut self.status,
            stage.slots(),
        );
    }

    fn perform_action(&mut self) {
        if self.status.action.is_empty() {
            return;
        }
        debug!(
            action = %self.status.action,
            parameter = %self.status.action_parameter,
            "performing action"
        );
        let Some(phase) = self.store.config().action_map.get(&self.status.action) else {
            warn!(
                action = %self.status.action,
                location = %self.store.location(),
                "action not found in action-map"
            );
            return;
        };
        if let Err(err) = self.applier.apply(phase, &mut self.status, Slots::NONE) {
            warn!(action = %self.status.action, "action failed: {err:#}");
        }
    }

    /// Run `update-status` then push the status to the reporter, if any.
    fn report(&mut self) {
        self.run_stage(Stage::UpdateStatus);
        let Some(reporter) = &self.reporter else {
            return;
        };
        if let Err(err) = reporter.report_status(self.store.config(), &self.status) {
            warn!("status report failed: {err:#}");
        }
    }

    fn fetch_test(&mut self) {
        let config = self.store.config();
        self.status.result_to_run = request_next(
            &self.queue,
            &config.slick,
            &self.status,
            &self.status.projects,
        );
        self.run_stage(Stage::GetTest);
    }

    fn run_test(&mut self) {
        if let Some(result) = &self.status.result_to_run {
            let info = TestInfo::from_result(result);
            info!(
                id = %info.id,
                name = %info.name,
                automation_id = %info.automation_id,
                "running result"
            );
        }
        self.run_stage(Stage::RunTest);
        let outcome = self
            .status
            .result_to_run
            .as_ref()
            .map_or("UNKNOWN", result_outcome);
        info!(outcome, "result of test");
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::status::ProjectReleaseBuild;
    use crate::test_support::{RecordingReporter, ScriptedQueue, write_config};

    type TestAgent = Agent<ScriptedQueue, RecordingReporter>;

    fn agent_with(
        temp: &tempfile::TempDir,
        yaml: &str,
        results: Vec<Option<serde_json::Value>>,
        reporter: Option<RecordingReporter>,
    ) -> TestAgent {
        let path = write_config(temp.path(), yaml);
        let store = ConfigStore::open(&path).expect("open config");
        Agent::new(
            store,
            PhaseApplier::default(),
            ScriptedQueue::new(results),
            reporter,
            vec!["g1".to_string()],
        )
    }

    /// Discovery feeds the query with non-broken provides only.
    #[test]
    fn broken_capabilities_are_excluded_from_the_queue_query() {
        let temp = tempfile::tempdir().expect("tempdir");
        let yaml = "discovery:\n  - static-list: [cap-a, cap-b]\nbroke-discovery:\n  - static-value: cap-a\n";
        let mut agent = agent_with(&temp, yaml, vec![None], None);

        let outcome = agent.run_iteration();

        assert!(!outcome.ran_test);
        assert_eq!(outcome.sleep, Duration::from_secs(2));
        assert_eq!(agent.queue().queries()[0].get("provides"), Some(&json!(["cap-b"])));
        assert_eq!(agent.status().broken_provides, vec!["cap-a"]);
        assert_eq!(agent.status().groups, vec!["g1"]);
    }

    /// A fetched result flips the status to running and uses the after-test sleep.
    #[test]
    fn fetched_result_runs_test_and_reports_running() {
        let temp = tempfile::tempdir().expect("tempdir");
        let yaml = "sleep:\n  after-test: 1s\n";
        let result = json!({"id": "r1", "testcase": {"name": "login"}, "status": "PASS"});
        let mut agent = agent_with(
            &temp,
            yaml,
            vec![Some(result.clone())],
            Some(RecordingReporter::new()),
        );

        let outcome = agent.run_iteration();

        assert!(outcome.ran_test);
        assert_eq!(outcome.sleep, Duration::from_secs(1));
        assert_eq!(agent.status().run_status, RunStatus::Running);
        assert_eq!(agent.status().result_to_run, Some(result));

        let reports = agent.reporter().expect("reporter").reports();
        // Three discovery reports, after fetch, running, end of test branch.
        assert_eq!(reports.len(), 6);
        assert_eq!(reports[3].run_status, RunStatus::Idle);
        assert!(reports[3].result_to_run.is_some());
        assert_eq!(reports[4].run_status, RunStatus::Running);
        assert!(reports[4].ran_test);
    }

    /// A busy agent skips the queue entirely.
    #[test]
    fn non_idle_status_skips_the_test_branch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let yaml = "get-status:\n  - static-value: BUSY\n";
        let mut agent = agent_with(
            &temp,
            yaml,
            vec![Some(json!({"id": "r1"}))],
            Some(RecordingReporter::new()),
        );

        let outcome = agent.run_iteration();

        assert!(!outcome.ran_test);
        assert!(agent.queue().queries().is_empty());
        assert_eq!(agent.status().run_status, RunStatus::Other("BUSY".to_string()));
        assert_eq!(agent.reporter().expect("reporter").reports().len(), 3);
    }

    /// An empty get-status list keeps the default idle status.
    #[test]
    fn empty_get_status_stays_idle() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut agent = agent_with(&temp, "company: acme\n", vec![None], None);
        agent.run_iteration();
        assert!(agent.status().is_idle());
        assert_eq!(agent.queue().queries().len(), 1);
    }

    /// Status starts fresh each iteration; nothing leaks from the previous one.
    #[test]
    fn each_iteration_starts_from_a_fresh_status() {
        let temp = tempfile::tempdir().expect("tempdir");
        let yaml = "discovery:\n  - static-list: [cap-a]\n";
        let mut agent = agent_with(&temp, yaml, vec![None, None], None);

        agent.run_iteration();
        agent.run_iteration();

        assert_eq!(agent.status().provides, vec!["cap-a"]);
    }

    /// Projects come from configuration and drive one query per project.
    #[test]
    fn projects_are_queried_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let yaml = "projects:\n  - name: p1\n  - name: p2\n    release: r2\n";
        let mut agent = agent_with(&temp, yaml, vec![None, None], None);

        agent.run_iteration();

        let queries = agent.queue().queries();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[1].get("release"), Some(&json!("r2")));
        assert_eq!(
            agent.status().projects,
            vec![
                ProjectReleaseBuild {
                    name: "p1".to_string(),
                    ..ProjectReleaseBuild::default()
                },
                ProjectReleaseBuild {
                    name: "p2".to_string(),
                    release: "r2".to_string(),
                    ..ProjectReleaseBuild::default()
                },
            ]
        );
    }

    /// Unknown actions are skipped; known ones run with no slots bound.
    #[test]
    fn actions_are_looked_up_in_the_action_map() {
        let temp = tempfile::tempdir().expect("tempdir");
        let marker = temp.path().join("action.json");
        let yaml = format!(
            "check-for-action:\n  - static-value: dump\naction-map:\n  dump:\n    write-file: '{}'\n",
            marker.display()
        );
        let mut agent = agent_with(&temp, &yaml, vec![None], None);
        agent.run_iteration();
        assert!(marker.exists());

        let missing = "check-for-action:\n  - static-value: nope\n";
        let mut agent = agent_with(&temp, missing, vec![None], None);
        let outcome = agent.run_iteration();
        assert_eq!(agent.status().action, "nope");
        assert!(!outcome.should_exit);
    }

    /// Required attributes discovered via static-map become query keys.
    #[test]
    fn required_attributes_reach_the_query() {
        let temp = tempfile::tempdir().expect("tempdir");
        let yaml = "test-attribute-discovery:\n  - static-map: {os: linux}\n";
        let mut agent = agent_with(&temp, yaml, vec![None], None);
        agent.run_iteration();
        assert_eq!(agent.queue().queries()[0].get("os"), Some(&json!("linux")));
    }

    /// Report failures are logged and do not stop the iteration.
    #[test]
    fn failing_reporter_does_not_abort_iteration() {
        let temp = tempfile::tempdir().expect("tempdir");
        let yaml = "cleanup:\n  - static-value: ignored\n";
        let mut agent = agent_with(&temp, yaml, vec![None], Some(RecordingReporter::failing()));
        agent.run_iteration();
        assert_eq!(agent.reporter().expect("reporter").reports().len(), 5);
        assert_eq!(agent.queue().queries().len(), 1);
    }

    /// A command can request exit; `run` stops after that iteration.
    #[cfg(unix)]
    #[test]
    fn should_exit_stops_the_loop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let yaml = r#"
sleep:
  no-test: 1ms
cleanup:
  - command: |
      echo '{"shouldExit": true}' > "$SLICK_AGENT_STATUS"
"#;
        let path = write_config(temp.path(), yaml);
        let store = ConfigStore::open(&path).expect("open config");
        let applier = PhaseApplier::new(crate::io::process::Shell {
            program: "/bin/sh".to_string(),
            arg: "-c".to_string(),
        });
        let mut agent: TestAgent =
            Agent::new(store, applier, ScriptedQueue::new(vec![None]), None, Vec::new());

        let mut seen = Vec::new();
        let outcome = agent.run(|iteration| seen.push(*iteration));

        assert_eq!(outcome, LoopOutcome { iterations: 1 });
        assert_eq!(seen.len(), 1);
        assert!(seen[0].should_exit);
        assert_eq!(seen[0].sleep, Duration::from_millis(1));
    }
}
