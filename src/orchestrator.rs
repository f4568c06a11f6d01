use std::collections::BTreeSet;

use tracing::{error, info, instrument, warn};

use crate::config::SyncConfig;
use crate::database_ops::catalog::{
    CatalogFetch, CatalogQuery, CatalogRepository, NOWCAST_EVENT_TYPE,
};
use crate::database_ops::psc::CatalogSink;
use crate::error::RepositoryError;
use crate::models::{AcceptedProjects, CatalogResult};
use crate::notify::{Channel, NoopNotifier, Notifier};

/// How a sync attempt ended. Only `NotApplicable` and `Delivered` are successes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The physical location is not served by the partner site.
    NotApplicable,
    Delivered,
    NoData,
    StoreError { message: String },
    /// At least one catalog carried a project code outside the accepted set.
    Rejected { foreign_codes: Vec<String> },
    DeliveryFailed,
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::NotApplicable | SyncOutcome::Delivered)
    }
}

/// Drives one catalog sync: gate, fetch, filter, validate, deliver.
pub struct SyncOrchestrator {
    config: SyncConfig,
    repository: Box<dyn CatalogRepository>,
    sink: Box<dyn CatalogSink>,
    notifier: Box<dyn Notifier>,
}

impl SyncOrchestrator {
    pub fn new(
        config: SyncConfig,
        repository: Box<dyn CatalogRepository>,
        sink: Box<dyn CatalogSink>,
    ) -> Self {
        Self {
            config,
            repository,
            sink,
            notifier: Box::new(NoopNotifier),
        }
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Run a sync and reduce it to pass/fail. Never panics or propagates:
    /// repository failures are logged with the run ID and reported as `false`.
    pub async fn run(&self, run_id: &str, physical_location: &str) -> bool {
        let outcome = match self.sync(run_id, physical_location).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    run_id,
                    error = %e,
                    "Failed to get sync data from the database for run id {run_id}"
                );
                let message = format!(
                    "Error: Failed to get sync data from the database for run id {run_id}."
                );
                self.notifier.notify(&message, Channel::Issues).await;
                return false;
            }
        };

        match &outcome {
            SyncOutcome::Delivered => {
                self.notifier
                    .notify(&format!("PSC sync complete for run id {run_id}."), Channel::Status)
                    .await;
            }
            SyncOutcome::NotApplicable => {}
            failed => {
                self.notifier
                    .notify(&failure_message(failed, run_id), Channel::Issues)
                    .await;
            }
        }

        outcome.is_success()
    }

    /// The full workflow with its detailed outcome.
    #[instrument(skip(self))]
    pub async fn sync(
        &self,
        run_id: &str,
        physical_location: &str,
    ) -> Result<SyncOutcome, RepositoryError> {
        if !self.config.applies_to(physical_location) {
            info!(
                run_id,
                physical_location,
                site = %self.config.site_id,
                "location not served by PSC; nothing to sync"
            );
            return Ok(SyncOutcome::NotApplicable);
        }

        let query = CatalogQuery::for_run(run_id).event_type(NOWCAST_EVENT_TYPE);
        let mut result = match self.repository.fetch(&query).await? {
            CatalogFetch::StoreError { message } => {
                warn!(run_id, %message, "catalog procedure reported an error for run id {run_id}");
                return Ok(SyncOutcome::StoreError { message });
            }
            CatalogFetch::Records(result) => result,
        };

        if !result.has_catalogs() {
            warn!(run_id, "Warning: No records found in the database for run id {run_id}.");
            return Ok(SyncOutcome::NoData);
        }

        filter_past_runs(&mut result, &self.config.accepted_projects);
        result.system = Some(self.config.system.clone());

        let foreign_codes = foreign_project_codes(&result, &self.config.accepted_projects);
        if !foreign_codes.is_empty() {
            warn!(
                run_id,
                foreign_codes = ?foreign_codes,
                "project codes not accepted by PSC; nothing delivered for run id {run_id}"
            );
            return Ok(SyncOutcome::Rejected { foreign_codes });
        }

        if self.sink.deliver(&result, run_id).await {
            Ok(SyncOutcome::Delivered)
        } else {
            warn!(run_id, "Error: PSC sync failure for run id {run_id}.");
            Ok(SyncOutcome::DeliveryFailed)
        }
    }
}

fn failure_message(outcome: &SyncOutcome, run_id: &str) -> String {
    match outcome {
        SyncOutcome::NoData => {
            format!("Warning: No records found in the database for run id {run_id}.")
        }
        SyncOutcome::StoreError { message } => {
            format!("Error: catalog query failed for run id {run_id}: {message}")
        }
        SyncOutcome::Rejected { foreign_codes } => format!(
            "Error: run id {run_id} has project codes not accepted by PSC: {}",
            foreign_codes.join(", ")
        ),
        _ => format!("Error: PSC sync failure for run id {run_id}."),
    }
}

/// Keep only past runs whose project code is accepted, in their original order.
pub fn filter_past_runs(result: &mut CatalogResult, accepted: &AcceptedProjects) {
    if let Some(past_runs) = result.past_runs.as_mut() {
        past_runs.retain(|p| accepted.accepts(p.project_code.as_deref()));
    }
}

/// Every distinct catalog project code outside the accepted set, in first-seen
/// order. A catalog without a project code is reported as `<missing>`.
/// Scans the whole batch; one foreign code is enough to reject it.
pub fn foreign_project_codes(result: &CatalogResult, accepted: &AcceptedProjects) -> Vec<String> {
    let mut foreign: Vec<String> = Vec::new();
    for entry in result.catalogs() {
        if accepted.accepts(entry.project_code.as_deref()) {
            continue;
        }
        let code = entry
            .project_code
            .clone()
            .unwrap_or_else(|| "<missing>".to_string());
        if !foreign.contains(&code) {
            foreign.push(code);
        }
    }
    foreign
}

/// Distinct catalog family IDs (member ID minus its last dash segment).
pub fn unique_catalog_family_ids(result: &CatalogResult) -> BTreeSet<String> {
    result
        .catalogs()
        .iter()
        .map(|c| c.family_id().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;
    use crate::models::{CatalogEntry, MemberDef, PastRunEntry};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const RUN_ID: &str = "4358-2023050106-namforecast";

    #[derive(Clone)]
    enum Canned {
        Fetch(CatalogFetch),
        Fail,
    }

    struct FakeRepository {
        canned: Canned,
        calls: Arc<AtomicUsize>,
        queries: Arc<Mutex<Vec<CatalogQuery>>>,
    }

    #[async_trait::async_trait]
    impl CatalogRepository for FakeRepository {
        async fn fetch(&self, query: &CatalogQuery) -> Result<CatalogFetch, RepositoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.queries.lock().unwrap().push(query.clone());
            match &self.canned {
                Canned::Fetch(f) => Ok(f.clone()),
                Canned::Fail => Err(RepositoryError::Database(sqlx::Error::PoolTimedOut)),
            }
        }
    }

    struct SpySink {
        accept: bool,
        calls: Arc<AtomicUsize>,
        delivered: Arc<Mutex<Option<CatalogResult>>>,
    }

    #[async_trait::async_trait]
    impl CatalogSink for SpySink {
        async fn deliver(&self, result: &CatalogResult, _run_id: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.delivered.lock().unwrap() = Some(result.clone());
            self.accept
        }
    }

    struct RecordingNotifier {
        messages: Arc<Mutex<Vec<(Channel, String)>>>,
    }

    #[async_trait::async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, message: &str, channel: Channel) {
            self.messages.lock().unwrap().push((channel, message.to_string()));
        }
    }

    struct Harness {
        orchestrator: SyncOrchestrator,
        fetches: Arc<AtomicUsize>,
        queries: Arc<Mutex<Vec<CatalogQuery>>>,
        deliveries: Arc<AtomicUsize>,
        delivered: Arc<Mutex<Option<CatalogResult>>>,
        messages: Arc<Mutex<Vec<(Channel, String)>>>,
    }

    fn harness(canned: Canned, accept: bool) -> Harness {
        let fetches = Arc::new(AtomicUsize::new(0));
        let queries = Arc::new(Mutex::new(Vec::new()));
        let deliveries = Arc::new(AtomicUsize::new(0));
        let delivered = Arc::new(Mutex::new(None));
        let messages = Arc::new(Mutex::new(Vec::new()));

        let orchestrator = SyncOrchestrator::new(
            sample_config("http://127.0.0.1:9/sync"),
            Box::new(FakeRepository {
                canned,
                calls: fetches.clone(),
                queries: queries.clone(),
            }),
            Box::new(SpySink {
                accept,
                calls: deliveries.clone(),
                delivered: delivered.clone(),
            }),
        )
        .with_notifier(Box::new(RecordingNotifier {
            messages: messages.clone(),
        }));

        Harness {
            orchestrator,
            fetches,
            queries,
            deliveries,
            delivered,
            messages,
        }
    }

    fn catalog(member_id: &str, code: Option<&str>) -> CatalogEntry {
        CatalogEntry {
            project_code: code.map(str::to_string),
            member_def: MemberDef {
                id: member_id.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn past_run(code: &str) -> PastRunEntry {
        PastRunEntry {
            project_code: Some(code.to_string()),
            ..Default::default()
        }
    }

    fn records(catalogs: Vec<CatalogEntry>, past_runs: Vec<PastRunEntry>) -> Canned {
        Canned::Fetch(CatalogFetch::Records(CatalogResult {
            catalogs: Some(catalogs),
            past_runs: Some(past_runs),
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn delivers_accepted_batch() {
        let h = harness(
            records(
                vec![
                    catalog("4358-2023050106-namforecast-obs", Some("lffs")),
                    catalog("4358-2023050106-namforecast-maxele63", Some("nopp")),
                ],
                vec![past_run("lffs"), past_run("renci"), past_run("nopp")],
            ),
            true,
        );

        assert!(h.orchestrator.run(RUN_ID, "PSC").await);
        assert_eq!(h.deliveries.load(Ordering::SeqCst), 1);

        let query = h.queries.lock().unwrap()[0].clone();
        assert_eq!(query.run_id.as_deref(), Some(RUN_ID));
        assert_eq!(query.filter_event_type.as_deref(), Some(NOWCAST_EVENT_TYPE));
        assert_eq!(query.project_code, None);
        assert_eq!(query.limit, None);

        let sent = h.delivered.lock().unwrap().clone().unwrap();
        assert_eq!(sent.system.as_deref(), Some("Dev"));
        let codes: Vec<_> = sent
            .past_runs()
            .iter()
            .map(|p| p.project_code.as_deref().unwrap())
            .collect();
        assert_eq!(codes, vec!["lffs", "nopp"]);

        let messages = h.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, Channel::Status);
    }

    #[tokio::test]
    async fn other_locations_are_a_no_op_success() {
        let h = harness(records(vec![catalog("a-b-1", Some("lffs"))], vec![]), true);

        assert!(h.orchestrator.run(RUN_ID, "RENCI").await);
        assert_eq!(h.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(h.deliveries.load(Ordering::SeqCst), 0);
        assert!(h.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn location_prefix_is_enough() {
        let h = harness(records(vec![catalog("a-b-1", Some("lffs"))], vec![]), true);
        assert!(h.orchestrator.run(RUN_ID, "PSC-STAMPEDE").await);
        assert_eq!(h.deliveries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_catalogs_fail_without_delivery() {
        let h = harness(records(vec![], vec![past_run("lffs")]), true);
        assert_eq!(
            h.orchestrator.sync(RUN_ID, "PSC").await.unwrap(),
            SyncOutcome::NoData
        );
        assert!(!h.orchestrator.run(RUN_ID, "PSC").await);
        assert_eq!(h.deliveries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn absent_catalogs_fail_without_delivery() {
        let h = harness(Canned::Fetch(CatalogFetch::Records(CatalogResult::default())), true);
        assert!(!h.orchestrator.run(RUN_ID, "PSC").await);
        assert_eq!(h.deliveries.load(Ordering::SeqCst), 0);
        let messages = h.messages.lock().unwrap();
        assert_eq!(messages[0].0, Channel::Issues);
        assert!(messages[0].1.contains("No records found"));
    }

    #[tokio::test]
    async fn one_foreign_code_rejects_the_whole_batch() {
        let h = harness(
            records(
                vec![
                    catalog("a-b-1", Some("lffs")),
                    catalog("a-b-2", Some("renci")),
                    catalog("a-b-3", Some("nopp")),
                    catalog("a-b-4", None),
                    catalog("a-b-5", Some("renci")),
                ],
                vec![],
            ),
            true,
        );

        assert_eq!(
            h.orchestrator.sync(RUN_ID, "PSC").await.unwrap(),
            SyncOutcome::Rejected {
                foreign_codes: vec!["renci".into(), "<missing>".into()]
            }
        );
        assert!(!h.orchestrator.run(RUN_ID, "PSC").await);
        assert_eq!(h.deliveries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn store_error_fails_without_delivery() {
        let h = harness(
            Canned::Fetch(CatalogFetch::StoreError {
                message: "Error: No run id or limit specified.".into(),
            }),
            true,
        );
        assert!(!h.orchestrator.run(RUN_ID, "PSC").await);
        assert_eq!(h.deliveries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn repository_errors_become_false() {
        let h = harness(Canned::Fail, true);
        assert!(h.orchestrator.sync(RUN_ID, "PSC").await.is_err());
        assert!(!h.orchestrator.run(RUN_ID, "PSC").await);
        assert_eq!(h.deliveries.load(Ordering::SeqCst), 0);
        assert_eq!(h.messages.lock().unwrap()[0].0, Channel::Issues);
    }

    #[tokio::test]
    async fn unreachable_database_is_reported_with_the_run_id() {
        use crate::database_ops::catalog::PgCatalogRepository;
        use crate::database_ops::db::Db;
        use std::time::Duration;

        let dsn = "postgres://u:p@127.0.0.1:1/apsviz";
        let db = Db::connect_lazy(dsn, 1, Duration::from_secs(1)).unwrap();
        let deliveries = Arc::new(AtomicUsize::new(0));
        let messages = Arc::new(Mutex::new(Vec::new()));
        let orchestrator = SyncOrchestrator::new(
            sample_config("http://127.0.0.1:9/sync"),
            Box::new(PgCatalogRepository::new(db)),
            Box::new(SpySink {
                accept: true,
                calls: deliveries.clone(),
                delivered: Arc::new(Mutex::new(None)),
            }),
        )
        .with_notifier(Box::new(RecordingNotifier {
            messages: messages.clone(),
        }));

        assert!(!orchestrator.run(RUN_ID, "PSC").await);
        assert_eq!(deliveries.load(Ordering::SeqCst), 0);
        let messages = messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, Channel::Issues);
        assert!(messages[0].1.contains(RUN_ID));
    }

    #[tokio::test]
    async fn rejected_delivery_is_false() {
        let h = harness(records(vec![catalog("a-b-1", Some("lffs"))], vec![]), false);
        assert!(!h.orchestrator.run(RUN_ID, "PSC").await);
        assert_eq!(h.deliveries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeated_runs_refetch() {
        let h = harness(records(vec![catalog("a-b-1", Some("lffs"))], vec![]), true);
        assert!(h.orchestrator.run(RUN_ID, "PSC").await);
        assert!(h.orchestrator.run(RUN_ID, "PSC").await);
        assert_eq!(h.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(h.deliveries.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn past_run_filter_keeps_relative_order() {
        let mut result = CatalogResult {
            past_runs: Some(vec![past_run("x"), past_run("y"), past_run("z")]),
            ..Default::default()
        };
        let accepted = AcceptedProjects::from_csv("x,z");
        filter_past_runs(&mut result, &accepted);
        let codes: Vec<_> = result
            .past_runs()
            .iter()
            .map(|p| p.project_code.as_deref().unwrap())
            .collect();
        assert_eq!(codes, vec!["x", "z"]);
    }

    #[test]
    fn past_runs_without_code_are_dropped() {
        let mut result = CatalogResult {
            past_runs: Some(vec![PastRunEntry::default(), past_run("x")]),
            ..Default::default()
        };
        filter_past_runs(&mut result, &AcceptedProjects::from_csv("x"));
        assert_eq!(result.past_runs().len(), 1);
    }

    #[test]
    fn family_ids_are_deduplicated_and_order_free() {
        let mut result = CatalogResult {
            catalogs: Some(vec![
                catalog("a-b-1", Some("x")),
                catalog("a-b-2", Some("x")),
                catalog("c-d-9", Some("x")),
            ]),
            ..Default::default()
        };
        let expected: BTreeSet<String> = ["a-b", "c-d"].into_iter().map(String::from).collect();
        assert_eq!(unique_catalog_family_ids(&result), expected);
        assert_eq!(unique_catalog_family_ids(&result), expected);

        result.catalogs.as_mut().unwrap().reverse();
        assert_eq!(unique_catalog_family_ids(&result), expected);
    }
}
