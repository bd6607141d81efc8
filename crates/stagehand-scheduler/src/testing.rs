//! In-memory stores and a scripted CI engine for scheduler tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stagehand_core::artifact::BuildOutputs;
use stagehand_core::baseline::Baseline;
use stagehand_core::build::{BuildRequest, JobName, NewBuild};
use stagehand_core::ci::{
    BuildParameters, BuildResult, CiEngine, CiError, CiResult, LastBuild, QueueState,
};
use stagehand_core::ledger::{PhaseLedger, Stages};
use stagehand_core::{BuildId, BuildStatus, LedgerId, OwnerId, ProjectId};
use stagehand_db::{
    BaselineRepo, BuildRepo, Claim, DbError, DbResult, LedgerRepo, OutputsRepo,
};
use tokio::sync::Notify;

use crate::notify::{MailError, MailMessage, Mailer, Notifier};
use crate::orchestrator::{BuildOrchestrator, IntakeSettings};
use crate::stores::Stores;
use crate::tracker::BuildTracker;

/// Project that has a baseline in every [`Harness`].
pub const PROJECT: i64 = 1;

pub fn build_request(id: i64, owner: i64, project: i64, status: BuildStatus) -> BuildRequest {
    let now = Utc::now();
    BuildRequest {
        id: BuildId::new(id),
        project_id: ProjectId::new(project),
        owner_id: OwnerId::new(owner),
        developer: "dana".to_string(),
        uploaded_at: now,
        tag_name: format!("tag{}", id),
        tag_description: String::new(),
        file_name: "bundle.zip".to_string(),
        file_hash: "c0ffee".to_string(),
        status,
        send_notification: false,
        deleted: false,
        updated_at: now,
    }
}

pub fn new_build(owner: i64, tag: &str) -> NewBuild {
    NewBuild {
        project_id: ProjectId::new(PROJECT),
        owner_id: OwnerId::new(owner),
        developer: "dana".to_string(),
        tag_name: tag.to_string(),
        tag_description: String::new(),
        file_name: "bundle.zip".to_string(),
        file_hash: "c0ffee".to_string(),
    }
}

#[derive(Default)]
pub struct MemoryBuildRepo {
    rows: Mutex<HashMap<BuildId, BuildRequest>>,
    next_id: AtomicI64,
    fail_listing: AtomicBool,
    stale_listings: AtomicUsize,
}

impl MemoryBuildRepo {
    pub fn put(&self, build: BuildRequest) -> BuildRequest {
        self.rows.lock().unwrap().insert(build.id, build.clone());
        build
    }

    pub fn insert(&self, owner: i64, status: BuildStatus) -> BuildRequest {
        self.insert_with(owner, status, false)
    }

    pub fn insert_with(&self, owner: i64, status: BuildStatus, notify: bool) -> BuildRequest {
        let id = 1000 + self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut build = build_request(id, owner, PROJECT, status);
        build.send_notification = notify;
        self.put(build)
    }

    pub fn row(&self, id: BuildId) -> BuildRequest {
        self.rows.lock().unwrap()[&id].clone()
    }

    pub fn get_status(&self, id: BuildId) -> BuildStatus {
        self.row(id).status
    }

    pub fn force_status(&self, id: BuildId, status: BuildStatus) {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&id) {
            row.status = status;
        }
    }

    pub fn set_updated_at(&self, id: BuildId, at: DateTime<Utc>) {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&id) {
            row.updated_at = at;
        }
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn stale_listings(&self) -> usize {
        self.stale_listings.load(Ordering::SeqCst)
    }

    fn visible(&self, filter: impl Fn(&BuildRequest) -> bool) -> Vec<BuildRequest> {
        let mut builds: Vec<_> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|b| !b.deleted && filter(b))
            .cloned()
            .collect();
        builds.sort_by_key(|b| (b.updated_at, b.id));
        builds
    }
}

#[async_trait]
impl BuildRepo for MemoryBuildRepo {
    async fn create(&self, build: &NewBuild) -> DbResult<BuildRequest> {
        let id = 1000 + self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut row = build_request(id, build.owner_id.get(), build.project_id.get(), BuildStatus::Uploaded);
        row.developer = build.developer.clone();
        row.tag_name = build.tag_name.clone();
        row.tag_description = build.tag_description.clone();
        row.file_name = build.file_name.clone();
        row.file_hash = build.file_hash.clone();
        Ok(self.put(row))
    }

    async fn get(&self, id: BuildId) -> DbResult<BuildRequest> {
        self.rows
            .lock()
            .unwrap()
            .get(&id)
            .filter(|b| !b.deleted)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("build {}", id)))
    }

    async fn list_in_progress(&self) -> DbResult<Vec<BuildRequest>> {
        Ok(self.visible(|b| b.status.is_running()))
    }

    async fn list_in_queue(&self) -> DbResult<Vec<BuildRequest>> {
        Ok(self.visible(|b| b.status == BuildStatus::InQueue))
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<BuildRequest>> {
        self.stale_listings.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(DbError::Corrupt("connection reset".to_string()));
        }
        Ok(self.visible(|b| b.status.is_in_flight() && b.updated_at < cutoff))
    }

    async fn first_queued(&self, owner_id: OwnerId) -> DbResult<Option<BuildRequest>> {
        Ok(self
            .visible(|b| b.owner_id == owner_id && b.status == BuildStatus::InQueue)
            .into_iter()
            .next())
    }

    async fn latest_uploaded(&self, owner_id: OwnerId) -> DbResult<Option<BuildRequest>> {
        Ok(self
            .visible(|b| b.owner_id == owner_id)
            .into_iter()
            .max_by_key(|b| (b.uploaded_at, b.id)))
    }

    async fn owner_has_running(&self, owner_id: OwnerId, except: BuildId) -> DbResult<bool> {
        Ok(!self
            .visible(|b| b.owner_id == owner_id && b.id != except && b.status.is_running())
            .is_empty())
    }

    async fn claim(&self, claim: &Claim) -> DbResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        let blocked = rows.values().any(|b| {
            b.owner_id == claim.owner_id
                && b.id != claim.build_id
                && !b.deleted
                && b.status.is_running()
        });
        match rows.get_mut(&claim.build_id) {
            Some(row) if !row.deleted && row.status == claim.expected && !blocked => {
                row.status = claim.next;
                row.send_notification = claim.send_notification;
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_status(
        &self,
        id: BuildId,
        expected: BuildStatus,
        next: BuildStatus,
    ) -> DbResult<bool> {
        match self.rows.lock().unwrap().get_mut(&id) {
            Some(row) if !row.deleted && row.status == expected => {
                row.status = next;
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn soft_delete(&self, id: BuildId) -> DbResult<()> {
        match self.rows.lock().unwrap().get_mut(&id) {
            Some(row) if !row.deleted => {
                row.deleted = true;
                Ok(())
            }
            _ => Err(DbError::NotFound(format!("build {}", id))),
        }
    }
}

#[derive(Default)]
pub struct MemoryLedgerRepo {
    rows: Mutex<HashMap<BuildId, PhaseLedger>>,
    next_id: AtomicI64,
    save_delay: Mutex<Option<Duration>>,
}

impl MemoryLedgerRepo {
    pub fn insert_started(&self, build: &BuildRequest) -> PhaseLedger {
        self.insert_started_at(build, Utc::now())
    }

    pub fn insert_started_at(&self, build: &BuildRequest, at: DateTime<Utc>) -> PhaseLedger {
        let ledger = PhaseLedger {
            id: LedgerId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
            owner_id: build.owner_id,
            project_id: build.project_id,
            build_id: build.id,
            stages: Stages::started(at),
            in_queue: false,
            download: false,
        };
        self.rows.lock().unwrap().insert(build.id, ledger.clone());
        ledger
    }

    pub fn delay_saves(&self, delay: Duration) {
        *self.save_delay.lock().unwrap() = Some(delay);
    }

    pub fn count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn for_build(&self, id: BuildId) -> Option<PhaseLedger> {
        self.rows.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl LedgerRepo for MemoryLedgerRepo {
    async fn find_by_build(&self, build_id: BuildId) -> DbResult<Option<PhaseLedger>> {
        Ok(self.for_build(build_id))
    }

    async fn create(
        &self,
        owner_id: OwnerId,
        project_id: ProjectId,
        build_id: BuildId,
        stages: &Stages,
    ) -> DbResult<PhaseLedger> {
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&build_id) {
            return Err(DbError::Duplicate(format!("phase ledger for build {}", build_id)));
        }
        let ledger = PhaseLedger {
            id: LedgerId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
            owner_id,
            project_id,
            build_id,
            stages: stages.clone(),
            in_queue: false,
            download: false,
        };
        rows.insert(build_id, ledger.clone());
        Ok(ledger)
    }

    async fn save(&self, ledger: &PhaseLedger) -> DbResult<()> {
        let delay = *self.save_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&ledger.build_id) {
            Some(row) if row.id == ledger.id => {
                *row = ledger.clone();
                Ok(())
            }
            _ => Err(DbError::NotFound(format!("phase ledger {}", ledger.id))),
        }
    }

    async fn delete_for_build(&self, build_id: BuildId) -> DbResult<()> {
        self.rows.lock().unwrap().remove(&build_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryOutputsRepo {
    rows: Mutex<HashMap<BuildId, BuildOutputs>>,
}

#[async_trait]
impl OutputsRepo for MemoryOutputsRepo {
    async fn record(&self, outputs: &BuildOutputs) -> DbResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let id = outputs.artifact.build_id;
        if rows.contains_key(&id) {
            return Err(DbError::Duplicate(format!("outputs for build {}", id)));
        }
        rows.insert(id, outputs.clone());
        Ok(())
    }

    async fn get(&self, build_id: BuildId) -> DbResult<Option<BuildOutputs>> {
        Ok(self.rows.lock().unwrap().get(&build_id).cloned())
    }
}

#[derive(Default)]
pub struct MemoryBaselineRepo {
    projects: Mutex<HashSet<ProjectId>>,
}

impl MemoryBaselineRepo {
    pub fn add(&self, project: i64) {
        self.projects.lock().unwrap().insert(ProjectId::new(project));
    }
}

#[async_trait]
impl BaselineRepo for MemoryBaselineRepo {
    async fn active_for_project(&self, project_id: ProjectId) -> DbResult<Option<Baseline>> {
        let found = self.projects.lock().unwrap().contains(&project_id);
        Ok(found.then(|| Baseline {
            id: 1,
            project_id,
            name: "default".to_string(),
            active: true,
            created_at: Utc::now(),
        }))
    }
}

/// CI engine with scripted responses. Unscripted calls report an idle
/// intake job, a successful last build and an existing job.
pub struct FakeCi {
    queue: Mutex<VecDeque<CiResult<QueueState>>>,
    queue_busy: AtomicBool,
    last_build: Mutex<VecDeque<CiResult<LastBuild>>>,
    start_error: Mutex<Option<CiError>>,
    start_gate: Mutex<Option<Arc<Notify>>>,
    intake_gate: Mutex<Option<Arc<Notify>>>,
    job_present: AtomicBool,
    exists_error: Mutex<Option<CiError>>,
    delete_error: Mutex<Option<CiError>>,
    calls: Mutex<Vec<String>>,
}

impl Default for FakeCi {
    fn default() -> Self {
        Self {
            queue: Mutex::default(),
            queue_busy: AtomicBool::new(false),
            last_build: Mutex::default(),
            start_error: Mutex::default(),
            start_gate: Mutex::default(),
            intake_gate: Mutex::default(),
            job_present: AtomicBool::new(true),
            exists_error: Mutex::default(),
            delete_error: Mutex::default(),
            calls: Mutex::default(),
        }
    }
}

impl FakeCi {
    pub fn push_queue(&self, response: CiResult<QueueState>) {
        self.queue.lock().unwrap().push_back(response);
    }

    /// Report `inQueue = true` for every unscripted queue check.
    pub fn always_busy(&self) {
        self.queue_busy.store(true, Ordering::SeqCst);
    }

    pub fn push_last_build(&self, response: CiResult<LastBuild>) {
        self.last_build.lock().unwrap().push_back(response);
    }

    pub fn fail_start(&self, error: CiError) {
        *self.start_error.lock().unwrap() = Some(error);
    }

    /// Park `start_build` until `gate` is notified.
    pub fn hold_start(&self, gate: Arc<Notify>) {
        *self.start_gate.lock().unwrap() = Some(gate);
    }

    /// Park the next intake queue check until `gate` is notified.
    pub fn hold_intake(&self, gate: Arc<Notify>) {
        *self.intake_gate.lock().unwrap() = Some(gate);
    }

    pub fn set_job_present(&self, present: bool) {
        self.job_present.store(present, Ordering::SeqCst);
    }

    pub fn fail_exists(&self, error: CiError) {
        *self.exists_error.lock().unwrap() = Some(error);
    }

    pub fn fail_delete(&self, error: CiError) {
        *self.delete_error.lock().unwrap() = Some(error);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl CiEngine for FakeCi {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn intake_queue(&self) -> CiResult<QueueState> {
        self.record("intake_queue".to_string());
        let gate = self.intake_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let scripted = self.queue.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(QueueState {
                in_queue: self.queue_busy.load(Ordering::SeqCst),
            })
        })
    }

    async fn intake_last_build(&self) -> CiResult<LastBuild> {
        self.record("intake_last_build".to_string());
        let scripted = self.last_build.lock().unwrap().pop_front();
        scripted.unwrap_or(Ok(LastBuild {
            in_progress: false,
            result: Some(BuildResult::Success),
        }))
    }

    async fn start_build(&self, job: &JobName, _params: &BuildParameters) -> CiResult<()> {
        self.record(format!("start_build {}", job));
        let gate = self.start_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match self.start_error.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn job_exists(&self, job: &JobName) -> CiResult<bool> {
        self.record(format!("job_exists {}", job));
        match self.exists_error.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(self.job_present.load(Ordering::SeqCst)),
        }
    }

    async fn delete_job(&self, job: &JobName) -> CiResult<()> {
        self.record(format!("delete_job {}", job));
        match self.delete_error.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<MailMessage>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Every scheduler component wired to in-memory collaborators.
pub struct Harness {
    pub builds: Arc<MemoryBuildRepo>,
    pub ledgers: Arc<MemoryLedgerRepo>,
    pub outputs: Arc<MemoryOutputsRepo>,
    pub baselines: Arc<MemoryBaselineRepo>,
    pub stores: Stores,
    pub ci: Arc<FakeCi>,
    pub mailer: Arc<RecordingMailer>,
    pub notifier: Notifier,
    pub tracker: Arc<BuildTracker>,
    pub orchestrator: Arc<BuildOrchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        let builds = Arc::new(MemoryBuildRepo::default());
        let ledgers = Arc::new(MemoryLedgerRepo::default());
        let outputs = Arc::new(MemoryOutputsRepo::default());
        let baselines = Arc::new(MemoryBaselineRepo::default());
        baselines.add(PROJECT);

        let stores = Stores {
            builds: builds.clone(),
            ledgers: ledgers.clone(),
            outputs: outputs.clone(),
            baselines: baselines.clone(),
        };
        let ci = Arc::new(FakeCi::default());
        let mailer = Arc::new(RecordingMailer::default());
        let notifier = Notifier::new(64);
        let tracker = Arc::new(BuildTracker::new(
            stores.clone(),
            notifier.clone(),
            mailer.clone(),
        ));
        let settings = IntakeSettings {
            intake_wait: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
        };
        let orchestrator = Arc::new(BuildOrchestrator::new(
            stores.clone(),
            ci.clone(),
            tracker.clone(),
            settings,
        ));

        Self {
            builds,
            ledgers,
            outputs,
            baselines,
            stores,
            ci,
            mailer,
            notifier,
            tracker,
            orchestrator,
        }
    }
}
