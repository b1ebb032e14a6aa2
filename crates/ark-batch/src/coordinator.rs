use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use ark_crypto::DigestEngine;
use ark_fixity::{FixityResult, FixityVerifier};
use ark_format::FormatIdentifier;
use ark_storage::{AggregatedStorageState, StorageStateAggregator};
use ark_store::{AipVersionAllocator, BatchRecord, InMemoryRepository, IngestRepository, SipRecord};
use ark_types::{BatchId, BatchState, SipId, Timestamp};

use crate::config::IngestConfig;
use crate::error::{BatchError, BatchResult};
use crate::event::BatchEvent;
use crate::pipeline::{Pipeline, UnitWork};
use crate::unit::{SipUnit, Stage, StageOutputs, UnitState};
use crate::validator::{SipValidator, StructureValidator};

const CANCELED: &str = "batch canceled";

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Consistent view of a batch and all of its units.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchSnapshot {
    pub batch_id: BatchId,
    pub state: BatchState,
    pub units: Vec<SipUnit>,
    /// Units currently executing a stage.
    pub in_flight: usize,
    /// A dispatch loop is running for this batch.
    pub dispatching: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl BatchSnapshot {
    /// The coordinator will do no further work on this batch without a
    /// control call.
    pub fn is_settled(&self) -> bool {
        match self.state {
            BatchState::New | BatchState::Completed => true,
            BatchState::Suspended | BatchState::Canceled => !self.dispatching && self.in_flight == 0,
            BatchState::Running => false,
        }
    }

    pub fn unit(&self, sip_id: &SipId) -> Option<&SipUnit> {
        self.units.iter().find(|u| &u.sip_id == sip_id)
    }

    pub fn counts(&self) -> UnitCounts {
        let mut counts = UnitCounts::default();
        for unit in &self.units {
            match unit.state {
                UnitState::Pending => counts.pending += 1,
                UnitState::Done => counts.done += 1,
                UnitState::Failed => counts.failed += 1,
                _ => counts.active += 1,
            }
        }
        counts
    }
}

/// Unit tally by coarse state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitCounts {
    pub pending: usize,
    pub active: usize,
    pub done: usize,
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// Per-batch state
// ---------------------------------------------------------------------------

struct BatchRun {
    state: BatchState,
    units: Vec<SipUnit>,
    in_flight: usize,
    dispatching: bool,
    updated_at: Timestamp,
}

/// How a stage ended for the unit that ran it.
enum StageEnd {
    Continue,
    Stored,
    Stopped,
}

/// Runtime state of one batch.
///
/// Batch and unit state sit behind one lock and every change is published
/// as a full snapshot on a watch channel. Batch state transitions are also
/// serialized by the async `control` lock, which the dispatch loop takes
/// before completing the batch.
struct BatchHandle {
    id: BatchId,
    created_at: Timestamp,
    control: tokio::sync::Mutex<()>,
    run: Mutex<BatchRun>,
    snapshots: watch::Sender<BatchSnapshot>,
    /// Poked by `resume` so a running dispatch loop claims again.
    wake: Notify,
}

impl BatchHandle {
    fn new(id: BatchId, units: Vec<SipUnit>) -> Self {
        let now = Timestamp::now();
        let run = BatchRun {
            state: BatchState::New,
            units,
            in_flight: 0,
            dispatching: false,
            updated_at: now,
        };
        let (snapshots, _) = watch::channel(Self::snapshot_of(id, now, &run));
        Self {
            id,
            created_at: now,
            control: tokio::sync::Mutex::new(()),
            run: Mutex::new(run),
            snapshots,
            wake: Notify::new(),
        }
    }

    fn snapshot_of(id: BatchId, created_at: Timestamp, run: &BatchRun) -> BatchSnapshot {
        BatchSnapshot {
            batch_id: id,
            state: run.state,
            units: run.units.clone(),
            in_flight: run.in_flight,
            dispatching: run.dispatching,
            created_at,
            updated_at: run.updated_at,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BatchRun> {
        self.run.lock().expect("batch lock poisoned")
    }

    fn publish(&self, run: &BatchRun) {
        self.snapshots
            .send_replace(Self::snapshot_of(self.id, self.created_at, run));
    }

    fn snapshot(&self) -> BatchSnapshot {
        self.snapshots.borrow().clone()
    }

    fn state(&self) -> BatchState {
        self.lock().state
    }

    fn record(&self, run: &BatchRun, state: BatchState, updated_at: Timestamp) -> BatchRecord {
        BatchRecord {
            batch_id: self.id,
            sips: run.units.iter().map(|u| u.sip_id.clone()).collect(),
            state,
            created_at: self.created_at,
            updated_at,
        }
    }

    /// Pick the first pending unit, in batch order, and mark it started.
    fn claim_next(&self, inner: &Inner) -> Option<usize> {
        let mut run = self.lock();
        if run.state != BatchState::Running {
            return None;
        }
        let index = run.units.iter().position(|u| u.state == UnitState::Pending)?;
        let unit = &mut run.units[index];
        let stage = unit.next_stage?;
        unit.state = stage.running_state();
        let event = BatchEvent::UnitStateChanged {
            batch_id: self.id,
            sip_id: unit.sip_id.clone(),
            state: unit.state,
        };
        run.in_flight += 1;
        self.publish(&run);
        inner.emit(event);
        Some(index)
    }

    /// Stage boundary: decide whether unit `index` may run its next stage.
    ///
    /// Parks the unit when the batch is suspended and fails it when the
    /// batch was canceled.
    fn checkpoint(&self, inner: &Inner, index: usize) -> Option<(Stage, UnitWork)> {
        let mut run = self.lock();
        let batch_state = run.state;
        let unit = &mut run.units[index];
        if unit.state.is_terminal() {
            return None;
        }
        let stage = unit.next_stage?;
        let sip_id = unit.sip_id.clone();

        let (next, event) = match batch_state {
            BatchState::Running => {
                let changed = unit.state != stage.running_state();
                unit.state = stage.running_state();
                let work = UnitWork {
                    sip_id: sip_id.clone(),
                    source: unit.source.clone(),
                    outputs: unit.outputs.clone(),
                };
                let event = changed.then(|| BatchEvent::UnitStateChanged {
                    batch_id: self.id,
                    sip_id: sip_id.clone(),
                    state: unit.state,
                });
                (Some((stage, work)), event)
            }
            BatchState::Suspended => {
                unit.state = UnitState::Pending;
                debug!(batch = %self.id, sip = %sip_id, next = %stage, "unit parked");
                let event = BatchEvent::UnitStateChanged {
                    batch_id: self.id,
                    sip_id: sip_id.clone(),
                    state: UnitState::Pending,
                };
                (None, Some(event))
            }
            BatchState::Canceled => {
                unit.fail(stage, CANCELED);
                debug!(batch = %self.id, sip = %sip_id, stage = %stage, "unit aborted");
                let event = BatchEvent::UnitFailed {
                    batch_id: self.id,
                    sip_id: sip_id.clone(),
                    stage,
                    message: CANCELED.to_string(),
                };
                (None, Some(event))
            }
            BatchState::New | BatchState::Completed => (None, None),
        };
        self.publish(&run);
        if let Some(event) = event {
            inner.emit(event);
        }
        next
    }

    fn complete_stage(
        &self,
        inner: &Inner,
        index: usize,
        stage: Stage,
        outputs: StageOutputs,
        outcome: BatchResult<()>,
    ) -> StageEnd {
        let mut run = self.lock();
        let unit = &mut run.units[index];
        unit.outputs = outputs;
        let sip_id = unit.sip_id.clone();
        let mut events = Vec::new();

        if stage == Stage::Fixity {
            for result in unit.outputs.submitted_fixity.iter().filter(|r| !r.matched) {
                warn!(batch = %self.id, sip = %sip_id, subject = %result.subject, "submitted checksum mismatch");
                events.push(BatchEvent::FixityMismatch {
                    batch_id: self.id,
                    sip_id: sip_id.clone(),
                    result: result.clone(),
                });
            }
        }

        let end = match outcome {
            Ok(()) => {
                unit.next_stage = stage.next();
                if unit.next_stage.is_some() {
                    StageEnd::Continue
                } else {
                    unit.state = UnitState::Done;
                    info!(
                        batch = %self.id,
                        sip = %sip_id,
                        version = unit.outputs.version,
                        "unit stored"
                    );
                    events.push(BatchEvent::UnitStateChanged {
                        batch_id: self.id,
                        sip_id: sip_id.clone(),
                        state: UnitState::Done,
                    });
                    StageEnd::Stored
                }
            }
            Err(e) => {
                let message = e.to_string();
                warn!(batch = %self.id, sip = %sip_id, stage = %stage, error = %message, "unit failed");
                unit.fail(stage, message.clone());
                events.push(BatchEvent::UnitFailed {
                    batch_id: self.id,
                    sip_id,
                    stage,
                    message,
                });
                StageEnd::Stopped
            }
        };
        self.publish(&run);
        for event in events {
            inner.emit(event);
        }
        end
    }

    fn record_replica_check(&self, inner: &Inner, index: usize, result: FixityResult) {
        let mut run = self.lock();
        let unit = &mut run.units[index];
        unit.outputs.replica_check = Some(result.clone());
        let event = (!result.matched).then(|| BatchEvent::FixityMismatch {
            batch_id: self.id,
            sip_id: unit.sip_id.clone(),
            result,
        });
        self.publish(&run);
        if let Some(event) = event {
            inner.emit(event);
        }
    }

    fn release(&self) {
        let mut run = self.lock();
        run.in_flight = run.in_flight.saturating_sub(1);
        self.publish(&run);
    }
}

// ---------------------------------------------------------------------------
// BatchCoordinator
// ---------------------------------------------------------------------------

/// External collaborators of the coordinator.
pub struct Collaborators {
    pub repository: Arc<dyn IngestRepository>,
    pub aggregator: Arc<StorageStateAggregator>,
    pub identifier: FormatIdentifier,
    pub validator: Arc<dyn SipValidator>,
}

struct Inner {
    config: IngestConfig,
    repository: Arc<dyn IngestRepository>,
    pipeline: Pipeline,
    batches: RwLock<HashMap<BatchId, Arc<BatchHandle>>>,
    events: broadcast::Sender<BatchEvent>,
}

impl Inner {
    fn handle(&self, batch_id: BatchId) -> BatchResult<Arc<BatchHandle>> {
        self.batches
            .read()
            .expect("batch table poisoned")
            .get(&batch_id)
            .cloned()
            .ok_or(BatchError::NotFound(batch_id))
    }

    fn emit(&self, event: BatchEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn expect_state(
        &self,
        handle: &BatchHandle,
        allowed: &[BatchState],
        operation: &'static str,
    ) -> BatchResult<()> {
        let state = handle.state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(BatchError::InvalidState {
                batch: handle.id,
                state,
                operation,
            })
        }
    }

    /// Persist and apply a batch state change. The caller holds the
    /// handle's control lock.
    fn transition(
        &self,
        handle: &BatchHandle,
        to: BatchState,
        also: impl FnOnce(&mut BatchRun),
    ) -> BatchResult<()> {
        let now = Timestamp::now();
        let record = handle.record(&handle.lock(), to, now);
        self.repository.save_batch(&record)?;
        {
            let mut run = handle.lock();
            run.state = to;
            run.updated_at = now;
            also(&mut run);
            handle.publish(&run);
        }
        self.emit(BatchEvent::BatchStateChanged {
            batch_id: handle.id,
            state: to,
        });
        Ok(())
    }
}

/// Drives batches of SIPs through the ingest pipeline.
///
/// Each SIP becomes a [`SipUnit`] that runs IDENTIFY, VALIDATE, FIXITY,
/// VERSION and STORE in order. Units of a running batch execute
/// concurrently, bounded by `workers`. Suspension and cancellation are
/// cooperative: a unit looks at the batch state between stages, so a
/// stage in progress always finishes (or fully rolls back) first.
///
/// Cloning is cheap; clones share all batches.
#[derive(Clone)]
pub struct BatchCoordinator {
    inner: Arc<Inner>,
}

impl BatchCoordinator {
    pub fn new(config: IngestConfig, parts: Collaborators) -> Self {
        let engine = DigestEngine::new();
        let verifier = Arc::new(FixityVerifier::new(
            engine.clone(),
            Arc::clone(&parts.aggregator),
            Arc::clone(&parts.repository),
        ));
        let pipeline = Pipeline {
            identifier: parts.identifier,
            validator: parts.validator,
            verifier,
            allocator: AipVersionAllocator::new(Arc::clone(&parts.repository)),
            aggregator: parts.aggregator,
            engine,
            algorithm: config.digest_algorithm,
            fail_on_submitted_mismatch: config.fail_on_submitted_mismatch,
            max_package_bytes: config.max_package_bytes,
        };
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                repository: parts.repository,
                pipeline,
                batches: RwLock::new(HashMap::new()),
                events,
            }),
        }
    }

    /// Coordinator with an in-memory repository, the configured storage
    /// nodes and signature database, and the structural validator.
    pub fn from_config(config: IngestConfig) -> BatchResult<Self> {
        config.validate()?;
        let aggregator = Arc::new(config.build_aggregator()?);
        let identifier = FormatIdentifier::from_config(config.signature_db.as_deref())?;
        let validator = Arc::new(StructureValidator {
            reject_unknown_formats: config.reject_unknown_formats,
        });
        let parts = Collaborators {
            repository: Arc::new(InMemoryRepository::new()),
            aggregator,
            identifier,
            validator,
        };
        Ok(Self::new(config, parts))
    }

    pub fn config(&self) -> &IngestConfig {
        &self.inner.config
    }

    pub fn repository(&self) -> &Arc<dyn IngestRepository> {
        &self.inner.repository
    }

    pub fn aggregator(&self) -> &Arc<StorageStateAggregator> {
        &self.inner.pipeline.aggregator
    }

    pub fn verifier(&self) -> &FixityVerifier {
        &self.inner.pipeline.verifier
    }

    /// Register a batch in NEW with its SIPs in the given order.
    pub fn create_batch(&self, sips: Vec<(SipId, PathBuf)>) -> BatchResult<BatchId> {
        if sips.is_empty() {
            return Err(BatchError::Validation("a batch needs at least one SIP".into()));
        }
        let mut seen = HashSet::new();
        for (sip_id, _) in &sips {
            if !seen.insert(sip_id) {
                return Err(BatchError::Duplicate(sip_id.clone()));
            }
        }

        let batch_id = BatchId::new();
        for (sip_id, source) in &sips {
            self.inner
                .repository
                .save_sip(&SipRecord::new(sip_id.clone(), batch_id, source.clone()))?;
        }
        let units: Vec<SipUnit> = sips
            .into_iter()
            .map(|(sip_id, source)| SipUnit::new(sip_id, source))
            .collect();
        let handle = Arc::new(BatchHandle::new(batch_id, units));
        let record = handle.record(&handle.lock(), BatchState::New, handle.created_at);
        self.inner.repository.save_batch(&record)?;

        info!(batch = %batch_id, sips = record.sips.len(), "batch created");
        self.inner
            .batches
            .write()
            .expect("batch table poisoned")
            .insert(batch_id, handle);
        self.inner.emit(BatchEvent::BatchStateChanged {
            batch_id,
            state: BatchState::New,
        });
        Ok(batch_id)
    }

    /// One SIP per entry of `root`, in sorted name order. Hidden entries
    /// are skipped.
    pub fn create_batch_from_dir(&self, root: &Path) -> BatchResult<BatchId> {
        let entries = std::fs::read_dir(root).map_err(|e| BatchError::io(root, e))?;
        let mut sips = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| BatchError::io(root, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let sip_id = SipId::new(name).map_err(|e| BatchError::Validation(e.to_string()))?;
            sips.push((sip_id, entry.path()));
        }
        sips.sort_by(|a, b| a.0.cmp(&b.0));
        self.create_batch(sips)
    }

    /// NEW to RUNNING, behind the storage admission gate.
    pub async fn start(&self, batch_id: BatchId) -> BatchResult<()> {
        let handle = self.inner.handle(batch_id)?;
        let _control = handle.control.lock().await;
        self.inner.expect_state(&handle, &[BatchState::New], "start")?;

        let storage = self.inner.pipeline.aggregator.aggregate_all().await;
        let min_free = self.inner.config.min_free_bytes;
        if !storage.admits(min_free) {
            warn!(
                batch = %batch_id,
                free = storage.free_bytes,
                min_free,
                running = storage.running,
                unreachable = ?storage.unreachable,
                "storage admission refused"
            );
            return Err(BatchError::InsufficientStorage {
                free_bytes: storage.free_bytes,
                required_bytes: min_free,
                running: storage.running,
            });
        }

        self.inner
            .transition(&handle, BatchState::Running, |run| run.dispatching = true)?;
        info!(batch = %batch_id, "batch started");
        tokio::spawn(drive(Arc::clone(&self.inner), handle.clone()));
        Ok(())
    }

    /// RUNNING to SUSPENDED. In-flight units stop at their next stage
    /// boundary.
    pub async fn suspend(&self, batch_id: BatchId) -> BatchResult<()> {
        let handle = self.inner.handle(batch_id)?;
        let _control = handle.control.lock().await;
        self.inner
            .expect_state(&handle, &[BatchState::Running], "suspend")?;
        self.inner.transition(&handle, BatchState::Suspended, |_| {})?;
        info!(batch = %batch_id, "batch suspended");
        Ok(())
    }

    /// SUSPENDED to RUNNING. Dispatch picks up pending units in their
    /// original order.
    pub async fn resume(&self, batch_id: BatchId) -> BatchResult<()> {
        let handle = self.inner.handle(batch_id)?;
        let _control = handle.control.lock().await;
        self.inner
            .expect_state(&handle, &[BatchState::Suspended], "resume")?;

        let mut spawn_driver = false;
        self.inner.transition(&handle, BatchState::Running, |run| {
            if !run.dispatching {
                run.dispatching = true;
                spawn_driver = true;
            }
        })?;
        info!(batch = %batch_id, "batch resumed");
        if spawn_driver {
            tokio::spawn(drive(Arc::clone(&self.inner), handle.clone()));
        } else {
            handle.wake.notify_one();
        }
        Ok(())
    }

    /// RUNNING or SUSPENDED to CANCELED. Canceling a canceled batch is a
    /// no-op.
    ///
    /// Parked units that already made progress fail immediately; units
    /// still running fail at their next stage boundary. Units that never
    /// started stay pending.
    pub async fn cancel(&self, batch_id: BatchId) -> BatchResult<()> {
        let handle = self.inner.handle(batch_id)?;
        let _control = handle.control.lock().await;
        if handle.state() == BatchState::Canceled {
            return Ok(());
        }
        self.inner.expect_state(
            &handle,
            &[BatchState::Running, BatchState::Suspended],
            "cancel",
        )?;

        let mut aborted = Vec::new();
        self.inner.transition(&handle, BatchState::Canceled, |run| {
            for unit in run.units.iter_mut().filter(|u| u.is_parked()) {
                if let Some(stage) = unit.next_stage {
                    unit.fail(stage, CANCELED);
                    aborted.push((unit.sip_id.clone(), stage));
                }
            }
        })?;
        for (sip_id, stage) in aborted {
            self.inner.emit(BatchEvent::UnitFailed {
                batch_id,
                sip_id,
                stage,
                message: CANCELED.to_string(),
            });
        }
        info!(batch = %batch_id, "batch canceled");
        Ok(())
    }

    pub fn status(&self, batch_id: BatchId) -> BatchResult<BatchSnapshot> {
        Ok(self.inner.handle(batch_id)?.snapshot())
    }

    /// Snapshots of every batch, oldest first.
    pub fn list_batches(&self) -> Vec<BatchSnapshot> {
        let handles: Vec<Arc<BatchHandle>> = self
            .inner
            .batches
            .read()
            .expect("batch table poisoned")
            .values()
            .cloned()
            .collect();
        let mut snapshots: Vec<BatchSnapshot> = handles.iter().map(|h| h.snapshot()).collect();
        snapshots.sort_by_key(|s| s.batch_id);
        snapshots
    }

    /// Resolve once the batch is settled (see [`BatchSnapshot::is_settled`]).
    pub async fn wait(&self, batch_id: BatchId) -> BatchResult<BatchSnapshot> {
        let handle = self.inner.handle(batch_id)?;
        let mut snapshots = handle.snapshots.subscribe();
        let settled = snapshots
            .wait_for(BatchSnapshot::is_settled)
            .await
            .map_err(|_| BatchError::Task("batch state channel closed".into()))?
            .clone();
        Ok(settled)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.inner.events.subscribe()
    }

    /// Current aggregated health of every configured storage node.
    pub async fn storage_state(&self) -> AggregatedStorageState {
        self.inner.pipeline.aggregator.aggregate_all().await
    }

    /// Cross-check all replicas of a SIP's latest stored AIP.
    pub async fn aggregated_fixity(&self, sip_id: &SipId) -> BatchResult<FixityResult> {
        Ok(self.inner.pipeline.verifier.aggregated_fixity(sip_id).await?)
    }
}

impl std::fmt::Debug for BatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let batches = self.inner.batches.read().expect("batch table poisoned").len();
        f.debug_struct("BatchCoordinator")
            .field("workers", &self.inner.config.workers)
            .field("batches", &batches)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Dispatch loop of one batch. Exactly one runs per batch at a time.
///
/// Free worker slots are refilled whenever a unit returns or the batch is
/// resumed; a round ends once nothing is in flight.
async fn drive(inner: Arc<Inner>, handle: Arc<BatchHandle>) {
    let permits = Arc::new(Semaphore::new(inner.config.workers.max(1)));
    debug!(batch = %handle.id, workers = inner.config.workers, "dispatch loop started");
    loop {
        let mut units = JoinSet::new();
        loop {
            while let Ok(permit) = Arc::clone(&permits).try_acquire_owned() {
                let Some(index) = handle.claim_next(&inner) else {
                    break;
                };
                let inner = Arc::clone(&inner);
                let handle = Arc::clone(&handle);
                units.spawn(async move {
                    let _permit = permit;
                    run_unit(&inner, &handle, index).await;
                });
            }
            if units.is_empty() {
                break;
            }
            tokio::select! {
                Some(joined) = units.join_next() => {
                    if let Err(e) = joined {
                        error!(batch = %handle.id, error = %e, "unit task aborted");
                    }
                }
                () = handle.wake.notified() => {}
            }
        }
        if !finish_round(&inner, &handle).await {
            break;
        }
    }
    debug!(batch = %handle.id, "dispatch loop stopped");
}

async fn run_unit(inner: &Inner, handle: &BatchHandle, index: usize) {
    let canceled = || handle.state() == BatchState::Canceled;
    while let Some((stage, mut work)) = handle.checkpoint(inner, index) {
        let outcome = inner.pipeline.run(stage, &mut work, &canceled).await;
        match handle.complete_stage(inner, index, stage, work.outputs, outcome) {
            StageEnd::Continue => continue,
            StageEnd::Stored => {
                if let Some(result) = inner.pipeline.replica_check(&work.sip_id).await {
                    handle.record_replica_check(inner, index, result);
                }
                break;
            }
            StageEnd::Stopped => break,
        }
    }
    handle.release();
}

/// Called once every unit of a round has returned. Returns `true` if the
/// loop should dispatch again.
async fn finish_round(inner: &Inner, handle: &BatchHandle) -> bool {
    let _control = handle.control.lock().await;
    let completed = {
        let mut run = handle.lock();
        run.in_flight = 0;
        // A unit still mid-stage here had its task panic.
        for unit in run.units.iter_mut().filter(|u| u.state.is_active()) {
            let stage = unit.next_stage.unwrap_or(Stage::Store);
            unit.fail(stage, "unit task aborted");
        }
        if run.state == BatchState::Running
            && run.units.iter().any(|u| u.state == UnitState::Pending)
        {
            handle.publish(&run);
            return true;
        }
        let completed = run.state == BatchState::Running;
        if completed {
            run.state = BatchState::Completed;
            run.updated_at = Timestamp::now();
        }
        run.dispatching = false;
        if !completed {
            handle.publish(&run);
        }
        completed.then(|| (handle.record(&run, run.state, run.updated_at), counts(&run.units)))
    };

    // Completion becomes visible to waiters only once it is persisted.
    if let Some((record, (done, failed))) = completed {
        if let Err(e) = inner.repository.save_batch(&record) {
            error!(batch = %handle.id, error = %e, "failed to persist batch completion");
        }
        handle.publish(&handle.lock());
        inner.emit(BatchEvent::BatchStateChanged {
            batch_id: handle.id,
            state: BatchState::Completed,
        });
        info!(batch = %handle.id, done, failed, "batch completed");
    }
    false
}

fn counts(units: &[SipUnit]) -> (usize, usize) {
    let done = units.iter().filter(|u| u.state == UnitState::Done).count();
    let failed = units.iter().filter(|u| u.state == UnitState::Failed).count();
    (done, failed)
}
