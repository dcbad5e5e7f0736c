//! The admission loop
//!
//! One cooperatively scheduled cycle at a time: snapshot the cache, pull
//! the per-queue heads in a fair interleaving, assign flavors, plan
//! preemption when the request does not fit, and commit decisions through
//! conditional object writes. The loop is event-driven with a minimum
//! inter-cycle backoff and a maximum idle interval.

use crate::cache::{AdmittedWorkload, Cache, Snapshot};
use crate::client::{ClientError, EventRecorder, ObjectStore, RateLimits};
use crate::flavor_assigner::{self, AssignmentOutcome};
use crate::preemption::Planner;
use crate::queue::Manager;
use crate::workload::{WorkloadInfo, WorkloadKey};
use batchgate_api::{Admission, QueueingStrategy};
use batchgate_config::ControllerConfig;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, instrument, warn};

const ADMISSIONS_TOTAL: &str = "batchgate_admissions_total";
const PREEMPTIONS_TOTAL: &str = "batchgate_preemptions_total";
const EVICTIONS_TOTAL: &str = "batchgate_evictions_total";
const CYCLE_SECONDS: &str = "batchgate_cycle_seconds";

/// Eviction reason written when a preemption plan fires
const REASON_PREEMPTED: &str = "Preempted";
/// Eviction reason written on a pods-ready timeout
const REASON_PODS_READY_TIMEOUT: &str = "PodsReadyTimeout";

/// Scheduler cadence and gating knobs
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Minimum gap between cycles
    pub cycle_backoff: Duration,
    /// Maximum idle gap before a cycle runs anyway
    pub idle_interval: Duration,
    /// Gate successor admissions on prior admissions reaching PodsReady
    pub wait_for_pods_ready: bool,
    /// Evict admitted workloads not ready within this horizon
    pub pods_ready_timeout: chrono::Duration,
}

impl From<&ControllerConfig> for SchedulerConfig {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            cycle_backoff: Duration::from_millis(config.scheduler.cycle_backoff_ms),
            idle_interval: Duration::from_millis(config.scheduler.idle_interval_ms),
            wait_for_pods_ready: config.wait_for_pods_ready.enable,
            pods_ready_timeout: chrono::Duration::seconds(
                config.wait_for_pods_ready.timeout_secs as i64,
            ),
        }
    }
}

/// What one cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Workloads admitted
    pub admitted: usize,
    /// Victims evicted for preemption
    pub preempted: usize,
    /// Workloads evicted on pods-ready timeout
    pub evicted: usize,
    /// Candidates that stayed pending
    pub skipped: usize,
}

enum Flow {
    /// Keep taking candidates from this queue
    Continue,
    /// Stop offering this queue for the rest of the cycle
    Suppress,
}

/// The cycle driver
pub struct Scheduler {
    cache: Arc<Cache>,
    queues: Arc<Manager>,
    store: Arc<dyn ObjectStore>,
    recorder: Arc<dyn EventRecorder>,
    limits: RateLimits,
    config: SchedulerConfig,
    wake: Arc<Notify>,
    stopping: AtomicBool,
    /// Serializes cycles; only one runs at a time
    cycle_gate: tokio::sync::Mutex<()>,
    /// Pending workloads whose preemption victims are not yet observed
    /// gone: key → (cluster queue, victim locations)
    awaiting_preemption: Mutex<HashMap<WorkloadKey, AwaitedVictims>>,
    /// Fingerprints of the last reported statuses, to skip no-op writes
    reported: Mutex<HashMap<String, String>>,
}

struct AwaitedVictims {
    cluster_queue: String,
    victims: Vec<(String, WorkloadKey)>,
}

impl Scheduler {
    pub fn new(
        cache: Arc<Cache>,
        queues: Arc<Manager>,
        store: Arc<dyn ObjectStore>,
        recorder: Arc<dyn EventRecorder>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            cache,
            queues,
            store,
            recorder,
            limits: RateLimits::new(
                config.client_connection.qps,
                config.client_connection.burst,
            ),
            config: SchedulerConfig::from(config),
            wake: Arc::new(Notify::new()),
            stopping: AtomicBool::new(false),
            cycle_gate: tokio::sync::Mutex::new(()),
            awaiting_preemption: Mutex::new(HashMap::new()),
            reported: Mutex::new(HashMap::new()),
        }
    }

    /// Handle event sources use to wake the loop
    pub fn waker(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    /// Drive cycles until the shutdown signal flips
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            backoff_ms = self.config.cycle_backoff.as_millis() as u64,
            idle_ms = self.config.idle_interval.as_millis() as u64,
            "scheduler running"
        );
        let mut idle = tokio::time::interval(self.config.idle_interval);
        idle.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = idle.tick() => {}
                changed = shutdown.changed() => {
                    let stop = changed.is_err() || *shutdown.borrow();
                    if stop {
                        self.stopping.store(true, Ordering::Relaxed);
                        break;
                    }
                    continue;
                }
            }
            // Coalesce bursts of events into one cycle.
            tokio::time::sleep(self.config.cycle_backoff).await;
            self.schedule_cycle().await;
        }
        info!("scheduler stopped");
    }

    /// Run one admission cycle
    #[instrument(skip_all)]
    pub async fn schedule_cycle(&self) -> CycleStats {
        let _gate = self.cycle_gate.lock().await;
        let started = std::time::Instant::now();
        let mut stats = CycleStats::default();

        // Expired assumes return to pending before anything else.
        let (cycle, expired) = self.cache.advance_cycle();
        for info in expired {
            self.queues.requeue(info, false);
        }

        if self.config.wait_for_pods_ready {
            stats.evicted = self.evict_ready_timeouts().await;
        }

        let mut snapshot = self.cache.snapshot();
        let unblocked = self.prune_awaiting(&snapshot);

        let mut lists = self.queues.heads();
        // Queues whose preemption victims were just observed gone go first,
        // so the freed quota reaches the workload it was freed for before
        // the evicted victims line up to take it back.
        if !unblocked.is_empty() {
            lists.sort_by_key(|list| !unblocked.contains(&list.cluster_queue));
        }
        let mut suppressed = vec![false; lists.len()];

        // Fair interleaving: one candidate per queue per round.
        let mut aborted = false;
        'cycle: loop {
            let mut progressed = false;
            for (index, list) in lists.iter_mut().enumerate() {
                if suppressed[index] {
                    continue;
                }
                let Some(candidate) = list.workloads.pop_front() else {
                    continue;
                };
                progressed = true;
                if self.stopping.load(Ordering::Relaxed) {
                    // Abort at the candidate boundary; nothing half-done.
                    self.queues.requeue(candidate, false);
                    aborted = true;
                    break 'cycle;
                }
                let flow = self
                    .process_candidate(
                        &mut snapshot,
                        &list.cluster_queue,
                        list.strategy,
                        candidate,
                        &mut stats,
                    )
                    .await;
                if matches!(flow, Flow::Suppress) {
                    suppressed[index] = true;
                }
            }
            if !progressed {
                break;
            }
        }

        // Unattempted candidates go straight back to their heaps.
        for list in lists {
            for info in list.workloads {
                self.queues.requeue(info, false);
            }
        }

        if !aborted {
            self.report_statuses().await;
        }

        metrics::histogram!(CYCLE_SECONDS).record(started.elapsed().as_secs_f64());
        debug!(
            cycle,
            admitted = stats.admitted,
            preempted = stats.preempted,
            evicted = stats.evicted,
            skipped = stats.skipped,
            "cycle finished"
        );
        stats
    }

    async fn process_candidate(
        &self,
        snapshot: &mut Snapshot,
        cq_name: &str,
        strategy: QueueingStrategy,
        info: WorkloadInfo,
        stats: &mut CycleStats,
    ) -> Flow {
        let key = info.key();
        let strict = strategy == QueueingStrategy::StrictFIFO;

        // Recheck eligibility against the snapshot; the heap may be stale.
        let outcome = {
            let Some(cq) = snapshot.cluster_queue(cq_name) else {
                self.queues.requeue(info, false);
                return Flow::Suppress;
            };
            if !cq.active {
                self.queues.requeue(info, false);
                return Flow::Suppress;
            }
            if self.config.wait_for_pods_ready
                && cq.admitted.values().any(|aw| !aw.info.workload.pods_ready())
            {
                // The queue waits for its last admission to become ready.
                self.queues.requeue(info, false);
                return Flow::Suppress;
            }
            if self.awaiting_preemption.lock().contains_key(&key) {
                self.queues.requeue(info, false);
                return if strict { Flow::Suppress } else { Flow::Continue };
            }
            flavor_assigner::assign(snapshot, cq, &info)
        };

        match outcome {
            AssignmentOutcome::Assigned(assignment) => {
                let admission = Admission {
                    cluster_queue: cq_name.to_string(),
                    pod_set_assignments: assignment.pod_sets,
                };
                self.admit(snapshot, cq_name, info, admission, strict, stats)
                    .await
            }
            AssignmentOutcome::NeedsPreemption(assignment) => {
                match Planner::plan(snapshot, cq_name, &info, &assignment.amounts) {
                    Some(victims) if !victims.is_empty() => {
                        let mut evicted = Vec::new();
                        for victim in &victims {
                            let victim_key = victim.info.key();
                            self.limits.acquire().await;
                            let write = self
                                .store
                                .clear_admission(
                                    &victim_key,
                                    victim.info.workload.resource_version,
                                    REASON_PREEMPTED,
                                )
                                .await;
                            match write {
                                Ok(()) => {
                                    self.recorder.preempted(&victim_key, &key);
                                    metrics::counter!(PREEMPTIONS_TOTAL).increment(1);
                                    stats.preempted += 1;
                                    evicted.push((victim.cluster_queue.clone(), victim_key));
                                }
                                Err(err) => {
                                    // The plan is recomputed next cycle.
                                    warn!(victim = %victim_key, %err, "eviction write failed");
                                }
                            }
                        }
                        if !evicted.is_empty() {
                            self.awaiting_preemption.lock().insert(
                                key,
                                AwaitedVictims {
                                    cluster_queue: cq_name.to_string(),
                                    victims: evicted,
                                },
                            );
                        }
                        // Not admitted yet; reconsidered once victims are
                        // observed gone. Snapshot usage stays untouched.
                        self.queues.requeue(info, false);
                        if strict {
                            Flow::Suppress
                        } else {
                            Flow::Continue
                        }
                    }
                    Some(_) => {
                        // The request fits after all; retry next cycle.
                        self.queues.requeue(info, false);
                        if strict {
                            Flow::Suppress
                        } else {
                            Flow::Continue
                        }
                    }
                    None => self.reject(info, cq_name, "preemption infeasible", strict, stats),
                }
            }
            AssignmentOutcome::NoFit { reason } => {
                self.reject(info, cq_name, &reason, strict, stats)
            }
        }
    }

    /// Commit one admission: assume, charge the snapshot, write
    async fn admit(
        &self,
        snapshot: &mut Snapshot,
        cq_name: &str,
        info: WorkloadInfo,
        admission: Admission,
        strict: bool,
        stats: &mut CycleStats,
    ) -> Flow {
        let key = info.key();
        if let Err(err) = self.cache.assume_workload(info.clone(), &admission) {
            warn!(workload = %key, %err, "assume failed");
            self.queues.requeue(info, false);
            return if strict { Flow::Suppress } else { Flow::Continue };
        }

        // Later candidates this cycle must see the consumed quota.
        let mut charged = info.clone();
        charged.workload.status.admission = Some(admission.clone());
        snapshot.add_admitted(
            cq_name,
            AdmittedWorkload {
                usage: AdmittedWorkload::usage_of(&admission),
                info: charged,
                admitted_at: Utc::now(),
                assumed: true,
            },
        );

        self.limits.acquire().await;
        let write = self
            .store
            .apply_admission(&key, info.workload.resource_version, admission)
            .await;
        match write {
            Ok(()) => {
                self.recorder.admitted(&key, cq_name);
                metrics::counter!(ADMISSIONS_TOTAL).increment(1);
                stats.admitted += 1;
                Flow::Continue
            }
            Err(err @ ClientError::Unavailable(_)) => {
                // Transient store trouble: the assume and the snapshot
                // charge stay in place until the next observation or the
                // assume horizon, and the write is retried from there.
                warn!(workload = %key, %err, "admission write failed; assume kept for retry");
                if strict {
                    Flow::Suppress
                } else {
                    Flow::Continue
                }
            }
            Err(err) => {
                // Conflict or vanished object: the snapshot is stale for
                // this workload. Roll the assume back, no partial commit.
                warn!(workload = %key, %err, "admission write failed; rolled back");
                self.cache.forget_workload(&key);
                snapshot.remove_admitted(cq_name, &key);
                self.queues.requeue(info, false);
                if strict {
                    Flow::Suppress
                } else {
                    Flow::Continue
                }
            }
        }
    }

    /// A candidate that stays pending this cycle
    fn reject(
        &self,
        info: WorkloadInfo,
        cq_name: &str,
        reason: &str,
        strict: bool,
        stats: &mut CycleStats,
    ) -> Flow {
        let key = info.key();
        // One event per (cycle, workload): each candidate is processed at
        // most once per cycle.
        self.recorder.quota_exhausted(&key, cq_name, reason);
        stats.skipped += 1;
        if strict {
            // Head-of-line blocking: the queue yields nothing more.
            self.queues.requeue(info, false);
            Flow::Suppress
        } else {
            self.queues.requeue(info, true);
            Flow::Continue
        }
    }

    /// Evict admitted workloads whose pods never became ready
    async fn evict_ready_timeouts(&self) -> usize {
        let mut evicted = 0;
        for victim in self.cache.pods_ready_timeouts(self.config.pods_ready_timeout) {
            let key = victim.key();
            self.limits.acquire().await;
            let write = self
                .store
                .clear_admission(
                    &key,
                    victim.workload.resource_version,
                    REASON_PODS_READY_TIMEOUT,
                )
                .await;
            match write {
                Ok(()) => {
                    warn!(workload = %key, "evicted after pods-ready timeout");
                    metrics::counter!(EVICTIONS_TOTAL).increment(1);
                    evicted += 1;
                }
                Err(err) => warn!(workload = %key, %err, "timeout eviction write failed"),
            }
        }
        evicted
    }

    /// Drop awaiting-preemption entries whose victims are gone or whose
    /// workload is no longer pending
    ///
    /// Returns the queues whose waiting workload just became attemptable.
    fn prune_awaiting(&self, snapshot: &Snapshot) -> Vec<String> {
        let mut unblocked = Vec::new();
        self.awaiting_preemption.lock().retain(|key, awaited| {
            if !self.queues.contains(&awaited.cluster_queue, key) {
                return false;
            }
            let victims_left = awaited.victims.iter().any(|(cq, victim)| {
                snapshot
                    .cluster_queue(cq)
                    .is_some_and(|cq| cq.admitted.contains_key(victim))
            });
            if !victims_left {
                unblocked.push(awaited.cluster_queue.clone());
            }
            victims_left
        });
        unblocked
    }

    /// Report ClusterQueue and LocalQueue statuses that changed
    async fn report_statuses(&self) {
        let snapshot = self.cache.snapshot();
        for name in snapshot.cluster_queue_names() {
            let pending = self.queues.pending_count(&name);
            let Ok(status) = self.cache.cluster_queue_status(&name, pending) else {
                continue;
            };
            if !self.status_changed(&format!("cq/{name}"), &fingerprint_cq(&status)) {
                continue;
            }
            self.limits.acquire().await;
            if let Err(err) = self.store.patch_cluster_queue_status(&name, status).await {
                warn!(cluster_queue = %name, %err, "status write failed");
            }
        }
        for lq in self.cache.local_queues() {
            let pending = self.queues.pending_count_for(&lq);
            let status = self.cache.local_queue_status(&lq, pending);
            let key = lq.key();
            let print = format!("{}/{}", status.pending_workloads, status.admitted_workloads);
            if !self.status_changed(&format!("lq/{key}"), &print) {
                continue;
            }
            self.limits.acquire().await;
            if let Err(err) = self.store.patch_local_queue_status(&key, status).await {
                warn!(local_queue = %key, %err, "status write failed");
            }
        }
    }

    fn status_changed(&self, key: &str, fingerprint: &str) -> bool {
        let mut reported = self.reported.lock();
        match reported.get(key) {
            Some(previous) if previous == fingerprint => false,
            _ => {
                reported.insert(key.to_string(), fingerprint.to_string());
                true
            }
        }
    }
}

/// Status identity ignoring condition transition timestamps
fn fingerprint_cq(status: &batchgate_api::ClusterQueueStatus) -> String {
    let conditions: Vec<String> = status
        .conditions
        .iter()
        .map(|c| format!("{:?}={}:{}", c.type_, c.status, c.reason))
        .collect();
    format!(
        "{}/{}/{:?}/{}",
        status.pending_workloads,
        status.admitted_workloads,
        status
            .flavors_usage
            .iter()
            .map(|fu| {
                let resources: Vec<String> = fu
                    .resources
                    .iter()
                    .map(|r| format!("{}={}+{}", r.name, r.total, r.borrowed))
                    .collect();
                format!("{}:{}", fu.name, resources.join(","))
            })
            .collect::<Vec<_>>(),
        conditions.join(";")
    )
}
