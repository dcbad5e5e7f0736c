//! End-to-end admission scenarios against the full core
//!
//! Each test wires the real Cache, Queue Manager, Preemption Planner, and
//! Scheduler to the in-memory object store and drives whole cycles,
//! observing writes back through the event handlers.

mod support;

use batchgate_api::{
    condition::{self, Condition, ConditionType},
    PreemptionPolicy, Quantity, QueueingStrategy, ReclaimPolicy, WithinQueuePolicy,
};
use batchgate_config::ControllerConfig;
use support::{cpu_queue, cpu_workload, never_preempts, Harness};

#[tokio::test]
async fn test_basic_admit() {
    let h = Harness::default_setup();
    h.add_flavor("x");
    h.add_cluster_queue(cpu_queue(
        "a",
        None,
        10,
        QueueingStrategy::BestEffortFIFO,
        never_preempts(),
    ));
    h.add_local_queue("default", "main", "a");

    h.submit(cpu_workload("w1", "main", 0, 4, 0));
    let stats = h.cycle().await;

    assert_eq!(stats.admitted, 1);
    assert_eq!(h.usage_of("a", "x", "cpu"), Quantity::from_units(4));
    let status = h
        .cache
        .cluster_queue_status("a", h.queues.pending_count("a"))
        .unwrap();
    assert_eq!(status.pending_workloads, 0);
    assert_eq!(status.admitted_workloads, 1);
}

#[tokio::test]
async fn test_admission_event_replay_is_idempotent() {
    let h = Harness::default_setup();
    h.add_flavor("x");
    h.add_cluster_queue(cpu_queue(
        "a",
        None,
        10,
        QueueingStrategy::BestEffortFIFO,
        never_preempts(),
    ));
    h.add_local_queue("default", "main", "a");

    h.submit(cpu_workload("w1", "main", 0, 4, 0));
    h.cycle().await;

    // The watch stream may deliver the same admission many times.
    h.pump();
    h.pump();
    assert_eq!(h.usage_of("a", "x", "cpu"), Quantity::from_units(4));
    let status = h.cache.cluster_queue_status("a", 0).unwrap();
    assert_eq!(status.admitted_workloads, 1);
}

#[tokio::test]
async fn test_borrow_from_idle_cohort_peer() {
    let h = Harness::default_setup();
    h.add_flavor("x");
    h.add_cluster_queue(cpu_queue(
        "a",
        Some("c"),
        10,
        QueueingStrategy::BestEffortFIFO,
        never_preempts(),
    ));
    h.add_cluster_queue(cpu_queue(
        "b",
        Some("c"),
        10,
        QueueingStrategy::BestEffortFIFO,
        never_preempts(),
    ));
    h.add_local_queue("default", "qa", "a");

    // 15 cpu exceeds a's nominal 10 but fits the cohort pool of 20.
    h.submit(cpu_workload("w1", "qa", 0, 15, 0));
    let stats = h.cycle().await;

    assert_eq!(stats.admitted, 1);
    assert_eq!(h.usage_of("a", "x", "cpu"), Quantity::from_units(15));
    assert_eq!(h.borrowed_of("a", "x", "cpu"), Quantity::from_units(5));
}

#[tokio::test]
async fn test_reclaim_nominal_quota_from_borrowing_peer() {
    let h = Harness::default_setup();
    h.add_flavor("x");
    h.add_cluster_queue(cpu_queue(
        "a",
        Some("c"),
        10,
        QueueingStrategy::BestEffortFIFO,
        never_preempts(),
    ));
    h.add_cluster_queue(cpu_queue(
        "b",
        Some("c"),
        10,
        QueueingStrategy::BestEffortFIFO,
        PreemptionPolicy {
            reclaim_within_cohort: ReclaimPolicy::Any,
            within_cluster_queue: WithinQueuePolicy::Never,
        },
    ));
    h.add_local_queue("default", "qa", "a");
    h.add_local_queue("default", "qb", "b");

    // a borrows 5 over nominal.
    h.submit(cpu_workload("borrower", "qa", 0, 15, 60));
    h.cycle().await;
    assert_eq!(h.borrowed_of("a", "x", "cpu"), Quantity::from_units(5));

    // b wants its nominal back; the borrower must be evicted first.
    h.submit(cpu_workload("reclaimer", "qb", 0, 10, 0));
    let first = h.cycle().await;
    assert_eq!(first.admitted, 0);
    assert_eq!(first.preempted, 1);

    // Victims observed gone; the reclaimer lands next cycle.
    let second = h.cycle().await;
    assert_eq!(second.admitted, 1);
    assert!(h.usage_of("a", "x", "cpu") <= Quantity::from_units(10));
    assert_eq!(h.usage_of("b", "x", "cpu"), Quantity::from_units(10));
}

#[tokio::test]
async fn test_strict_fifo_head_blocks_successors() {
    let h = Harness::default_setup();
    h.add_flavor("x");
    h.add_cluster_queue(cpu_queue(
        "a",
        None,
        10,
        QueueingStrategy::StrictFIFO,
        never_preempts(),
    ));
    h.add_local_queue("default", "main", "a");

    h.submit(cpu_workload("w1", "main", 0, 8, 300));
    let stats = h.cycle().await;
    assert_eq!(stats.admitted, 1);

    // The older w3 heads the queue and does not fit; w2 must wait even
    // though 2 cpu are free.
    h.submit(cpu_workload("w3", "main", 0, 4, 200));
    h.submit(cpu_workload("w2", "main", 0, 2, 100));
    let stats = h.cycle().await;

    assert_eq!(stats.admitted, 0);
    assert_eq!(h.usage_of("a", "x", "cpu"), Quantity::from_units(8));
    assert_eq!(h.queues.pending_count("a"), 2);
}

#[tokio::test]
async fn test_best_effort_fifo_passes_blocked_head() {
    let h = Harness::default_setup();
    h.add_flavor("x");
    h.add_cluster_queue(cpu_queue(
        "a",
        None,
        10,
        QueueingStrategy::BestEffortFIFO,
        never_preempts(),
    ));
    h.add_local_queue("default", "main", "a");

    h.submit(cpu_workload("w1", "main", 0, 8, 300));
    h.cycle().await;

    // The 5-cpu head is skipped; the 2-cpu successor admits this cycle.
    h.submit(cpu_workload("w5", "main", 0, 5, 200));
    h.submit(cpu_workload("w2", "main", 0, 2, 100));
    let stats = h.cycle().await;

    assert_eq!(stats.admitted, 1);
    assert_eq!(h.usage_of("a", "x", "cpu"), Quantity::from_units(10));
    assert_eq!(h.queues.pending_count("a"), 1);
}

#[tokio::test]
async fn test_within_queue_preemption_replaces_lower_priority() {
    let h = Harness::default_setup();
    h.add_flavor("x");
    h.add_cluster_queue(cpu_queue(
        "a",
        None,
        10,
        QueueingStrategy::BestEffortFIFO,
        PreemptionPolicy {
            reclaim_within_cohort: ReclaimPolicy::Never,
            within_cluster_queue: WithinQueuePolicy::LowerPriority,
        },
    ));
    h.add_local_queue("default", "main", "a");

    h.submit(cpu_workload("w-low", "main", 1, 10, 60));
    h.cycle().await;
    assert_eq!(h.usage_of("a", "x", "cpu"), Quantity::from_units(10));

    h.submit(cpu_workload("w-high", "main", 5, 4, 0));
    let first = h.cycle().await;
    assert_eq!(first.preempted, 1);
    assert_eq!(first.admitted, 0);

    let second = h.cycle().await;
    assert_eq!(second.admitted, 1);
    assert_eq!(h.usage_of("a", "x", "cpu"), Quantity::from_units(4));
    // The victim is pending again.
    assert_eq!(h.queues.pending_count("a"), 1);
    let evicted = h.store.workload(&"default/w-low".to_string()).unwrap();
    assert!(!evicted.is_admitted());
    assert!(condition::is_true(
        &evicted.status.conditions,
        ConditionType::Evicted
    ));
}

#[tokio::test]
async fn test_status_round_trip_matches_raw_workloads() {
    let h = Harness::default_setup();
    h.add_flavor("x");
    h.add_cluster_queue(cpu_queue(
        "a",
        Some("c"),
        10,
        QueueingStrategy::BestEffortFIFO,
        never_preempts(),
    ));
    h.add_cluster_queue(cpu_queue(
        "b",
        Some("c"),
        10,
        QueueingStrategy::BestEffortFIFO,
        never_preempts(),
    ));
    h.add_local_queue("default", "qa", "a");

    h.submit(cpu_workload("w1", "qa", 0, 6, 30));
    h.submit(cpu_workload("w2", "qa", 0, 7, 20));
    h.submit(cpu_workload("w3", "qa", 0, 9, 10));
    h.cycle().await;
    h.cycle().await;

    // Recompute from the raw object set: admitted usage per queue must
    // equal the cache's reported totals.
    let mut recomputed = Quantity::ZERO;
    let mut admitted = 0;
    let mut pending = 0;
    for workload in h.store.workloads() {
        if workload.is_admitted() {
            admitted += 1;
            recomputed += workload.total_requests()[&batchgate_api::ResourceName::cpu()];
        } else if !workload.finished {
            pending += 1;
        }
    }
    assert_eq!(h.usage_of("a", "x", "cpu"), recomputed);
    let status = h
        .cache
        .cluster_queue_status("a", h.queues.pending_count("a"))
        .unwrap();
    assert_eq!(status.admitted_workloads, admitted);
    assert_eq!(status.pending_workloads, pending);
}

#[tokio::test]
async fn test_wait_for_pods_ready_gates_successors() {
    let mut config = ControllerConfig::default();
    config.wait_for_pods_ready.enable = true;
    config.wait_for_pods_ready.timeout_secs = 3_600;
    let h = Harness::new(config);
    h.add_flavor("x");
    h.add_cluster_queue(cpu_queue(
        "a",
        None,
        10,
        QueueingStrategy::BestEffortFIFO,
        never_preempts(),
    ));
    h.add_local_queue("default", "main", "a");

    h.submit(cpu_workload("w1", "main", 0, 4, 60));
    let stats = h.cycle().await;
    assert_eq!(stats.admitted, 1);

    // w1 has not reported ready: w2 waits despite free quota.
    h.submit(cpu_workload("w2", "main", 0, 2, 0));
    let stats = h.cycle().await;
    assert_eq!(stats.admitted, 0);
    assert_eq!(h.queues.pending_count("a"), 1);

    // Readiness unblocks the queue.
    let mut w1 = h.store.workload(&"default/w1".to_string()).unwrap();
    condition::upsert(
        &mut w1.status.conditions,
        Condition::new(ConditionType::PodsReady, true, "PodsReady"),
    );
    h.store.put_workload(w1);
    h.pump();

    let stats = h.cycle().await;
    assert_eq!(stats.admitted, 1);
    assert_eq!(h.usage_of("a", "x", "cpu"), Quantity::from_units(6));
}

#[tokio::test]
async fn test_pods_ready_timeout_evicts() {
    let mut config = ControllerConfig::default();
    config.wait_for_pods_ready.enable = true;
    config.wait_for_pods_ready.timeout_secs = 0;
    let h = Harness::new(config);
    h.add_flavor("x");
    h.add_cluster_queue(cpu_queue(
        "a",
        None,
        10,
        QueueingStrategy::BestEffortFIFO,
        never_preempts(),
    ));
    h.add_local_queue("default", "main", "a");

    h.submit(cpu_workload("w1", "main", 0, 4, 60));
    h.cycle().await;
    assert_eq!(h.usage_of("a", "x", "cpu"), Quantity::from_units(4));

    // The zero-second horizon expires immediately; the next cycle evicts.
    let stats = h.cycle().await;
    assert_eq!(stats.evicted, 1);
    assert_eq!(h.usage_of("a", "x", "cpu"), Quantity::ZERO);
    let evicted = h.store.workload(&"default/w1".to_string()).unwrap();
    assert!(!evicted.is_admitted());
}

#[tokio::test]
async fn test_inactive_queue_admits_nothing() {
    let h = Harness::default_setup();
    // No flavor "x" registered: the queue stays inactive.
    h.add_cluster_queue(cpu_queue(
        "a",
        None,
        10,
        QueueingStrategy::BestEffortFIFO,
        never_preempts(),
    ));
    h.add_local_queue("default", "main", "a");

    h.submit(cpu_workload("w1", "main", 0, 1, 0));
    let stats = h.cycle().await;
    assert_eq!(stats.admitted, 0);
    assert_eq!(h.queues.pending_count("a"), 1);

    let status = h
        .cache
        .cluster_queue_status("a", h.queues.pending_count("a"))
        .unwrap();
    let active = condition::find(&status.conditions, ConditionType::Active).unwrap();
    assert!(!active.status);
    assert_eq!(active.reason, "FlavorNotFound");

    // The flavor arriving makes the next cycle admit.
    h.add_flavor("x");
    let stats = h.cycle().await;
    assert_eq!(stats.admitted, 1);
}
