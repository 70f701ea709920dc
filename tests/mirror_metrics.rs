mod common;

use std::collections::HashSet;

use common::{Harness, source_url};
use metrics_util::debugging::DebuggingRecorder;
use wikimirror::domain::pages::SpaceRecord;

#[tokio::test]
async fn mirror_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let harness = Harness::new();
    let healthy = harness.add_page("Home");
    let broken = harness.add_page("Broken");
    harness.fetcher.fail_on(&source_url(&broken));
    harness.seed("Orphan.html", "stale");
    harness.services.scheduler.start();

    harness
        .services
        .reconciler
        .reconcile(&SpaceRecord::global("DOC"))
        .await
        .expect("reconcile");
    harness.drain().await;
    assert!(harness.artifact(&format!("{}.html", healthy.title)).exists());

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "wikimirror_jobs_total",
        "wikimirror_job_ms",
        "wikimirror_fetch_failures_total",
        "wikimirror_pending_keys",
        "wikimirror_orphans_removed_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
