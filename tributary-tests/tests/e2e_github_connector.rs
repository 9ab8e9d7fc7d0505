//! End-to-end batch over the built-in GitHub provider against a fake API

use tributary_core::Provider;
use tributary_runtime::ScriptOutcome;
use tributary_storage::RunStatus;
use tributary_tests::assertions::assert_run_status;
use tributary_tests::{fixtures, MockGithubApi, TestHarness};

fn register_github(harness: &TestHarness) {
    let provider = tributary_connectors::GithubProvider::new().unwrap();
    harness
        .registry
        .register_provider(&provider as &dyn Provider)
        .unwrap();
}

#[tokio::test]
async fn test_github_batch_lands_records() {
    let api = MockGithubApi::start("acme", "api").await;
    let harness = TestHarness::new();
    register_github(&harness);
    let ds = harness.add_data_source(fixtures::data_source::github("acme", &api.uri(), &["api"]));

    let summary = harness.run_batch().await.unwrap();

    assert_eq!(summary.succeeded, 3);
    assert!(!summary.has_failures());
    for script in ["github:repository", "github:commit", "github:issue"] {
        assert_run_status(&harness.storage, ds.id, script, RunStatus::Completed);
    }

    let repos = harness.storage.records(ds.id, "repository");
    assert_eq!(repos.len(), 1);
    assert_eq!(repos[0].external_id, "acme/api");

    let commits: Vec<String> = harness
        .storage
        .records(ds.id, "commit")
        .into_iter()
        .map(|r| r.external_id)
        .collect();
    assert_eq!(commits, vec!["api@a1", "api@b2"]);

    let issues = harness.storage.records(ds.id, "issue");
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].external_id, "api#7");

    // First run is forward-only; the snapshot is fetched once.
    assert_eq!(api.requests_to("").await, 1);
}

#[tokio::test]
async fn test_github_commit_outage_leaves_siblings_intact() {
    let api = MockGithubApi::start_with_commit_status("acme", "api", 502).await;
    let harness = TestHarness::new();
    register_github(&harness);
    let ds = harness.add_data_source(fixtures::data_source::github("acme", &api.uri(), &["api"]));

    let summary = harness.run_batch().await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failures[0].script, "github:commit");
    assert!(summary.failures[0].error.contains("502"));

    let commit = summary
        .scripts
        .iter()
        .find(|s| s.script == "github:commit")
        .unwrap();
    assert_eq!(commit.outcome, "failed");
    assert!(commit.detail.as_deref().unwrap_or_default().contains("502"));

    let run = assert_run_status(&harness.storage, ds.id, "github:commit", RunStatus::Failed);
    assert!(run.last_fetched_data_at.is_none());
    assert_run_status(&harness.storage, ds.id, "github:issue", RunStatus::Completed);
}

#[tokio::test]
async fn test_github_missing_credentials_fail_the_root() {
    let api = MockGithubApi::start("acme", "api").await;
    let harness = TestHarness::new();
    register_github(&harness);
    let ds = harness.add_data_source(
        fixtures::data_source::for_tenant("acme", "github").with_env("GITHUB_API_URL", api.uri()),
    );

    let (report, results, errors) = {
        let provider = tributary_connectors::GithubProvider::new().unwrap();
        harness.run_graph(&ds, provider.scripts()).await
    };
    let report = report.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.upstream_failed, 2);
    assert_eq!(errors.lock().unwrap().len(), 1);
    assert_eq!(api.requests_to("/commits").await, 0);

    let results = results.lock().unwrap();
    let commit = &results[&format!("{}:commit", ds.id)];
    assert!(matches!(commit.outcome, ScriptOutcome::UpstreamFailed { .. }));
}
