mod common;

use std::sync::Arc;

use chrono::NaiveDate;
use common::*;
use qubemesh_e2e::datepicker::DatePickerState;
use qubemesh_e2e::launcher::QubeMesh;
use qubemesh_e2e::report::{FlowState, StepOutcome};
use qubemesh_e2e::scripted::DriverCall;
use qubemesh_e2e::{AgentVariant, ArtifactStore, DiskArtifactStore, Driver, FlowError, RunStatus};

#[tokio::test(start_paused = true)]
async fn agent_one_offboards_first_supplier_with_configured_reason() {
    let driver = driver_with(offboard_app);
    let cfg = config(&[("REASON_OFFBOARD", "Not approved by TPRM")]);

    let report = run(AgentVariant::Agent1, &driver, &cfg, None).await;

    assert!(report.passed(), "{:?}", report.error);
    assert_eq!(report.state, FlowState::ReadyToSubmit);
    assert_eq!(fills(&driver), vec![("prompt".to_string(), "Hello from qubemesh-e2e".to_string())]);
    let clicks = clicked(&driver);
    assert!(clicks.contains(&"cb1".to_string()));
    assert!(!clicks.contains(&"cb2".to_string()));
    assert!(clicks.contains(&"r2".to_string()));
    assert!(!clicks.contains(&"r1".to_string()));
    assert_eq!(clicks.last().map(String::as_str), Some("create"));
}

#[tokio::test(start_paused = true)]
async fn agent_one_falls_back_to_first_reason_when_configured_one_is_missing() {
    let driver = driver_with(offboard_app);
    let cfg = config(&[("REASON_OFFBOARD", "Merger with another supplier")]);

    let report = run(AgentVariant::Agent1, &driver, &cfg, None).await;

    assert!(report.passed(), "{:?}", report.error);
    let reason = report.steps.iter().find(|s| s.label == "offboarding reason").unwrap();
    assert_eq!(reason.detail.as_deref(), Some("No longer doing business"));
    assert_eq!(driver.clicks_on("r1"), 1);
}

#[tokio::test(start_paused = true)]
async fn agent_two_walks_amendment_conversation() {
    let driver = driver_with(|dom| amend_app(dom, true));
    let cfg = config(&[]);

    let report = run(AgentVariant::Agent2, &driver, &cfg, None).await;

    assert!(report.passed(), "{:?}", report.error);
    assert_eq!(report.state, FlowState::ReadyToSubmit);
    assert_eq!(report.sync.last_count, Some(8));
    assert!(report.steps.iter().all(|s| s.outcome == StepOutcome::Done));

    let sent: Vec<String> = fills(&driver).into_iter().map(|(_, text)| text).collect();
    assert_eq!(
        sent,
        vec![
            "Hello from qubemesh-e2e (Agent 2)",
            "Yes, I have discussed",
            "Description: this is final description",
        ]
    );
    // default reason is the second option
    let reason = report.steps.iter().find(|s| s.label == "amendment reason").unwrap();
    assert_eq!(reason.detail.as_deref(), Some("Change in pricing"));
    // yes answers stay inside their own question card
    assert_eq!(driver.clicks_on("yes0"), 0);
    assert_eq!(driver.clicks_on("yes1"), 1);
    assert_eq!(driver.clicks_on("yes2"), 1);
    // the request is prepared, never submitted
    assert_eq!(driver.clicks_on("validate"), 0);
}

#[tokio::test(start_paused = true)]
async fn agent_two_picks_reason_by_text() {
    let driver = driver_with(|dom| amend_app(dom, true));
    let cfg = config(&[("REASON_AMEND", "extension of term")]);

    let report = run(AgentVariant::Agent2, &driver, &cfg, None).await;

    assert!(report.passed(), "{:?}", report.error);
    assert_eq!(driver.clicks_on("opt3"), 1);
    assert_eq!(driver.clicks_on("opt2"), 0);
}

#[tokio::test(start_paused = true)]
async fn missing_optional_question_is_tolerated() {
    let driver = driver_with(|dom| amend_app(dom, false));
    let cfg = config(&[]);

    let report = run(AgentVariant::Agent2, &driver, &cfg, None).await;

    assert!(report.passed(), "{:?}", report.error);
    let discussed = report.steps.iter().find(|s| s.label == "supplier discussion question").unwrap();
    assert_eq!(discussed.outcome, StepOutcome::Tolerated);
    assert!(discussed.error.is_some());
}

#[tokio::test(start_paused = true)]
async fn agent_three_terminates_on_future_date() {
    let driver = driver_with(|dom| terminate_app(dom, NaiveDate::from_ymd_opt(2041, 6, 1).unwrap()));
    let cfg = config(&[("REASON_TERMINATE", "Termination for convenience")]);

    let report = run(AgentVariant::Agent3, &driver, &cfg, None).await;

    assert!(report.passed(), "{:?}", report.error);
    assert_eq!(driver.with_dom(|dom| dom.value("date-input").map(String::from)), Some("20/01/2028".into()));
    assert_eq!(report.date_picker.first(), Some(&DatePickerState::Open));
    assert_eq!(report.date_picker.last(), Some(&DatePickerState::Closed));
    assert_eq!(driver.clicks_on("later"), 1);
    assert_eq!(driver.clicks_on("now"), 0);
    assert_eq!(driver.clicks_on("convenience"), 1);
    assert_eq!(driver.clicks_on("cause"), 0);
    assert_eq!(driver.clicks_on("validate"), 0);

    let skipped: Vec<&str> = report
        .steps
        .iter()
        .filter(|s| s.outcome == StepOutcome::Skipped)
        .map(|s| s.label.as_str())
        .collect();
    assert_eq!(skipped, vec!["terminate immediately"]);
}

#[tokio::test(start_paused = true)]
async fn agent_three_defaults_to_termination_for_cause() {
    let driver = driver_with(|dom| terminate_app(dom, NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()));
    let cfg = config(&[("TERMINATION_STATUS", "immediate")]);

    let report = run(AgentVariant::Agent3, &driver, &cfg, None).await;

    assert!(report.passed(), "{:?}", report.error);
    assert_eq!(driver.clicks_on("cause"), 1);
    assert!(report.date_picker.is_empty());
}

#[tokio::test(start_paused = true)]
async fn immediate_agent_three_matches_agent_three_one() {
    let shown = NaiveDate::from_ymd_opt(2041, 6, 1).unwrap();

    let configured = driver_with(|dom| terminate_app(dom, shown));
    let a = run(AgentVariant::Agent3, &configured, &config(&[("TERMINATION_STATUS", "Terminate immediately")]), None).await;

    let forced = driver_with(|dom| terminate_app(dom, shown));
    let b = run(AgentVariant::Agent3Immediate, &forced, &config(&[]), None).await;

    assert!(a.passed() && b.passed());
    assert_eq!(configured.calls(), forced.calls());
    let trace = |r: &qubemesh_e2e::RunReport| r.steps.iter().map(|s| (s.label.clone(), s.outcome)).collect::<Vec<_>>();
    assert_eq!(trace(&a), trace(&b));
    assert_eq!(forced.clicks_on("now"), 1);
}

#[tokio::test(start_paused = true)]
async fn agent_three_one_rejects_future_date_configuration() {
    let driver = driver_with(|dom| terminate_app(dom, NaiveDate::from_ymd_opt(2041, 6, 1).unwrap()));
    let cfg = config(&[("TERMINATION_STATUS", "future")]);

    let report = run(AgentVariant::Agent3Immediate, &driver, &cfg, None).await;

    assert_eq!(report.status, RunStatus::Error);
    assert_eq!(report.state, FlowState::Failed(0));
    assert!(matches!(report.error, Some(FlowError::Config(_))));
    assert!(driver.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn query_agents_send_their_own_query() {
    for (variant, query) in [(AgentVariant::Agent4, "fourth question"), (AgentVariant::Agent5, "fifth question")] {
        let driver = driver_with(|dom| query_app(dom, false));
        let cfg = config(&[("USER_QUERY4", "fourth question"), ("USER_QUERY5", "fifth question")]);

        let report = run(variant, &driver, &cfg, None).await;

        assert!(report.passed(), "{variant}: {:?}", report.error);
        assert_eq!(fills(&driver), vec![("prompt".to_string(), query.to_string())]);
        assert_eq!(report.sync.last_count, Some(1));
    }
}

#[tokio::test(start_paused = true)]
async fn query_agent_tolerates_silent_events_badge() {
    let driver = driver_with(|dom| query_app(dom, true));

    let report = run(AgentVariant::Agent4, &driver, &config(&[("USER_QUERY4", "anyone there?")]), None).await;

    assert!(report.passed(), "{:?}", report.error);
    assert_eq!(report.state, FlowState::ReadyToSubmit);
    assert_eq!(report.sync.last_count, None);
    assert_eq!(fills(&driver), vec![("prompt".to_string(), "anyone there?".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn failed_run_leaves_screenshot_and_report() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ArtifactStore> = Arc::new(DiskArtifactStore::new(dir.path()));
    // no prompt ever shows up
    let driver = driver_with(|_| {});
    let cfg = config(&[]);

    let report = run(AgentVariant::Agent4, &driver, &cfg, Some(store)).await;

    assert_eq!(report.status, RunStatus::Timeout);
    assert_eq!(report.state, FlowState::Failed(0));
    let shot = report.screenshot.clone().expect("failure screenshot");
    assert_eq!(shot, dir.path().join(&report.run_id).join("failure.png"));
    assert!(shot.exists());

    let saved: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join(&report.run_id).join("report.json")).unwrap()).unwrap();
    assert_eq!(saved["status"], "Timeout");
    assert_eq!(saved["agent"], "Agent 4");
    assert_eq!(saved["steps"][0]["outcome"], "failed");
}

#[tokio::test(start_paused = true)]
async fn passing_run_writes_report_without_screenshot() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ArtifactStore> = Arc::new(DiskArtifactStore::new(dir.path()));
    let driver = driver_with(|dom| query_app(dom, false));

    let report = run(AgentVariant::Agent5, &driver, &config(&[]), Some(store)).await;

    assert!(report.passed());
    assert!(report.screenshot.is_none());
    assert!(dir.path().join(&report.run_id).join("report.json").exists());
    assert!(!dir.path().join(&report.run_id).join("failure.png").exists());
}

#[tokio::test(start_paused = true)]
async fn launched_agent_runs_inside_qube_mesh() {
    let driver = driver_with(|dom| mesh_shell(dom, |dom| query_app(dom, false)));
    let cfg = config(&[("AGENTS", "Agent 1,Agent 2,Agent 3,Agent 4,Agent 5")]);
    let h = harness(&driver);

    QubeMesh::new(&h).launch(&cfg.qube_mesh_url, cfg.agent_name(4)).await.unwrap();
    let report = run(AgentVariant::Agent5, &driver, &cfg, None).await;

    assert!(report.passed(), "{:?}", report.error);
    assert_eq!(driver.clicks_on("agent5"), 1);
    assert!(driver.calls().first().is_some_and(|c| matches!(c, DriverCall::Goto(url) if url.ends_with("#/home/qube-mesh"))));
    assert_eq!(driver.current_url().await.unwrap(), "https://app.example.com/#/home/qube-mesh");
}
