use std::sync::Arc;
use waypoint::demo::{ApprovalDecision, ExpenseApprovalFlow, ExpenseClaim, APPROVAL_CALLBACK};
use waypoint_core::domain::repository::memory::MemoryFlowHistoryRepository;
use waypoint_core::{
    CoreError, DataPacket, FlowHistoryRepository, FlowParams, FlowRunner, FlowStatus,
    NoopTelemetry,
};
use waypoint_monitoring::{MetricsEventHandler, MetricsSnapshot};

fn claim(amount_cents: u64) -> ExpenseClaim {
    ExpenseClaim {
        employee: "a.tanaka".to_string(),
        amount_cents,
        description: "Team lunch".to_string(),
        ..ExpenseClaim::default()
    }
}

fn decision(approved: bool) -> DataPacket {
    DataPacket::from(&ApprovalDecision {
        approved,
        approver: "j.moreau".to_string(),
    })
    .unwrap()
}

#[tokio::test]
async fn small_claim_is_auto_approved() {
    let runner = FlowRunner::new(
        Arc::new(MemoryFlowHistoryRepository::new()),
        Arc::new(NoopTelemetry),
    );

    let outcome = runner
        .start_flow(&ExpenseApprovalFlow::default(), &claim(1_200), FlowParams::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, FlowStatus::Completed);
    assert_eq!(outcome.model.decision.unwrap().approver, "auto");
    assert!(outcome.model.payment_reference.unwrap().starts_with("PAY-"));
}

#[tokio::test]
async fn large_claim_waits_for_approval_then_pays() {
    let repo = Arc::new(MemoryFlowHistoryRepository::new());
    let metrics = Arc::new(MetricsEventHandler::new());
    let runner = FlowRunner::new(repo.clone(), Arc::new(NoopTelemetry))
        .with_event_handler(metrics.clone());
    let flow = ExpenseApprovalFlow::default();

    let waiting = runner
        .start_flow(&flow, &claim(90_000), FlowParams::new().with_external_id("EXP-1"))
        .await
        .unwrap();
    assert_eq!(waiting.status, FlowStatus::WaitingForInput);
    assert_eq!(
        waiting.last_result.callback_task_id.as_deref(),
        Some(APPROVAL_CALLBACK)
    );
    let form_state: ExpenseClaim = waiting.last_result.form_state.unwrap().to().unwrap();
    assert!(form_state.submitted);

    let done = runner
        .resume_with_callback(&flow, &waiting.instance_id, APPROVAL_CALLBACK, decision(true))
        .await
        .unwrap();
    assert_eq!(done.status, FlowStatus::Completed);
    assert_eq!(done.model.decision.unwrap().approver, "j.moreau");

    assert_eq!(
        metrics.snapshot(),
        MetricsSnapshot {
            steps_succeeded: 4,
            steps_failed: 0,
            steps_replayed: 1,
            flows_halted: 1,
        }
    );

    let history = repo.read_history(&done.instance_id).await.unwrap();
    let tasks: Vec<String> = history
        .iter()
        .filter_map(|ctx| ctx.current_task.as_ref().map(|id| id.to_string()))
        .collect();
    assert_eq!(tasks, vec!["Submit:1", "Approve:2", "Approve:2", "Reimburse:3"]);
}

#[tokio::test]
async fn rejected_claim_fails() {
    let runner = FlowRunner::new(
        Arc::new(MemoryFlowHistoryRepository::new()),
        Arc::new(NoopTelemetry),
    );
    let flow = ExpenseApprovalFlow::default();

    let waiting = runner
        .start_flow(&flow, &claim(90_000), FlowParams::new())
        .await
        .unwrap();
    let done = runner
        .resume_with_callback(&flow, &waiting.instance_id, APPROVAL_CALLBACK, decision(false))
        .await
        .unwrap();

    assert_eq!(done.status, FlowStatus::Failed);
    assert_eq!(
        done.last_result.exception_message.as_deref(),
        Some("Expense rejected by j.moreau")
    );

    let err = runner
        .resume_with_callback(&flow, &done.instance_id, APPROVAL_CALLBACK, decision(true))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::CallbackMismatch(_)));
}

#[tokio::test]
async fn empty_description_reported_as_validation_issue() {
    let repo = Arc::new(MemoryFlowHistoryRepository::new());
    let runner = FlowRunner::new(repo.clone(), Arc::new(NoopTelemetry));
    let mut no_description = claim(100);
    no_description.description.clear();

    let outcome = runner
        .start_flow(&ExpenseApprovalFlow::default(), &no_description, FlowParams::new())
        .await
        .unwrap();
    assert_eq!(outcome.status, FlowStatus::Completed);

    let history = repo.read_history(&outcome.instance_id).await.unwrap();
    let submit = &history[1].execution_result;
    assert_eq!(submit.validation_issues.len(), 1);
    assert_eq!(submit.validation_issues[0].key, "description");
}

#[tokio::test]
async fn zero_amount_is_a_business_failure() {
    let runner = FlowRunner::new(
        Arc::new(MemoryFlowHistoryRepository::new()),
        Arc::new(NoopTelemetry),
    );

    let outcome = runner
        .start_flow(&ExpenseApprovalFlow::default(), &claim(0), FlowParams::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, FlowStatus::Failed);
    assert!(outcome.last_result.exception_message.unwrap().contains("positive"));
}
