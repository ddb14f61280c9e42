use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use waypoint::demo::{ApprovalDecision, ExpenseApprovalFlow, ExpenseClaim, APPROVAL_CALLBACK};
use waypoint::AppConfig;
use waypoint_core::{DataPacket, FlowParams, FlowRunner, FlowStatus};
use waypoint_monitoring::{MetricsEventHandler, TracingTelemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;

    waypoint_monitoring::init(&config.monitoring).context("Failed to initialize monitoring")?;

    let repository = config
        .build_repository()
        .await
        .context("Failed to build history store")?;
    let metrics = Arc::new(MetricsEventHandler::new());
    let runner = FlowRunner::new(
        repository,
        Arc::new(TracingTelemetry::new(&config.monitoring.service_name)),
    )
    .with_event_handler(metrics.clone());

    let flow = ExpenseApprovalFlow::default();
    let claim = ExpenseClaim {
        employee: "r.okafor".to_string(),
        amount_cents: 18_450,
        description: "Conference travel".to_string(),
        ..ExpenseClaim::default()
    };

    let started = runner
        .start_flow(&flow, &claim, FlowParams::new().with_external_id("EXP-1042"))
        .await
        .context("Failed to start expense flow")?;
    info!(
        flow_instance_id = %started.instance_id,
        status = ?started.status,
        "Expense flow started"
    );

    if started.status == FlowStatus::WaitingForInput {
        let decision = DataPacket::from(&ApprovalDecision {
            approved: true,
            approver: "m.lindqvist".to_string(),
        })?;
        let finished = runner
            .resume_with_callback(&flow, &started.instance_id, APPROVAL_CALLBACK, decision)
            .await
            .context("Failed to resume expense flow")?;
        info!(
            flow_instance_id = %finished.instance_id,
            status = ?finished.status,
            payment_reference = ?finished.model.payment_reference,
            "Expense flow resumed"
        );
    }

    info!(metrics = ?metrics.snapshot(), "Done");
    Ok(())
}
