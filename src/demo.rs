//! Expense approval flow used by the `waypoint` binary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use waypoint_core::{
    CoreError, DataPacket, Flow, FlowRunEngine, StepFailure, ValidationIssue,
};

/// Callback key the approval step waits on
pub const APPROVAL_CALLBACK: &str = "expense-approval";

/// Expense claim moving through the flow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpenseClaim {
    /// Who is claiming
    pub employee: String,
    /// Amount in cents
    pub amount_cents: u64,
    /// Free text justification
    pub description: String,
    /// Set once the claim passed submission checks
    pub submitted: bool,
    /// Approver's decision
    pub decision: Option<ApprovalDecision>,
    /// Payment reference once reimbursed
    pub payment_reference: Option<String>,
}

/// Decision delivered by the approval callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    /// Approved or not
    pub approved: bool,
    /// Approver name
    pub approver: String,
}

/// Submit, wait for approval, reimburse
pub struct ExpenseApprovalFlow {
    /// Claims at or below this amount skip the approval form
    pub auto_approve_limit_cents: u64,
}

impl Default for ExpenseApprovalFlow {
    fn default() -> Self {
        Self {
            auto_approve_limit_cents: 5_000,
        }
    }
}

#[async_trait]
impl Flow for ExpenseApprovalFlow {
    type Model = ExpenseClaim;

    fn flow_type_name(&self) -> &str {
        "ExpenseApproval"
    }

    async fn execute(&self, engine: &mut FlowRunEngine<ExpenseClaim>) -> Result<(), CoreError> {
        engine
            .step("Submit", |ctx| async move {
                let mut claim = ctx.model().await;
                if claim.amount_cents == 0 {
                    return Err(StepFailure::business("Expense amount must be positive"));
                }
                if claim.description.trim().is_empty() {
                    ctx.add_validation_issue(ValidationIssue::new(
                        "description",
                        "Description is empty",
                    ));
                }
                claim.submitted = true;
                Ok(())
            })
            .await?;

        let limit = self.auto_approve_limit_cents;
        engine
            .step("Approve", |ctx| async move {
                let amount = ctx.model().await.amount_cents;
                if amount <= limit {
                    ctx.model().await.decision = Some(ApprovalDecision {
                        approved: true,
                        approver: "auto".to_string(),
                    });
                    return Ok(());
                }

                let Some(payload) = ctx.callback_payload() else {
                    let form_state = DataPacket::from(&*ctx.model().await)?;
                    return Err(ctx.await_form("expense-approval-form", APPROVAL_CALLBACK, form_state));
                };
                let decision: ApprovalDecision = payload.to()?;
                ctx.model().await.decision = Some(decision);
                Ok::<(), StepFailure>(())
            })
            .await?;

        engine
            .step("Reimburse", |ctx| async move {
                let mut claim = ctx.model().await;
                match claim.decision.clone() {
                    Some(decision) if decision.approved => {
                        claim.payment_reference = Some(format!("PAY-{}", ctx.flow_instance_id()));
                        Ok(())
                    }
                    Some(decision) => Err(StepFailure::business(format!(
                        "Expense rejected by {}",
                        decision.approver
                    ))),
                    None => Err(StepFailure::business("No approval decision recorded")),
                }
            })
            .await?;

        Ok(())
    }
}
