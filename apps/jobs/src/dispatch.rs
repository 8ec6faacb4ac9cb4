//! The single dispatch loop shared by all three workflows.
//!
//! Each workflow fetches its domain records, filters the unsendable ones, and
//! builds one [`CaseRequest`] per record; `run_batch` then walks the batch
//! strictly sequentially (one reconciliation completing before the next
//! starts) and reports what happened.

use casebridge_core::{CaseApi, CaseOutcome, CasePayload, CaseStatus, reconcile_and_send};

#[derive(Debug, Clone)]
pub struct CaseRequest {
    /// Domain record id (appointment or property code) for logging.
    pub record_id: String,
    pub payload: CasePayload,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub created: usize,
    pub recovered: usize,
    pub failed: usize,
    pub outcomes: Vec<(String, CaseOutcome)>,
}

impl RunSummary {
    pub fn sent(&self) -> usize {
        self.created + self.recovered
    }

    pub fn merge(&mut self, other: RunSummary) {
        self.created += other.created;
        self.recovered += other.recovered;
        self.failed += other.failed;
        self.outcomes.extend(other.outcomes);
    }
}

pub async fn run_batch(
    api: &dyn CaseApi,
    tenant: &str,
    requests: Vec<CaseRequest>,
    final_status: CaseStatus,
) -> RunSummary {
    let mut summary = RunSummary::default();

    for request in requests {
        let outcome = reconcile_and_send(api, &request.payload, final_status).await;
        match &outcome {
            CaseOutcome::Created { case_id } => {
                summary.created += 1;
                tracing::info!(tenant, record = %request.record_id, case_id, "case created");
            }
            CaseOutcome::Recovered { case_id } => {
                summary.recovered += 1;
                tracing::info!(tenant, record = %request.record_id, case_id, "case recovered");
            }
            CaseOutcome::Failed { reason } => {
                summary.failed += 1;
                tracing::error!(tenant, record = %request.record_id, %reason, "case send failed");
            }
        }
        summary.outcomes.push((request.record_id, outcome));
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use casebridge_core::{
        Activity, ActivityKind, MockCaseApi, Recipient, SourceChannel, TemplateRef,
    };

    fn request(record_id: &str) -> CaseRequest {
        CaseRequest {
            record_id: record_id.into(),
            payload: CasePayload {
                group_id: 1,
                source_channel: SourceChannel::Whatsapp,
                subject: format!("case for {record_id}"),
                tags: vec![],
                custom_fields: vec![],
                type_id: 0,
                activity: Activity {
                    kind: ActivityKind::UserReply,
                    user_id: None,
                    channel: "whatsapp".into(),
                    template: Some(TemplateRef::new(1, &[])),
                    content: None,
                    recipients: vec![Recipient {
                        name: "Ana".into(),
                        phone: Some("573001234567".into()),
                        email: None,
                        city: None,
                    }],
                },
            },
        }
    }

    #[tokio::test]
    async fn batch_continues_past_failed_records() {
        let api = MockCaseApi::new();
        api.push_create_ok("case-1");
        // record 2: both attempts fail
        api.push_create_err(MockCaseApi::plain_error("boom"));
        api.push_create_err(MockCaseApi::plain_error("boom"));
        // record 3: conflict then recovery
        api.push_create_err(MockCaseApi::conflict_error(&["case-9"]));
        api.push_create_ok("case-10");

        let summary = run_batch(
            &api,
            "alpha",
            vec![request("r1"), request("r2"), request("r3")],
            CaseStatus::Solved,
        )
        .await;

        assert_eq!(summary.created, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.recovered, 1);
        assert_eq!(summary.sent(), 2);
        assert_eq!(summary.outcomes.len(), 3);
        assert_eq!(summary.outcomes[2].0, "r3");
    }

    #[tokio::test]
    async fn empty_batch_is_a_quiet_success() {
        let api = MockCaseApi::new();
        let summary = run_batch(&api, "alpha", vec![], CaseStatus::Solved).await;
        assert_eq!(summary.sent(), 0);
        assert!(api.created_payloads.lock().await.is_empty());
    }
}
