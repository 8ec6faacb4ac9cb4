//! Case reconciliation protocol.
//!
//! Drives the create -> detect-conflict -> resolve-conflict -> retry-once
//! sequence against a [`CaseApi`] and yields a terminal [`CaseOutcome`].
//! After a run, at most one open case exists for the payload's contact.
//!
//! Per invocation the protocol performs at most two `create_case` calls, at
//! most one conflict-lookup chain, and at most two final-status updates plus
//! one stale-case close, all strictly sequential. Two concurrent invocations
//! for the same contact can still both create a case; that race is accepted
//! in this sequential batch design.

use crate::client::{CaseApi, CreatedCase};
use crate::format::normalize_phone;
use crate::model::{CaseOutcome, CasePayload, CaseStatus};

const NO_CASE_ID: &str = "no case id returned";

/// Structured protocol events, emitted so tests and harnesses can assert on
/// what happened without parsing log text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    CreateAttempted { retry: bool },
    ConflictFromError { open_case_id: String },
    ConflictLookupStarted,
    NoOpenCaseFound,
    StaleCaseClosed { case_id: String },
    StaleCaseCloseFailed { case_id: String },
    FinalStatusSet { case_id: String, status: CaseStatus },
    FinalStatusFailed { case_id: String },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: ProtocolEvent);
}

/// Discards every event; used when only the outcome matters.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ProtocolEvent) {}
}

/// Collects events in memory for assertions.
#[derive(Default)]
pub struct MemorySink {
    events: std::sync::Mutex<Vec<ProtocolEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProtocolEvent> {
        self.events.lock().expect("sink lock").clone()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: ProtocolEvent) {
        self.events.lock().expect("sink lock").push(event);
    }
}

/// Creates a case for the payload's contact, reconciling against an existing
/// open case when the platform reports or reveals one, and retrying creation
/// exactly once. See the module docs for the call budget.
pub async fn reconcile_and_send(
    api: &dyn CaseApi,
    payload: &CasePayload,
    final_status: CaseStatus,
) -> CaseOutcome {
    reconcile_and_send_with_events(api, payload, final_status, &NullSink).await
}

pub async fn reconcile_and_send_with_events(
    api: &dyn CaseApi,
    payload: &CasePayload,
    final_status: CaseStatus,
    events: &dyn EventSink,
) -> CaseOutcome {
    events.emit(ProtocolEvent::CreateAttempted { retry: false });
    let first_err = match api.create_case(payload).await {
        Ok(CreatedCase {
            case_id: Some(case_id),
        }) => {
            set_final_status(api, &case_id, final_status, events).await;
            return CaseOutcome::Created { case_id };
        }
        // A 2xx without an id leaves nothing to reconcile; a retry would
        // just duplicate the send.
        Ok(CreatedCase { case_id: None }) => {
            tracing::warn!(subject = %payload.subject, "case created without a usable id");
            return CaseOutcome::Failed {
                reason: NO_CASE_ID.into(),
            };
        }
        Err(err) => err,
    };

    tracing::warn!(subject = %payload.subject, error = %first_err, "case creation failed; reconciling");

    let open_case_id = match first_err
        .open_case_conflict()
        .and_then(|conflict| conflict.first_case_id())
    {
        Some(id) => {
            events.emit(ProtocolEvent::ConflictFromError {
                open_case_id: id.to_string(),
            });
            Some(id.to_string())
        }
        None => lookup_open_case(api, payload, events).await,
    };

    match open_case_id {
        Some(case_id) => close_stale_case(api, &case_id, events).await,
        None => {
            events.emit(ProtocolEvent::NoOpenCaseFound);
            tracing::info!("no open case found to close; retrying anyway");
        }
    }

    events.emit(ProtocolEvent::CreateAttempted { retry: true });
    match api.create_case(payload).await {
        Ok(CreatedCase {
            case_id: Some(case_id),
        }) => {
            set_final_status(api, &case_id, final_status, events).await;
            CaseOutcome::Recovered { case_id }
        }
        Ok(CreatedCase { case_id: None }) => CaseOutcome::Failed {
            reason: NO_CASE_ID.into(),
        },
        Err(retry_err) => {
            tracing::error!(subject = %payload.subject, error = %retry_err, "retry failed; giving up");
            CaseOutcome::Failed {
                reason: retry_err.to_string(),
            }
        }
    }
}

/// Secondary conflict discovery: resolve the recipient to a platform contact
/// (phone preferred, normalized; else email) and look up an open case for it.
/// Lookup misses and lookup errors both mean "nothing to close".
async fn lookup_open_case(
    api: &dyn CaseApi,
    payload: &CasePayload,
    events: &dyn EventSink,
) -> Option<String> {
    events.emit(ProtocolEvent::ConflictLookupStarted);
    let recipient = payload.recipient()?;

    let contact = if let Some(phone) = recipient.phone.as_deref() {
        api.find_contact_by_phone(&normalize_phone(phone)).await
    } else if let Some(email) = recipient.email.as_deref() {
        api.find_contact_by_email(email).await
    } else {
        return None;
    };

    let contact = match contact {
        Ok(found) => found?,
        Err(err) => {
            tracing::warn!(error = %err, "contact lookup failed during reconciliation");
            return None;
        }
    };

    match api.find_open_case_for_contact(&contact.id).await {
        Ok(found) => found,
        Err(err) => {
            tracing::warn!(contact_id = %contact.id, error = %err, "open case lookup failed");
            None
        }
    }
}

/// Closes the conflicting open case. Failure is logged and the protocol
/// still proceeds to the retry.
async fn close_stale_case(api: &dyn CaseApi, case_id: &str, events: &dyn EventSink) {
    match api.update_case_status(case_id, CaseStatus::Closed).await {
        Ok(()) => {
            events.emit(ProtocolEvent::StaleCaseClosed {
                case_id: case_id.to_string(),
            });
            tracing::info!(case_id, "stale open case closed");
        }
        Err(err) => {
            events.emit(ProtocolEvent::StaleCaseCloseFailed {
                case_id: case_id.to_string(),
            });
            tracing::warn!(case_id, error = %err, "failed to close stale case; retrying anyway");
        }
    }
}

/// Fire-and-forget final status update; a failure never downgrades the
/// creation outcome (the case already exists on the platform).
async fn set_final_status(
    api: &dyn CaseApi,
    case_id: &str,
    status: CaseStatus,
    events: &dyn EventSink,
) {
    match api.update_case_status(case_id, status).await {
        Ok(()) => events.emit(ProtocolEvent::FinalStatusSet {
            case_id: case_id.to_string(),
            status,
        }),
        Err(err) => {
            events.emit(ProtocolEvent::FinalStatusFailed {
                case_id: case_id.to_string(),
            });
            tracing::warn!(case_id, error = %err, "final status update failed; keeping outcome");
        }
    }
}
