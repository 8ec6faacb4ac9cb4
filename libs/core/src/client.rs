//! Client seam against the engagement platform.
//!
//! The reconciliation protocol only ever talks to `CaseApi`; the HTTP
//! implementation lives in `casebridge-desk` and a recording mock lives here
//! for tests.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::model::{CasePayload, CaseStatus, OpenCaseConflict};

/// Response to a case creation call. The platform occasionally answers 2xx
/// without a case id, so the id stays optional here and the protocol decides
/// what that means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedCase {
    pub case_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRef {
    pub id: String,
}

#[derive(Debug, Error)]
pub enum CaseApiError {
    #[error("case api configuration error")]
    Config(#[source] anyhow::Error),
    #[error("case api transport error")]
    Transport(#[source] anyhow::Error),
    #[error("case api remote error (status {status}): {message}")]
    Remote {
        status: u16,
        message: String,
        conflict: Option<OpenCaseConflict>,
    },
    #[error("case api response decode error")]
    Decode(#[source] anyhow::Error),
}

impl CaseApiError {
    /// The structured open-case conflict, when the platform reported one.
    pub fn open_case_conflict(&self) -> Option<&OpenCaseConflict> {
        match self {
            CaseApiError::Remote {
                conflict: Some(conflict),
                ..
            } if !conflict.opened_case_ids.is_empty() => Some(conflict),
            _ => None,
        }
    }
}

/// Operations the reconciliation protocol needs from the platform. Each call
/// is independently fallible; token acquisition and refresh are the
/// implementation's concern, never the protocol's.
#[async_trait]
pub trait CaseApi: Send + Sync {
    async fn create_case(&self, payload: &CasePayload) -> Result<CreatedCase, CaseApiError>;
    async fn update_case_status(
        &self,
        case_id: &str,
        status: CaseStatus,
    ) -> Result<(), CaseApiError>;
    async fn find_contact_by_phone(&self, phone: &str)
    -> Result<Option<ContactRef>, CaseApiError>;
    async fn find_contact_by_email(&self, email: &str)
    -> Result<Option<ContactRef>, CaseApiError>;
    async fn find_open_case_for_contact(
        &self,
        contact_id: &str,
    ) -> Result<Option<String>, CaseApiError>;
}

/// Scriptable in-memory `CaseApi` that records every call.
#[derive(Default)]
pub struct MockCaseApi {
    pub create_responses: Mutex<VecDeque<Result<CreatedCase, CaseApiError>>>,
    pub created_payloads: Mutex<Vec<CasePayload>>,
    pub status_updates: Mutex<Vec<(String, CaseStatus)>>,
    pub fail_status_updates: bool,
    pub contacts_by_phone: HashMap<String, String>,
    pub contacts_by_email: HashMap<String, String>,
    pub open_cases_by_contact: HashMap<String, String>,
    pub phone_lookups: Mutex<Vec<String>>,
    pub email_lookups: Mutex<Vec<String>>,
    pub open_case_lookups: Mutex<Vec<String>>,
}

impl MockCaseApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_create_ok(&self, case_id: &str) {
        self.create_responses
            .try_lock()
            .expect("mock not contended")
            .push_back(Ok(CreatedCase {
                case_id: Some(case_id.to_string()),
            }));
    }

    pub fn push_create_ok_without_id(&self) {
        self.create_responses
            .try_lock()
            .expect("mock not contended")
            .push_back(Ok(CreatedCase { case_id: None }));
    }

    pub fn push_create_err(&self, err: CaseApiError) {
        self.create_responses
            .try_lock()
            .expect("mock not contended")
            .push_back(Err(err));
    }

    /// Structured `OPEN_CASES_EXIST` error as the platform reports it.
    pub fn conflict_error(opened_case_ids: &[&str]) -> CaseApiError {
        CaseApiError::Remote {
            status: 409,
            message: "OPEN_CASES_EXIST".into(),
            conflict: Some(OpenCaseConflict {
                opened_case_ids: opened_case_ids.iter().map(|id| id.to_string()).collect(),
            }),
        }
    }

    pub fn plain_error(message: &str) -> CaseApiError {
        CaseApiError::Remote {
            status: 500,
            message: message.into(),
            conflict: None,
        }
    }
}

#[async_trait]
impl CaseApi for MockCaseApi {
    async fn create_case(&self, payload: &CasePayload) -> Result<CreatedCase, CaseApiError> {
        self.created_payloads.lock().await.push(payload.clone());
        self.create_responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(Self::plain_error("mock exhausted")))
    }

    async fn update_case_status(
        &self,
        case_id: &str,
        status: CaseStatus,
    ) -> Result<(), CaseApiError> {
        self.status_updates
            .lock()
            .await
            .push((case_id.to_string(), status));
        if self.fail_status_updates {
            return Err(Self::plain_error("status update rejected"));
        }
        Ok(())
    }

    async fn find_contact_by_phone(
        &self,
        phone: &str,
    ) -> Result<Option<ContactRef>, CaseApiError> {
        self.phone_lookups.lock().await.push(phone.to_string());
        Ok(self
            .contacts_by_phone
            .get(phone)
            .map(|id| ContactRef { id: id.clone() }))
    }

    async fn find_contact_by_email(
        &self,
        email: &str,
    ) -> Result<Option<ContactRef>, CaseApiError> {
        self.email_lookups.lock().await.push(email.to_string());
        Ok(self
            .contacts_by_email
            .get(email)
            .map(|id| ContactRef { id: id.clone() }))
    }

    async fn find_open_case_for_contact(
        &self,
        contact_id: &str,
    ) -> Result<Option<String>, CaseApiError> {
        self.open_case_lookups
            .lock()
            .await
            .push(contact_id.to_string());
        Ok(self.open_cases_by_contact.get(contact_id).cloned())
    }
}
