//! CRM provider client: appointments, properties, owners, and report links,
//! scoped per tenant. Not-found is `Ok(None)` / an empty vec by this
//! provider's convention, never an error.

pub mod http;
pub mod types;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use time::{Date, OffsetDateTime};

pub use http::{CrmConfig, ReqwestCrmApi};
pub use types::{Appointment, Broker, OwnerDetails, Person, Property, ReportLink};

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("crm configuration error")]
    Config(#[source] anyhow::Error),
    #[error("crm transport error")]
    Transport(#[source] anyhow::Error),
    #[error("crm remote error (status {status}): {message}")]
    Remote { status: u16, message: String },
    #[error("crm response decode error")]
    Decode(#[source] anyhow::Error),
}

/// Read operations the workflow jobs need from the CRM.
#[async_trait]
pub trait CrmApi: Send + Sync {
    /// Appointments scheduled anywhere inside the given calendar day.
    async fn list_appointments_for_day(&self, day: Date) -> Result<Vec<Appointment>, CrmError>;

    async fn get_appointment_detail(&self, id: &str) -> Result<Option<Appointment>, CrmError>;

    /// Appointments that concluded inside the `[from, to]` window.
    async fn list_concluded_appointments(
        &self,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<Appointment>, CrmError>;

    async fn list_properties(&self) -> Result<Vec<Property>, CrmError>;

    async fn get_owner_details(&self, property_code: &str)
    -> Result<Option<OwnerDetails>, CrmError>;

    async fn get_owner_report_link(
        &self,
        property_id: &str,
        start: Date,
        end: Date,
    ) -> Result<Option<ReportLink>, CrmError>;
}

/// In-memory `CrmApi` for orchestrator tests.
#[derive(Default)]
pub struct MockCrmApi {
    pub appointments: Vec<Appointment>,
    pub concluded: Vec<Appointment>,
    pub properties: Vec<Property>,
    pub owners_by_code: HashMap<String, OwnerDetails>,
    pub links_by_property: HashMap<String, ReportLink>,
}

impl MockCrmApi {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CrmApi for MockCrmApi {
    async fn list_appointments_for_day(&self, _day: Date) -> Result<Vec<Appointment>, CrmError> {
        Ok(self.appointments.clone())
    }

    async fn get_appointment_detail(&self, id: &str) -> Result<Option<Appointment>, CrmError> {
        Ok(self
            .appointments
            .iter()
            .chain(self.concluded.iter())
            .find(|appointment| appointment.id == id)
            .cloned())
    }

    async fn list_concluded_appointments(
        &self,
        _from: OffsetDateTime,
        _to: OffsetDateTime,
    ) -> Result<Vec<Appointment>, CrmError> {
        Ok(self.concluded.clone())
    }

    async fn list_properties(&self) -> Result<Vec<Property>, CrmError> {
        Ok(self.properties.clone())
    }

    async fn get_owner_details(
        &self,
        property_code: &str,
    ) -> Result<Option<OwnerDetails>, CrmError> {
        Ok(self.owners_by_code.get(property_code).cloned())
    }

    async fn get_owner_report_link(
        &self,
        property_id: &str,
        _start: Date,
        _end: Date,
    ) -> Result<Option<ReportLink>, CrmError> {
        Ok(self.links_by_property.get(property_id).cloned())
    }
}
