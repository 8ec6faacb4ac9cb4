//! Post-appointment satisfaction surveys: one WhatsApp template case per
//! appointment concluded in the last hour, marked solved after the send.

use anyhow::Result;
use casebridge_core::{
    Activity, ActivityKind, CaseApi, CasePayload, CaseStatus, CustomField, Recipient,
    SourceChannel, TemplateRef, normalize_phone,
};
use casebridge_crm::{Appointment, CrmApi};
use time::{Duration, OffsetDateTime};

use crate::config::TenantConfig;
use crate::dispatch::{CaseRequest, RunSummary, run_batch};

const FALLBACK_CLIENT_NAME: &str = "Cliente";
const FALLBACK_BROKER_NAME: &str = "el asesor";

pub async fn run(
    crm: &dyn CrmApi,
    desk: &dyn CaseApi,
    tenant: &TenantConfig,
    now: OffsetDateTime,
) -> Result<RunSummary> {
    let concluded = crm
        .list_concluded_appointments(now - Duration::hours(1), now)
        .await?;
    if concluded.is_empty() {
        tracing::info!(tenant = %tenant.name, "no concluded appointments in the last hour");
        return Ok(RunSummary::default());
    }

    let requests = build_requests(tenant, &concluded);
    tracing::info!(
        tenant = %tenant.name,
        concluded = concluded.len(),
        sendable = requests.len(),
        "sending surveys"
    );
    Ok(run_batch(desk, &tenant.name, requests, CaseStatus::Solved).await)
}

pub fn build_requests(tenant: &TenantConfig, appointments: &[Appointment]) -> Vec<CaseRequest> {
    appointments
        .iter()
        .filter_map(|appointment| {
            let Some(phone) = appointment.client().and_then(|c| c.phone.as_deref()) else {
                tracing::warn!(
                    tenant = %tenant.name,
                    appointment = %appointment.id,
                    "no client phone; skipping survey"
                );
                return None;
            };

            let client_name = appointment
                .client()
                .and_then(|c| c.name.clone())
                .unwrap_or_else(|| FALLBACK_CLIENT_NAME.into());
            let broker_name = appointment
                .broker
                .as_ref()
                .and_then(|b| b.name.clone())
                .unwrap_or_else(|| FALLBACK_BROKER_NAME.into());

            Some(CaseRequest {
                record_id: appointment.id.clone(),
                payload: CasePayload {
                    group_id: tenant.group_id,
                    source_channel: SourceChannel::Whatsapp,
                    subject: format!("Encuesta de Satisfacción - {client_name}"),
                    tags: vec!["encuesta".into(), "crm".into()],
                    custom_fields: vec![
                        CustomField {
                            field: "fecha_cita".into(),
                            value: appointment.start_date.clone(),
                        },
                        CustomField {
                            field: "id_cita_crm".into(),
                            value: appointment.id.clone(),
                        },
                        CustomField {
                            field: "inmobiliaria".into(),
                            value: tenant.name.clone(),
                        },
                    ],
                    type_id: 0,
                    activity: Activity {
                        kind: ActivityKind::UserReply,
                        user_id: Some(tenant.user_id),
                        channel: "whatsapp".into(),
                        template: Some(TemplateRef::new(
                            tenant.survey_template_id,
                            &[("1", &client_name), ("2", &broker_name)],
                        )),
                        content: None,
                        recipients: vec![Recipient {
                            name: client_name.clone(),
                            phone: Some(normalize_phone(phone)),
                            email: None,
                            city: None,
                        }],
                    },
                },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use casebridge_core::MockCaseApi;
    use casebridge_crm::{Broker, CrmConfig, MockCrmApi, Person};
    use time::macros::datetime;

    fn tenant() -> TenantConfig {
        TenantConfig {
            name: "alpha".into(),
            brand_label: "alpha".into(),
            crm: CrmConfig {
                appointments_url: "https://crm.example.com/api/v1/".into(),
                owners_url: "https://crm.example.com/owners/v1/".into(),
                reports_url: "https://crm.example.com/reports/v1/".into(),
                appointments_key: "k".into(),
                reports_key: "rk".into(),
            },
            desk_url: "https://desk.example.com/core/v1".into(),
            desk_api_key: "dk".into(),
            desk_user: "bot@example.com".into(),
            group_id: 12,
            user_id: 7,
            reminder_template_id: 100,
            survey_template_id: 101,
            report_template_id: None,
            report_link_base: "https://crm.example.com".into(),
        }
    }

    fn concluded(id: &str, broker: Option<&str>) -> Appointment {
        Appointment {
            id: id.into(),
            start_date: "2026-08-29 09:00:00".into(),
            place: None,
            people: vec![Person {
                name: Some("Ana".into()),
                phone: Some("300-123-4567".into()),
            }],
            broker: broker.map(|name| Broker {
                name: Some(name.into()),
            }),
        }
    }

    #[test]
    fn survey_template_carries_client_and_broker() {
        let requests = build_requests(&tenant(), &[concluded("c1", Some("Luis"))]);
        let template = requests[0].payload.activity.template.as_ref().unwrap();
        assert_eq!(template.template_id, 101);
        let values: Vec<&str> = template.parameters.iter().map(|p| p.value.as_str()).collect();
        assert_eq!(values, ["Ana", "Luis"]);
        // dashes stripped, country code added
        assert_eq!(
            requests[0].payload.recipient().unwrap().phone.as_deref(),
            Some("573001234567")
        );
    }

    #[test]
    fn missing_broker_uses_fallback() {
        let requests = build_requests(&tenant(), &[concluded("c1", None)]);
        let template = requests[0].payload.activity.template.as_ref().unwrap();
        assert_eq!(template.parameters[1].value, "el asesor");
    }

    #[test]
    fn tenant_name_travels_in_custom_fields() {
        let requests = build_requests(&tenant(), &[concluded("c1", Some("Luis"))]);
        let fields = &requests[0].payload.custom_fields;
        assert!(fields
            .iter()
            .any(|f| f.field == "inmobiliaria" && f.value == "alpha"));
    }

    #[tokio::test]
    async fn run_marks_sent_surveys_solved() {
        let mut crm = MockCrmApi::new();
        crm.concluded = vec![concluded("c1", Some("Luis"))];
        let desk = MockCaseApi::new();
        desk.push_create_ok("case-3");

        let summary = run(&crm, &desk, &tenant(), datetime!(2026-08-29 10:00:00 UTC))
            .await
            .unwrap();

        assert_eq!(summary.created, 1);
        let updates = desk.status_updates.lock().await;
        assert_eq!(updates.as_slice(), [("case-3".to_string(), CaseStatus::Solved)]);
    }
}
