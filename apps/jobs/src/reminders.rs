//! Daily appointment reminders: one WhatsApp template case per appointment
//! scheduled today, marked solved after the send.

use anyhow::Result;
use casebridge_core::{
    Activity, ActivityKind, CaseApi, CasePayload, CaseStatus, CustomField, Recipient,
    SourceChannel, TemplateRef, normalize_phone,
};
use casebridge_crm::{Appointment, CrmApi};
use time::Date;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

use crate::config::TenantConfig;
use crate::dispatch::{CaseRequest, RunSummary, run_batch};

const FALLBACK_CLIENT_NAME: &str = "Cliente";
const FALLBACK_PLACE: &str = "el inmueble";

const TIME_12H: &[BorrowedFormatItem<'_>] =
    format_description!("[hour repr:12 padding:zero]:[minute] [period]");

pub async fn run(
    crm: &dyn CrmApi,
    desk: &dyn CaseApi,
    tenant: &TenantConfig,
    today: Date,
) -> Result<RunSummary> {
    let appointments = crm.list_appointments_for_day(today).await?;
    if appointments.is_empty() {
        tracing::info!(tenant = %tenant.name, "no appointments today");
        return Ok(RunSummary::default());
    }

    let requests = build_requests(tenant, &appointments);
    tracing::info!(
        tenant = %tenant.name,
        appointments = appointments.len(),
        sendable = requests.len(),
        "sending reminders"
    );
    Ok(run_batch(desk, &tenant.name, requests, CaseStatus::Solved).await)
}

/// Builds one reminder payload per appointment. Deterministic: identical
/// input yields an identical payload, so the reconciliation retry can reuse
/// the value. Appointments without a client phone are skipped here, before
/// the protocol ever sees them.
pub fn build_requests(tenant: &TenantConfig, appointments: &[Appointment]) -> Vec<CaseRequest> {
    appointments
        .iter()
        .filter_map(|appointment| {
            let Some(phone) = appointment.client().and_then(|c| c.phone.as_deref()) else {
                tracing::warn!(
                    tenant = %tenant.name,
                    appointment = %appointment.id,
                    "no client phone; skipping reminder"
                );
                return None;
            };

            let client_name = appointment
                .client()
                .and_then(|c| c.name.clone())
                .unwrap_or_else(|| FALLBACK_CLIENT_NAME.into());
            let place = appointment.place.clone().unwrap_or_else(|| FALLBACK_PLACE.into());
            let at = display_time(appointment);

            Some(CaseRequest {
                record_id: appointment.id.clone(),
                payload: CasePayload {
                    group_id: tenant.group_id,
                    source_channel: SourceChannel::Whatsapp,
                    subject: format!("Recordatorio de Cita para {client_name}"),
                    tags: vec!["recordatorio".into(), "crm".into()],
                    custom_fields: vec![
                        CustomField {
                            field: "fecha_cita".into(),
                            value: appointment.start_date.clone(),
                        },
                        CustomField {
                            field: "id_cita_crm".into(),
                            value: appointment.id.clone(),
                        },
                    ],
                    type_id: 0,
                    activity: Activity {
                        kind: ActivityKind::UserReply,
                        user_id: Some(tenant.user_id),
                        channel: "whatsapp".into(),
                        template: Some(TemplateRef::new(
                            tenant.reminder_template_id,
                            &[("1", &client_name), ("2", &place), ("3", &at)],
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

/// 12-hour display time; falls back to the raw CRM timestamp when it does
/// not parse.
fn display_time(appointment: &Appointment) -> String {
    appointment
        .starts_at()
        .and_then(|ts| ts.format(TIME_12H).ok())
        .unwrap_or_else(|| appointment.start_date.clone())
}
