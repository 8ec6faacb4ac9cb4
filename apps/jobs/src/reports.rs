//! Periodic owner property reports: one case per property owner carrying the
//! report link for the trailing six months, marked closed after the send.
//! WhatsApp template when the owner has a phone, plain email content when
//! only an email is on file.

use std::collections::HashSet;

use anyhow::Result;
use casebridge_core::{
    Activity, ActivityKind, CaseApi, CasePayload, CaseStatus, CustomField, Recipient,
    SourceChannel, TemplateRef, capitalize_words, normalize_phone,
};
use casebridge_crm::types::CRM_DATE;
use casebridge_crm::{CrmApi, OwnerDetails, ReportLink};
use time::Date;

use crate::config::TenantConfig;
use crate::dispatch::{CaseRequest, RunSummary, run_batch};

/// Report window, calendar-approximate six months.
const REPORT_WINDOW_DAYS: i64 = 183;

pub async fn run(
    crm: &dyn CrmApi,
    desk: &dyn CaseApi,
    tenant: &TenantConfig,
    today: Date,
) -> Result<RunSummary> {
    let Some(template_id) = tenant.report_template_id else {
        tracing::warn!(tenant = %tenant.name, "no report template configured; skipping tenant");
        return Ok(RunSummary::default());
    };

    let properties = crm.list_properties().await?;
    if properties.is_empty() {
        tracing::info!(tenant = %tenant.name, "no properties for tenant");
        return Ok(RunSummary::default());
    }

    let start = today - time::Duration::days(REPORT_WINDOW_DAYS);
    let mut seen = HashSet::new();
    let mut requests = Vec::new();

    for property in &properties {
        let (Some(property_id), Some(code)) = (property.id.as_deref(), property.code.as_deref())
        else {
            tracing::warn!(tenant = %tenant.name, "property record incomplete; skipping");
            continue;
        };
        if !seen.insert(code.to_string()) {
            continue;
        }

        let owner = match crm.get_owner_details(code).await {
            Ok(Some(owner)) if owner.has_contact_address() => owner,
            Ok(_) => {
                tracing::warn!(tenant = %tenant.name, code, "no reachable owner; skipping");
                continue;
            }
            Err(err) => {
                tracing::error!(tenant = %tenant.name, code, error = %err, "owner lookup failed");
                continue;
            }
        };

        let link = match crm.get_owner_report_link(property_id, start, today).await {
            Ok(Some(link)) => link,
            Ok(None) => {
                tracing::warn!(tenant = %tenant.name, code, "no report link; skipping");
                continue;
            }
            Err(err) => {
                tracing::error!(tenant = %tenant.name, code, error = %err, "report link failed");
                continue;
            }
        };

        match build_request(tenant, template_id, code, &owner, &link, today) {
            Some(request) => requests.push(request),
            None => {
                tracing::warn!(tenant = %tenant.name, code, "malformed report link; skipping")
            }
        }
    }

    tracing::info!(
        tenant = %tenant.name,
        properties = properties.len(),
        sendable = requests.len(),
        "sending owner reports"
    );
    Ok(run_batch(desk, &tenant.name, requests, CaseStatus::Closed).await)
}

/// Builds the report case for one owner. Returns `None` when the WhatsApp
/// branch is selected but the link misses the template-suffix marker.
pub fn build_request(
    tenant: &TenantConfig,
    template_id: i64,
    property_code: &str,
    owner: &OwnerDetails,
    link: &ReportLink,
    today: Date,
) -> Option<CaseRequest> {
    let full_name = format!(
        "{} {}",
        capitalize_words(&owner.name),
        capitalize_words(&owner.last_name)
    )
    .trim()
    .to_string();
    let full_link = format!("{}{}", tenant.report_link_base, link.path);
    let date = today.format(CRM_DATE).unwrap_or_default();

    let custom_fields = vec![
        CustomField {
            field: "email_1".into(),
            value: date,
        },
        CustomField {
            field: "email_2".into(),
            value: property_code.to_string(),
        },
        CustomField {
            field: "email_3".into(),
            value: full_link.clone(),
        },
        CustomField {
            field: "marca_spa".into(),
            value: tenant.brand_label.clone(),
        },
    ];

    let activity = match owner.phone.as_deref() {
        Some(phone) => {
            let suffix = link.template_suffix()?;
            let prefix_key = format!("{}/file/property/", tenant.report_link_base);
            Activity {
                kind: ActivityKind::UserReply,
                user_id: None,
                channel: "outgoing_whatsapp".into(),
                template: Some(TemplateRef::new(
                    template_id,
                    &[("1", full_name.as_str()), (prefix_key.as_str(), suffix)],
                )),
                content: None,
                recipients: vec![Recipient {
                    name: full_name.clone(),
                    phone: Some(normalize_phone(phone)),
                    email: owner.email.clone(),
                    city: None,
                }],
            }
        }
        None => Activity {
            kind: ActivityKind::UserReply,
            user_id: None,
            channel: "email".into(),
            template: None,
            content: Some(format!(
                "Hola {full_name}, el reporte de su inmueble {property_code} está disponible en {full_link}"
            )),
            recipients: vec![Recipient {
                name: full_name.clone(),
                phone: None,
                email: owner.email.clone(),
                city: None,
            }],
        },
    };

    Some(CaseRequest {
        record_id: property_code.to_string(),
        payload: CasePayload {
            group_id: tenant.group_id,
            source_channel: if owner.phone.is_some() {
                SourceChannel::Whatsapp
            } else {
                SourceChannel::Email
            },
            subject: format!("Reporte del Inmueble - {full_name}"),
            tags: vec!["Creado por API".into(), "Informe Propietarios".into()],
            custom_fields,
            type_id: 0,
            activity,
        },
    })
}
