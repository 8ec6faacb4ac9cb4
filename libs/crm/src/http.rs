//! Reqwest implementation of [`CrmApi`].
//!
//! The provider splits its surface over three base URLs (appointments,
//! owners, reports) with two API keys: the appointments key also covers the
//! owners endpoints, the reports key covers report links.

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{Value, json};
use time::{Date, OffsetDateTime};

use crate::types::{
    Appointment, Broker, CRM_DATE, CRM_DATETIME, OwnerDetails, Person, Property, ReportLink,
};
use crate::{CrmApi, CrmError};

/// Per-tenant CRM endpoints and credentials, injected at startup.
#[derive(Debug, Clone)]
pub struct CrmConfig {
    pub appointments_url: String,
    pub owners_url: String,
    pub reports_url: String,
    pub appointments_key: String,
    pub reports_key: String,
}

pub struct ReqwestCrmApi {
    http: Client,
    appointments_base: Url,
    owners_base: Url,
    reports_base: Url,
    appointments_key: String,
    reports_key: String,
}

impl ReqwestCrmApi {
    pub fn new(http: Client, config: CrmConfig) -> Result<Self, CrmError> {
        Ok(Self {
            http,
            appointments_base: parse_base(&config.appointments_url)?,
            owners_base: parse_base(&config.owners_url)?,
            reports_base: parse_base(&config.reports_url)?,
            appointments_key: config.appointments_key,
            reports_key: config.reports_key,
        })
    }

    async fn get<T>(
        &self,
        base: &Url,
        key: &str,
        path: &str,
        query: &[(&str, &str)],
        per_page: Option<u32>,
    ) -> Result<T, CrmError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = base
            .join(path)
            .map_err(|err| CrmError::Config(err.into()))?;
        let mut request = self
            .http
            .get(url)
            .query(query)
            .header("Authorization", key)
            .header("Inmobiliaria", "1");
        if let Some(per_page) = per_page {
            request = request.header("Perpage", per_page);
        }
        let response = request
            .send()
            .await
            .map_err(|err| CrmError::Transport(err.into()))?;
        map_response(response).await
    }

    async fn list_meetings(&self, from: &str, to: &str) -> Result<Vec<Appointment>, CrmError> {
        let envelope: RawMeetingsEnvelope = self
            .get(
                &self.appointments_base,
                &self.appointments_key,
                "meetings",
                &[("start_date", from), ("end_date", to)],
                None,
            )
            .await?;
        Ok(envelope
            .data
            .data
            .into_iter()
            .filter_map(RawAppointment::into_appointment)
            .collect())
    }
}

#[async_trait]
impl CrmApi for ReqwestCrmApi {
    async fn list_appointments_for_day(&self, day: Date) -> Result<Vec<Appointment>, CrmError> {
        let day = fmt_date(day);
        self.list_meetings(&format!("{day} 00:00:00"), &format!("{day} 23:59:59"))
            .await
    }

    async fn get_appointment_detail(&self, id: &str) -> Result<Option<Appointment>, CrmError> {
        let detail: RawDetailEnvelope<RawAppointment> = self
            .get(
                &self.appointments_base,
                &self.appointments_key,
                &format!("meetings/{id}"),
                &[],
                None,
            )
            .await?;
        Ok(detail.data.and_then(RawAppointment::into_appointment))
    }

    async fn list_concluded_appointments(
        &self,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<Appointment>, CrmError> {
        self.list_meetings(&fmt_datetime(from), &fmt_datetime(to))
            .await
    }

    async fn list_properties(&self) -> Result<Vec<Property>, CrmError> {
        let envelope: RawListEnvelope<RawProperty> = self
            .get(
                &self.owners_base,
                &self.appointments_key,
                "properties",
                &[],
                Some(50),
            )
            .await?;
        Ok(envelope
            .data
            .into_iter()
            .map(|raw| Property {
                id: id_string(&raw.idpro),
                code: id_string(&raw.codpro),
            })
            .collect())
    }

    async fn get_owner_details(
        &self,
        property_code: &str,
    ) -> Result<Option<OwnerDetails>, CrmError> {
        // Two hops: property code -> owner document id -> owner detail.
        let summaries: RawListEnvelope<RawOwnerSummary> = self
            .get(
                &self.owners_base,
                &self.appointments_key,
                "owners",
                &[("codpro", property_code)],
                None,
            )
            .await?;
        let Some(document) = summaries
            .data
            .first()
            .and_then(|summary| id_string(&summary.document))
        else {
            tracing::warn!(property_code, "no owner record for property");
            return Ok(None);
        };

        let detail: RawDetailEnvelope<RawOwnerDetail> = self
            .get(
                &self.owners_base,
                &self.appointments_key,
                &format!("owners/{document}"),
                &[],
                None,
            )
            .await?;
        Ok(detail.data.map(|raw| OwnerDetails {
            name: raw.name.unwrap_or_default(),
            last_name: raw.last_name.unwrap_or_default(),
            phone: raw.phone.filter(|p| !p.is_empty()),
            email: raw.email.filter(|e| !e.is_empty()),
        }))
    }

    async fn get_owner_report_link(
        &self,
        property_id: &str,
        start: Date,
        end: Date,
    ) -> Result<Option<ReportLink>, CrmError> {
        let url = self
            .reports_base
            .join("owner/link")
            .map_err(|err| CrmError::Config(err.into()))?;
        let body = json!({
            "property": { "id": property_id },
            "start_date": fmt_date(start),
            "end_date": fmt_date(end),
        });
        let response = self
            .http
            .post(url)
            .header("Authorization", &self.reports_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| CrmError::Transport(err.into()))?;
        let envelope: RawDetailEnvelope<String> = map_response(response).await?;
        Ok(envelope
            .data
            .filter(|path| !path.is_empty())
            .map(|path| ReportLink { path }))
    }
}

fn parse_base(raw: &str) -> Result<Url, CrmError> {
    // A trailing slash keeps the last path segment through joins.
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalized).map_err(|err| CrmError::Config(err.into()))
}

async fn map_response<T>(response: reqwest::Response) -> Result<T, CrmError>
where
    T: for<'de> Deserialize<'de>,
{
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable>".into());
        return Err(CrmError::Remote {
            status: status.as_u16(),
            message: if body.len() > 512 {
                body.chars().take(512).collect()
            } else {
                body
            },
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|err| CrmError::Decode(err.into()))
}

fn fmt_date(day: Date) -> String {
    day.format(CRM_DATE).unwrap_or_default()
}

fn fmt_datetime(ts: OffsetDateTime) -> String {
    time::PrimitiveDateTime::new(ts.date(), ts.time())
        .format(CRM_DATETIME)
        .unwrap_or_default()
}

/// The provider mixes numeric and string ids.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct RawMeetingsEnvelope {
    #[serde(default)]
    data: RawMeetingsPage,
}

#[derive(Debug, Default, Deserialize)]
struct RawMeetingsPage {
    #[serde(default)]
    data: Vec<RawAppointment>,
}

#[derive(Debug, Deserialize)]
struct RawListEnvelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct RawDetailEnvelope<T> {
    #[serde(default)]
    data: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
struct RawAppointment {
    #[serde(default)]
    meeting_id: Value,
    #[serde(default)]
    start_date: String,
    #[serde(default)]
    place: Option<String>,
    #[serde(default)]
    person: Vec<RawPerson>,
    #[serde(default)]
    broker: Option<RawBroker>,
}

impl RawAppointment {
    fn into_appointment(self) -> Option<Appointment> {
        let id = id_string(&self.meeting_id)?;
        Some(Appointment {
            id,
            start_date: self.start_date,
            place: self.place.filter(|p| !p.is_empty()),
            people: self
                .person
                .into_iter()
                .map(|raw| Person {
                    name: raw.name.filter(|n| !n.is_empty()),
                    phone: raw.phone.filter(|p| !p.is_empty()),
                })
                .collect(),
            broker: self.broker.map(|raw| Broker {
                name: raw.broker_name.filter(|n| !n.is_empty()),
            }),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawPerson {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    phone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawBroker {
    #[serde(default)]
    broker_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawOwnerSummary {
    #[serde(default)]
    document: Value,
}

#[derive(Debug, Default, Deserialize)]
struct RawOwnerDetail {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawProperty {
    #[serde(default)]
    idpro: Value,
    #[serde(default)]
    codpro: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meetings_envelope_unwraps_nested_page() {
        let body = json!({
            "data": { "data": [
                {
                    "meeting_id": 101,
                    "start_date": "2026-08-29 10:00:00",
                    "place": "Calle 10 #4-20",
                    "person": [{ "name": "Ana", "phone": "300 123 4567" }],
                    "broker": { "broker_name": "Luis" }
                },
                { "start_date": "2026-08-29 11:00:00" }
            ]}
        });
        let envelope: RawMeetingsEnvelope = serde_json::from_value(body).unwrap();
        let appointments: Vec<Appointment> = envelope
            .data
            .data
            .into_iter()
            .filter_map(RawAppointment::into_appointment)
            .collect();
        // the record without a meeting id is dropped
        assert_eq!(appointments.len(), 1);
        assert_eq!(appointments[0].id, "101");
        assert_eq!(appointments[0].client().unwrap().name.as_deref(), Some("Ana"));
        assert_eq!(appointments[0].broker.as_ref().unwrap().name.as_deref(), Some("Luis"));
    }

    #[test]
    fn property_ids_normalize_numeric_values() {
        let raw: RawProperty =
            serde_json::from_value(json!({ "idpro": 55, "codpro": "AP-55" })).unwrap();
        assert_eq!(id_string(&raw.idpro), Some("55".into()));
        assert_eq!(id_string(&raw.codpro), Some("AP-55".into()));

        let missing: RawProperty = serde_json::from_value(json!({})).unwrap();
        assert_eq!(id_string(&missing.idpro), None);
    }

    #[test]
    fn empty_optional_strings_become_none() {
        let raw = RawAppointment {
            meeting_id: json!(7),
            start_date: "2026-08-29 10:00:00".into(),
            place: Some(String::new()),
            person: vec![RawPerson {
                name: Some(String::new()),
                phone: Some("3001234567".into()),
            }],
            broker: None,
        };
        let appointment = raw.into_appointment().unwrap();
        assert_eq!(appointment.place, None);
        assert_eq!(appointment.client().unwrap().name, None);
    }
}
