use serde::{Deserialize, Serialize};

/// Channel a case is opened on (kept small and stable).
///
/// ```
/// use casebridge_core::SourceChannel;
///
/// let c = SourceChannel::OutgoingWhatsapp;
/// assert_eq!(c.as_str(), "outgoing_whatsapp");
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceChannel {
    Whatsapp,
    OutgoingWhatsapp,
    Email,
}

impl SourceChannel {
    /// Returns the lowercase identifier used in platform payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceChannel::Whatsapp => "whatsapp",
            SourceChannel::OutgoingWhatsapp => "outgoing_whatsapp",
            SourceChannel::Email => "email",
        }
    }
}

/// Case lifecycle status on the engagement platform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Open,
    Solved,
    Closed,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Open => "open",
            CaseStatus::Solved => "solved",
            CaseStatus::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    UserReply,
    Note,
}

/// Ordered template parameter (`key` is positional, e.g. "1", "2").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateParam {
    pub key: String,
    pub value: String,
}

/// Reference to a pre-approved message template on the platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateRef {
    pub template_id: i64,
    pub parameters: Vec<TemplateParam>,
}

impl TemplateRef {
    pub fn new(template_id: i64, parameters: &[(&str, &str)]) -> Self {
        Self {
            template_id,
            parameters: parameters
                .iter()
                .map(|(key, value)| TemplateParam {
                    key: (*key).to_string(),
                    value: (*value).to_string(),
                })
                .collect(),
        }
    }
}

/// Message addressee. At least one of phone/email is a caller-side
/// precondition; the orchestrators filter addressless records before a
/// payload is ever built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recipient {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

/// Single outbound activity attached to a case. Chat sends carry `template`,
/// email sends carry `content`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Activity {
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<TemplateRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(rename = "contacts_to")]
    pub recipients: Vec<Recipient>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomField {
    pub field: String,
    pub value: String,
}

/// Fully-assembled case creation payload. Immutable once built; the
/// reconciliation retry reuses the same value, so builders must be
/// deterministic (no send-time timestamps or nonces).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CasePayload {
    pub group_id: i64,
    pub source_channel: SourceChannel,
    pub subject: String,
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom_fields: Vec<CustomField>,
    pub type_id: i64,
    #[serde(rename = "activities", with = "single_activity")]
    pub activity: Activity,
}

impl CasePayload {
    /// The payload's sole recipient, used to derive contact identity during
    /// conflict resolution.
    pub fn recipient(&self) -> Option<&Recipient> {
        self.activity.recipients.first()
    }
}

/// The platform wire shape carries a one-element `activities` array; the
/// model keeps the single activity explicit.
mod single_activity {
    use super::Activity;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(activity: &Activity, ser: S) -> Result<S::Ok, S::Error> {
        [activity].serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Activity, D::Error> {
        let mut activities = Vec::<Activity>::deserialize(de)?;
        match activities.len() {
            1 => Ok(activities.remove(0)),
            n => Err(D::Error::custom(format!("expected 1 activity, got {n}"))),
        }
    }
}

/// Open cases reported by the platform when a creation attempt collides with
/// an existing open case for the same contact.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct OpenCaseConflict {
    pub opened_case_ids: Vec<String>,
}

impl OpenCaseConflict {
    pub fn first_case_id(&self) -> Option<&str> {
        self.opened_case_ids.first().map(String::as_str)
    }
}

/// Terminal result of one reconciliation run. The protocol never leaves a
/// case in an ambiguous state from the caller's perspective.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseOutcome {
    /// First creation attempt succeeded.
    Created { case_id: String },
    /// First attempt conflicted; the stale open case was reconciled and the
    /// retry succeeded.
    Recovered { case_id: String },
    /// Both attempts failed (or no usable case id came back).
    Failed { reason: String },
}

impl CaseOutcome {
    pub fn case_id(&self) -> Option<&str> {
        match self {
            CaseOutcome::Created { case_id } | CaseOutcome::Recovered { case_id } => Some(case_id),
            CaseOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, CaseOutcome::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_payload() -> CasePayload {
        CasePayload {
            group_id: 42,
            source_channel: SourceChannel::Whatsapp,
            subject: "Recordatorio de Cita para Ana".into(),
            tags: vec!["reminder".into(), "crm".into()],
            custom_fields: vec![CustomField {
                field: "appointment_date".into(),
                value: "2026-08-29 10:00:00".into(),
            }],
            type_id: 0,
            activity: Activity {
                kind: ActivityKind::UserReply,
                user_id: Some(7),
                channel: "whatsapp".into(),
                template: Some(TemplateRef::new(11, &[("1", "Ana")])),
                content: None,
                recipients: vec![Recipient {
                    name: "Ana".into(),
                    phone: Some("573001234567".into()),
                    email: None,
                    city: None,
                }],
            },
        }
    }

    #[test]
    fn payload_serializes_activities_array() {
        let value = serde_json::to_value(sample_payload()).unwrap();
        assert_eq!(value["group_id"], json!(42));
        assert_eq!(value["source_channel"], json!("whatsapp"));
        assert_eq!(value["type_id"], json!(0));
        let activities = value["activities"].as_array().unwrap();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0]["type"], json!("user_reply"));
        assert_eq!(activities[0]["contacts_to"][0]["phone"], json!("573001234567"));
        // absent optionals stay off the wire
        assert!(activities[0].get("content").is_none());
        assert!(activities[0]["contacts_to"][0].get("email").is_none());
    }

    #[test]
    fn payload_round_trips() {
        let payload = sample_payload();
        let json = serde_json::to_string(&payload).unwrap();
        let back: CasePayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn conflict_first_case_id() {
        let conflict = OpenCaseConflict {
            opened_case_ids: vec!["case-77".into(), "case-78".into()],
        };
        assert_eq!(conflict.first_case_id(), Some("case-77"));
    }
}
