//! Typed CRM records. Raw provider JSON never leaves the client boundary;
//! loosely-shaped fields (numeric-or-string ids, missing blocks) are
//! normalized into these structs.

use time::PrimitiveDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

/// Date/datetime formats the CRM speaks on both query strings and records.
pub const CRM_DATE: &[BorrowedFormatItem<'_>] = format_description!("[year]-[month]-[day]");
pub const CRM_DATETIME: &[BorrowedFormatItem<'_>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    pub name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broker {
    pub name: Option<String>,
}

/// A scheduled visit. `people` lists the clients attending; the first one is
/// the message addressee by convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appointment {
    pub id: String,
    /// Raw CRM timestamp (`YYYY-MM-DD HH:mm:ss`), kept verbatim for custom
    /// fields; use [`Appointment::starts_at`] for the parsed form.
    pub start_date: String,
    pub place: Option<String>,
    pub people: Vec<Person>,
    pub broker: Option<Broker>,
}

impl Appointment {
    pub fn starts_at(&self) -> Option<PrimitiveDateTime> {
        PrimitiveDateTime::parse(&self.start_date, CRM_DATETIME).ok()
    }

    pub fn client(&self) -> Option<&Person> {
        self.people.first()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub id: Option<String>,
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerDetails {
    pub name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl OwnerDetails {
    pub fn has_contact_address(&self) -> bool {
        self.phone.as_deref().is_some_and(|p| !p.is_empty())
            || self.email.as_deref().is_some_and(|e| !e.is_empty())
    }
}

/// Relative report path as returned by the CRM, e.g.
/// `/file/property/abc123`. The orchestrator derives the public URL and the
/// template suffix from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportLink {
    pub path: String,
}

impl ReportLink {
    /// The part after `/file/property/`, which the message template expects
    /// as its link parameter.
    pub fn template_suffix(&self) -> Option<&str> {
        self.path
            .split_once("/file/property/")
            .map(|(_, suffix)| suffix)
    }
}
