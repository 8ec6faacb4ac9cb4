//! Per-tenant configuration, read once at startup into explicit objects.
//!
//! Every key can be set per tenant (`DESK_GROUP_ID_ALPHA`) or shared
//! (`DESK_GROUP_ID`); the per-tenant form wins. A tenant with a missing or
//! non-numeric identifier is skipped for the run with a warning, never a
//! crash.

use std::collections::HashMap;

use casebridge_crm::CrmConfig;

#[derive(Debug, Clone)]
pub struct TenantConfig {
    pub name: String,
    /// Human-facing brand label used in report custom fields
    /// ("las_vegas" -> "las vegas" unless overridden).
    pub brand_label: String,
    pub crm: CrmConfig,
    pub desk_url: String,
    pub desk_api_key: String,
    pub desk_user: String,
    pub group_id: i64,
    pub user_id: i64,
    pub reminder_template_id: i64,
    pub survey_template_id: i64,
    /// Report template is rolled out tenant by tenant; absent means the
    /// reports job skips this tenant.
    pub report_template_id: Option<i64>,
    /// Public base prepended to the relative report path from the CRM.
    pub report_link_base: String,
}

/// Reads tenant configuration from the process environment.
pub fn load_tenants() -> Vec<TenantConfig> {
    let vars: HashMap<String, String> = std::env::vars().collect();
    load_tenants_from(&vars)
}

pub fn load_tenants_from(vars: &HashMap<String, String>) -> Vec<TenantConfig> {
    let Some(tenants) = vars.get("TENANTS").filter(|t| !t.trim().is_empty()) else {
        tracing::warn!("TENANTS is not set; nothing to process");
        return Vec::new();
    };

    tenants
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter_map(|name| load_tenant(vars, name))
        .collect()
}

fn load_tenant(vars: &HashMap<String, String>, name: &str) -> Option<TenantConfig> {
    let get = |base: &str| tenant_var(vars, base, name);
    let require = |base: &str| {
        let value = get(base);
        if value.is_none() {
            tracing::warn!(tenant = name, key = base, "missing config; skipping tenant");
        }
        value
    };
    let require_id = |base: &str| {
        let raw = require(base)?;
        match raw.parse::<i64>() {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!(
                    tenant = name,
                    key = base,
                    value = %raw,
                    "identifier is not numeric; skipping tenant"
                );
                None
            }
        }
    };

    let crm = CrmConfig {
        appointments_url: require("CRM_APPOINTMENTS_URL")?,
        owners_url: require("CRM_OWNERS_URL")?,
        reports_url: require("CRM_REPORTS_URL")?,
        appointments_key: require("CRM_KEY_APPOINTMENTS")?,
        reports_key: require("CRM_KEY_REPORTS")?,
    };

    Some(TenantConfig {
        brand_label: get("BRAND_LABEL").unwrap_or_else(|| name.replace('_', " ")),
        crm,
        desk_url: require("DESK_API_URL")?,
        desk_api_key: require("DESK_API_KEY")?,
        desk_user: require("DESK_USER")?,
        group_id: require_id("DESK_GROUP_ID")?,
        user_id: require_id("DESK_USER_ID")?,
        reminder_template_id: require_id("DESK_TEMPLATE_REMINDER")?,
        survey_template_id: require_id("DESK_TEMPLATE_SURVEY")?,
        report_template_id: get("DESK_TEMPLATE_REPORT").and_then(|raw| raw.parse().ok()),
        report_link_base: get("CRM_REPORT_LINK_BASE")
            .unwrap_or_else(|| "https://crm.example.com".into()),
        name: name.to_string(),
    })
}

/// `BASE_TENANT` (uppercased tenant) wins over the shared `BASE` key.
fn tenant_var(vars: &HashMap<String, String>, base: &str, tenant: &str) -> Option<String> {
    let scoped = format!("{base}_{}", tenant.to_uppercase());
    vars.get(&scoped)
        .or_else(|| vars.get(base))
        .filter(|value| !value.trim().is_empty())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        [
            ("TENANTS", "alpha, beta"),
            ("CRM_APPOINTMENTS_URL", "https://crm.example.com/api/v1/"),
            ("CRM_OWNERS_URL", "https://crm.example.com/owners/v1/"),
            ("CRM_REPORTS_URL", "https://crm.example.com/reports/v1/"),
            ("CRM_KEY_APPOINTMENTS_ALPHA", "key-a"),
            ("CRM_KEY_APPOINTMENTS_BETA", "key-b"),
            ("CRM_KEY_REPORTS_ALPHA", "rkey-a"),
            ("CRM_KEY_REPORTS_BETA", "rkey-b"),
            ("DESK_API_URL", "https://desk.example.com/core/v1"),
            ("DESK_API_KEY", "desk-key"),
            ("DESK_USER", "bot@example.com"),
            ("DESK_GROUP_ID", "12"),
            ("DESK_USER_ID", "7"),
            ("DESK_TEMPLATE_REMINDER", "100"),
            ("DESK_TEMPLATE_SURVEY", "101"),
            ("DESK_TEMPLATE_REPORT_ALPHA", "102"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn loads_all_listed_tenants() {
        let tenants = load_tenants_from(&base_vars());
        assert_eq!(tenants.len(), 2);
        assert_eq!(tenants[0].name, "alpha");
        assert_eq!(tenants[0].crm.appointments_key, "key-a");
        assert_eq!(tenants[0].report_template_id, Some(102));
        assert_eq!(tenants[1].report_template_id, None);
        assert_eq!(tenants[1].group_id, 12);
    }

    #[test]
    fn per_tenant_key_wins_over_shared() {
        let mut vars = base_vars();
        vars.insert("DESK_GROUP_ID_BETA".into(), "99".into());
        let tenants = load_tenants_from(&vars);
        assert_eq!(tenants[0].group_id, 12);
        assert_eq!(tenants[1].group_id, 99);
    }

    #[test]
    fn non_numeric_identifier_skips_only_that_tenant() {
        let mut vars = base_vars();
        vars.insert("DESK_GROUP_ID_ALPHA".into(), "not-a-number".into());
        let tenants = load_tenants_from(&vars);
        assert_eq!(tenants.len(), 1);
        assert_eq!(tenants[0].name, "beta");
    }

    #[test]
    fn missing_credential_skips_only_that_tenant() {
        let mut vars = base_vars();
        vars.remove("CRM_KEY_APPOINTMENTS_BETA");
        let tenants = load_tenants_from(&vars);
        assert_eq!(tenants.len(), 1);
        assert_eq!(tenants[0].name, "alpha");
    }

    #[test]
    fn brand_label_defaults_from_tenant_name() {
        let mut vars = base_vars();
        vars.insert("TENANTS".into(), "las_vegas".into());
        vars.insert("CRM_KEY_APPOINTMENTS_LAS_VEGAS".into(), "k".into());
        vars.insert("CRM_KEY_REPORTS_LAS_VEGAS".into(), "rk".into());
        let tenants = load_tenants_from(&vars);
        assert_eq!(tenants[0].brand_label, "las vegas");
    }

    #[test]
    fn empty_tenant_list_yields_nothing() {
        let mut vars = base_vars();
        vars.insert("TENANTS".into(), "  ".into());
        assert!(load_tenants_from(&vars).is_empty());
    }
}
