//! Batch jobs bridging the real-estate CRM to the engagement platform.
//!
//! Each subcommand runs one workflow over every configured tenant, strictly
//! sequentially. Meant to be invoked from cron; the process exits after one
//! pass.

mod config;
mod dispatch;
mod reminders;
mod reports;
mod surveys;

use anyhow::Result;
use casebridge_crm::ReqwestCrmApi;
use casebridge_desk::{DeskCaseApi, default_http_client};
use clap::{Parser, Subcommand};
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

use crate::config::TenantConfig;
use crate::dispatch::RunSummary;

#[derive(Parser)]
#[command(
    name = "casebridge-jobs",
    version,
    about = "CRM-to-desk batch jobs: appointment reminders, surveys, owner reports"
)]
struct Cli {
    #[command(subcommand)]
    job: Job,
}

#[derive(Subcommand)]
enum Job {
    /// Send WhatsApp reminders for today's appointments.
    Reminders,
    /// Send satisfaction surveys for appointments concluded in the last hour.
    Surveys,
    /// Send owner property reports for the trailing six months.
    Reports,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let tenants = config::load_tenants();
    if tenants.is_empty() {
        tracing::warn!("no usable tenant configuration; nothing to do");
        return Ok(());
    }

    let http = default_http_client()?;
    let now = OffsetDateTime::now_utc();

    let mut total = RunSummary::default();
    for tenant in &tenants {
        tracing::info!(tenant = %tenant.name, "processing tenant");
        match run_tenant(&cli.job, tenant, &http, now).await {
            Ok(summary) => total.merge(summary),
            Err(err) => {
                tracing::error!(tenant = %tenant.name, error = %err, "tenant run failed; continuing");
            }
        }
    }

    tracing::info!(
        created = total.created,
        recovered = total.recovered,
        failed = total.failed,
        "run finished"
    );
    Ok(())
}

async fn run_tenant(
    job: &Job,
    tenant: &TenantConfig,
    http: &reqwest::Client,
    now: OffsetDateTime,
) -> Result<RunSummary> {
    let crm = ReqwestCrmApi::new(http.clone(), tenant.crm.clone())?;
    let desk = DeskCaseApi::new(
        http.clone(),
        &tenant.desk_url,
        tenant.desk_api_key.clone(),
        tenant.desk_user.clone(),
    )?;

    match job {
        Job::Reminders => reminders::run(&crm, &desk, tenant, now.date()).await,
        Job::Surveys => surveys::run(&crm, &desk, tenant, now).await,
        Job::Reports => reports::run(&crm, &desk, tenant, now.date()).await,
    }
}
