//! Schema migrations and the role re-cascade.

use anyhow::{Context, Result};
use tabled::Tabled;

use bastion_core::rbac::MigrationReport;

use crate::backend::Backend;
use crate::output::{self, OutputFormat};

/// Apply pending schema migrations.
pub async fn schema(backend: &Backend) -> Result<()> {
    backend
        .db
        .migrate()
        .await
        .context("Failed to apply migrations")?;
    output::print_success("Schema is up to date");
    Ok(())
}

#[derive(serde::Serialize, Tabled)]
struct ReportRow {
    #[tabled(rename = "Projects")]
    projects: usize,
    #[tabled(rename = "Rules Added")]
    policies_added: usize,
    #[tabled(rename = "Assignments Added")]
    assignments_added: usize,
}

impl From<MigrationReport> for ReportRow {
    fn from(report: MigrationReport) -> Self {
        Self {
            projects: report.projects,
            policies_added: report.policies_added,
            assignments_added: report.assignments_added,
        }
    }
}

/// Re-provision every project and cascade its organization's roles into it.
pub async fn roles(backend: &Backend, format: OutputFormat) -> Result<()> {
    let directory = backend.db.tenant_directory();
    let report = backend.manager.migrate_existing_roles(&directory).await?;

    if format == OutputFormat::Table {
        output::print_header("Role migration");
    }
    output::print_list(&[ReportRow::from(report)], format)
}
