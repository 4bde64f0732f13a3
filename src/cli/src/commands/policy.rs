//! Policy commands: decisions, provisioning and role assignment.

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;

use bastion_core::rbac::{Action, Domain, PolicyDecision, Resource, Role};

use crate::backend::Backend;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum PolicyCommands {
    /// Evaluate a single authorization request
    Check(CheckArgs),

    /// Seed the organization policy template
    SetupOrg {
        /// Organization ID
        organization_id: String,
    },

    /// Seed the project policy template, optionally cascading organization roles
    SetupProject {
        /// Project ID
        project_id: String,

        /// Owning organization; its role assignments are copied into the project
        #[arg(long)]
        org: Option<String>,
    },

    /// Seed the global domain
    SetupGlobal,

    /// Assign a role to a user
    Assign(AssignmentArgs),

    /// Revoke a role from a user
    Revoke(AssignmentArgs),

    /// List rules and assignments of a domain
    Rules {
        /// Domain ID (organization, project or "global")
        domain: String,
    },
}

#[derive(Args)]
pub struct CheckArgs {
    /// User ID or policy type
    subject: String,
    /// Resource (e.g. campaign, billing, *)
    resource: Resource,
    /// Action (create, read, update, delete, manage, *)
    action: Action,
    /// Domain ID
    domain: String,
}

#[derive(Args)]
pub struct AssignmentArgs {
    /// User ID
    user_id: String,

    /// Role (viewer, member, admin, owner)
    role: Role,

    /// Organization domain
    #[arg(long, conflicts_with = "project", required_unless_present = "project")]
    org: Option<String>,

    /// Project domain
    #[arg(long)]
    project: Option<String>,
}

// ── Output rows ─────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct CheckResult {
    subject: String,
    resource: Resource,
    action: Action,
    domain: String,
    allowed: bool,
    via: Option<String>,
}

#[derive(Serialize, Tabled)]
struct RuleRow {
    #[tabled(rename = "Type")]
    kind: &'static str,
    #[tabled(rename = "Subject")]
    subject: String,
    #[tabled(rename = "Resource / Role")]
    object: String,
    #[tabled(rename = "Action")]
    action: String,
}

pub async fn execute(cmd: PolicyCommands, backend: &Backend, format: OutputFormat) -> Result<()> {
    match cmd {
        PolicyCommands::Check(args) => check(args, backend, format).await,
        PolicyCommands::SetupOrg { organization_id } => {
            let added = backend
                .manager
                .setup_organization_policies(&organization_id)
                .await?;
            output::print_success(&format!(
                "Organization {} provisioned ({} new rules)",
                organization_id, added
            ));
            Ok(())
        }
        PolicyCommands::SetupProject { project_id, org } => {
            match org {
                Some(org) => {
                    let cascaded = backend.manager.on_project_created(&org, &project_id).await?;
                    output::print_success(&format!(
                        "Project {} provisioned, {} assignments cascaded from {}",
                        project_id, cascaded, org
                    ));
                }
                None => {
                    let added = backend.manager.setup_project_policies(&project_id).await?;
                    output::print_success(&format!(
                        "Project {} provisioned ({} new rules)",
                        project_id, added
                    ));
                }
            }
            Ok(())
        }
        PolicyCommands::SetupGlobal => {
            let added = backend.manager.setup_global_policies().await?;
            output::print_success(&format!("Global domain provisioned ({} new rules)", added));
            Ok(())
        }
        PolicyCommands::Assign(args) => assign(args, backend).await,
        PolicyCommands::Revoke(args) => revoke(args, backend).await,
        PolicyCommands::Rules { domain } => rules(&domain, backend, format).await,
    }
}

async fn check(args: CheckArgs, backend: &Backend, format: OutputFormat) -> Result<()> {
    let domain = Domain::parse(args.domain.as_str())?;
    let engine = backend.lifecycle.init().await?;
    let decision = engine.check(&args.subject, args.resource, args.action, &domain);

    let result = CheckResult {
        subject: args.subject,
        resource: args.resource,
        action: args.action,
        domain: domain.to_string(),
        allowed: decision.is_allowed(),
        via: match &decision {
            PolicyDecision::Allow(held) => Some(held.to_string()),
            PolicyDecision::Deny(_) => None,
        },
    };

    match format {
        OutputFormat::Table => {
            println!(
                "{} {} {} {} in {}",
                output::verdict(result.allowed),
                result.subject,
                result.action,
                result.resource,
                result.domain
            );
            match decision {
                PolicyDecision::Allow(held) => output::print_detail("Granted via", held.as_str()),
                PolicyDecision::Deny(reason) => output::print_detail("Reason", &reason),
            }
            Ok(())
        }
        _ => output::print_item(&result, format),
    }
}

fn target_domain(args: &AssignmentArgs) -> Result<(&'static str, &str)> {
    match (&args.org, &args.project) {
        (Some(org), None) => Ok(("organization", org.as_str())),
        (None, Some(project)) => Ok(("project", project.as_str())),
        _ => bail!("Specify exactly one of --org or --project"),
    }
}

async fn assign(args: AssignmentArgs, backend: &Backend) -> Result<()> {
    let (kind, domain) = target_domain(&args)?;
    let added = if kind == "organization" {
        backend
            .manager
            .assign_role_to_user_for_organization(&args.user_id, domain, args.role)
            .await?
    } else {
        backend
            .manager
            .assign_role_to_user_for_project(&args.user_id, domain, args.role)
            .await?
    };

    if added {
        output::print_success(&format!(
            "{} is now {} of {} {}",
            args.user_id, args.role, kind, domain
        ));
    } else {
        output::print_info(&format!(
            "{} already holds {} in {}",
            args.user_id, args.role, domain
        ));
    }
    if kind == "organization" {
        output::print_warning(
            "Existing projects are not updated; run `bastion migrate-roles` to cascade",
        );
    }
    Ok(())
}

async fn revoke(args: AssignmentArgs, backend: &Backend) -> Result<()> {
    let (kind, domain) = target_domain(&args)?;
    let removed = if kind == "organization" {
        backend
            .manager
            .revoke_role_from_user_for_organization(&args.user_id, domain, args.role)
            .await?
    } else {
        backend
            .manager
            .revoke_role_from_user_for_project(&args.user_id, domain, args.role)
            .await?
    };

    if removed {
        output::print_success(&format!(
            "Revoked {} from {} in {}",
            args.role, args.user_id, domain
        ));
    } else {
        output::print_info(&format!(
            "{} did not hold {} in {}",
            args.user_id, args.role, domain
        ));
    }
    Ok(())
}

async fn rules(domain: &str, backend: &Backend, format: OutputFormat) -> Result<()> {
    let domain = Domain::parse(domain)?;
    let engine = backend.lifecycle.init().await?;

    let mut rows: Vec<RuleRow> = engine
        .policies_in_domain(&domain)
        .into_iter()
        .map(|rule| RuleRow {
            kind: "p",
            subject: rule.subject.to_string(),
            object: rule.resource.to_string(),
            action: rule.action.to_string(),
        })
        .collect();
    rows.extend(
        engine
            .assignments_in_domain(&domain)
            .into_iter()
            .map(|assignment| RuleRow {
                kind: "g",
                subject: assignment.user.to_string(),
                object: assignment.role.to_string(),
                action: String::new(),
            }),
    );

    if format == OutputFormat::Table {
        output::print_header(&format!("Domain {}", domain));
    }
    output::print_list(&rows, format)
}
