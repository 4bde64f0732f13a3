//! Auth token administration.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use colored::*;
use serde::Serialize;
use tabled::Tabled;
use uuid::Uuid;

use bastion_core::rbac::ApiScope;
use bastion_core::tokens::AuthToken;

use crate::backend::Backend;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Issue a token for a project
    Create {
        /// Project ID
        project_id: String,

        /// API scope (read, write, admin); provisions a fresh policy type
        #[arg(short, long, conflicts_with = "policy_type", required_unless_present = "policy_type")]
        scope: Option<ApiScope>,

        /// Bind to an existing role or policy type instead of a scope
        #[arg(long)]
        policy_type: Option<String>,

        /// Days until expiry; omitted means the token never expires
        #[arg(short, long)]
        expires_in_days: Option<u32>,

        /// User the token is issued on behalf of (with --policy-type only)
        #[arg(long, conflicts_with = "scope")]
        user: Option<String>,
    },

    /// List tokens of a project
    List {
        /// Project ID
        project_id: String,
    },

    /// Revoke a token
    Revoke {
        /// Token ID
        token_id: Uuid,
    },
}

#[derive(Serialize, Tabled)]
struct TokenRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Policy Type")]
    policy_type: String,
    #[tabled(rename = "User")]
    user: String,
    #[tabled(rename = "Expires")]
    expires_at: String,
    #[tabled(rename = "Last Used")]
    last_used_at: String,
    #[tabled(rename = "Created")]
    created_at: String,
}

fn format_time(at: Option<DateTime<Utc>>, none: &str) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| none.to_string())
}

impl From<AuthToken> for TokenRow {
    fn from(token: AuthToken) -> Self {
        Self {
            id: token.id.to_string(),
            policy_type: token.policy_type,
            user: token.user_id.unwrap_or_else(|| "-".into()),
            expires_at: format_time(token.expires_at, "never"),
            last_used_at: format_time(token.last_used_at, "never"),
            created_at: format_time(Some(token.created_at), "-"),
        }
    }
}

pub async fn execute(cmd: TokenCommands, backend: &Backend, format: OutputFormat) -> Result<()> {
    match cmd {
        TokenCommands::Create {
            project_id,
            scope,
            policy_type,
            expires_in_days,
            user,
        } => {
            let issued = match (scope, policy_type) {
                (Some(scope), _) => {
                    backend
                        .credentials
                        .create_api_token(&project_id, scope, expires_in_days)
                        .await?
                }
                (None, Some(policy_type)) => {
                    backend
                        .credentials
                        .create_token(&project_id, &policy_type, expires_in_days, user.as_deref())
                        .await?
                }
                (None, None) => anyhow::bail!("Specify --scope or --policy-type"),
            };

            match format {
                OutputFormat::Table => {
                    output::print_success(&format!("Token {} created", issued.token.id));
                    output::print_detail("Policy type", &issued.token.policy_type);
                    output::print_detail("Project", &issued.token.project_id);
                    output::print_detail(
                        "Expires",
                        &format_time(issued.token.expires_at, "never"),
                    );
                    output::print_detail("Secret", &issued.secret.bold().to_string());
                    println!();
                    println!(
                        "{}",
                        "Store the secret now; it cannot be shown again.".yellow()
                    );
                    Ok(())
                }
                _ => output::print_item(&issued, format),
            }
        }
        TokenCommands::List { project_id } => {
            let rows: Vec<TokenRow> = backend
                .credentials
                .list_tokens(&project_id)
                .await?
                .into_iter()
                .map(TokenRow::from)
                .collect();
            output::print_list(&rows, format)
        }
        TokenCommands::Revoke { token_id } => {
            backend.credentials.revoke_token(token_id).await?;
            output::print_success(&format!("Token {} revoked", token_id));
            Ok(())
        }
    }
}
