//! Edit transaction commands

use std::path::PathBuf;

use chrono::Utc;
use clap::{Args, Subcommand};
use console::style;
use dialoguer::Confirm;
use tracing::info;

use gplay_edits::{Edit, EditError, FinalizeOutcome};

use super::{invocation_context, local_manager, remote_manager, resolve_package};
use crate::cli::output::{self, format_age, handle_style, header, key_value};
use crate::cli::{Cli, OutputFormat};

/// Manage edit transactions
#[derive(Debug, Args)]
pub struct EditsCommand {
    #[command(subcommand)]
    pub action: EditsAction,
}

/// Edit subcommands
#[derive(Debug, Subcommand)]
pub enum EditsAction {
    /// Open a new edit, or resume one, and keep it open
    Open(OpenCommand),
    /// List local edits and the package lock
    List(ListCommand),
    /// Validate an open edit on the server
    Validate(ValidateCommand),
    /// Commit an open edit
    Commit(CommitCommand),
    /// Discard an edit on the server and locally
    Abort(AbortCommand),
    /// Forget a local edit record without contacting the server
    Delete(DeleteCommand),
    /// Remove a package lock left behind by another process
    Unlock(UnlockCommand),
}

/// Package selection
#[derive(Debug, Args)]
pub struct PackageArgs {
    /// Application package name (default: package_name from config)
    #[arg(short, long)]
    pub package: Option<String>,
}

/// Credentials for commands that talk to Google Play
#[derive(Debug, Args)]
pub struct RemoteArgs {
    /// Path to service account JSON key
    #[arg(long, env = "GOOGLE_PLAY_SERVICE_ACCOUNT")]
    pub service_account: Option<PathBuf>,
}

/// Open or resume an edit
#[derive(Debug, Args)]
pub struct OpenCommand {
    #[command(flatten)]
    pub package: PackageArgs,

    #[command(flatten)]
    pub remote: RemoteArgs,

    /// Resume this edit instead of the most recent one
    #[arg(long)]
    pub edit: Option<String>,
}

/// List local edits
#[derive(Debug, Args)]
pub struct ListCommand {
    #[command(flatten)]
    pub package: PackageArgs,
}

/// Validate an edit
#[derive(Debug, Args)]
pub struct ValidateCommand {
    /// Edit handle
    pub handle: String,

    #[command(flatten)]
    pub package: PackageArgs,

    #[command(flatten)]
    pub remote: RemoteArgs,
}

/// Commit an edit
#[derive(Debug, Args)]
pub struct CommitCommand {
    /// Edit handle
    pub handle: String,

    #[command(flatten)]
    pub package: PackageArgs,

    #[command(flatten)]
    pub remote: RemoteArgs,
}

/// Abort an edit
#[derive(Debug, Args)]
pub struct AbortCommand {
    /// Edit handle
    pub handle: String,

    #[command(flatten)]
    pub package: PackageArgs,

    #[command(flatten)]
    pub remote: RemoteArgs,

    /// Skip confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,
}

/// Delete a local edit record
#[derive(Debug, Args)]
pub struct DeleteCommand {
    /// Edit handle
    pub handle: String,

    #[command(flatten)]
    pub package: PackageArgs,

    /// Skip confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,
}

/// Force-release a package lock
#[derive(Debug, Args)]
pub struct UnlockCommand {
    #[command(flatten)]
    pub package: PackageArgs,

    /// Skip confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,
}

impl EditsCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;

        match &self.action {
            EditsAction::Open(cmd) => rt.block_on(cmd.execute(cli)),
            EditsAction::List(cmd) => cmd.execute(cli),
            EditsAction::Validate(cmd) => rt.block_on(cmd.execute(cli)),
            EditsAction::Commit(cmd) => rt.block_on(cmd.execute(cli)),
            EditsAction::Abort(cmd) => rt.block_on(cmd.execute(cli)),
            EditsAction::Delete(cmd) => rt.block_on(cmd.execute(cli)),
            EditsAction::Unlock(cmd) => cmd.execute(cli),
        }
    }
}

fn edit_json(edit: &Edit) -> serde_json::Value {
    serde_json::json!({
        "handle": edit.handle,
        "server_id": edit.server_id,
        "package_name": edit.package_name,
        "created_at": edit.created_at.to_rfc3339(),
        "last_used_at": edit.last_used_at.to_rfc3339(),
        "state": edit.state.to_string(),
    })
}

impl OpenCommand {
    async fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let config = cli.load_config()?;
        let package = resolve_package(self.package.package.as_deref(), &config)?;
        let (mut edits, _) =
            remote_manager(&config, self.remote.service_account.as_deref(), &invocation_context())?;

        let opened = edits.open(&package, self.edit.as_deref()).await?;
        let edit = match edits.finalize(&opened.edit, false).await? {
            FinalizeOutcome::KeptOpen(edit) => edit,
            _ => opened.edit,
        };
        info!(package = %package, handle = %edit.handle, was_created = opened.was_created, "edit ready");

        match cli.format {
            OutputFormat::Json => {
                let mut value = edit_json(&edit);
                value["was_created"] = serde_json::json!(opened.was_created);
                println!("{}", serde_json::to_string_pretty(&value)?);
            }
            OutputFormat::Text => {
                if cli.quiet {
                    println!("{}", edit.handle);
                } else {
                    let verb = if opened.was_created { "Opened" } else { "Resumed" };
                    output::success(&format!(
                        "{} edit {} for {}",
                        verb,
                        handle_style().apply_to(&edit.handle),
                        style(&package).bold()
                    ));
                    println!("{}", key_value("Created", &edit.created_at.to_rfc3339()));
                    println!("{}", key_value("State", &edit.state.to_string()));
                }
            }
        }

        Ok(())
    }
}

impl ListCommand {
    fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let config = cli.load_config()?;
        let package = resolve_package(self.package.package.as_deref(), &config)?;
        let edits = local_manager(&config, &invocation_context())?;

        let records = edits.list_edits(&package)?;
        let lock = edits.locks().inspect(&package)?;
        let now = Utc::now();

        if cli.format == OutputFormat::Json {
            let records: Vec<serde_json::Value> = records
                .iter()
                .map(|edit| {
                    let mut value = edit_json(edit);
                    value["expired"] = serde_json::json!(edits.is_expired(edit, now));
                    value
                })
                .collect();
            let lock = lock.as_ref().map(|owner| {
                serde_json::json!({
                    "pid": owner.pid,
                    "hostname": owner.hostname,
                    "acquired_at": owner.acquired_at.to_rfc3339(),
                    "context": owner.context,
                    "stale": edits.locks().is_stale(owner),
                })
            });
            let result = serde_json::json!({
                "package": package,
                "edits": records,
                "lock": lock,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
            return Ok(());
        }

        if cli.quiet {
            for edit in &records {
                println!("{}", edit.handle);
            }
            return Ok(());
        }

        println!("{}", header(&format!("Edits for {}", package)));
        println!();
        if records.is_empty() {
            println!("  {}", style("No local edits").dim());
        }
        for edit in &records {
            let age = format_age(edit.created_at, now);
            let status = if edits.is_expired(edit, now) {
                style("expired").red().to_string()
            } else {
                style(edit.state.to_string()).green().to_string()
            };
            println!(
                "  {}  {}  created {} ago, last used {} ago",
                handle_style().apply_to(&edit.handle),
                status,
                age,
                format_age(edit.last_used_at, now)
            );
        }

        if let Some(owner) = lock {
            println!();
            let stale = if edits.locks().is_stale(&owner) { " (stale)" } else { "" };
            output::warning(&format!(
                "Locked by pid {} on {} since {}{}",
                owner.pid,
                owner.hostname,
                owner.acquired_at.to_rfc3339(),
                stale
            ));
            println!("{}", key_value("Command", &owner.context));
        }

        Ok(())
    }
}

impl ValidateCommand {
    async fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let config = cli.load_config()?;
        let package = resolve_package(self.package.package.as_deref(), &config)?;
        let (mut edits, _) =
            remote_manager(&config, self.remote.service_account.as_deref(), &invocation_context())?;

        let mut edit = edits.open(&package, Some(&self.handle)).await?.edit;
        edits.validate(&mut edit).await?;
        edits.finalize(&edit, false).await?;

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({ "handle": edit.handle, "valid": true });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            output::success(&format!("Edit {} is valid", handle_style().apply_to(&edit.handle)));
        }

        Ok(())
    }
}

impl CommitCommand {
    async fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let config = cli.load_config()?;
        let package = resolve_package(self.package.package.as_deref(), &config)?;
        let (mut edits, _) =
            remote_manager(&config, self.remote.service_account.as_deref(), &invocation_context())?;

        // Only commit edits this store knows about; adopt others with `edits open --edit`
        let outcome = if edits.list_edits(&package)?.iter().any(|e| e.handle == self.handle) {
            let opened = edits.open(&package, Some(&self.handle)).await?;
            edits.finalize(&opened.edit, true).await?
        } else if edits.idempotency().find_commit(&package, &self.handle)?.is_some() {
            info!(package = %package, handle = %self.handle, "edit already committed by an earlier run");
            FinalizeOutcome::AlreadyCommitted
        } else {
            return Err(EditError::EditNotFound {
                package,
                handle: self.handle.clone(),
            }
            .into());
        };
        let committed = !matches!(outcome, FinalizeOutcome::KeptOpen(_));

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "handle": self.handle,
                "committed": committed,
                "already_committed": outcome == FinalizeOutcome::AlreadyCommitted,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            let handle = handle_style().apply_to(&self.handle);
            match outcome {
                FinalizeOutcome::Committed => output::success(&format!("Committed edit {}", handle)),
                FinalizeOutcome::AlreadyCommitted => {
                    output::info(&format!("Edit {} was already committed", handle))
                }
                FinalizeOutcome::KeptOpen(_) => output::warning(&format!("Edit {} left open", handle)),
            }
        }

        Ok(())
    }
}

impl AbortCommand {
    async fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let config = cli.load_config()?;
        let package = resolve_package(self.package.package.as_deref(), &config)?;

        if !self.yes {
            let confirmed = Confirm::new()
                .with_prompt(format!(
                    "Discard edit {} for {}? Staged changes will be lost.",
                    self.handle, package
                ))
                .default(false)
                .interact()?;

            if !confirmed {
                println!("{}", style("Aborted.").yellow());
                return Ok(());
            }
        }

        let (mut edits, _) =
            remote_manager(&config, self.remote.service_account.as_deref(), &invocation_context())?;
        let opened = edits.open(&package, Some(&self.handle)).await?;
        edits.abort(&opened.edit).await?;

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({ "handle": self.handle, "aborted": true });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            output::success(&format!("Discarded edit {}", handle_style().apply_to(&self.handle)));
        }

        Ok(())
    }
}

impl DeleteCommand {
    async fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let config = cli.load_config()?;
        let package = resolve_package(self.package.package.as_deref(), &config)?;
        let mut edits = local_manager(&config, &invocation_context())?;

        if !self.yes {
            let confirmed = Confirm::new()
                .with_prompt(format!(
                    "Forget local record of edit {}? The server-side edit is left untouched.",
                    self.handle
                ))
                .default(false)
                .interact()?;

            if !confirmed {
                println!("{}", style("Aborted.").yellow());
                return Ok(());
            }
        }

        let edit = edits.delete_edit(&package, &self.handle).await?;

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&edit_json(&edit))?);
        } else if !cli.quiet {
            output::success(&format!(
                "Deleted local record of edit {}",
                handle_style().apply_to(&edit.handle)
            ));
        }

        Ok(())
    }
}

impl UnlockCommand {
    fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let config = cli.load_config()?;
        let package = resolve_package(self.package.package.as_deref(), &config)?;
        let edits = local_manager(&config, &invocation_context())?;
        let locks = edits.locks();

        let Some(owner) = locks.inspect(&package)? else {
            if !cli.quiet {
                output::success(&format!("No lock held for {}", package));
            }
            return Ok(());
        };

        if !self.yes {
            let stale = if locks.is_stale(&owner) { "" } else { " It does not look stale." };
            let confirmed = Confirm::new()
                .with_prompt(format!(
                    "Remove lock held by pid {} on {} ({})?{}",
                    owner.pid, owner.hostname, owner.context, stale
                ))
                .default(false)
                .interact()?;

            if !confirmed {
                println!("{}", style("Aborted.").yellow());
                return Ok(());
            }
        }

        let removed = locks.force_release(&package)?;

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "package": package,
                "removed": removed.is_some(),
                "lock_path": locks.lock_path(&package).display().to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            output::success(&format!(
                "Removed lock {}",
                output::path_style().apply_to(locks.lock_path(&package).display())
            ));
        }

        Ok(())
    }
}
