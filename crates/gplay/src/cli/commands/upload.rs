//! Upload command

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Args;
use console::style;
use tracing::info;

use gplay_edits::{EditError, FinalizeOutcome, UploadSource};
use gplay_publisher::{track_update, upload_with_dedup, BinaryKind};

use super::{invocation_context, remote_manager, resolve_package};
use crate::cli::output::{self, handle_style, hash_progress, key_value};
use crate::cli::{Cli, OutputFormat};

/// Upload an AAB/APK into an edit and assign it to a track
#[derive(Debug, Args)]
pub struct UploadCommand {
    /// Path to artifact (aab or apk)
    #[arg(required = true)]
    pub artifact: PathBuf,

    /// Package name (default: package_name from config)
    #[arg(short, long)]
    pub package: Option<String>,

    /// Release track (default: default_track from config)
    #[arg(long)]
    pub track: Option<String>,

    /// Staged rollout fraction (0.0-1.0]
    #[arg(long)]
    pub rollout: Option<f64>,

    /// Release notes (format: "en-US:notes,de-DE:notes")
    #[arg(long)]
    pub release_notes: Option<String>,

    /// Add to this open edit instead of the most recent one
    #[arg(long)]
    pub edit: Option<String>,

    /// Keep the edit open instead of committing
    #[arg(long)]
    pub no_commit: bool,

    /// Path to service account JSON key
    #[arg(long, env = "GOOGLE_PLAY_SERVICE_ACCOUNT")]
    pub service_account: Option<PathBuf>,
}

impl UploadCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.run(cli))
    }

    async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let config = cli.load_config()?;
        let package = resolve_package(self.package.as_deref(), &config)?;
        let track = self.track.clone().unwrap_or_else(|| config.track().to_string());
        let notes = parse_release_notes(self.release_notes.as_deref());

        BinaryKind::from_path(&self.artifact)?;
        if !self.artifact.is_file() {
            anyhow::bail!("artifact not found: {}", self.artifact.display());
        }
        // Reject a bad rollout before an edit is opened
        track_update(&track, &[], self.rollout, &notes)?;

        let (mut edits, publisher) =
            remote_manager(&config, self.service_account.as_deref(), &invocation_context())?;
        let uploads = edits.uploads();

        if cli.show_progress() {
            println!(
                "{} {} to Google Play ({})",
                style("Uploading").cyan(),
                style(self.artifact.display()).bold(),
                track
            );
        }

        let bar = hash_progress(cli.show_progress());
        let cancel = async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
            info!("interrupt received");
        };

        let artifact = self.artifact.as_path();
        let rollout = self.rollout;
        let (uploads, publisher, bar, track, notes) = (&uploads, &publisher, &bar, &track, &notes);

        let run = edits
            .run(&package, self.edit.as_deref(), !self.no_commit, cancel, move |edit| async move {
                let package = edit.package_name.as_str();
                let handle = Some(edit.handle.as_str());

                let upload = upload_with_dedup(uploads, &**publisher, &edit, artifact, |done, total| {
                    bar.set_length(total);
                    bar.set_position(done);
                })
                .await
                .map_err(|e| e.into_edit_error(package, handle, "upload bundle"))?;
                bar.finish_and_clear();

                publisher
                    .assign_to_track(package, &edit.server_id, track, &[upload.version_code], rollout, notes)
                    .await
                    .map_err(|e| e.into_edit_error(package, handle, "assign track"))?;

                Ok::<_, EditError>(upload)
            })
            .await;
        bar.finish_and_clear();
        let run = run?;

        let upload = &run.value;
        let committed = !matches!(run.finalized, FinalizeOutcome::KeptOpen(_));
        let source = match upload.source {
            UploadSource::Uploaded => "uploaded",
            UploadSource::ArtifactCache => "artifact_cache",
            UploadSource::Idempotency => "idempotency",
        };

        match cli.format {
            OutputFormat::Json => {
                let result = serde_json::json!({
                    "package": package,
                    "edit": run.edit.handle,
                    "edit_created": run.was_created,
                    "version_code": upload.version_code,
                    "sha256": upload.digest,
                    "source": source,
                    "track": track,
                    "rollout": rollout,
                    "committed": committed,
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            OutputFormat::Text if !cli.quiet => {
                if upload.source == UploadSource::Uploaded {
                    output::success("Upload successful");
                } else {
                    output::info("Same bytes were uploaded before; reusing version code");
                }
                println!("{}", key_value("Version Code", &style(upload.version_code).cyan().to_string()));
                println!("{}", key_value("Track", track));
                if let Some(rollout) = rollout {
                    println!("{}", key_value("Rollout", &format!("{}%", (rollout * 100.0) as u32)));
                }
                println!("{}", key_value("Edit", &handle_style().apply_to(&run.edit.handle).to_string()));
                if committed {
                    output::success("Edit committed");
                } else {
                    output::info(&format!(
                        "Edit left open; commit with `gplay edits commit {}`",
                        run.edit.handle
                    ));
                }
            }
            OutputFormat::Text => {}
        }

        Ok(())
    }
}

/// Parse `lang:text,lang:text` pairs, skipping malformed entries
fn parse_release_notes(raw: Option<&str>) -> BTreeMap<String, String> {
    raw.map(|notes| {
        notes
            .split(',')
            .filter_map(|pair| {
                let mut parts = pair.splitn(2, ':');
                match (parts.next(), parts.next()) {
                    (Some(lang), Some(text)) if !lang.trim().is_empty() => {
                        Some((lang.trim().to_string(), text.trim().to_string()))
                    }
                    _ => None,
                }
            })
            .collect()
    })
    .unwrap_or_default()
}
