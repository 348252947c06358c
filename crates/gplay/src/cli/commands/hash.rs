//! Hash command

use std::path::PathBuf;

use clap::Args;

use gplay_edits::hash_file_with_progress;

use crate::cli::output::{hash_progress, path_style};
use crate::cli::{Cli, OutputFormat};

/// Print the SHA-256 of an artifact, as used for upload deduplication
#[derive(Debug, Args)]
pub struct HashCommand {
    /// File to hash
    #[arg(required = true)]
    pub file: PathBuf,
}

impl HashCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let bar = hash_progress(cli.show_progress());
        let digest = hash_file_with_progress(&self.file, |done, total| {
            bar.set_length(total);
            bar.set_position(done);
        });
        bar.finish_and_clear();
        let digest = digest?;
        let size = std::fs::metadata(&self.file)?.len();

        match cli.format {
            OutputFormat::Json => {
                let result = serde_json::json!({
                    "path": self.file.display().to_string(),
                    "sha256": digest,
                    "size": size,
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            OutputFormat::Text if cli.quiet => println!("{}", digest),
            OutputFormat::Text => {
                println!("{}  {}", digest, path_style().apply_to(self.file.display()));
            }
        }

        Ok(())
    }
}
