//! CLI commands

mod edits;
mod hash;
mod init;
mod upload;

pub use edits::EditsCommand;
pub use hash::HashCommand;
pub use init::InitCommand;
pub use upload::UploadCommand;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use gplay_core::config::{validate_package_name, SERVICE_ACCOUNT_ENV};
use gplay_core::Config;
use gplay_edits::EditManager;
use gplay_publisher::PlayPublisher;

/// Package from the flag, falling back to the configured one
pub(crate) fn resolve_package(flag: Option<&str>, config: &Config) -> anyhow::Result<String> {
    let package = flag
        .map(str::to_string)
        .or_else(|| config.package_name.clone())
        .context("no package name: pass --package or set package_name in gplay.toml")?;
    validate_package_name(&package)?;
    Ok(package)
}

/// Service account key from the flag (or env), falling back to config
pub(crate) fn resolve_service_account(flag: Option<&Path>, config: &Config) -> anyhow::Result<PathBuf> {
    flag.map(Path::to_path_buf)
        .or_else(|| config.service_account_key.clone())
        .with_context(|| {
            format!(
                "no service account key: pass --service-account, set {} or service_account_key in gplay.toml",
                SERVICE_ACCOUNT_ENV
            )
        })
}

/// Store-only edit manager for the configured state directory
pub(crate) fn local_manager(config: &Config, context: &str) -> anyhow::Result<EditManager> {
    Ok(EditManager::from_config(&config.edits)?.with_context(context))
}

/// Edit manager wired to the Play Developer API
pub(crate) fn remote_manager(
    config: &Config,
    service_account: Option<&Path>,
    context: &str,
) -> anyhow::Result<(EditManager, Arc<PlayPublisher>)> {
    let key = resolve_service_account(service_account, config)?;
    let publisher = Arc::new(PlayPublisher::new(&key)?);
    let manager = local_manager(config, context)?.with_api(publisher.clone());
    Ok((manager, publisher))
}

/// Lock context recorded for this invocation
pub(crate) fn invocation_context() -> String {
    std::env::args().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_package_prefers_flag() {
        let config = Config {
            package_name: Some("com.example.configured".to_string()),
            ..Default::default()
        };

        assert_eq!(
            resolve_package(Some("com.example.flag"), &config).unwrap(),
            "com.example.flag"
        );
        assert_eq!(resolve_package(None, &config).unwrap(), "com.example.configured");
        assert!(resolve_package(None, &Config::default()).is_err());
        assert!(resolve_package(Some("not a package"), &config).is_err());
    }

    #[test]
    fn test_resolve_service_account() {
        let config = Config {
            service_account_key: Some(PathBuf::from("configured.json")),
            ..Default::default()
        };

        assert_eq!(
            resolve_service_account(Some(Path::new("flag.json")), &config).unwrap(),
            PathBuf::from("flag.json")
        );
        assert_eq!(
            resolve_service_account(None, &config).unwrap(),
            PathBuf::from("configured.json")
        );
        assert!(resolve_service_account(None, &Config::default()).is_err());
    }
}
