//! Tool capabilities for Colloquy.
//!
//! Three capabilities behind the [`ToolCapability`] seam from colloquy-core:
//! - [`BrowserCapability`] — web search/open/find over a `SearchBackend`
//! - [`PythonCapability`] — sandboxed code execution in a container
//! - [`ApplyPatchCapability`] — patch-envelope application to a workspace
//!
//! [`build_router`] assembles the enabled set from configuration.

pub mod apply_patch;
pub mod browser;
pub mod python;

pub use apply_patch::ApplyPatchCapability;
pub use browser::{BrowserCapability, ExaClient, SearchBackend};
pub use python::{PythonCapability, PythonRunner};

use std::path::PathBuf;

use colloquy_config::AppConfig;
use colloquy_core::{ConfigError, Error, ToolRouter};

/// Build a router holding the capabilities the configuration enables.
///
/// The browser tool requires a search API key and fails construction
/// without one; the other tools have no startup prerequisites.
pub fn build_router(config: &AppConfig) -> Result<ToolRouter, Error> {
    let mut router = ToolRouter::new();

    if config.tools.browser {
        let api_key = config.search.api_key.as_deref().ok_or_else(|| {
            ConfigError::Missing("search.api_key (required by the browser tool)".into())
        })?;
        let backend = ExaClient::new(&config.search.base_url, api_key);
        router.register(Box::new(BrowserCapability::new(Box::new(backend))));
    }

    if config.tools.python {
        let runner = match config.tools.python_runner.as_str() {
            "native" => PythonRunner::Native,
            _ => PythonRunner::Docker,
        };
        router.register(Box::new(PythonCapability::with_runner(
            &config.tools.python_image,
            runner,
            config.tools.python_timeout_secs,
        )));
    }

    if config.tools.apply_patch {
        let root = config
            .tools
            .workspace_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        router.register(Box::new(ApplyPatchCapability::new(root)));
    }

    Ok(router)
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::ToolClass;

    #[test]
    fn default_config_enables_nothing() {
        let config = AppConfig::default();
        let router = build_router(&config).unwrap();
        assert!(!router.is_enabled(ToolClass::Browser));
        assert!(!router.is_enabled(ToolClass::Python));
        assert!(!router.is_enabled(ToolClass::ApplyPatch));
    }

    #[test]
    fn browser_requires_api_key() {
        let mut config = AppConfig::default();
        config.tools.browser = true;
        assert!(build_router(&config).is_err());

        config.search.api_key = Some("exa-key".into());
        let router = build_router(&config).unwrap();
        assert!(router.is_enabled(ToolClass::Browser));
    }

    #[test]
    fn python_and_patch_need_no_secrets() {
        let mut config = AppConfig::default();
        config.tools.python = true;
        config.tools.apply_patch = true;
        let router = build_router(&config).unwrap();
        assert!(router.is_enabled(ToolClass::Python));
        assert!(router.is_enabled(ToolClass::ApplyPatch));
    }
}
