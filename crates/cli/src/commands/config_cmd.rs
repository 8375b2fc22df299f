//! `colloquy config` — Configuration management commands.

use colloquy_config::AppConfig;

/// Print the resolved configuration as TOML with secrets redacted.
pub fn show() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load()?;
    if config.search.api_key.is_some() {
        config.search.api_key = Some("[REDACTED]".into());
    }
    print!("{}", config.to_toml());
    Ok(())
}
