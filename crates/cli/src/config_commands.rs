use {anyhow::Result, clap::Subcommand, secrecy::Secret};

use onegate_config::{OnegateConfig, discover_and_load, update_config};

const REDACTED: &str = "<redacted>";

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration (tokens redacted).
    Show,
    /// Validate the configuration and report problems.
    Check,
    /// Set the access token of a service in the config file.
    SetToken {
        token: String,
        /// Service name; every service when omitted.
        #[arg(long)]
        service: Option<String>,
    },
}

pub fn handle_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => show(),
        ConfigAction::Check => check(),
        ConfigAction::SetToken { token, service } => set_token(token, service.as_deref()),
    }
}

fn show() -> Result<()> {
    let config = redacted(discover_and_load()?);
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn check() -> Result<()> {
    let config = discover_and_load()?;
    config.validate()?;
    println!("config ok: {} service(s)", config.services.len());
    Ok(())
}

fn set_token(token: String, service: Option<&str>) -> Result<()> {
    let mut matched = false;
    let path = update_config(|config| {
        for entry in &mut config.services {
            if service.is_none_or(|name| name == entry.name) {
                entry.access_token = Some(Secret::new(token.clone()));
                matched = true;
            }
        }
    })?;
    if !matched {
        anyhow::bail!("no service named {}", service.unwrap_or_default());
    }
    println!("updated {}", path.display());
    Ok(())
}

fn redacted(mut config: OnegateConfig) -> OnegateConfig {
    for service in &mut config.services {
        if service.access_token.is_some() {
            service.access_token = Some(Secret::new(REDACTED.into()));
        }
    }
    config
}
