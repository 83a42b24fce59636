//! Config command - show or initialize configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::cli::ui::{CHECK, WARN};
use crate::config::{Config, ConfigManager};
use crate::error::AgentResult;
use console::style;

/// Execute the config command
pub async fn execute(args: ConfigArgs, config: &Config, manager: &ConfigManager) -> AgentResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
    }

    Ok(())
}

fn show_config(config: &Config) -> AgentResult<()> {
    let toml = toml::to_string_pretty(config)?;
    println!("{}", toml);
    println!(
        "{}",
        style(format!(
            "# storage dir: {}",
            config.storage.resolved_dir().display()
        ))
        .dim()
    );
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> AgentResult<()> {
    let path = manager.path();

    if path.exists() && !force {
        println!(
            "{}Config already exists at {} - {}",
            WARN,
            path.display(),
            style("Use --force to overwrite").dim()
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    println!(
        "{}Configuration initialized ({})",
        CHECK,
        style(path.display()).dim()
    );

    Ok(())
}
