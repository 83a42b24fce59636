//! Status command - lifecycle state and cache contents

use crate::cli::args::{OutputFormat, StatusArgs};
use crate::cli::driver::Driver;
use crate::cli::ui::{self, CHECK, CROSS, WARN};
use crate::config::Config;
use crate::error::AgentResult;
use crate::lifecycle::AgentState;
use crate::manifest::Origin;
use crate::store::{CacheName, CacheStorage};
use console::style;
use serde::Serialize;
use std::collections::HashSet;

#[derive(Serialize)]
struct ContainerStatus {
    name: CacheName,
    exists: bool,
    entries: usize,
}

#[derive(Serialize)]
struct StatusReport {
    origin: String,
    manifest_version: String,
    state: AgentState,
    serving_version: Option<String>,
    resources: usize,
    cached_resources: usize,
    containers: Vec<ContainerStatus>,
}

/// Execute the status command
pub async fn execute(args: StatusArgs, config: &Config) -> AgentResult<()> {
    let driver = Driver::open(config).await?;
    let agent = driver.agent();
    let deployment = agent.deployment();
    let storage = agent.storage().as_ref();

    let mut containers = Vec::new();
    let mut cached = HashSet::new();
    for name in CacheName::all() {
        containers.push(inspect(storage, name, &deployment.origin, &mut cached).await?);
    }

    let report = StatusReport {
        origin: deployment.origin.to_string(),
        manifest_version: deployment.version(),
        state: agent.state().await,
        serving_version: agent.serving_version().await,
        resources: deployment.manifest.len(),
        cached_resources: deployment
            .manifest
            .keys()
            .filter(|key| cached.contains(*key))
            .count(),
        containers,
    };

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_text(&report, &driver),
    }

    Ok(())
}

async fn inspect(
    storage: &dyn CacheStorage,
    name: CacheName,
    origin: &Origin,
    cached: &mut HashSet<String>,
) -> AgentResult<ContainerStatus> {
    if !storage.has(name).await? {
        return Ok(ContainerStatus {
            name,
            exists: false,
            entries: 0,
        });
    }

    let keys = storage.open(name).await?.keys().await?;
    if name == CacheName::Content {
        cached.extend(keys.iter().filter_map(|url| origin.logical_key(url)));
    }

    Ok(ContainerStatus {
        name,
        exists: true,
        entries: keys.len(),
    })
}

fn print_text(report: &StatusReport, driver: &Driver) {
    println!("{}", style("shellcache Agent Status").bold().cyan());
    println!();

    let state = match report.state {
        AgentState::Active => format!("{}{}", CHECK, style(report.state).green()),
        AgentState::Uninstalled => format!("{}{}", CROSS, style(report.state).red()),
        _ => format!("{}{}", WARN, style(report.state).yellow()),
    };
    println!("{}", style("Agent:").bold());
    println!("  {}", state);
    ui::key_value("origin", &report.origin);
    ui::key_value("manifest version", &report.manifest_version);
    match &report.serving_version {
        Some(version) if *version == report.manifest_version => ui::key_value("serving", "this version"),
        Some(version) => ui::key_value("serving", format!("previous version {}", version)),
        None => ui::key_value("serving", style("network only").dim()),
    }

    let record = driver.record();
    if let Some(at) = record.installed_at {
        ui::key_value("installed", at.to_rfc3339());
    }
    if let Some(at) = record.activated_at {
        ui::key_value("activated", at.to_rfc3339());
    }

    println!();
    println!("{}", style("Caches:").bold());
    for container in &report.containers {
        if container.exists {
            println!("  {}{}: {} entries", CHECK, container.name, container.entries);
        } else {
            println!("  {}{}: {}", WARN, container.name, style("absent").dim());
        }
    }

    println!();
    let coverage = format!(
        "{}/{} manifest resources available offline",
        report.cached_resources, report.resources
    );
    if report.cached_resources == report.resources {
        println!("{}", style(coverage).green().bold());
    } else {
        println!("{}", style(coverage).yellow().bold());
        println!(
            "  {}",
            style("Run: shellcache message downloadOffline").dim()
        );
    }
}
