//! Install command - stage the core shell

use crate::cli::args::InstallArgs;
use crate::cli::commands::activate::print_outcome;
use crate::cli::driver::Driver;
use crate::cli::ui::{self, TaskSpinner};
use crate::config::Config;
use crate::error::AgentResult;
use console::style;

/// Execute the install command
pub async fn execute(args: InstallArgs, config: &Config) -> AgentResult<()> {
    let mut driver = Driver::open(config).await?;
    let deployment = driver.agent().deployment();

    let spinner = TaskSpinner::start(&format!(
        "Staging {} core shell resources from {}",
        deployment.core.len(),
        deployment.origin
    ));

    let staged = match driver.install().await {
        Ok(staged) => staged,
        Err(e) => {
            spinner.stop_error("Install failed, nothing was staged");
            return Err(e);
        }
    };
    spinner.stop(&format!("Staged {} resources", staged.len()));
    ui::key_value("manifest version", driver.agent().deployment().version());

    if args.no_activate {
        println!(
            "  {}",
            style("Left in staging; run `shellcache activate` to switch over").dim()
        );
        return Ok(());
    }

    if driver.skip_waiting_requested() {
        let outcome = driver.activate().await?;
        print_outcome(&outcome);
    }

    Ok(())
}
