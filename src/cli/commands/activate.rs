//! Activate command - reconcile caches and start serving

use crate::cli::driver::Driver;
use crate::cli::ui::{self, CHECK, WARN};
use crate::config::Config;
use crate::error::AgentResult;
use crate::lifecycle::ReconcileOutcome;
use console::style;

/// Execute the activate command
pub async fn execute(config: &Config) -> AgentResult<()> {
    let mut driver = Driver::open(config).await?;
    let outcome = driver.activate().await?;
    print_outcome(&outcome);
    Ok(())
}

/// Print what reconciliation did
pub(crate) fn print_outcome(outcome: &ReconcileOutcome) {
    match outcome {
        ReconcileOutcome::Completed(report) => {
            println!(
                "{}{} ({:?} start)",
                CHECK,
                style("Agent active").green().bold(),
                report.path
            );
            ui::key_value("retained", report.retained.len());
            ui::key_value("pruned", report.pruned.len());
            ui::key_value("merged", report.merged.len());
        }
        ReconcileOutcome::Wiped {
            failed_step,
            reason,
        } => {
            println!(
                "{}{}",
                WARN,
                style("Agent active with empty caches").yellow().bold()
            );
            if let Some(step) = failed_step {
                ui::key_value("failed step", step);
            }
            ui::key_value("reason", reason);
            println!(
                "  {}",
                style("Resources will be fetched from the network and cached lazily").dim()
            );
        }
    }
}
