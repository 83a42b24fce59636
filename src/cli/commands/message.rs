//! Message command - deliver a control command to the agent

use crate::cli::args::MessageArgs;
use crate::cli::commands::activate::print_outcome;
use crate::cli::driver::Driver;
use crate::cli::ui::{self, TaskSpinner, CHECK, WARN};
use crate::config::Config;
use crate::error::AgentResult;
use crate::lifecycle::{AgentState, ControlCommand, ControlOutcome};
use console::style;
use serde_json::json;

/// Execute the message command
pub async fn execute(args: MessageArgs, config: &Config) -> AgentResult<()> {
    let mut driver = Driver::open(config).await?;

    let spinner = matches!(
        ControlCommand::parse(&args.command),
        Some(ControlCommand::DownloadOffline)
    )
    .then(|| TaskSpinner::start("Downloading missing resources"));

    let outcome = match driver.agent().handle_message(&args.command).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Some(spinner) = spinner {
                spinner.stop_error("Download failed, nothing was cached");
            }
            return Err(e);
        }
    };

    match outcome {
        ControlOutcome::Ignored => {
            println!(
                "{}Ignored unknown message {:?}",
                WARN,
                style(&args.command).yellow()
            );
        }
        ControlOutcome::SkipWaiting => {
            driver.audit_message(&args.command, json!("skip_waiting")).await;
            println!("{}Skip waiting requested", CHECK);

            // A waiting version takes over as soon as it may skip waiting
            if driver.agent().state().await == AgentState::Staging {
                let outcome = driver.activate().await?;
                print_outcome(&outcome);
            }
        }
        ControlOutcome::Prefetched(report) => {
            driver
                .audit_message(
                    &args.command,
                    json!({ "fetched": report.fetched.len(), "already_cached": report.already_cached }),
                )
                .await;
            let message = format!("Cached {} resources for offline use", report.fetched.len());
            match spinner {
                Some(spinner) => spinner.stop(&message),
                None => println!("{}{}", CHECK, message),
            }
            ui::key_value("already cached", report.already_cached);
        }
    }

    Ok(())
}
