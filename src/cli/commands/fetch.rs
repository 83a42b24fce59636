//! Fetch command - route a request through the agent

use crate::cli::args::FetchArgs;
use crate::cli::driver::Driver;
use crate::config::Config;
use crate::error::{AgentError, AgentResult};
use crate::lifecycle::FetchOutcome;
use crate::network::Request;
use console::style;
use std::io::Write;
use tokio::fs;

/// Execute the fetch command
///
/// The body goes to stdout (or `--output`); status and source go to stderr.
pub async fn execute(args: FetchArgs, config: &Config) -> AgentResult<()> {
    let driver = Driver::open(config).await?;
    let agent = driver.agent();

    let url = agent.deployment().origin.request_url(&args.target);
    let request = Request::new(args.method, url);
    let outcome = agent.handle_fetch(&request).await?;
    let response = outcome.response();

    let status = if response.is_ok() {
        style(response.status).green()
    } else {
        style(response.status).yellow()
    };
    let route = match &outcome {
        FetchOutcome::Passthrough(_) => String::new(),
        FetchOutcome::Served { route, .. } => format!(" ({})", route),
    };
    eprintln!(
        "{} {} {} {}{}",
        request.method,
        request.url,
        status,
        style(outcome.source_label()).cyan(),
        style(route).dim()
    );

    if args.include {
        for (name, value) in &response.headers {
            eprintln!("{}: {}", style(name).dim(), value);
        }
    }

    match args.output {
        Some(path) => {
            fs::write(&path, &response.body)
                .await
                .map_err(|e| AgentError::io(format!("writing {}", path.display()), e))?;
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(&response.body)
                .and_then(|_| stdout.flush())
                .map_err(|e| AgentError::io("writing response body", e))?;
        }
    }

    Ok(())
}
