//! Wait command - poll until the device answers again

use anyhow::{Context, Result};
use fwlink_client::{PollResult, UpdateConfig, UpdateController};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::output::OutputContext;

/// Wait for a rebooting device to come back online
pub async fn wait(config: &UpdateConfig, ctx: &OutputContext) -> Result<()> {
    let controller =
        UpdateController::from_config(config).context("Failed to create update controller")?;
    let policy = controller.poller().policy();

    ctx.info(&format!(
        "Waiting for {} (up to {} attempts, every {:?})",
        config.connection.base_url, policy.max_attempts, policy.interval
    ));

    let spinner = if ctx.interactive() {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.yellow} {msg}")?);
        spinner.enable_steady_tick(Duration::from_millis(120));
        spinner
    } else {
        ProgressBar::hidden()
    };

    let result = controller
        .poller()
        .run(|attempt| {
            spinner.set_message(format!(
                "Attempt {}/{}",
                attempt.number, attempt.max_attempts
            ))
        })
        .await;
    spinner.finish_and_clear();

    ctx.print_json(&result);

    match result {
        PollResult::Alive { attempts } => {
            ctx.success(&format!("Device is online (attempt {})", attempts));
            Ok(())
        }
        PollResult::ExhaustedAttempts { attempts } => Err(anyhow::anyhow!(
            "Device did not respond after {} attempts",
            attempts
        )),
    }
}
