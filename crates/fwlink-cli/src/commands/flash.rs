//! Flash command - firmware update

use anyhow::{Context, Result};
use fwlink_client::{
    format_size, TransactionReport, TransactionState, UpdateConfig, UpdateController, UpdateEvent,
    UpdateImage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{BufRead, Write};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::guard::InterruptGuard;
use crate::output::OutputContext;

/// Flash a firmware image to the device
pub async fn flash(
    config: &UpdateConfig,
    file_path: &Path,
    assume_yes: bool,
    ctx: &OutputContext,
) -> Result<()> {
    let image = UpdateImage::from_file(file_path)
        .with_context(|| format!("Failed to read firmware file: {}", file_path.display()))?;

    let guard = InterruptGuard::install()?;
    let controller = UpdateController::from_config(config)
        .context("Failed to create update controller")?
        .with_guard(guard.clone());

    // Refuse bad images before bothering the user
    if let Err(rejection) = controller.validator().validate(&image) {
        return Err(anyhow::anyhow!(rejection)).context("Firmware image rejected");
    }

    ctx.info(&format!(
        "Firmware: {} ({})",
        image.name(),
        format_size(image.size())
    ));

    if !assume_yes && !confirm(&image, &config.connection.base_url)? {
        ctx.info("Cancelled");
        return Ok(());
    }

    let mut transaction = controller
        .start(image)
        .context("Failed to start firmware update")?;
    guard.attach(transaction.cancel_token());
    debug!(id = %transaction.id(), "Firmware update started");

    let upload_bar = upload_bar(ctx)?;
    let mut reconnect_spinner: Option<ProgressBar> = None;
    let mut report: Option<TransactionReport> = None;

    while let Some(event) = transaction.next_event().await {
        match event {
            UpdateEvent::StateChanged(TransactionState::Uploading) => {
                upload_bar.set_message("Uploading...");
            }
            UpdateEvent::Progress(progress) => {
                upload_bar.set_position(progress.percent as u64);
                if progress.is_complete() {
                    upload_bar.set_message("Waiting for device...");
                }
            }
            UpdateEvent::Outcome(outcome) => {
                if outcome.is_success() {
                    upload_bar.finish_with_message("Uploaded");
                } else {
                    upload_bar.abandon_with_message("Failed");
                }
            }
            UpdateEvent::StateChanged(TransactionState::Reconnecting) => {
                let spinner = reconnect_spinner_bar(ctx)?;
                spinner.set_message("Device is rebooting...");
                reconnect_spinner = Some(spinner);
            }
            UpdateEvent::ReconnectAttempt(attempt) => {
                if let Some(spinner) = &reconnect_spinner {
                    spinner.set_message(format!(
                        "Waiting for device ({}/{})",
                        attempt.number, attempt.max_attempts
                    ));
                }
            }
            UpdateEvent::Finished(finished) => {
                report = Some(finished);
            }
            UpdateEvent::StateChanged(_) => {}
        }
    }

    if let Some(spinner) = reconnect_spinner {
        spinner.finish_and_clear();
    }
    if !upload_bar.is_finished() {
        upload_bar.abandon();
    }

    let report = match report {
        Some(report) => report,
        None => transaction
            .wait()
            .await
            .context("Firmware update ended without a report")?,
    };

    print_report(&report, ctx);

    if report.is_success() {
        Ok(())
    } else {
        Err(anyhow::anyhow!("Firmware update failed: {}", report.message()))
    }
}

fn print_report(report: &TransactionReport, ctx: &OutputContext) {
    ctx.print_json(report);

    let message = report.message();
    if report.caveat.is_some() {
        ctx.warn(&message);
        ctx.warn("Check the device manually before retrying.");
    } else if report.is_success() {
        ctx.success(&message);
    } else {
        ctx.report(report.outcome.severity(), &message);
    }
}

/// Ask the user before writing firmware
fn confirm(image: &UpdateImage, device: &str) -> Result<bool> {
    eprint!(
        "Flash {} ({}) to {}? The device will reboot. [y/N] ",
        image.name(),
        format_size(image.size()),
        device
    );
    std::io::stderr().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn upload_bar(ctx: &OutputContext) -> Result<ProgressBar> {
    if !ctx.interactive() {
        return Ok(ProgressBar::hidden());
    }

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}% {msg}")?
            .progress_chars("=>-"),
    );
    Ok(pb)
}

fn reconnect_spinner_bar(ctx: &OutputContext) -> Result<ProgressBar> {
    if !ctx.interactive() {
        return Ok(ProgressBar::hidden());
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.yellow} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(120));
    Ok(spinner)
}
