//! Update, probe and start command implementations.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::warn;
use myriota_dfu::{SerialTransport, Transport, UpdatePlan, UploadKind, Updater};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::{Cli, CliError, open_transport, use_fancy_output, was_interrupted};

/// Files named on the `update` command line.
#[derive(Debug, Clone, Default)]
pub(crate) struct UpdateFiles {
    pub(crate) network_info: Option<PathBuf>,
    pub(crate) system_image: Option<PathBuf>,
    pub(crate) application: Option<PathBuf>,
}

fn read_image(path: Option<&Path>) -> Result<Option<Vec<u8>>> {
    path.map(|p| fs::read(p).with_context(|| format!("Failed to read {}", p.display())))
        .transpose()
}

/// Read every named file into a plan.
fn build_plan(files: &UpdateFiles, start_application: bool) -> Result<UpdatePlan> {
    let plan = UpdatePlan {
        network_info: read_image(files.network_info.as_deref())?,
        system_image: read_image(files.system_image.as_deref())?,
        user_application: read_image(files.application.as_deref())?,
        start_application,
    };

    if plan.is_empty() {
        return Err(CliError::Usage(
            "Nothing to do: pass --network-info, --system-image or --application".to_string(),
        )
        .into());
    }
    Ok(plan)
}

/// Turn a failure after Ctrl-C into a cancellation.
fn check_interrupted(err: anyhow::Error) -> anyhow::Error {
    if was_interrupted() {
        CliError::Cancelled("Interrupted".to_string()).into()
    } else {
        err
    }
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(0);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb
}

/// Close the session; a failure is only logged.
fn close_session<T: Transport>(updater: &mut Updater<T>) {
    if let Err(e) = updater.close() {
        warn!("Failed to close session: {e}");
    }
}

/// Run `f` against an open updater; the session is closed afterwards.
fn with_updater<F>(cli: &Cli, config: &Config, f: F) -> Result<()>
where
    F: FnOnce(&Updater<SerialTransport>) -> myriota_dfu::Result<()>,
{
    let transport = open_transport(cli, config)?;
    let mut updater = Updater::with_config(transport, config.updater_config());
    updater.open()?;
    let result = f(&updater);
    close_session(&mut updater);
    result.map_err(|e| check_interrupted(e.into()))
}

/// Update command implementation.
pub(crate) fn cmd_update(
    cli: &Cli,
    config: &Config,
    files: &UpdateFiles,
    start_application: bool,
) -> Result<()> {
    let plan = build_plan(files, start_application)?;

    if !cli.quiet {
        for (kind, data) in plan.uploads() {
            eprintln!(
                "    {} {} ({} bytes)",
                style("•").dim(),
                kind,
                data.len()
            );
        }
    }

    let transport = open_transport(cli, config)?;
    let mut updater = Updater::with_config(transport, config.updater_config());

    if !cli.quiet {
        eprintln!("{} Waiting for bootloader...", style("⏳").yellow());
    }

    let pb = progress_bar(cli.quiet);
    let mut current_kind: Option<UploadKind> = None;

    updater
        .run(&plan, |kind, current, total| {
            if current_kind != Some(kind) {
                current_kind = Some(kind);
                pb.reset();
                pb.set_length(total as u64);
                pb.set_message(format!("Uploading {kind}"));
            }
            pb.set_position(current as u64);
        })
        .map_err(|e| check_interrupted(e.into()))?;

    pb.finish_with_message("Complete");

    if !cli.quiet {
        let what = if start_application {
            "Update complete, application started"
        } else {
            "Update complete, module left in bootloader"
        };
        eprintln!("\n{} {}", style("🎉").green().bold(), what);
    }

    Ok(())
}

/// Probe command implementation.
pub(crate) fn cmd_probe(cli: &Cli, config: &Config) -> Result<()> {
    with_updater(cli, config, Updater::enter_bootloader)?;
    if !cli.quiet {
        eprintln!("{} Module is in bootloader mode", style("✓").green());
    }
    Ok(())
}

/// Start command implementation.
pub(crate) fn cmd_start(cli: &Cli, config: &Config) -> Result<()> {
    with_updater(cli, config, Updater::start_application)?;
    if !cli.quiet {
        eprintln!("{} Application started", style("✓").green());
    }
    Ok(())
}
