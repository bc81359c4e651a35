use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use vosk_service_lib::connectivity::probe_address;
use vosk_service_lib::{
    Accepted, AppError, DownloadEvent, ErrorEvent, ModelService, ReachabilityProbe,
    RecoveryOutcome, Rejected, Selection,
};

use crate::utils::{catalog_row, event_label, installed_row};

const POLL: Duration = Duration::from_millis(200);

fn user_error(err: AppError) -> String {
    log::error!("{err}");
    err.user_message().to_string()
}

fn rejected(err: Rejected) -> String {
    match err {
        Rejected::Busy { active } => format!(
            "{active} is still downloading; run `vosk-models recover` to finish it or `vosk-models cancel` to drop it"
        ),
        other => other.to_string(),
    }
}

pub fn list(service: &ModelService, all: bool) -> Result<(), String> {
    let bundles = if all {
        service.catalog()
    } else {
        service.available()
    }
    .map_err(user_error)?;

    if bundles.is_empty() {
        println!("The catalog lists no models");
        return Ok(());
    }

    let installed = service.installed();
    let selected = service.selected();
    let pending = service.pending();

    for bundle in &bundles {
        let mut marks = Vec::new();
        if installed.iter().any(|b| b.name == bundle.name) {
            marks.push("installed");
        }
        if selected.as_deref() == Some(bundle.name.as_str()) {
            marks.push("active");
        }
        if pending.as_deref() == Some(bundle.name.as_str()) {
            marks.push("downloading");
        }
        println!("{}", catalog_row(bundle, &marks));
    }
    Ok(())
}

pub fn installed(service: &ModelService) -> Result<(), String> {
    let installed = service.installed();
    if installed.is_empty() {
        println!("No models installed under {}", service.paths().root().display());
        return Ok(());
    }

    let selected = service.selected();
    for bundle in &installed {
        let active = selected.as_deref() == Some(bundle.name.as_str());
        println!("{}", installed_row(bundle, active));
    }
    Ok(())
}

pub fn install(service: &ModelService, name: &str) -> Result<(), String> {
    let bundle = service.find(name).map_err(user_error)?;
    let bus = service.bus();
    let progress = bus.subscribe_progress();
    let errors = bus.subscribe_errors();

    match service.request_download(bundle).map_err(rejected)? {
        Accepted::Started => log::debug!("Download of {name} started"),
        Accepted::AlreadyActive => log::debug!("Download of {name} already running"),
    }

    let result = follow(&progress, &errors, name, false);
    service.wait();
    result?;
    println!("Installed {name}");
    Ok(())
}

pub fn select(service: &ModelService, name: &str) -> Result<(), String> {
    if service.installed().iter().any(|b| b.name == name) {
        service.activate(name).map_err(user_error)?;
        println!("Active model: {name}");
        return Ok(());
    }

    let bundle = service.find(name).map_err(user_error)?;

    let bus = service.bus();
    let progress = bus.subscribe_progress();
    let errors = bus.subscribe_errors();
    let _listener = service
        .spawn_request_listener()
        .map_err(|e| format!("Could not start the download listener: {e}"))?;

    match service.select(&bundle).map_err(user_error)? {
        Selection::Activated => {}
        Selection::DownloadRequested => {
            let result = follow(&progress, &errors, name, false);
            service.wait();
            result?;
            service.activate(name).map_err(user_error)?;
        }
    }
    println!("Active model: {name}");
    Ok(())
}

pub fn remove(service: &ModelService, name: &str) -> Result<(), String> {
    if service.remove(name).map_err(user_error)? {
        println!("Removed {name}");
    } else {
        println!("{name} is not installed");
    }
    Ok(())
}

pub fn status(service: &ModelService) -> Result<(), String> {
    println!("Models root: {}", service.paths().root().display());
    println!(
        "Active model: {}",
        service.selected().as_deref().unwrap_or("none")
    );
    println!("Installed models: {}", service.installed().len());

    match service.pending() {
        Some(name) => println!(
            "Pending download: {name} (run `vosk-models recover` to resume or `vosk-models cancel` to drop it)"
        ),
        None => println!("Pending download: none"),
    }

    if let Some(phase) = service.session().and_then(|s| s.phase()) {
        println!("Current phase: {phase}");
    }
    Ok(())
}

pub fn cancel(service: &ModelService) -> Result<(), String> {
    let pending = service.pending();
    if service.cancel() {
        println!(
            "Discarded pending download of {}",
            pending.as_deref().unwrap_or("model")
        );
    } else {
        println!("Nothing to cancel");
    }
    Ok(())
}

pub fn recover(service: &ModelService) -> Result<(), String> {
    let bus = service.bus();
    let progress = bus.subscribe_progress();
    let errors = bus.subscribe_errors();

    match service.recover() {
        RecoveryOutcome::Idle => println!("No interrupted download"),
        RecoveryOutcome::AlreadyRunning(name) | RecoveryOutcome::Restarted(name) => {
            let result = follow(&progress, &errors, &name, false);
            service.wait();
            result?;
            println!("Installed {name}");
        }
        RecoveryOutcome::Deferred(name) => {
            println!("The catalog is unreachable; {name} stays pending. Try `vosk-models watch`.")
        }
        RecoveryOutcome::Abandoned(name) => {
            println!("{name} is no longer offered; the pending download was dropped")
        }
        RecoveryOutcome::Refused(_, err) => return Err(rejected(err)),
    }
    Ok(())
}

/// Keeps the process alive until the pending download finishes, restarting
/// it whenever the catalog host becomes reachable again.
pub fn watch(service: &ModelService, interval: u64) -> Result<(), String> {
    let Some(name) = service.pending() else {
        println!("No pending download");
        return Ok(());
    };

    let catalog_url = &service.config().catalog_url;
    let address = probe_address(catalog_url)
        .ok_or_else(|| format!("Cannot derive a host to probe from {catalog_url}"))?;

    let bus = service.bus();
    let progress = bus.subscribe_progress();
    let errors = bus.subscribe_errors();
    let _watcher = service
        .connectivity_watcher()
        .spawn(&bus)
        .map_err(|e| format!("Could not start the connectivity watcher: {e}"))?;

    let probe = ReachabilityProbe::new();
    let _probe = probe
        .start(bus, address, Duration::from_secs(interval.max(1)))
        .map_err(|e| format!("Could not start the reachability probe: {e}"))?;

    println!("Waiting to finish {name}");
    let result = follow(&progress, &errors, &name, true);
    probe.stop();
    service.wait();
    result?;
    println!("Installed {name}");
    Ok(())
}

/// Prints progress for `name` until it completes or fails. With
/// `tolerate_retryable`, network and storage errors are reported and waiting
/// continues, since the watcher restarts the download.
fn follow(
    progress: &Receiver<DownloadEvent>,
    errors: &Receiver<ErrorEvent>,
    name: &str,
    tolerate_retryable: bool,
) -> Result<(), String> {
    loop {
        match progress.recv_timeout(POLL) {
            Ok(event) if event.bundle() == name => {
                if let Some(label) = event_label(&event) {
                    println!("{label}");
                }
                match event {
                    DownloadEvent::Complete { .. } => return Ok(()),
                    DownloadEvent::Cleared { .. } => {
                        // A corrupt archive clears progress just before its error arrives.
                        return match errors.recv_timeout(POLL) {
                            Ok(error) => Err(report(&error)),
                            Err(_) => Err(format!("Download of {name} was discarded")),
                        };
                    }
                    _ => {}
                }
            }
            Ok(_) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Err("Progress updates stopped unexpectedly".to_string())
            }
        }

        for error in errors.try_iter() {
            if error.bundle.as_deref().is_some_and(|bundle| bundle != name) {
                continue;
            }
            let message = report(&error);
            if !(tolerate_retryable && error.kind.is_retryable()) {
                return Err(message);
            }
            eprintln!("{message} Waiting for the connection to come back.");
        }
    }
}

fn report(error: &ErrorEvent) -> String {
    log::warn!("{:?} error: {}", error.kind, error.message);
    error.kind.user_message().to_string()
}
