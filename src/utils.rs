use vosk_service_lib::{BundleDescriptor, DownloadEvent, InstalledBundle, Phase};

/// Notification text for a bus event, `None` for events with no phase.
pub fn event_label(event: &DownloadEvent) -> Option<String> {
    let phase = match event {
        DownloadEvent::Starting { .. } => Phase::Starting,
        DownloadEvent::Restarting { .. } => Phase::Restarting,
        DownloadEvent::Progress { percent, .. } => Phase::Downloading(*percent),
        DownloadEvent::Unzipping { .. } => Phase::Unzipping,
        DownloadEvent::Complete { .. } => Phase::Complete,
        DownloadEvent::Cleared { .. } => return None,
    };
    Some(format!("{}: {phase}", event.bundle()))
}

pub fn catalog_row(bundle: &BundleDescriptor, marks: &[&str]) -> String {
    let mut row = format!(
        "{:<40} {:<8} {:<10} {}",
        bundle.name, bundle.language, bundle.size_label, bundle.language_label
    );
    if bundle.obsolete {
        row.push_str(" (obsolete)");
    }
    for mark in marks {
        row.push_str(&format!(" [{mark}]"));
    }
    row
}

pub fn installed_row(bundle: &InstalledBundle, selected: bool) -> String {
    let marker = if selected { '*' } else { ' ' };
    format!(
        "{marker} {:<40} {:<8} {:<10} {}",
        bundle.name, bundle.language, bundle.size_label, bundle.version
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_follow_download_phases() {
        let progress = DownloadEvent::Progress {
            bundle: "small-en".to_string(),
            percent: 42,
            bytes_read: 42,
            total_bytes: Some(100),
        };
        assert_eq!(
            event_label(&progress).as_deref(),
            Some("small-en: downloading 42%")
        );
        assert_eq!(
            event_label(&DownloadEvent::Unzipping {
                bundle: "small-en".to_string()
            })
            .as_deref(),
            Some("small-en: unzipping")
        );
        assert_eq!(
            event_label(&DownloadEvent::Cleared {
                bundle: "small-en".to_string()
            }),
            None
        );
    }
}
