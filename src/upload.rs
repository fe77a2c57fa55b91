use std::path::PathBuf;
use std::time::Duration;

/// How long the tracker sits in `Processing` after the transfer finishes
/// before reporting `Complete`.
pub const PROCESSING_DELAY: Duration = Duration::from_millis(800);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadState {
    #[default]
    Idle,
    Uploading {
        percent: u8,
    },
    Processing,
    Complete,
}

impl UploadState {
    pub fn label(&self) -> &'static str {
        match self {
            UploadState::Idle => "Idle",
            UploadState::Uploading { .. } => "Uploading…",
            UploadState::Processing => "Processing…",
            UploadState::Complete => "Upload complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
}

/// Upload state machine: `Idle -> Uploading -> Processing -> Complete`,
/// with any failure dropping straight back to `Idle`.
#[derive(Debug, Default)]
pub struct UploadTracker {
    state: UploadState,
    file: Option<SelectedFile>,
}

impl UploadTracker {
    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn file(&self) -> Option<&SelectedFile> {
        self.file.as_ref()
    }

    pub fn is_busy(&self) -> bool {
        matches!(
            self.state,
            UploadState::Uploading { .. } | UploadState::Processing
        )
    }

    pub fn select_file(&mut self, file: SelectedFile) {
        if !self.is_busy() {
            self.file = Some(file);
        }
    }

    pub fn clear_file(&mut self) {
        if !self.is_busy() {
            self.file = None;
        }
    }

    /// Begin a transfer. Only allowed with a file selected and no transfer
    /// in flight.
    pub fn start(&mut self) -> bool {
        if self.file.is_none() || self.is_busy() {
            return false;
        }
        self.state = UploadState::Uploading { percent: 0 };
        true
    }

    pub fn on_progress(&mut self, percent: u8) {
        if let UploadState::Uploading { .. } = self.state {
            self.state = if percent >= 100 {
                UploadState::Processing
            } else {
                UploadState::Uploading { percent }
            };
        }
    }

    /// The server accepted the file.
    pub fn on_response(&mut self) {
        if self.is_busy() {
            self.state = UploadState::Processing;
        }
    }

    /// The fixed processing delay elapsed.
    pub fn on_delay_elapsed(&mut self) {
        if self.state == UploadState::Processing {
            self.state = UploadState::Complete;
        }
    }

    /// Transport or server failure: full reset, the file must be picked again.
    pub fn fail(&mut self) {
        self.state = UploadState::Idle;
        self.file = None;
    }

    /// Dismiss a finished upload.
    pub fn dismiss(&mut self) {
        if self.state == UploadState::Complete {
            self.state = UploadState::Idle;
        }
    }

    pub fn percent(&self) -> u8 {
        match self.state {
            UploadState::Idle => 0,
            UploadState::Uploading { percent } => percent,
            UploadState::Processing | UploadState::Complete => 100,
        }
    }
}

/// `round(loaded * 100 / total)`, or `None` when the total is unknown.
pub fn percent(loaded: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let pct = ((loaded as f64) * 100.0 / (total as f64)).round();
    Some(pct.clamp(0.0, 100.0) as u8)
}

pub fn format_size(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / 1024.0 / 1024.0)
}
