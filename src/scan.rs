//! Camera-decode session lifecycle.
//!
//! Exactly one decode attempt may be live per controller. The camera and
//! decoder sit behind [`BarcodeDecoder`] so the underlying library (native
//! barcode plugin, ZXing, html5-qrcode bridge) is swappable; the controller
//! only guarantees the state machine: Idle -> Starting -> Running ->
//! Stopping -> Idle, with the decoder released on every exit path.

use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct DecoderError(pub String);

#[derive(Debug, Error)]
pub enum ScanError {
    /// Missing required selection; nothing was acquired.
    #[error("{0}")]
    Validation(&'static str),
    /// A session is already in Starting or Running.
    #[error("a scan session is already active")]
    Busy,
    /// Camera permission denied; not retried automatically.
    #[error("camera permission denied")]
    Permission,
    /// Camera enumeration or decode-loop start failed.
    #[error("failed to start camera decode: {0}")]
    DecodeStart(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Idle => "idle",
            ScanStatus::Starting => "starting",
            ScanStatus::Running => "running",
            ScanStatus::Stopping => "stopping",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CameraDevice {
    pub id: String,
    pub label: String,
}

/// Capability surface of one scanning backend. `start` begins the decode
/// loop on the given device; decoded symbols are delivered to the
/// controller out-of-band (callback or polling, depending on the backend)
/// and funnelled into [`ScanController::handle_decode`]. `stop` must be
/// safe to call at any time, including when no loop is running.
pub trait BarcodeDecoder {
    fn check_permission(&mut self) -> Result<bool, DecoderError>;
    fn request_permission(&mut self) -> Result<bool, DecoderError>;
    fn enumerate_devices(&mut self) -> Result<Vec<CameraDevice>, DecoderError>;
    fn start(&mut self, device_id: &str) -> Result<(), DecoderError>;
    fn stop(&mut self);
}

#[derive(Debug, Clone)]
pub struct ScanSession {
    pub class_id: String,
    pub scan_type_id: String,
    pub device_id: String,
}

#[derive(Debug)]
pub enum DecodeOutcome {
    /// First non-empty symbol of the session. The decoder is already
    /// stopped when this is returned; at most one per session.
    Accepted {
        class_id: String,
        scan_type_id: String,
        value: String,
    },
    /// Empty symbol, no active session, or a late callback after stop.
    Ignored,
}

pub struct ScanController<D: BarcodeDecoder> {
    decoder: D,
    status: ScanStatus,
    session: Option<ScanSession>,
}

impl<D: BarcodeDecoder> ScanController<D> {
    pub fn new(decoder: D) -> Self {
        ScanController {
            decoder,
            status: ScanStatus::Idle,
            session: None,
        }
    }

    pub fn status(&self) -> ScanStatus {
        self.status
    }

    pub fn session(&self) -> Option<&ScanSession> {
        self.session.as_ref()
    }

    pub fn devices(&mut self) -> Result<Vec<CameraDevice>, ScanError> {
        self.decoder
            .enumerate_devices()
            .map_err(|e| ScanError::DecodeStart(e.to_string()))
    }

    /// Begin one decode attempt. Validation happens before any camera
    /// call, so a rejected start leaves zero acquisitions behind.
    pub fn start(
        &mut self,
        class_id: &str,
        scan_type_id: &str,
        device_id: Option<&str>,
    ) -> Result<(), ScanError> {
        let class_id = class_id.trim();
        let scan_type_id = scan_type_id.trim();
        if class_id.is_empty() {
            return Err(ScanError::Validation("select a class"));
        }
        if scan_type_id.is_empty() {
            return Err(ScanError::Validation("select a scan type"));
        }
        if self.status != ScanStatus::Idle {
            return Err(ScanError::Busy);
        }

        self.status = ScanStatus::Starting;
        match self.acquire(device_id) {
            Ok(device_id) => {
                self.session = Some(ScanSession {
                    class_id: class_id.to_string(),
                    scan_type_id: scan_type_id.to_string(),
                    device_id,
                });
                self.status = ScanStatus::Running;
                Ok(())
            }
            Err(e) => {
                self.session = None;
                self.status = ScanStatus::Idle;
                Err(e)
            }
        }
    }

    fn acquire(&mut self, device_id: Option<&str>) -> Result<String, ScanError> {
        let granted = self
            .decoder
            .check_permission()
            .map_err(|e| ScanError::DecodeStart(e.to_string()))?;
        let granted = if granted {
            true
        } else {
            self.decoder
                .request_permission()
                .map_err(|e| ScanError::DecodeStart(e.to_string()))?
        };
        if !granted {
            return Err(ScanError::Permission);
        }

        let devices = self
            .decoder
            .enumerate_devices()
            .map_err(|e| ScanError::DecodeStart(e.to_string()))?;
        let device = match device_id {
            Some(want) => devices
                .iter()
                .find(|d| d.id == want)
                .ok_or_else(|| ScanError::DecodeStart(format!("unknown camera device: {want}")))?,
            None => devices
                .first()
                .ok_or_else(|| ScanError::DecodeStart("no camera devices".to_string()))?,
        };
        let chosen = device.id.clone();

        if let Err(e) = self.decoder.start(&chosen) {
            // Partial acquisition: pair the failed start with a stop.
            self.decoder.stop();
            return Err(ScanError::DecodeStart(e.to_string()));
        }
        Ok(chosen)
    }

    /// Decode-loop callback entry. The loop may fire once more after a
    /// stop was requested; that invocation lands in `Ignored`.
    pub fn handle_decode(&mut self, raw: &str) -> DecodeOutcome {
        if self.status != ScanStatus::Running {
            return DecodeOutcome::Ignored;
        }
        let value = raw.trim();
        if value.is_empty() {
            return DecodeOutcome::Ignored;
        }

        self.status = ScanStatus::Stopping;
        self.decoder.stop();
        self.status = ScanStatus::Idle;

        let Some(session) = self.session.take() else {
            return DecodeOutcome::Ignored;
        };
        log::info!(
            "scan decoded class={} type={} value={}",
            session.class_id,
            session.scan_type_id,
            value
        );
        DecodeOutcome::Accepted {
            class_id: session.class_id,
            scan_type_id: session.scan_type_id,
            value: value.to_string(),
        }
    }

    /// Cooperative cancel. The decoder is released before this returns;
    /// calling it while Idle is a no-op.
    pub fn stop(&mut self) {
        if self.status == ScanStatus::Idle {
            return;
        }
        self.status = ScanStatus::Stopping;
        self.decoder.stop();
        self.session = None;
        self.status = ScanStatus::Idle;
    }
}

impl<D: BarcodeDecoder> Drop for ScanController<D> {
    fn drop(&mut self) {
        // No camera stream outlives its owner.
        self.stop();
    }
}

/// Bridge backend for the shipped daemon: the physical camera lives in the
/// UI process, which forwards decoded symbols over IPC. Permission is the
/// UI's problem by the time symbols reach us, so this adapter reports a
/// single always-available logical device and tracks open/closed state.
pub struct UiCameraDecoder {
    active: bool,
}

impl UiCameraDecoder {
    pub fn new() -> Self {
        UiCameraDecoder { active: false }
    }
}

impl Default for UiCameraDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BarcodeDecoder for UiCameraDecoder {
    fn check_permission(&mut self) -> Result<bool, DecoderError> {
        Ok(true)
    }

    fn request_permission(&mut self) -> Result<bool, DecoderError> {
        Ok(true)
    }

    fn enumerate_devices(&mut self) -> Result<Vec<CameraDevice>, DecoderError> {
        Ok(vec![CameraDevice {
            id: "ui-camera".to_string(),
            label: "UI camera bridge".to_string(),
        }])
    }

    fn start(&mut self, device_id: &str) -> Result<(), DecoderError> {
        log::debug!("ui camera bridge start device={}", device_id);
        self.active = true;
        Ok(())
    }

    fn stop(&mut self) {
        if self.active {
            log::debug!("ui camera bridge stop");
        }
        self.active = false;
    }
}
