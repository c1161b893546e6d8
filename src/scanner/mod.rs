//! Backend seam: one trait, one implementation per compute substrate.
//!
//! The compiled table format is backend-agnostic; a backend only supplies
//! upload (residency) and execute. The host backend is always available; the
//! CUDA backend exists behind the `cuda` feature and contributes its devices
//! ahead of the host in enumeration order.
//!
//! # Thread model
//!
//! A scanner instance is driven from one thread (submission is `&mut self`);
//! distinct instances are fully independent. The installed table is immutable
//! and shared read-only by all in-flight scans; each async scan additionally
//! owns one execution channel's buffers and one pool slot for its duration.

use std::sync::mpsc;
use std::sync::Arc;

use crate::api::{MatchEntry, ScanCallback, ScanError};
use crate::compile::CompiledTable;

pub(crate) mod host;

#[cfg(feature = "cuda")]
pub(crate) mod cuda;
#[cfg(feature = "cuda")]
pub(crate) mod kernels;

/// Number of independent execution channels per scanner.
///
/// Async submissions rotate over the channels round-robin so transfer and
/// compute for different in-flight scans can overlap; the slot pool caps
/// in-flight scans at this figure.
pub(crate) const CHANNELS: usize = 3;

/// A scan backend bound to one device.
///
/// Lifecycle: construct → `install` → scan repeatedly. Scanning before the
/// first `install` fails with [`ScanError::NotInstalled`]. `install` may be
/// called again after a dictionary change; it must not race in-flight scans
/// on the same instance.
pub trait Scanner: Send {
    /// Full resolved device name, `<Backend>:<Class>[<index>]:<name>`.
    fn device_name(&self) -> &str;

    /// Makes `table` resident on the device. Expensive; once per dictionary
    /// change, before any scan.
    fn install(&mut self, table: Arc<CompiledTable>) -> Result<(), ScanError>;

    /// Synchronous dense scan. Blocks until `output[i]` holds the pattern ID
    /// matching at position `i` (or `INVALID`) for the whole input.
    fn scan_into(&self, input: &[u8], output: &mut Vec<i32>) -> Result<(), ScanError>;

    /// Asynchronous dense scan. Returns once the scan is submitted; the
    /// callback receives the input and output buffers when transfer and
    /// compute complete, on a backend-owned thread. Blocks only when all
    /// execution channels are busy.
    fn scan_async(&mut self, input: Vec<u8>, callback: ScanCallback)
        -> Result<ScanTicket, ScanError>;

    /// Synchronous compact scan: the non-`INVALID` positions of the
    /// equivalent dense scan as `(index, pattern)` entries in ascending index
    /// order. `limit >= 0` caps the entry count; `limit < 0` returns all.
    fn scan_compact(&self, input: &[u8], limit: i32) -> Result<Vec<MatchEntry>, ScanError>;
}

/// Completion handle for one asynchronous scan.
///
/// Owning this ticket is the submission's proof of an outstanding callback.
/// `wait` blocks until the callback has run; dropping the ticket instead
/// detaches (the scan still completes and releases its channel).
#[derive(Debug)]
#[must_use = "dropping the ticket detaches the scan; wait() to observe completion"]
pub struct ScanTicket {
    done: mpsc::Receiver<()>,
}

impl ScanTicket {
    /// Blocks until the scan's callback has finished.
    pub fn wait(self) {
        // A send error means the worker dropped the sender without signalling
        // (callback panicked); either way the scan is over.
        let _ = self.done.recv();
    }
}

/// Creates the completion signal for one submission.
pub(crate) fn completion_channel() -> (mpsc::Sender<()>, ScanTicket) {
    let (tx, rx) = mpsc::channel();
    (tx, ScanTicket { done: rx })
}

/// Enumerates devices across all backends: GPU devices first, then host.
///
/// Names follow `<Backend>:<Class>[<index>]:<human-readable name>`, e.g.
/// `Cuda:GPU[0]:NVIDIA GeForce RTX 4090`. Any of them (or a distinguishing
/// substring) is a valid construction argument.
pub fn available_devices() -> Vec<String> {
    let mut devices = Vec::new();
    #[cfg(feature = "cuda")]
    devices.extend(cuda::available_devices());
    devices.extend(host::available_devices());
    devices
}

/// Resolves `requested` against the device list and constructs the matching
/// backend. `None` selects the first available device.
pub(crate) fn build_scanner(
    requested: Option<&str>,
    capacity: usize,
) -> Result<Box<dyn Scanner>, ScanError> {
    let devices = available_devices();

    let resolved = match requested {
        Some(name) => devices
            .iter()
            .find(|full| full.contains(name))
            .ok_or_else(|| ScanError::DeviceNotFound {
                requested: name.to_string(),
            })?,
        None => devices.first().ok_or_else(|| ScanError::DeviceNotFound {
            requested: String::from("<default>"),
        })?,
    };

    #[cfg(feature = "cuda")]
    if resolved.starts_with("Cuda:") {
        return Ok(Box::new(cuda::CudaScanner::new(resolved.clone(), capacity)?));
    }

    if resolved.starts_with("Host:") {
        return Ok(Box::new(host::HostScanner::new(resolved.clone(), capacity)));
    }

    Err(ScanError::DeviceNotFound {
        requested: resolved.clone(),
    })
}

/// Shared per-call precondition checks. Violations are caller errors, never
/// auto-corrected (no implicit resize or truncation).
pub(crate) fn check_scan_args(
    input_len: usize,
    capacity: usize,
    installed: bool,
) -> Result<(), ScanError> {
    if !installed {
        return Err(ScanError::NotInstalled);
    }
    if input_len == 0 {
        return Err(ScanError::EmptyInput);
    }
    if input_len > capacity {
        return Err(ScanError::CapacityExceeded {
            size: input_len,
            capacity,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_device_is_always_enumerated() {
        let devices = available_devices();
        assert!(devices.iter().any(|d| d.starts_with("Host:CPU[0]:")));
    }

    #[test]
    fn unknown_device_is_rejected() {
        let err = build_scanner(Some("Vulkan:GPU[0]"), 1024).err().unwrap();
        assert!(matches!(err, ScanError::DeviceNotFound { .. }));
    }

    #[test]
    fn partial_name_resolves() {
        let scanner = build_scanner(Some("Host:CPU[0]"), 1024).unwrap();
        assert!(scanner.device_name().starts_with("Host:CPU[0]:"));
    }

    #[test]
    fn default_selects_first_device() {
        let scanner = build_scanner(None, 1024).unwrap();
        assert_eq!(scanner.device_name(), available_devices()[0]);
    }

    #[test]
    fn scan_args_checks_order() {
        assert!(matches!(
            check_scan_args(10, 100, false),
            Err(ScanError::NotInstalled)
        ));
        assert!(matches!(
            check_scan_args(0, 100, true),
            Err(ScanError::EmptyInput)
        ));
        assert!(matches!(
            check_scan_args(101, 100, true),
            Err(ScanError::CapacityExceeded { .. })
        ));
        assert!(check_scan_args(100, 100, true).is_ok());
    }
}
