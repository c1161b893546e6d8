//! Top-level scanner: one dictionary, one backend.
//!
//! Composes a [`Dictionary`] with a device-bound [`Scanner`] and exposes the
//! load → install → scan lifecycle. Loading parses the trie on the host;
//! installing compiles the perfect-hash tables and makes them resident on the
//! backend; scans then only move input and output.

use std::sync::Arc;

use crate::api::{MatchEntry, PfacConfig, ScanError};
use crate::compile::compile;
use crate::dictionary::Dictionary;
use crate::scanner::{build_scanner, ScanTicket, Scanner};

/// A multi-pattern scanner bound to one device.
///
/// Not internally synchronised beyond the async slot pool: drive one instance
/// from one thread, or serialise access externally. Distinct instances are
/// fully independent.
pub struct Pfac {
    dictionary: Dictionary,
    scanner: Box<dyn Scanner>,
}

impl Pfac {
    /// Constructs a scanner on the first available device with the default
    /// input capacity.
    pub fn new() -> Result<Self, ScanError> {
        Self::with_config(PfacConfig::default())
    }

    /// Constructs a scanner on the device matching `device` (any substring of
    /// a full device name) with the default input capacity.
    pub fn with_device(device: &str) -> Result<Self, ScanError> {
        Self::with_config(PfacConfig {
            device: Some(device.to_string()),
            ..PfacConfig::default()
        })
    }

    pub fn with_config(config: PfacConfig) -> Result<Self, ScanError> {
        config.assert_valid();
        let scanner = build_scanner(config.device.as_deref(), config.capacity)?;
        Ok(Self {
            dictionary: Dictionary::new(),
            scanner,
        })
    }

    /// Full name of the resolved device.
    pub fn device_name(&self) -> &str {
        self.scanner.device_name()
    }

    /// Number of patterns in the loaded dictionary.
    pub fn pattern_count(&self) -> usize {
        self.dictionary.pattern_count()
    }

    /// Parses a newline-separated pattern buffer, replacing any previous
    /// dictionary. Takes effect on scans after the next `install_dictionary`.
    pub fn load_dictionary(&mut self, buffer: &[u8]) {
        self.dictionary.load(buffer);
    }

    /// Discards the loaded dictionary (and, after the next install, the
    /// resident tables).
    pub fn clear_dictionary(&mut self) {
        self.dictionary.clear();
    }

    /// Compiles the dictionary's perfect-hash tables and uploads them to the
    /// backend. Expensive; required once after every dictionary change and
    /// before any scan. Must not be called while scans are in flight.
    pub fn install_dictionary(&mut self) -> Result<(), ScanError> {
        let table = compile(&self.dictionary);
        self.scanner.install(Arc::new(table))
    }

    /// Synchronous dense scan into a caller-provided buffer (reusable across
    /// calls). On return `output[i]` is the ID of the pattern matching at
    /// input position `i`, or [`crate::INVALID`].
    pub fn scan_into(&self, input: &[u8], output: &mut Vec<i32>) -> Result<(), ScanError> {
        self.scanner.scan_into(input, output)
    }

    /// Synchronous dense scan, allocating the output.
    pub fn scan(&self, input: &[u8]) -> Result<Vec<i32>, ScanError> {
        let mut output = Vec::new();
        self.scanner.scan_into(input, &mut output)?;
        Ok(output)
    }

    /// Asynchronous dense scan.
    ///
    /// Takes ownership of the input; the callback receives it back together
    /// with the dense output once transfer and compute complete, on a
    /// backend-owned thread. Returns immediately after submission unless all
    /// execution channels are busy, in which case it blocks until one frees
    /// (backpressure, not failure). The returned ticket can be waited on;
    /// dropping it detaches the scan, which still runs to completion.
    pub fn scan_async<F>(&mut self, input: Vec<u8>, callback: F) -> Result<ScanTicket, ScanError>
    where
        F: FnOnce(Vec<u8>, Vec<i32>) + Send + 'static,
    {
        self.scanner.scan_async(input, Box::new(callback))
    }

    /// Synchronous compact scan: only the matching positions, as
    /// `(index, pattern)` entries in ascending index order. `limit >= 0` caps
    /// the number of entries returned even if more positions match;
    /// `limit < 0` returns all matches.
    pub fn scan_compact(&self, input: &[u8], limit: i32) -> Result<Vec<MatchEntry>, ScanError> {
        self.scanner.scan_compact(input, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::INVALID;

    fn host_pfac(patterns: &[u8]) -> Pfac {
        let mut pfac = Pfac::with_device("Host:CPU[0]").unwrap();
        pfac.load_dictionary(patterns);
        pfac.install_dictionary().unwrap();
        pfac
    }

    #[test]
    fn load_install_scan_roundtrip() {
        let pfac = host_pfac(b"cat\ncar\ndog");
        assert_eq!(pfac.pattern_count(), 3);
        let output = pfac.scan(b"the fat cat sat").unwrap();
        assert_eq!(output[8], 0);
        assert_eq!(output.iter().filter(|&&v| v != INVALID).count(), 1);
    }

    #[test]
    fn scan_before_install_fails() {
        let mut pfac = Pfac::with_device("Host:CPU[0]").unwrap();
        pfac.load_dictionary(b"cat\n");
        assert!(matches!(
            pfac.scan(b"cat"),
            Err(ScanError::NotInstalled)
        ));
    }

    #[test]
    fn reload_replaces_dictionary() {
        let mut pfac = host_pfac(b"cat\n");
        assert_eq!(pfac.scan(b"cat").unwrap()[0], 0);

        pfac.load_dictionary(b"dog\n");
        pfac.install_dictionary().unwrap();
        assert_eq!(pfac.scan(b"cat").unwrap()[0], INVALID);
        assert_eq!(pfac.scan(b"dog").unwrap()[0], 0);
    }

    #[test]
    fn clear_then_install_scans_empty() {
        let mut pfac = host_pfac(b"cat\n");
        pfac.clear_dictionary();
        pfac.install_dictionary().unwrap();
        let output = pfac.scan(b"cat").unwrap();
        assert!(output.iter().all(|&v| v == INVALID));
    }

    #[test]
    fn install_is_idempotent() {
        let mut pfac = host_pfac(b"cat\n");
        pfac.install_dictionary().unwrap();
        pfac.install_dictionary().unwrap();
        assert_eq!(pfac.scan(b"cat").unwrap()[0], 0);
    }
}
