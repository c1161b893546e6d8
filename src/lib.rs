#![allow(dead_code)] // Pool and table accessors are part of the internal API surface.
//! Multi-pattern exact-match scanner with a failureless automaton.
//!
//! ## Scope
//! This crate compiles a dictionary of byte patterns into a trie whose
//! per-state transition rows are compressed into collision-free perfect hash
//! tables, then scans byte buffers against the compiled tables, reporting
//! every position where a pattern starts.
//!
//! ## Key invariants
//! - Match states occupy the lowest state IDs, so "did this walk match" is a
//!   single compare against the root state's ID.
//! - No failure/suffix links exist: every input position independently walks
//!   the trie from the root, which is what makes positions data-parallel.
//! - Compiled tables are immutable after install and shared read-only by all
//!   concurrent scans until the next dictionary change.
//! - Asynchronous scans rotate over a fixed set of execution channels; a slot
//!   pool caps in-flight scans at the channel count and blocks the next
//!   submission (backpressure, never silent dropping).
//!
//! ## Scan flow
//! `load_dictionary` (parse + trie) -> `install_dictionary` (perfect-hash
//! compile + device upload) -> `scan` / `scan_async` / `scan_compact` any
//! number of times over the resident tables.
//!
//! ## Notable entry points
//! - [`Pfac`]: dictionary + device scanner pair; the main API.
//! - [`available_devices`]: device enumeration (`Cuda:GPU[0]:…` first, then
//!   `Host:CPU[0]:generic`); any substring selects a device at construction.
//! - [`Dictionary`] / [`compile`]: the two compilation stages, usable
//!   directly when embedding a custom backend.
//!
//! ## Output forms
//! Dense: one i32 per input position, the matching pattern ID or [`INVALID`].
//! Compact: only the matching positions as `(index, pattern)` entries, with
//! an optional result cap to bound readback bandwidth.

pub mod util;

mod api;
mod compile;
mod dictionary;
mod pfac;
mod scanner;
mod slot_pool;

pub use api::{
    MatchEntry, PfacConfig, ScanCallback, ScanError, DEFAULT_CAPACITY, INVALID,
};
pub use compile::{compile, CompiledTable};
pub use dictionary::Dictionary;
pub use pfac::Pfac;
pub use scanner::{available_devices, ScanTicket, Scanner};
pub use util::read_file;
