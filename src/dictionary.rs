//! Pattern trie construction.
//!
//! A dictionary is a newline-separated list of byte patterns. `load` builds a
//! trie-shaped state/transition table in two passes:
//!
//! 1. Count the non-empty lines. Their pattern IDs `[0, pattern_count)` are
//!    reserved as the first state IDs, so "is this state a match" is a single
//!    comparison (`state < initial_state`) with no separate flag.
//! 2. Walk each pattern's bytes from `initial_state`, sharing prefixes with
//!    previously loaded patterns and appending fresh states past
//!    `initial_state` as needed. A pattern's final byte transitions to its
//!    match ID.
//!
//! No failure/suffix links are computed. The scan model restarts the walk at
//! every input position, so a mismatch simply ends that position's walk.
//!
//! # Invariants
//! - Match states occupy IDs `[0, pattern_count)`.
//! - `initial_state == pattern_count`.
//! - Internal (non-root, non-match) states have IDs `> initial_state`.
//! - The table is a tree rooted at `initial_state`: every state except the
//!   root has exactly one inbound transition.

use memchr::memchr_iter;

use crate::api::INVALID;

/// A single trie arc: consuming byte `ch` in some state moves to `next`.
///
/// `next` is a match ID when the arc consumes a pattern's final byte. Fields
/// are i32 (not u8/u32) so the compiled table uploads to device memory as
/// plain int pairs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub(crate) struct Transition {
    pub ch: i32,
    pub next: i32,
}

/// Trie-shaped state/transition table built from a pattern buffer.
///
/// Rows are states, columns are outbound transitions. Rebuilt from scratch on
/// every `load`; patterns cannot be removed or updated individually.
#[derive(Debug, Default)]
pub struct Dictionary {
    /// Indexed by state ID. Match-state rows come first, then the root, then
    /// internal states in allocation order.
    state_table: Vec<Vec<Transition>>,

    /// Root state ID. Equal to the number of loaded patterns.
    initial_state: i32,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards the trie. A subsequent scan requires `load` + install again.
    pub fn clear(&mut self) {
        self.state_table.clear();
        self.initial_state = 0;
    }

    /// Number of patterns in the loaded dictionary.
    pub fn pattern_count(&self) -> usize {
        self.initial_state as usize
    }

    pub(crate) fn initial_state(&self) -> i32 {
        self.initial_state
    }

    pub(crate) fn states(&self) -> &[Vec<Transition>] {
        &self.state_table
    }

    /// Parses `buffer` and replaces any previously loaded trie.
    ///
    /// A pattern ends at a `\n` byte or at the end of the buffer. Empty lines
    /// are skipped and do not consume a pattern ID; IDs are assigned in file
    /// order starting at 0.
    pub fn load(&mut self, buffer: &[u8]) {
        self.state_table.clear();

        // Pass 1: count non-empty lines so match states can occupy the first
        // pattern_count IDs. A trailing pattern without a final newline still
        // counts.
        let mut pattern_count = 0usize;
        let mut line_start = 0usize;
        for nl in memchr_iter(b'\n', buffer) {
            if nl > line_start {
                pattern_count += 1;
            }
            line_start = nl + 1;
        }
        if line_start < buffer.len() {
            pattern_count += 1;
        }

        self.initial_state = i32::try_from(pattern_count).expect("pattern count exceeds i32");

        // Rows [0, pattern_count) are the match states; row pattern_count is
        // the root. Internal states are appended past the root during pass 2.
        self.state_table = vec![Vec::new(); pattern_count + 1];

        // Pass 2: walk each pattern's bytes from the root.
        let mut pattern_id = 0i32;
        let mut line_start = 0usize;
        for nl in memchr_iter(b'\n', buffer) {
            if nl > line_start {
                self.add_pattern(&buffer[line_start..nl], pattern_id);
                pattern_id += 1;
            }
            line_start = nl + 1;
        }
        if line_start < buffer.len() {
            self.add_pattern(&buffer[line_start..], pattern_id);
        }
    }

    fn add_pattern(&mut self, pattern: &[u8], pattern_id: i32) {
        debug_assert!(!pattern.is_empty());

        let mut state = self.initial_state as usize;
        for (i, &byte) in pattern.iter().enumerate() {
            let ch = byte as i32;
            let last = i + 1 == pattern.len();
            let existing = self.state_table[state]
                .iter()
                .position(|t| t.ch == ch);

            if last {
                match existing {
                    // The terminal byte already has an arc here: either an
                    // earlier, longer pattern routed through this byte, or
                    // this pattern is a duplicate. Retarget the arc at our
                    // match ID and move the old target's row onto it, so the
                    // longer pattern's suffix continues from the match state.
                    // For duplicates this makes the later ID win.
                    Some(pos) => {
                        let old_next = self.state_table[state][pos].next;
                        self.state_table[state][pos].next = pattern_id;
                        if old_next != pattern_id {
                            let moved = std::mem::take(&mut self.state_table[old_next as usize]);
                            self.state_table[pattern_id as usize] = moved;
                        }
                    }
                    None => {
                        self.state_table[state].push(Transition {
                            ch,
                            next: pattern_id,
                        });
                    }
                }
            } else {
                match existing {
                    Some(pos) => {
                        // Prefix sharing: reuse the earlier pattern's arc.
                        // The target may be a match state (a shorter pattern
                        // ended here); walking through it is fine.
                        state = self.state_table[state][pos].next as usize;
                    }
                    None => {
                        let next = i32::try_from(self.state_table.len())
                            .expect("state count exceeds i32");
                        self.state_table[state].push(Transition { ch, next });
                        self.state_table.push(Vec::new());
                        state = next as usize;
                    }
                }
            }
        }
    }
}
