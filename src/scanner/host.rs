//! Host scan backend.
//!
//! Walks the compiled table sequentially, one input position at a time: the
//! same failureless model as the device kernels, minus the data parallelism.
//! "Residency" here is an `Arc` of the compiled table; in-flight async scans
//! clone it, so a re-install never invalidates work already submitted.
//!
//! The async path mirrors the device backend's shape: `CHANNELS` worker
//! threads stand in for execution channels, submissions rotate over them
//! round-robin, and the slot pool caps concurrent in-flight scans. Callbacks
//! run on the owning channel's worker thread.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::api::{MatchEntry, ScanCallback, ScanError, INVALID};
use crate::compile::CompiledTable;
use crate::scanner::{check_scan_args, completion_channel, ScanTicket, Scanner, CHANNELS};
use crate::slot_pool::{SlotPermit, SlotPool};

/// Host lookups address the flat value table with i32 offsets.
const LOOKUP_CAPACITY: usize = i32::MAX as usize;

/// Enumerates the host pseudo-device. Always exactly one entry; it sorts
/// after any GPU devices in the combined list.
pub(crate) fn available_devices() -> Vec<String> {
    vec![String::from("Host:CPU[0]:generic")]
}

/// In-flight record for one async scan: the job's inputs and completion
/// plumbing, parked in a pool slot between submission and callback.
#[derive(Default)]
pub(crate) struct InFlight {
    table: Option<Arc<CompiledTable>>,
    input: Vec<u8>,
    callback: Option<ScanCallback>,
    done: Option<mpsc::Sender<()>>,
}

struct Channel {
    jobs: Option<mpsc::Sender<SlotPermit<InFlight>>>,
    worker: Option<JoinHandle<()>>,
}

pub(crate) struct HostScanner {
    device_name: String,
    capacity: usize,
    table: Option<Arc<CompiledTable>>,
    pool: SlotPool<InFlight>,
    channels: Vec<Channel>,
    /// Async submission count; selects the channel round-robin.
    submissions: usize,
}

impl HostScanner {
    pub(crate) fn new(device_name: String, capacity: usize) -> Self {
        let pool = SlotPool::new((0..CHANNELS).map(|_| InFlight::default()).collect());

        let channels = (0..CHANNELS)
            .map(|i| {
                let (tx, rx) = mpsc::channel::<SlotPermit<InFlight>>();
                let worker = thread::Builder::new()
                    .name(format!("pfac-host-ch{i}"))
                    .spawn(move || channel_worker(rx))
                    .expect("failed to spawn channel worker");
                Channel {
                    jobs: Some(tx),
                    worker: Some(worker),
                }
            })
            .collect();

        Self {
            device_name,
            capacity,
            table: None,
            pool,
            channels,
            submissions: 0,
        }
    }
}

impl Scanner for HostScanner {
    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn install(&mut self, table: Arc<CompiledTable>) -> Result<(), ScanError> {
        if table.total_slots() > LOOKUP_CAPACITY {
            return Err(ScanError::ResourceExhausted {
                entries: table.total_slots(),
                max: LOOKUP_CAPACITY,
            });
        }
        self.table = Some(table);
        Ok(())
    }

    fn scan_into(&self, input: &[u8], output: &mut Vec<i32>) -> Result<(), ScanError> {
        check_scan_args(input.len(), self.capacity, self.table.is_some())?;
        let table = self.table.as_ref().expect("checked installed");
        scan_dense(table, input, output);
        Ok(())
    }

    fn scan_async(
        &mut self,
        input: Vec<u8>,
        callback: ScanCallback,
    ) -> Result<ScanTicket, ScanError> {
        check_scan_args(input.len(), self.capacity, self.table.is_some())?;
        let table = Arc::clone(self.table.as_ref().expect("checked installed"));

        // Blocks while all channels have a scan in flight; this is the
        // submission-rate backpressure, not an error.
        let mut permit = self.pool.acquire();

        let (done, ticket) = completion_channel();
        permit.table = Some(table);
        permit.input = input;
        permit.callback = Some(callback);
        permit.done = Some(done);

        let channel = self.submissions % CHANNELS;
        self.submissions += 1;

        self.channels[channel]
            .jobs
            .as_ref()
            .expect("channel sender taken before drop")
            .send(permit)
            .expect("channel worker exited while scanner alive");

        Ok(ticket)
    }

    fn scan_compact(&self, input: &[u8], limit: i32) -> Result<Vec<MatchEntry>, ScanError> {
        check_scan_args(input.len(), self.capacity, self.table.is_some())?;
        let table = self.table.as_ref().expect("checked installed");

        let max = if limit < 0 { input.len() } else { limit as usize };
        let mut output = Vec::new();
        for i in 0..input.len() {
            if output.len() == max {
                break;
            }
            let matched = walk_from(table, input, i);
            if matched != INVALID {
                output.push(MatchEntry {
                    index: i as i32,
                    pattern: matched,
                });
            }
        }
        Ok(output)
    }
}

impl Drop for HostScanner {
    fn drop(&mut self) {
        // Close the job queues, then join so outstanding callbacks finish
        // before the scanner is gone.
        for channel in &mut self.channels {
            channel.jobs = None;
        }
        for channel in &mut self.channels {
            if let Some(worker) = channel.worker.take() {
                let _ = worker.join();
            }
        }
    }
}

fn channel_worker(jobs: mpsc::Receiver<SlotPermit<InFlight>>) {
    for mut permit in jobs {
        let table = permit.table.take().expect("in-flight record missing table");
        let input = std::mem::take(&mut permit.input);
        let callback = permit
            .callback
            .take()
            .expect("in-flight record missing callback");
        let done = permit.done.take();

        let mut output = Vec::new();
        scan_dense(&table, &input, &mut output);
        callback(input, output);

        if let Some(done) = done {
            let _ = done.send(());
        }
        // The permit drops here: the slot is held for the full round trip,
        // including the callback.
    }
}

/// Dense scan: `output[i]` is the pattern matching at position `i`, or
/// `INVALID`. Every position walks independently.
pub(crate) fn scan_dense(table: &CompiledTable, input: &[u8], output: &mut Vec<i32>) {
    output.clear();
    output.reserve(input.len());
    for i in 0..input.len() {
        output.push(walk_from(table, input, i));
    }
}

/// Greedy failureless walk from one input position. Reports the last match
/// state reached, so a longer pattern shadows its prefixes at this position;
/// the walk ends at the first missing transition.
#[inline]
fn walk_from(table: &CompiledTable, input: &[u8], start: usize) -> i32 {
    let mut state = table.root_step(input[start]);
    if state == INVALID {
        return INVALID;
    }
    let mut matched = if table.is_match(state) { state } else { INVALID };

    for &ch in &input[start + 1..] {
        state = table.next_state(state, ch);
        if state == INVALID {
            break;
        }
        if table.is_match(state) {
            matched = state;
        }
    }
    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile;
    use crate::dictionary::Dictionary;

    fn installed_scanner(patterns: &[u8], capacity: usize) -> HostScanner {
        let mut dict = Dictionary::new();
        dict.load(patterns);
        let mut scanner = HostScanner::new(available_devices().remove(0), capacity);
        scanner.install(Arc::new(compile(&dict))).unwrap();
        scanner
    }

    #[test]
    fn dense_scan_example_scenario() {
        let scanner = installed_scanner(b"cat\ncar\ndog\n", 1024);
        let input = b"the fat cat sat";
        let mut output = Vec::new();
        scanner.scan_into(input, &mut output).unwrap();

        assert_eq!(output.len(), input.len());
        for (i, &v) in output.iter().enumerate() {
            if i == 8 {
                assert_eq!(v, 0, "\"cat\" starts at index 8");
            } else {
                assert_eq!(v, INVALID, "index {i}");
            }
        }
    }

    #[test]
    fn longest_pattern_wins_at_a_position() {
        let scanner = installed_scanner(b"ca\ncat\n", 1024);
        let mut output = Vec::new();
        scanner.scan_into(b"cat ca", &mut output).unwrap();
        // Position 0: both "ca" and "cat" start; the walk reaches "cat" last.
        assert_eq!(output[0], 1);
        // Position 4: only "ca" matches.
        assert_eq!(output[4], 0);
    }

    #[test]
    fn single_byte_input_single_byte_pattern() {
        let scanner = installed_scanner(b"x", 1024);
        let mut output = Vec::new();
        scanner.scan_into(b"x", &mut output).unwrap();
        assert_eq!(output, vec![0]);
    }

    #[test]
    fn scan_preconditions_are_fatal() {
        let mut uninstalled = HostScanner::new(String::from("Host:CPU[0]:generic"), 8);
        let mut output = Vec::new();
        assert!(matches!(
            uninstalled.scan_into(b"abc", &mut output),
            Err(ScanError::NotInstalled)
        ));
        assert!(matches!(
            uninstalled.scan_async(b"abc".to_vec(), Box::new(|_, _| {})),
            Err(ScanError::NotInstalled)
        ));

        let scanner = installed_scanner(b"abc\n", 8);
        assert!(matches!(
            scanner.scan_into(b"", &mut output),
            Err(ScanError::EmptyInput)
        ));
        assert!(matches!(
            scanner.scan_into(&[0u8; 9], &mut output),
            Err(ScanError::CapacityExceeded { size: 9, capacity: 8 })
        ));
    }

    #[test]
    fn compact_scan_limits() {
        let scanner = installed_scanner(b"a\n", 1024);
        let input = b"aaaa";

        let all = scanner.scan_compact(input, -1).unwrap();
        assert_eq!(all.len(), 4);
        assert!(all
            .iter()
            .enumerate()
            .all(|(i, m)| m.index == i as i32 && m.pattern == 0));

        assert_eq!(scanner.scan_compact(input, 0).unwrap().len(), 0);
        assert_eq!(scanner.scan_compact(input, 2).unwrap().len(), 2);
        assert_eq!(scanner.scan_compact(input, 100).unwrap().len(), 4);
    }

    #[test]
    fn async_scan_returns_buffers_to_callback() {
        let mut scanner = installed_scanner(b"cat\n", 1024);
        let (tx, rx) = mpsc::channel();
        let submitter = thread::current().id();

        let ticket = scanner
            .scan_async(
                b"a cat".to_vec(),
                Box::new(move |input, output| {
                    assert_ne!(thread::current().id(), submitter);
                    tx.send((input, output)).unwrap();
                }),
            )
            .unwrap();
        ticket.wait();

        let (input, output) = rx.recv().unwrap();
        assert_eq!(input, b"a cat");
        assert_eq!(output, vec![INVALID, INVALID, 0, INVALID, INVALID]);
    }

    #[test]
    fn async_scans_complete_across_channels() {
        let mut scanner = installed_scanner(b"b\n", 1024);
        let (tx, rx) = mpsc::channel();

        let tickets: Vec<_> = (0..CHANNELS * 3)
            .map(|i| {
                let tx = tx.clone();
                scanner
                    .scan_async(
                        vec![b'b'; i + 1],
                        Box::new(move |_, output| {
                            tx.send(output.len()).unwrap();
                        }),
                    )
                    .unwrap()
            })
            .collect();

        for ticket in tickets {
            ticket.wait();
        }
        let mut lengths: Vec<_> = rx.try_iter().collect();
        lengths.sort_unstable();
        assert_eq!(lengths, (1..=CHANNELS * 3).collect::<Vec<_>>());
    }
}
