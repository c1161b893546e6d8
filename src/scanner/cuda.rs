//! CUDA scan backend.
//!
//! Residency and execution only; the automaton semantics live in the compiled
//! table and the kernels in [`super::kernels`]. Install builds the kernels
//! with NVRTC (surfacing the compiler log in `CompileFailure`) and uploads
//! the three lookup tables once; scans then move only input and output bytes.
//!
//! Sync scans run on the device's default stream behind a small mutex-held
//! buffer set. Async scans go to `CHANNELS` worker threads, each owning its
//! own stream and input/output buffers; the slot pool bounds submissions the
//! same way the host backend does.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use cudarc::driver::{CudaDevice, CudaFunction, CudaSlice, LaunchAsync, LaunchConfig};
use cudarc::nvrtc::compile_ptx;

use crate::api::{MatchEntry, ScanCallback, ScanError, INVALID};
use crate::compile::CompiledTable;
use crate::scanner::kernels::{
    COMPACT_FN, DENSE_FN, KERNEL_SRC, MODULE, POSITIONS_PER_THREAD, WORK_GROUP_SIZE,
};
use crate::scanner::{check_scan_args, completion_channel, ScanTicket, Scanner, CHANNELS};
use crate::slot_pool::SlotPool;

/// Maximum flat-table entries addressable through the cached lookup path.
/// 2^27 texels is the common device floor for 1D buffer images.
const LOOKUP_CAPACITY: usize = 1 << 27;

/// Enumerates CUDA GPUs as `Cuda:GPU[<ordinal>]:<name>`. Returns an empty
/// list when the driver is absent or reports no devices.
pub(crate) fn available_devices() -> Vec<String> {
    use cudarc::driver::result;

    if result::init().is_err() {
        return Vec::new();
    }
    let count = match result::device::get_count() {
        Ok(n) => n,
        Err(_) => return Vec::new(),
    };

    let mut devices = Vec::new();
    for ordinal in 0..count {
        let Ok(device) = result::device::get(ordinal) else {
            continue;
        };
        let name = device_display_name(device, ordinal);
        devices.push(format!("Cuda:GPU[{ordinal}]:{name}"));
    }
    devices
}

fn device_display_name(device: cudarc::driver::sys::CUdevice, ordinal: i32) -> String {
    use cudarc::driver::sys;

    let mut name_buf = [0i8; 256];
    // SAFETY: name_buf outlives the call and its length is passed alongside.
    unsafe {
        if sys::cuDeviceGetName(name_buf.as_mut_ptr(), name_buf.len() as i32, device)
            .result()
            .is_ok()
        {
            let c_str = std::ffi::CStr::from_ptr(name_buf.as_ptr());
            return c_str.to_string_lossy().into_owned();
        }
    }
    format!("CUDA Device {ordinal}")
}

/// Everything a scan needs once a dictionary is resident: the uploaded
/// tables, the built kernels, and the root state. Immutable after install;
/// in-flight scans hold their own `Arc` so a re-install never races them.
struct Resident {
    device: Arc<CudaDevice>,
    dense: CudaFunction,
    compact: CudaFunction,
    initial_state: i32,
    initial_transitions: CudaSlice<i32>,
    hash_row: CudaSlice<i32>,
    hash_val: CudaSlice<i32>,
}

/// Device buffers for one execution channel, sized once at creation.
struct ChannelBuffers {
    input: CudaSlice<u8>,
    /// Dense output, or (index, pattern) pairs for compact scans.
    output: CudaSlice<i32>,
    /// Cross-block synchronisation for the compact kernel.
    group_sync: CudaSlice<i32>,
}

struct AsyncJob {
    resident: Arc<Resident>,
    input: Vec<u8>,
    callback: ScanCallback,
    done: mpsc::Sender<()>,
}

struct Channel {
    jobs: Option<mpsc::Sender<AsyncJob>>,
    worker: Option<JoinHandle<()>>,
}

pub(crate) struct CudaScanner {
    device_name: String,
    capacity: usize,
    device: Arc<CudaDevice>,
    resident: Option<Arc<Resident>>,
    /// Buffer set for synchronous scans (the async channels own their own).
    sync_buffers: Mutex<ChannelBuffers>,
    channels: Vec<Channel>,
    pool: SlotPool<()>,
    submissions: usize,
}

fn driver_err(context: &str, err: impl std::fmt::Display) -> ScanError {
    ScanError::CompileFailure {
        diagnostic: format!("{context}: {err}"),
    }
}

fn work_groups(capacity: usize) -> usize {
    let words = capacity.div_ceil(POSITIONS_PER_THREAD);
    words.div_ceil(WORK_GROUP_SIZE as usize)
}

fn launch_config(size: usize) -> LaunchConfig {
    let words = size.div_ceil(POSITIONS_PER_THREAD) as u32;
    LaunchConfig {
        grid_dim: (words.div_ceil(WORK_GROUP_SIZE), 1, 1),
        block_dim: (WORK_GROUP_SIZE, 1, 1),
        shared_mem_bytes: 0,
    }
}

impl CudaScanner {
    pub(crate) fn new(device_name: String, capacity: usize) -> Result<Self, ScanError> {
        let ordinal = parse_ordinal(&device_name).ok_or_else(|| ScanError::DeviceNotFound {
            requested: device_name.clone(),
        })?;
        let device = CudaDevice::new(ordinal).map_err(|_| ScanError::DeviceNotFound {
            requested: device_name.clone(),
        })?;

        let sync_buffers = Mutex::new(Self::alloc_buffers(&device, capacity)?);
        let pool = SlotPool::new(vec![(); CHANNELS]);

        Ok(Self {
            device_name,
            capacity,
            device,
            resident: None,
            sync_buffers,
            channels: Vec::new(),
            pool,
            submissions: 0,
        })
    }

    fn alloc_buffers(device: &Arc<CudaDevice>, capacity: usize) -> Result<ChannelBuffers, ScanError> {
        // The output buffer doubles as compact (index, pattern) pair storage,
        // hence twice the capacity in ints.
        Ok(ChannelBuffers {
            input: device
                .alloc_zeros::<u8>(capacity)
                .map_err(|e| driver_err("input buffer allocation", e))?,
            output: device
                .alloc_zeros::<i32>(capacity * 2)
                .map_err(|e| driver_err("output buffer allocation", e))?,
            group_sync: device
                .alloc_zeros::<i32>(work_groups(capacity) * 2)
                .map_err(|e| driver_err("group sync buffer allocation", e))?,
        })
    }

    /// Spawns (or respawns) the async channel workers. Old workers drain
    /// their queues and exit once their sender drops; their jobs keep their
    /// own `Arc<Resident>`, so replacement cannot race them.
    fn spawn_channels(&mut self) -> Result<(), ScanError> {
        let mut channels = Vec::with_capacity(CHANNELS);
        for i in 0..CHANNELS {
            let buffers = Self::alloc_buffers(&self.device, self.capacity)?;
            let device = Arc::clone(&self.device);
            let (tx, rx) = mpsc::channel::<AsyncJob>();
            let worker = thread::Builder::new()
                .name(format!("pfac-cuda-ch{i}"))
                .spawn(move || channel_worker(device, buffers, rx))
                .expect("failed to spawn channel worker");
            channels.push(Channel {
                jobs: Some(tx),
                worker: Some(worker),
            });
        }
        let old = std::mem::replace(&mut self.channels, channels);
        join_channels(old);
        Ok(())
    }
}

fn parse_ordinal(device_name: &str) -> Option<usize> {
    let start = device_name.find('[')? + 1;
    let end = device_name.find(']')?;
    device_name.get(start..end)?.parse().ok()
}

impl Scanner for CudaScanner {
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

        let ptx = compile_ptx(KERNEL_SRC).map_err(|e| ScanError::CompileFailure {
            diagnostic: e.to_string(),
        })?;
        self.device
            .load_ptx(ptx, MODULE, &[DENSE_FN, COMPACT_FN])
            .map_err(|e| driver_err("module load", e))?;
        let dense = self
            .device
            .get_func(MODULE, DENSE_FN)
            .ok_or_else(|| driver_err("module load", "dense kernel missing"))?;
        let compact = self
            .device
            .get_func(MODULE, COMPACT_FN)
            .ok_or_else(|| driver_err("module load", "compact kernel missing"))?;

        let initial_transitions = self
            .device
            .htod_copy(table.initial_transitions.to_vec())
            .map_err(|e| driver_err("initial transition upload", e))?;
        let hash_row = self
            .device
            .htod_copy(flatten_rows(&table))
            .map_err(|e| driver_err("hash row upload", e))?;
        let hash_val = self
            .device
            .htod_copy(flatten_values(&table))
            .map_err(|e| driver_err("hash value upload", e))?;

        let resident = Arc::new(Resident {
            device: Arc::clone(&self.device),
            dense,
            compact,
            initial_state: table.initial_state,
            initial_transitions,
            hash_row,
            hash_val,
        });
        self.spawn_channels()?;
        self.resident = Some(resident);
        Ok(())
    }

    fn scan_into(&self, input: &[u8], output: &mut Vec<i32>) -> Result<(), ScanError> {
        check_scan_args(input.len(), self.capacity, self.resident.is_some())?;
        let resident = self.resident.as_ref().expect("checked installed");
        let mut buffers = self
            .sync_buffers
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());

        run_dense(resident, &mut buffers, input, output)
    }

    fn scan_async(
        &mut self,
        input: Vec<u8>,
        callback: ScanCallback,
    ) -> Result<ScanTicket, ScanError> {
        check_scan_args(input.len(), self.capacity, self.resident.is_some())?;
        let resident = Arc::clone(self.resident.as_ref().expect("checked installed"));

        let permit = self.pool.acquire();
        let (done, ticket) = completion_channel();
        let channel = self.submissions % CHANNELS;
        self.submissions += 1;

        // The permit rides inside the done-sender closure's lifetime: move it
        // into the job so the slot frees only after the callback.
        let job = AsyncJob {
            resident,
            input,
            callback: Box::new({
                let permit = permit;
                move |input, output| {
                    callback(input, output);
                    drop(permit);
                }
            }),
            done,
        };

        self.channels[channel]
            .jobs
            .as_ref()
            .expect("channel sender taken before drop")
            .send(job)
            .expect("channel worker exited while scanner alive");

        Ok(ticket)
    }

    fn scan_compact(&self, input: &[u8], limit: i32) -> Result<Vec<MatchEntry>, ScanError> {
        check_scan_args(input.len(), self.capacity, self.resident.is_some())?;
        let resident = self.resident.as_ref().expect("checked installed");
        let mut buffers = self
            .sync_buffers
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());

        run_compact(resident, &mut buffers, input, limit)
    }
}

impl Drop for CudaScanner {
    fn drop(&mut self) {
        join_channels(std::mem::take(&mut self.channels));
    }
}

fn join_channels(mut channels: Vec<Channel>) {
    for channel in &mut channels {
        channel.jobs = None;
    }
    for channel in &mut channels {
        if let Some(worker) = channel.worker.take() {
            let _ = worker.join();
        }
    }
}

fn channel_worker(
    device: Arc<CudaDevice>,
    mut buffers: ChannelBuffers,
    jobs: mpsc::Receiver<AsyncJob>,
) {
    for job in jobs {
        let mut output = Vec::new();
        let result = run_dense(&job.resident, &mut buffers, &job.input, &mut output);
        // Scans were precondition-checked at submission; a failure here is a
        // driver fault and surfaces as an empty output rather than a panic on
        // a detached thread.
        if result.is_err() {
            output.clear();
            let _ = device.synchronize();
        }
        (job.callback)(job.input, output);
        let _ = job.done.send(());
    }
}

fn flatten_rows(table: &CompiledTable) -> Vec<i32> {
    let mut flat = Vec::with_capacity(table.hash_row.len() * 2);
    for row in &table.hash_row {
        flat.push(row.offset);
        flat.push(row.k_sminus1);
    }
    flat
}

fn flatten_values(table: &CompiledTable) -> Vec<i32> {
    let mut flat = Vec::with_capacity(table.hash_val.len() * 2);
    for value in &table.hash_val {
        flat.push(value.ch);
        flat.push(value.next);
    }
    flat
}

fn run_dense(
    resident: &Resident,
    buffers: &mut ChannelBuffers,
    input: &[u8],
    output: &mut Vec<i32>,
) -> Result<(), ScanError> {
    let device = &resident.device;
    let size = input.len();

    let mut input_view = buffers.input.slice_mut(0..size);
    device
        .htod_sync_copy_into(input, &mut input_view)
        .map_err(|e| driver_err("input transfer", e))?;
    drop(input_view);

    let words = size.div_ceil(POSITIONS_PER_THREAD) as i32;
    // SAFETY: parameter list matches the kernel signature; buffers are sized
    // for the reserved capacity which bounds `size`.
    unsafe {
        resident
            .dense
            .clone()
            .launch(
                launch_config(size),
                (
                    &resident.initial_transitions,
                    &resident.hash_row,
                    &resident.hash_val,
                    resident.initial_state,
                    &buffers.input,
                    &buffers.output,
                    size as i32,
                    words,
                ),
            )
            .map_err(|e| driver_err("dense kernel launch", e))?;
    }

    output.clear();
    output.resize(size, INVALID);
    let output_view = buffers.output.slice(0..size);
    device
        .dtoh_sync_copy_into(&output_view, output.as_mut_slice())
        .map_err(|e| driver_err("output transfer", e))?;
    Ok(())
}

fn run_compact(
    resident: &Resident,
    buffers: &mut ChannelBuffers,
    input: &[u8],
    limit: i32,
) -> Result<Vec<MatchEntry>, ScanError> {
    let device = &resident.device;
    let size = input.len();
    let words = size.div_ceil(POSITIONS_PER_THREAD);
    let groups = words.div_ceil(WORK_GROUP_SIZE as usize);

    let mut input_view = buffers.input.slice_mut(0..size);
    device
        .htod_sync_copy_into(input, &mut input_view)
        .map_err(|e| driver_err("input transfer", e))?;
    drop(input_view);

    // Reset the chained-prefix buffer; every block spins until its
    // predecessor replaces the -1.
    let sync_init = vec![INVALID; groups * 2];
    let mut sync_view = buffers.group_sync.slice_mut(0..groups * 2);
    device
        .htod_sync_copy_into(&sync_init, &mut sync_view)
        .map_err(|e| driver_err("group sync reset", e))?;
    drop(sync_view);

    let max_results = if limit < 0 || limit as usize > size {
        size as i32
    } else {
        limit
    };

    // SAFETY: as in `run_dense`; group_sync holds two ints per launched block.
    unsafe {
        resident
            .compact
            .clone()
            .launch(
                launch_config(size),
                (
                    &resident.initial_transitions,
                    &resident.hash_row,
                    &resident.hash_val,
                    resident.initial_state,
                    &buffers.input,
                    &buffers.output,
                    &buffers.group_sync,
                    size as i32,
                    words as i32,
                    max_results,
                ),
            )
            .map_err(|e| driver_err("compact kernel launch", e))?;
    }

    // The last block's inclusive prefix is the true total match count.
    let mut total = [INVALID];
    let total_view = buffers
        .group_sync
        .slice((groups - 1) * 2 + 1..(groups - 1) * 2 + 2);
    device
        .dtoh_sync_copy_into(&total_view, &mut total)
        .map_err(|e| driver_err("match count readback", e))?;
    let produced = total[0].min(max_results).max(0) as usize;

    let mut flat = vec![0i32; produced * 2];
    if produced > 0 {
        let output_view = buffers.output.slice(0..produced * 2);
        device
            .dtoh_sync_copy_into(&output_view, flat.as_mut_slice())
            .map_err(|e| driver_err("output transfer", e))?;
    }

    Ok(flat
        .chunks_exact(2)
        .map(|pair| MatchEntry {
            index: pair[0],
            pattern: pair[1],
        })
        .collect())
}
