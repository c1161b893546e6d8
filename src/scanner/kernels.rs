//! Embedded CUDA kernel sources, built with NVRTC at install time.
//!
//! Both kernels walk the same compiled tables the host backend reads. Table
//! buffers arrive flattened: `hash_row` as `{offset, k_sminus1}` int pairs
//! per state, `hash_val` as `{ch, next}` int pairs per slot. Threads each
//! cover four consecutive input positions, so launches are sized by
//! `word_count = ceil(size / 4)` rounded up to whole blocks.
//!
//! The compact kernel communicates across blocks through `group_sync`, two
//! ints per block `{block_sum, inclusive_prefix}` initialised to -1 by the
//! host. Block 0 publishes its prefix immediately; every other block spins on
//! its predecessor's `inclusive_prefix`, so the last block's entry ends up
//! holding the total match count and the host reads it back from there to
//! size the result transfer.

/// Threads per block. Matches the maximum branching factor of a state.
pub(crate) const WORK_GROUP_SIZE: u32 = 256;

/// Input positions covered by one thread.
pub(crate) const POSITIONS_PER_THREAD: usize = 4;

pub(crate) const MODULE: &str = "pfac";
pub(crate) const DENSE_FN: &str = "pfac_dense";
pub(crate) const COMPACT_FN: &str = "pfac_compact";

pub(crate) const KERNEL_SRC: &str = r#"
#define INVALID   (-1)
#define MASK_BITS 16
#define MASK      0xffff

__device__ __forceinline__ int mod257(int x) {
    int m = (x & 255) - (x >> 8);
    if (m < 0) {
        m += 257;
    }
    return m;
}

// Greedy failureless walk from one input position. Returns the last match
// state reached, or INVALID.
__device__ int walk(
    const int* initial_transitions,
    const int* hash_row,
    const int* hash_val,
    int initial_state,
    const unsigned char* input,
    int size,
    int pos)
{
    int state = initial_transitions[input[pos]];
    if (state < 0) {
        return INVALID;
    }
    int matched = (state < initial_state) ? state : INVALID;

    for (int i = pos + 1; i < size; i++) {
        const int offset = hash_row[2 * state];
        if (offset < 0) {
            break;
        }
        const int k_sminus1 = hash_row[2 * state + 1];
        const int sminus1 = k_sminus1 & MASK;
        const int k = k_sminus1 >> MASK_BITS;
        const int ch = input[i];
        const int slot = mod257(k * ch) & sminus1;
        if (hash_val[2 * (offset + slot)] != ch) {
            break;
        }
        state = hash_val[2 * (offset + slot) + 1];
        if (state < initial_state) {
            matched = state;
        }
    }
    return matched;
}

extern "C" __global__ void pfac_dense(
    const int* initial_transitions,
    const int* hash_row,
    const int* hash_val,
    int initial_state,
    const unsigned char* input,
    int* output,
    int size,
    int word_count)
{
    const int tid = blockIdx.x * blockDim.x + threadIdx.x;
    if (tid >= word_count) {
        return;
    }
    const int base = tid * 4;
    for (int pos = base; pos < base + 4 && pos < size; pos++) {
        output[pos] = walk(initial_transitions, hash_row, hash_val,
                           initial_state, input, size, pos);
    }
}

extern "C" __global__ void pfac_compact(
    const int* initial_transitions,
    const int* hash_row,
    const int* hash_val,
    int initial_state,
    const unsigned char* input,
    int* output,       // (index, pattern) int pairs
    int* group_sync,   // per block: {block_sum, inclusive_prefix}, init -1
    int size,
    int word_count,
    int max_results)
{
    __shared__ int scan_buf[256];
    __shared__ int block_base;

    const int tid = threadIdx.x;
    const int gid = blockIdx.x * blockDim.x + tid;

    // Each thread resolves its four positions and keeps its matches in
    // registers, in position order.
    int match_pos[4];
    int match_id[4];
    int count = 0;
    if (gid < word_count) {
        const int base = gid * 4;
        for (int pos = base; pos < base + 4 && pos < size; pos++) {
            const int m = walk(initial_transitions, hash_row, hash_val,
                               initial_state, input, size, pos);
            if (m >= 0) {
                match_pos[count] = pos;
                match_id[count] = m;
                count++;
            }
        }
    }

    // Block-wide inclusive scan of per-thread match counts.
    scan_buf[tid] = count;
    __syncthreads();
    for (int stride = 1; stride < blockDim.x; stride <<= 1) {
        const int mine = scan_buf[tid];
        const int add = (tid >= (int)stride) ? scan_buf[tid - stride] : 0;
        __syncthreads();
        scan_buf[tid] = mine + add;
        __syncthreads();
    }
    const int local_exclusive = scan_buf[tid] - count;
    const int block_total = scan_buf[blockDim.x - 1];

    // Chain block prefixes through group_sync in block order.
    if (tid == 0) {
        int prev = 0;
        if (blockIdx.x > 0) {
            while ((prev = atomicAdd(&group_sync[2 * (blockIdx.x - 1) + 1], 0)) < 0) {
            }
        }
        group_sync[2 * blockIdx.x] = block_total;
        __threadfence();
        group_sync[2 * blockIdx.x + 1] = prev + block_total;
        __threadfence();
        block_base = prev;
    }
    __syncthreads();

    const int out_base = block_base + local_exclusive;
    for (int j = 0; j < count; j++) {
        const int slot = out_base + j;
        if (slot < max_results) {
            output[2 * slot] = match_pos[j];
            output[2 * slot + 1] = match_id[j];
        }
    }
}
"#;
