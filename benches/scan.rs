use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pfac_rs::Pfac;

const INPUT_LEN: usize = 4 * 1024 * 1024; // 4 MiB

struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn fill_bytes(&mut self, buf: &mut [u8]) {
        let mut i = 0;
        while i < buf.len() {
            let word = self.next_u64().to_le_bytes();
            let n = word.len().min(buf.len() - i);
            buf[i..i + n].copy_from_slice(&word[..n]);
            i += n;
        }
    }
}

/// Lowercase-letter haystack with dictionary words planted at intervals, so
/// the scan exercises both dead walks and real matches.
fn build_input(rng: &mut XorShift64, words: &[&[u8]]) -> Vec<u8> {
    let mut input = vec![0u8; INPUT_LEN];
    rng.fill_bytes(&mut input);
    for byte in &mut input {
        *byte = b'a' + (*byte % 26);
    }
    let mut offset = 0;
    for (i, word) in words.iter().cycle().take(INPUT_LEN / 4096).enumerate() {
        offset = (offset + 4096 + (i % 97)) % (INPUT_LEN - 64);
        input[offset..offset + word.len()].copy_from_slice(word);
    }
    input
}

fn dictionary(words: &[&[u8]]) -> Vec<u8> {
    let mut buffer = Vec::new();
    for word in words {
        buffer.extend_from_slice(word);
        buffer.push(b'\n');
    }
    buffer
}

fn bench_scans(c: &mut Criterion) {
    let words: Vec<&[u8]> = vec![
        b"checksum", b"pipeline", b"quartz", b"jigsaw", b"oxide", b"vector", b"kernel", b"lattice",
    ];
    let mut rng = XorShift64::new(0x9e3779b97f4a7c15);
    let input = build_input(&mut rng, &words);

    let mut pfac = Pfac::with_device("Host:CPU[0]").unwrap();
    pfac.load_dictionary(&dictionary(&words));
    pfac.install_dictionary().unwrap();

    let mut group = c.benchmark_group("scan");
    group.throughput(Throughput::Bytes(INPUT_LEN as u64));

    group.bench_function(BenchmarkId::new("dense_sync", INPUT_LEN), |b| {
        let mut output = Vec::new();
        b.iter(|| {
            pfac.scan_into(black_box(&input), &mut output).unwrap();
            black_box(output.len());
        })
    });

    group.bench_function(BenchmarkId::new("compact_unlimited", INPUT_LEN), |b| {
        b.iter(|| {
            let matches = pfac.scan_compact(black_box(&input), -1).unwrap();
            black_box(matches.len());
        })
    });

    group.bench_function(BenchmarkId::new("dense_async_x3", INPUT_LEN), |b| {
        b.iter(|| {
            let tickets: Vec<_> = (0..3)
                .map(|_| {
                    pfac.scan_async(input.clone(), |input, output| {
                        black_box((input.len(), output.len()));
                    })
                    .unwrap()
                })
                .collect();
            for ticket in tickets {
                ticket.wait();
            }
        })
    });

    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    // A denser dictionary stresses the multiplier search.
    let mut rng = XorShift64::new(42);
    let mut buffer = Vec::new();
    for _ in 0..4096 {
        let len = 3 + (rng.next_u64() % 10) as usize;
        for _ in 0..len {
            buffer.push(b'a' + (rng.next_u64() % 26) as u8);
        }
        buffer.push(b'\n');
    }

    c.bench_function("load_and_install", |b| {
        let mut pfac = Pfac::with_device("Host:CPU[0]").unwrap();
        b.iter(|| {
            pfac.load_dictionary(black_box(&buffer));
            pfac.install_dictionary().unwrap();
        })
    });
}

criterion_group!(benches, bench_scans, bench_compile);
criterion_main!(benches);
