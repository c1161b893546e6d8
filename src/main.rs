//! Multi-Pattern Scanner CLI
//!
//! Loads a dictionary of newline-separated patterns, scans a text buffer, and
//! prints every match as `<index> <pattern-id>` (dense scan) or the compact
//! match list (`--compact`).
//!
//! # Output Format
//!
//! Matches go to stdout, one per line. A statistics line is written to stderr
//! on completion:
//! `device=<name> patterns=N bytes=N matches=N elapsed_ms=N`
//!
//! # Exit Codes
//!
//! - `0`: success (regardless of match count)
//! - `1`: scan or device failure
//! - `2`: invalid arguments

use pfac_rs::{available_devices, read_file, Pfac, PfacConfig, INVALID};
use std::env;
use std::process::ExitCode;
use std::time::Instant;

const DEMO_TEXT: &[u8] = b"the fat cat sat on the mat and acted like a prat";

fn print_usage(exe: &std::ffi::OsStr) {
    eprintln!(
        "usage: {} [OPTIONS]

OPTIONS:
    --list                  List available devices and exit
    --device=<name>         Device to use (any substring of a listed name)
    --dictionary=<file>     Dictionary file, newline-separated patterns (default: words)
    --text=<file>           Text file to scan (default: a built-in demo sentence)
    --compact               Compact scan: print (index, pattern) matches only
    --limit=<N>             Cap compact results at N entries (default: unlimited)
    --help, -h              Show this help message",
        exe.to_string_lossy()
    );
}

fn main() -> ExitCode {
    let mut args = env::args_os();
    let exe = args.next().unwrap_or_else(|| "pfac-rs".into());

    let mut device: Option<String> = None;
    let mut dictionary = String::from("words");
    let mut text: Option<String> = None;
    let mut compact = false;
    let mut limit: i32 = -1;

    for arg in args {
        let Some(flag) = arg.to_str() else {
            print_usage(&exe);
            return ExitCode::from(2);
        };
        if let Some(value) = flag.strip_prefix("--device=") {
            device = Some(value.to_string());
            continue;
        }
        if let Some(value) = flag.strip_prefix("--dictionary=") {
            dictionary = value.to_string();
            continue;
        }
        if let Some(value) = flag.strip_prefix("--text=") {
            text = Some(value.to_string());
            continue;
        }
        if let Some(value) = flag.strip_prefix("--limit=") {
            limit = match value.parse() {
                Ok(n) => n,
                Err(_) => {
                    eprintln!("invalid --limit value: {value}");
                    return ExitCode::from(2);
                }
            };
            continue;
        }
        match flag {
            "--list" => {
                for name in available_devices() {
                    println!("{name}");
                }
                return ExitCode::SUCCESS;
            }
            "--compact" => compact = true,
            "--help" | "-h" => {
                print_usage(&exe);
                return ExitCode::SUCCESS;
            }
            _ => {
                eprintln!("unknown flag: {flag}");
                print_usage(&exe);
                return ExitCode::from(2);
            }
        }
    }

    match run(device, &dictionary, text.as_deref(), compact, limit) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(
    device: Option<String>,
    dictionary: &str,
    text: Option<&str>,
    compact: bool,
    limit: i32,
) -> Result<(), Box<dyn std::error::Error>> {
    let patterns = read_file(dictionary)?;
    let input = match text {
        Some(path) => read_file(path)?,
        None => DEMO_TEXT.to_vec(),
    };

    let mut pfac = Pfac::with_config(PfacConfig {
        device,
        ..PfacConfig::default()
    })?;
    pfac.load_dictionary(&patterns);
    pfac.install_dictionary()?;

    let start = Instant::now();
    let matches = if compact {
        let entries = pfac.scan_compact(&input, limit)?;
        for entry in &entries {
            println!("{} {}", entry.index, entry.pattern);
        }
        entries.len()
    } else {
        let output = pfac.scan(&input)?;
        let mut matches = 0;
        for (index, &pattern) in output.iter().enumerate() {
            if pattern != INVALID {
                println!("{index} {pattern}");
                matches += 1;
            }
        }
        matches
    };
    let elapsed = start.elapsed();

    eprintln!(
        "device={} patterns={} bytes={} matches={} elapsed_ms={}",
        pfac.device_name(),
        pfac.pattern_count(),
        input.len(),
        matches,
        elapsed.as_millis()
    );
    Ok(())
}
