use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::cli::LogsOpts;
use crate::paths;

const FOLLOW_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Which backend streams to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamFilter {
    Both,
    OutOnly,
    ErrOnly,
}

impl StreamFilter {
    fn from_opts(opts: &LogsOpts) -> Self {
        match (opts.out, opts.err) {
            (true, false) => StreamFilter::OutOnly,
            (false, true) => StreamFilter::ErrOnly,
            _ => StreamFilter::Both,
        }
    }
}

pub fn run(opts: LogsOpts) -> Result<()> {
    let (out_path, err_path) = paths::log_paths();
    let filter = StreamFilter::from_opts(&opts);

    let mut streams: Vec<(&'static str, PathBuf)> = Vec::new();
    if filter != StreamFilter::ErrOnly {
        streams.push(("out", out_path));
    }
    if filter != StreamFilter::OutOnly {
        streams.push(("err", err_path));
    }

    for (label, path) in &streams {
        print_tail(label, path, opts.lines, streams.len() > 1)?;
    }

    if opts.follow {
        follow(&streams)?;
    }

    Ok(())
}

/// Print the last `lines` lines of one log file. A missing file is
/// reported, not an error.
fn print_tail(label: &str, path: &Path, lines: usize, prefixed: bool) -> Result<()> {
    if !path.exists() {
        println!("[{}] (no log file at {})", label, path.display());
        return Ok(());
    }

    let contents =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    for line in tail_lines(&contents, lines) {
        if prefixed {
            println!("[{}] {}", label, line);
        } else {
            println!("{}", line);
        }
    }
    Ok(())
}

fn tail_lines(contents: &str, count: usize) -> Vec<&str> {
    let all: Vec<&str> = contents.lines().collect();
    let start = all.len().saturating_sub(count);
    all[start..].to_vec()
}

/// Block printing new log bytes until Ctrl+C. The only supervisor operation
/// that does not terminate on its own.
fn follow(streams: &[(&'static str, PathBuf)]) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })
    .context("failed to install Ctrl+C handler")?;

    // Start from the current end of each file; the tail above already
    // showed the history.
    let mut offsets: Vec<u64> = streams
        .iter()
        .map(|(_, path)| fs::metadata(path).map(|m| m.len()).unwrap_or(0))
        .collect();

    eprintln!("Following logs (Ctrl+C to stop)...");
    while running.load(Ordering::SeqCst) {
        for (i, (label, path)) in streams.iter().enumerate() {
            offsets[i] = drain_new_bytes(label, path, offsets[i], streams.len() > 1)?;
        }
        thread::sleep(FOLLOW_POLL_INTERVAL);
    }

    Ok(())
}

/// Print anything appended past `offset`; returns the new offset. Handles
/// truncation/rotation by restarting from zero.
fn drain_new_bytes(label: &str, path: &Path, offset: u64, prefixed: bool) -> Result<u64> {
    let Ok(meta) = fs::metadata(path) else {
        return Ok(offset);
    };
    let len = meta.len();
    if len == offset {
        return Ok(offset);
    }
    let start = if len < offset { 0 } else { offset };

    let mut file =
        fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    file.seek(SeekFrom::Start(start))
        .with_context(|| format!("failed to seek {}", path.display()))?;

    let mut buf = String::new();
    file.read_to_string(&mut buf)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    for line in buf.lines() {
        if prefixed {
            let _ = writeln!(handle, "[{}] {}", label, line);
        } else {
            let _ = writeln!(handle, "{}", line);
        }
    }

    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn tail_returns_last_n_lines() {
        let contents = "a\nb\nc\nd\n";
        assert_eq!(tail_lines(contents, 2), vec!["c", "d"]);
        assert_eq!(tail_lines(contents, 10), vec!["a", "b", "c", "d"]);
        assert!(tail_lines("", 5).is_empty());
    }

    #[test]
    fn missing_log_file_is_not_an_error() {
        let dir = TempDir::new().expect("tempdir");
        print_tail("out", &dir.path().join("nope.log"), 10, false).expect("tail");
    }

    #[test]
    fn drain_reports_only_appended_bytes() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("backend.out.log");
        fs::write(&path, "first\n").expect("write");

        let offset = drain_new_bytes("out", &path, 0, false).expect("drain");
        assert_eq!(offset, 6);

        fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut f| f.write_all(b"second\n"))
            .expect("append");

        let offset = drain_new_bytes("out", &path, offset, false).expect("drain again");
        assert_eq!(offset, 13);
    }

    #[test]
    fn drain_restarts_after_truncation() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("backend.out.log");
        fs::write(&path, "a long first line\n").expect("write");
        let offset = drain_new_bytes("out", &path, 0, false).expect("drain");

        fs::write(&path, "short\n").expect("truncate");
        let offset = drain_new_bytes("out", &path, offset, false).expect("drain after truncate");
        assert_eq!(offset, 6);
    }
}
