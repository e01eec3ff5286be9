//
// input.rs
// Dicom-Transform-rs
//
// Enumerates the files to transform, from explicit paths or lazily from standard input,
// behind a lock so concurrent workers take turns reading.
//
// Thales Matheus Mendonça Santos - November 2025

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::cancel::CancellationToken;

type PathIter = Box<dyn Iterator<Item = PathBuf> + Send>;

/// Paths read ahead of the workers when streaming a listing.
const READ_AHEAD: usize = 64;

/// How long a worker waits for the next streamed path before checking for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

enum Paths {
    Listed(Mutex<PathIter>),
    Streamed(Mutex<Receiver<PathBuf>>),
}

/// Shared, lazily evaluated sequence of input paths.
///
/// Workers call [`InputSource::next_path`] concurrently; only the read step is
/// serialized, so an unbounded stream is never materialized. Streamed listings
/// are read on their own thread, so a pending read never outlives cancellation.
pub struct InputSource {
    paths: Paths,
}

impl InputSource {
    /// Explicit paths. Directories are walked recursively, everything else is kept as given.
    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        let iter = paths.into_iter().flat_map(|path| -> PathIter {
            if path.is_dir() {
                Box::new(
                    WalkDir::new(path)
                        .sort_by_file_name()
                        .into_iter()
                        .filter_map(|e| e.ok())
                        .filter(|e| e.file_type().is_file())
                        .map(|e| e.into_path()),
                )
            } else {
                Box::new(std::iter::once(path))
            }
        });
        Self {
            paths: Paths::Listed(Mutex::new(Box::new(iter))),
        }
    }

    /// One path per line; blank lines and paths that are not existing files are dropped.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(READ_AHEAD);
        thread::spawn(move || read_listing(reader, tx));
        Self {
            paths: Paths::Streamed(Mutex::new(rx)),
        }
    }

    pub fn stdin() -> Self {
        Self::from_reader(BufReader::new(std::io::stdin()))
    }

    /// Take the next path, blocking while another worker reads.
    ///
    /// Returns `None` once the input is exhausted or `cancel` is set while
    /// waiting for a streamed path.
    pub fn next_path(&self, cancel: &CancellationToken) -> Option<PathBuf> {
        match &self.paths {
            Paths::Listed(paths) => lock(paths).next(),
            Paths::Streamed(paths) => {
                let paths = lock(paths);
                loop {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    match paths.recv_timeout(POLL_INTERVAL) {
                        Ok(path) => return Some(path),
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => return None,
                    }
                }
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Feed `tx` with the existing files listed by `reader` until it ends or nobody listens.
fn read_listing<R: BufRead>(reader: R, tx: SyncSender<PathBuf>) {
    for line in reader.split(b'\n') {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("stopped reading input paths: {e}");
                break;
            }
        };

        let Some(path) = line_to_path(&line) else {
            continue;
        };
        if !path.is_file() {
            debug!("ignoring {}: not an existing file", path.display());
            continue;
        }
        if tx.send(path).is_err() {
            break;
        }
    }
}

/// Raw listing line to a path. File names are bytes on Unix and need not be UTF-8.
fn line_to_path(line: &[u8]) -> Option<PathBuf> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }

    #[cfg(unix)]
    {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;
        Some(PathBuf::from(OsStr::from_bytes(line)))
    }

    #[cfg(not(unix))]
    {
        match std::str::from_utf8(line) {
            Ok(text) => Some(PathBuf::from(text)),
            Err(_) => {
                warn!(
                    "skipping input path that is not valid UTF-8: {}",
                    String::from_utf8_lossy(line)
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn drain(source: &InputSource) -> Vec<PathBuf> {
        let cancel = CancellationToken::new();
        std::iter::from_fn(|| source.next_path(&cancel)).collect()
    }

    #[test]
    fn reader_keeps_only_existing_files() {
        let dir = tempdir().expect("tempdir");
        let a = dir.path().join("a.dcm");
        let b = dir.path().join("b.dcm");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();

        let listing = format!(
            "{}\n\n{}\n  {}  \n{}\n",
            a.display(),
            dir.path().join("missing.dcm").display(),
            b.display(),
            dir.path().display(),
        );
        let source = InputSource::from_reader(Cursor::new(listing));

        assert_eq!(drain(&source), vec![a, b]);
        assert_eq!(source.next_path(&CancellationToken::new()), None);
    }

    #[test]
    fn explicit_directories_are_walked() {
        let dir = tempdir().expect("tempdir");
        let nested = dir.path().join("series");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("IM2"), b"2").unwrap();
        fs::write(nested.join("IM1"), b"1").unwrap();
        let loose = dir.path().join("loose.dcm");

        let source = InputSource::from_paths(vec![loose.clone(), nested.clone()]);
        assert_eq!(
            drain(&source),
            vec![loose, nested.join("IM1"), nested.join("IM2")]
        );
    }

    #[test]
    fn concurrent_readers_split_the_stream() {
        let listing: String = (0..200).map(|_| "/nonexistent\n").collect();
        let dir = tempdir().expect("tempdir");
        let file = dir.path().join("only.dcm");
        fs::write(&file, b"x").unwrap();
        let listing = format!("{listing}{}\n", file.display());
        let source = InputSource::from_reader(Cursor::new(listing));

        let taken: Vec<PathBuf> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4).map(|_| scope.spawn(|| drain(&source))).collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });
        assert_eq!(taken, vec![file]);
    }

    #[test]
    fn undecodable_line_is_skipped_alone() {
        let dir = tempdir().expect("tempdir");
        let a = dir.path().join("a.dcm");
        let b = dir.path().join("b.dcm");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();

        let mut listing = Vec::new();
        listing.extend_from_slice(format!("{}\n", a.display()).as_bytes());
        listing.extend_from_slice(b"/tmp/caf\xe9.dcm\n");
        listing.extend_from_slice(format!("{}\r\n", b.display()).as_bytes());
        let source = InputSource::from_reader(Cursor::new(listing));

        assert_eq!(drain(&source), vec![a, b]);
    }

    /// Reader that stays blocked until its sender is dropped.
    struct Stalled(mpsc::Receiver<()>);

    impl std::io::Read for Stalled {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }

    #[test]
    fn cancellation_interrupts_a_pending_read() {
        let (release, stalled) = mpsc::channel();
        let source = InputSource::from_reader(BufReader::new(Stalled(stalled)));
        let cancel = CancellationToken::new();

        let next = std::thread::scope(|scope| {
            let waiter = scope.spawn(|| source.next_path(&cancel));
            std::thread::sleep(Duration::from_millis(50));
            cancel.cancel();
            waiter.join().unwrap()
        });

        assert_eq!(next, None);
        drop(release);
    }
}
