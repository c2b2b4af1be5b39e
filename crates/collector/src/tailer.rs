//! Position-tracked file tailer.
//!
//! Each watched file keeps a byte offset; on modification only the bytes
//! past the offset are read, split into complete lines, and enqueued on
//! an unbounded FIFO. A truncated or rotated file resets its offset to
//! zero. A single consumer drains the FIFO through the normalizer into
//! the store, so lines from one file reach the store in file order.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{RecursiveMode, Watcher};
use siem_common::database::{queries, DbPool};
use siem_common::parsers::Normalizer;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Byte-offset bookkeeping for the watched files.
pub struct TailState {
    offsets: HashMap<PathBuf, u64>,
}

impl TailState {
    /// Start at the current end of each file: only lines written after
    /// startup are ingested.
    pub fn new(files: &[PathBuf]) -> Self {
        let offsets = files
            .iter()
            .map(|p| {
                let size = std::fs::metadata(p).map(|m| m.len()).unwrap_or(0);
                (p.clone(), size)
            })
            .collect();
        TailState { offsets }
    }

    /// Offsets starting at zero, so existing content is ingested too.
    pub fn from_start(files: &[PathBuf]) -> Self {
        TailState {
            offsets: files.iter().map(|p| (p.clone(), 0)).collect(),
        }
    }

    pub fn is_watched(&self, path: &Path) -> bool {
        self.offsets.contains_key(path)
    }

    /// Read complete new lines past the stored offset. The offset only
    /// advances past the last newline, so a partially written final line
    /// is picked up whole on the next modification.
    pub fn drain(&mut self, path: &Path) -> std::io::Result<Vec<String>> {
        let Some(offset) = self.offsets.get_mut(path) else {
            return Ok(Vec::new());
        };
        let size = std::fs::metadata(path)?.len();
        if size < *offset {
            // rotation or truncation
            *offset = 0;
        }
        if size == *offset {
            return Ok(Vec::new());
        }

        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(*offset))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let Some(last_newline) = buf.iter().rposition(|&b| b == b'\n') else {
            return Ok(Vec::new());
        };
        let complete = &buf[..=last_newline];
        *offset += (last_newline + 1) as u64;

        let lines = String::from_utf8_lossy(complete)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        Ok(lines)
    }
}

/// Watch the configured files and pump new lines through the
/// normalize -> append path until cancellation.
pub async fn run_tailer(
    files: Vec<PathBuf>,
    pool: DbPool,
    normalizer: Arc<Normalizer>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    if files.is_empty() {
        return Ok(());
    }
    let mut state = TailState::new(&files);

    // modification notifications -> paths; the watcher callback runs on
    // notify's thread, an unbounded sender is safe there
    let (path_tx, mut path_rx) = mpsc::unbounded_channel::<PathBuf>();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(event) = res {
            for path in event.paths {
                let _ = path_tx.send(path);
            }
        }
    })?;

    // watch parent directories so rotation/recreation is seen as well
    let mut watched_dirs: Vec<PathBuf> = Vec::new();
    for file in &files {
        let dir = file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        if !watched_dirs.contains(&dir) {
            watcher.watch(&dir, RecursiveMode::NonRecursive)?;
            watched_dirs.push(dir);
        }
    }
    info!("tailing {} file(s)", files.len());

    // unbounded FIFO of raw lines with a single consumer
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();

    let drain_cancel = cancel.clone();
    let drain = async {
        loop {
            tokio::select! {
                _ = drain_cancel.cancelled() => break,
                changed = path_rx.recv() => {
                    let Some(path) = changed else { break };
                    if !state.is_watched(&path) {
                        continue;
                    }
                    match state.drain(&path) {
                        Ok(lines) => {
                            for line in lines {
                                let _ = line_tx.send(line);
                            }
                        }
                        Err(e) => warn!("error reading {path:?}: {e}"),
                    }
                }
            }
        }
    };

    let consume = async {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                line = line_rx.recv() => {
                    let Some(line) = line else { break };
                    debug!("tailer picked up line: {line}");
                    let Some(event) = normalizer.normalize(&line) else {
                        continue;
                    };
                    if let Err(e) = queries::append_event(&pool, &event).await {
                        warn!("failed to append tailed event: {e}");
                    }
                }
            }
        }
    };

    tokio::join!(drain, consume);
    info!("tailer stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("siem-collector-tailer-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, b"").unwrap();
        path
    }

    #[test]
    fn test_only_new_lines_are_read() {
        let path = temp_file("new_lines.log");
        std::fs::write(&path, b"old line\n").unwrap();

        let mut state = TailState::new(&[path.clone()]);
        // nothing new yet
        assert!(state.drain(&path).unwrap().is_empty());

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "first").unwrap();
        writeln!(f, "second").unwrap();
        drop(f);

        assert_eq!(state.drain(&path).unwrap(), vec!["first", "second"]);
        // drained lines are not delivered twice
        assert!(state.drain(&path).unwrap().is_empty());
    }

    #[test]
    fn test_partial_line_held_until_complete() {
        let path = temp_file("partial.log");
        let mut state = TailState::from_start(&[path.clone()]);

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        write!(f, "incompl").unwrap();
        f.flush().unwrap();
        assert!(state.drain(&path).unwrap().is_empty());

        writeln!(f, "ete").unwrap();
        drop(f);
        assert_eq!(state.drain(&path).unwrap(), vec!["incomplete"]);
    }

    #[test]
    fn test_truncation_resets_offset() {
        let path = temp_file("rotate.log");
        let mut state = TailState::from_start(&[path.clone()]);

        std::fs::write(&path, b"line one\nline two\n").unwrap();
        assert_eq!(state.drain(&path).unwrap().len(), 2);

        // rotate: the file is replaced with shorter content
        std::fs::write(&path, b"fresh\n").unwrap();
        assert_eq!(state.drain(&path).unwrap(), vec!["fresh"]);
    }

    #[test]
    fn test_unwatched_path_is_ignored() {
        let path = temp_file("watched.log");
        let mut state = TailState::new(&[path]);
        let other = PathBuf::from("/tmp/not-watched.log");
        assert!(!state.is_watched(&other));
        assert!(state.drain(&other).unwrap().is_empty());
    }
}
