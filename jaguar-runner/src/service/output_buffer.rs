//! Output buffer
//!
//! Collects a child's stdout and stderr under one combined byte cap. Both
//! reader tasks write into the same buffer, so the cap bounds the total no
//! matter which stream is noisy. Dropped bytes are never silent: the
//! buffer remembers which stream overflowed and marks it on snapshot.

use jaguar_core::domain::job::CapturedOutput;
use std::sync::{Arc, Mutex};

/// Which stream a chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Default)]
struct Inner {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    stdout_truncated: bool,
    stderr_truncated: bool,
}

/// Thread-safe, bounded output collector
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    cap: usize,
    inner: Arc<Mutex<Inner>>,
}

impl OutputBuffer {
    /// Creates a buffer that keeps at most `cap` bytes across both streams
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Appends a chunk, dropping whatever does not fit
    pub fn push(&self, stream: Stream, chunk: &[u8]) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let used = inner.stdout.len() + inner.stderr.len();
        let room = self.cap.saturating_sub(used);
        let kept = chunk.len().min(room);

        let (buffer, truncated) = match stream {
            Stream::Stdout => (&mut inner.stdout, &mut inner.stdout_truncated),
            Stream::Stderr => (&mut inner.stderr, &mut inner.stderr_truncated),
        };
        buffer.extend_from_slice(&chunk[..kept]);
        if kept < chunk.len() {
            *truncated = true;
        }
    }

    /// Whether anything has been dropped so far
    pub fn is_truncated(&self) -> bool {
        let inner = self.lock();
        inner.stdout_truncated || inner.stderr_truncated
    }

    /// Copies the captured output, marking truncated streams
    pub fn snapshot(&self) -> CapturedOutput {
        let inner = self.lock();
        CapturedOutput {
            stdout: decode(&inner.stdout, inner.stdout_truncated, self.cap),
            stderr: decode(&inner.stderr, inner.stderr_truncated, self.cap),
            truncated: inner.stdout_truncated || inner.stderr_truncated,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the byte vectors
        // inconsistent, so a poisoned buffer is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn decode(bytes: &[u8], truncated: bool, cap: usize) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if truncated {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&format!("[output truncated at {} bytes]\n", cap));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_everything_under_cap() {
        let buffer = OutputBuffer::new(64);
        buffer.push(Stream::Stdout, b"hello\n");
        buffer.push(Stream::Stderr, b"warn\n");

        let output = buffer.snapshot();
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.stderr, "warn\n");
        assert!(!output.truncated);
    }

    #[test]
    fn test_cap_is_shared_between_streams() {
        let buffer = OutputBuffer::new(8);
        buffer.push(Stream::Stdout, b"12345");
        buffer.push(Stream::Stderr, b"abcdef");
        buffer.push(Stream::Stdout, b"more");

        let output = buffer.snapshot();
        assert!(output.truncated);
        assert!(output.stdout.starts_with("12345\n[output truncated"));
        assert!(output.stderr.starts_with("abc\n[output truncated"));
        assert!(buffer.is_truncated());
    }

    #[test]
    fn test_clones_share_storage() {
        let buffer = OutputBuffer::new(16);
        let writer = buffer.clone();
        writer.push(Stream::Stdout, b"from clone");
        assert_eq!(buffer.snapshot().stdout, "from clone");
    }
}
