//! Time-windowed capture of server output.

use std::sync::{Arc, Mutex, PoisonError};

/// Upper bound on captured output; anything past it is dropped.
pub const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

/// Output buffer that only records while a window is open.
#[derive(Debug, Default)]
pub struct CaptureWindow {
    buffer: String,
    capturing: bool,
}

impl CaptureWindow {
    /// Clear the buffer and start recording.
    pub fn open(&mut self) {
        self.buffer.clear();
        self.capturing = true;
    }

    /// Record `text` if a window is open.
    pub fn append(&mut self, text: &str) {
        if !self.capturing {
            return;
        }
        let room = MAX_CAPTURE_BYTES.saturating_sub(self.buffer.len());
        if text.len() <= room {
            self.buffer.push_str(text);
        } else {
            let mut cut = room;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            self.buffer.push_str(&text[..cut]);
        }
    }

    /// Stop recording and hand back everything captured.
    pub fn close(&mut self) -> String {
        self.capturing = false;
        std::mem::take(&mut self.buffer)
    }

    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.capturing
    }
}

/// Capture window shared between the stdout pump and the command channel.
#[derive(Debug, Clone, Default)]
pub struct SharedCapture(Arc<Mutex<CaptureWindow>>);

impl SharedCapture {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.with(CaptureWindow::open);
    }

    pub fn append(&self, text: &str) {
        self.with(|window| window.append(text));
    }

    pub fn close(&self) -> String {
        self.with(CaptureWindow::close)
    }

    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.with(|window| window.is_capturing())
    }

    fn with<T>(&self, f: impl FnOnce(&mut CaptureWindow) -> T) -> T {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}
