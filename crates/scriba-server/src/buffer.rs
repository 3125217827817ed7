//! Process-wide pool of reusable output buffers.
//!
//! Buffers are cleared before they are handed back out and are never shared
//! between concurrently running requests. Oversized buffers are dropped on
//! return so one huge response does not pin its allocation forever.

use std::sync::Mutex;

const MAX_POOLED: usize = 64;
const MAX_POOLED_CAPACITY: usize = 1 << 20;

pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
        }
    }

    /// An empty buffer, reusing a pooled allocation when one is available.
    pub fn get(&self) -> Vec<u8> {
        self.free
            .lock()
            .expect("buffer pool lock poisoned")
            .pop()
            .unwrap_or_default()
    }

    /// Return a buffer for reuse.
    pub fn put(&self, mut buf: Vec<u8>) {
        if buf.capacity() > MAX_POOLED_CAPACITY {
            return;
        }
        buf.clear();
        let mut free = self.free.lock().expect("buffer pool lock poisoned");
        if free.len() < MAX_POOLED {
            free.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}
