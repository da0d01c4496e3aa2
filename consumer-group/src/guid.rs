use std::sync::atomic::{AtomicU32, Ordering};

/// Largest counter value before it wraps back to 1.
const WRAP_AT: u32 = 0x7FFF_FFFF;

/// Process-wide monotonic counter used to build unique member ids.
///
/// A single `Guid` is meant to be shared (behind an `Arc` or as a
/// process-global `static`) by every `ConsumerGroup` instance in the
/// process, so ids stay distinct even across groups.
#[derive(Debug, Default)]
pub struct Guid {
    counter: AtomicU32,
}

impl Guid {
    pub fn new() -> Self {
        Self {
            counter: AtomicU32::new(0),
        }
    }

    /// Atomically advances the counter and returns the new value, wrapping
    /// `WRAP_AT -> 1` rather than overflowing.
    pub fn next_counter(&self) -> u32 {
        let mut new = 0;
        self.counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                new = if v >= WRAP_AT { 1 } else { v + 1 };
                Some(new)
            })
            .expect("update closure always returns Some");
        new
    }

    /// Builds `<hostname>-<pid>-<unix_seconds>-<counter>`.
    pub fn next(&self) -> String {
        let counter = self.next_counter();
        let hostname = hostname();
        let pid = std::process::id();
        let secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        format!("{hostname}-{pid}-{secs}-{counter}")
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string())
}
