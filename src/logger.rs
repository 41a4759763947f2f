//! Leveled logging for the allocator core.
//!
//! A reduced kernel-style logger: a runtime level filter, a pluggable line
//! sink supplied by the embedder, and a ring buffer of recent lines for
//! post-mortem diagnostics. Lines are formatted into a bounded stack
//! buffer; the logger itself never allocates, so it is safe to call from
//! any allocator path.

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use spin::Mutex;

/// Upper bound for one formatted log line, including the level badge.
const LINE_CAPACITY: usize = 256;

/// Bytes of recent log text retained for diagnostics.
const RING_SIZE: usize = 4096;

static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info.priority());

/// The registered sink, stored as a raw fn pointer (0 = discard).
static SINK: AtomicUsize = AtomicUsize::new(0);

static RINGBUF: Mutex<RingBuffer> = Mutex::new(RingBuffer::new());

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Fatal => "FATAL",
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    pub const fn priority(self) -> u8 {
        match self {
            LogLevel::Fatal => 0,
            LogLevel::Error => 1,
            LogLevel::Warn => 2,
            LogLevel::Info => 3,
            LogLevel::Debug => 4,
            LogLevel::Trace => 5,
        }
    }
}

/// Set the maximum level that will be emitted.
pub fn set_level(level: LogLevel) {
    LOG_LEVEL.store(level.priority(), Ordering::Relaxed);
}

pub fn level() -> u8 {
    LOG_LEVEL.load(Ordering::Relaxed)
}

/// Route formatted lines to `sink`. The sink must not allocate through the
/// allocator being logged.
pub fn set_sink(sink: fn(&str)) {
    SINK.store(sink as usize, Ordering::Release);
}

/// Drop the registered sink; lines still reach the ring buffer.
pub fn clear_sink() {
    SINK.store(0, Ordering::Release);
}

fn current_sink() -> Option<fn(&str)> {
    let raw = SINK.load(Ordering::Acquire);
    if raw == 0 {
        return None;
    }
    // The only values ever stored are fn(&str) pointers from set_sink.
    Some(unsafe { core::mem::transmute::<usize, fn(&str)>(raw) })
}

/// Emit one log line. Prefer the `sinfo!`-family macros.
pub fn log(level: LogLevel, args: fmt::Arguments) {
    if level.priority() > LOG_LEVEL.load(Ordering::Relaxed) {
        return;
    }

    let mut line = LineBuffer::new();
    let _ = write!(line, "[{:5}] ", level.as_str());
    let _ = line.write_fmt(args);
    let _ = line.write_char('\n');

    RINGBUF.lock().push(line.as_bytes());

    if let Some(sink) = current_sink() {
        sink(line.as_str());
    }
}

/// Log at Fatal and abort. Used for unrecoverable states such as heap
/// corruption, where continuing would let a forged pointer be dereferenced.
pub fn fatal(args: fmt::Arguments) -> ! {
    log(LogLevel::Fatal, args);
    panic!("{}", args);
}

/// Copy the most recent log bytes into `out`, newest-last. Returns the
/// number of bytes written.
pub fn recent(out: &mut [u8]) -> usize {
    RINGBUF.lock().copy_recent(out)
}

/// Bounded line formatter. Overlong lines are truncated, never split.
struct LineBuffer {
    buf: [u8; LINE_CAPACITY],
    len: usize,
}

impl LineBuffer {
    const fn new() -> Self {
        Self {
            buf: [0; LINE_CAPACITY],
            len: 0,
        }
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    fn as_str(&self) -> &str {
        // Only ever filled through fmt::Write, so this is valid UTF-8 up to
        // the last complete character.
        core::str::from_utf8(self.as_bytes()).unwrap_or("<non-utf8 log line>")
    }
}

impl fmt::Write for LineBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let avail = LINE_CAPACITY - self.len;
        let mut take = s.len().min(avail);
        // Truncate on a character boundary so as_str stays valid.
        while take > 0 && !s.is_char_boundary(take) {
            take -= 1;
        }
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

/// Byte ring holding the tail of the log stream.
struct RingBuffer {
    buf: [u8; RING_SIZE],
    head: usize,
    len: usize,
}

impl RingBuffer {
    const fn new() -> Self {
        Self {
            buf: [0; RING_SIZE],
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.buf[self.head] = b;
            self.head = (self.head + 1) % RING_SIZE;
            if self.len < RING_SIZE {
                self.len += 1;
            }
        }
    }

    fn copy_recent(&self, out: &mut [u8]) -> usize {
        let take = self.len.min(out.len());
        let start = (self.head + RING_SIZE - take) % RING_SIZE;
        for (i, slot) in out[..take].iter_mut().enumerate() {
            *slot = self.buf[(start + i) % RING_SIZE];
        }
        take
    }
}
