use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

pub const FRAME_CAPACITY: usize = 32;

/// Single-producer/single-consumer capture buffer.
///
/// The receive path is the only writer of the data slots; the tick context
/// reads completion state and re-arms the buffer with
/// [`FrameBuffer::start_capture`] between frames. Bytes past the armed length
/// are dropped.
///
/// Position, length and a capture generation share one atomic word, so a
/// byte whose cursor was read before a re-arm can never advance the new
/// capture.
pub struct FrameBuffer {
    data: [AtomicU8; FRAME_CAPACITY],
    cursor: AtomicU64,
}

/// Packed `generation << 32 | length << 16 | position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cursor(u64);

impl Cursor {
    fn new(generation: u32, length: usize) -> Self {
        Self((u64::from(generation) << 32) | ((length as u64 & 0xFFFF) << 16))
    }

    fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    fn length(self) -> usize {
        ((self.0 >> 16) & 0xFFFF) as usize
    }

    fn position(self) -> usize {
        (self.0 & 0xFFFF) as usize
    }
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            data: std::array::from_fn(|_| AtomicU8::new(0)),
            cursor: AtomicU64::new(0),
        }
    }

    fn cursor(&self) -> Cursor {
        Cursor(self.cursor.load(Ordering::Acquire))
    }

    /// Reset the cursor and accept the next `length` bytes.
    pub fn start_capture(&self, length: usize) {
        let generation = self.cursor().generation().wrapping_add(1);
        self.cursor.store(
            Cursor::new(generation, length.min(FRAME_CAPACITY)).0,
            Ordering::Release,
        );
    }

    /// Producer side: append one byte if the frame is still open.
    pub fn push(&self, byte: u8) {
        self.commit(self.cursor(), byte);
    }

    /// Store `byte` at the position `seen` points to. Refused when the frame
    /// is full or the buffer was re-armed after `seen` was read.
    fn commit(&self, seen: Cursor, byte: u8) -> bool {
        let pos = seen.position();
        if pos >= seen.length() {
            return false;
        }
        self.data[pos].store(byte, Ordering::Relaxed);
        self.cursor
            .compare_exchange(seen.0, seen.0 + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_complete(&self) -> bool {
        let cursor = self.cursor();
        cursor.position() == cursor.length()
    }

    pub fn bytes_read(&self) -> usize {
        self.cursor().position()
    }

    /// Copy out the first `N` captured bytes.
    pub fn snapshot<const N: usize>(&self) -> [u8; N] {
        std::array::from_fn(|i| {
            self.data
                .get(i)
                .map_or(0, |slot| slot.load(Ordering::Relaxed))
        })
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle given to the transport's receive callback.
#[derive(Clone)]
pub struct FrameReceiver {
    buffer: Arc<FrameBuffer>,
}

impl FrameReceiver {
    pub(crate) fn new(buffer: Arc<FrameBuffer>) -> Self {
        Self { buffer }
    }

    pub fn receive(&self, byte: u8) {
        self.buffer.push(byte);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_after_exact_length() {
        let buf = FrameBuffer::new();
        buf.start_capture(3);
        buf.push(1);
        buf.push(2);
        assert!(!buf.is_complete());
        buf.push(3);
        assert!(buf.is_complete());
        assert_eq!(buf.snapshot::<3>(), [1, 2, 3]);
    }

    #[test]
    fn extra_bytes_are_dropped() {
        let buf = FrameBuffer::new();
        buf.start_capture(2);
        for b in [9, 8, 7, 6] {
            buf.push(b);
        }
        assert!(buf.is_complete());
        assert_eq!(buf.bytes_read(), 2);
        assert_eq!(buf.snapshot::<2>(), [9, 8]);
    }

    #[test]
    fn restart_discards_partial_frame() {
        let buf = FrameBuffer::new();
        buf.start_capture(4);
        buf.push(0xAA);
        buf.start_capture(4);
        assert_eq!(buf.bytes_read(), 0);
        assert!(!buf.is_complete());
        buf.push(0x01);
        assert_eq!(buf.snapshot::<1>(), [0x01]);
    }

    #[test]
    fn byte_racing_a_rearm_is_dropped() {
        let buf = FrameBuffer::new();
        buf.start_capture(10);
        for b in 0..9 {
            buf.push(b);
        }
        let seen = buf.cursor();
        buf.start_capture(10);

        assert!(!buf.commit(seen, 0xEE));
        assert_eq!(buf.bytes_read(), 0);
        assert!(!buf.is_complete());

        buf.push(0x42);
        assert_eq!(buf.bytes_read(), 1);
        assert_eq!(buf.snapshot::<1>(), [0x42]);
    }

    #[test]
    fn rearm_with_same_length_still_rejects_old_cursor() {
        let buf = FrameBuffer::new();
        buf.start_capture(4);
        let seen = buf.cursor();
        buf.start_capture(4);
        assert_ne!(seen, buf.cursor());
        assert!(!buf.commit(seen, 0x01));
        assert_eq!(buf.bytes_read(), 0);
    }

    #[test]
    fn unarmed_buffer_ignores_bytes() {
        let buf = FrameBuffer::new();
        buf.push(5);
        assert_eq!(buf.bytes_read(), 0);
    }

    #[test]
    fn length_is_clamped_to_capacity() {
        let buf = FrameBuffer::new();
        buf.start_capture(FRAME_CAPACITY + 10);
        for _ in 0..FRAME_CAPACITY + 10 {
            buf.push(0x55);
        }
        assert!(buf.is_complete());
        assert_eq!(buf.bytes_read(), FRAME_CAPACITY);
    }

    #[test]
    fn receiver_feeds_shared_buffer_from_another_thread() {
        let buf = Arc::new(FrameBuffer::new());
        buf.start_capture(10);
        let rx = FrameReceiver::new(Arc::clone(&buf));
        let handle = std::thread::spawn(move || {
            for b in 0..10u8 {
                rx.receive(b);
            }
        });
        handle.join().unwrap();
        assert!(buf.is_complete());
        assert_eq!(buf.snapshot::<10>(), [0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }
}
