//! Fixed-capacity circular buffer
//!
//! Bridges a producer and a consumer that work in different block sizes (the
//! resampler output and the channel reads). Single owner, no locking: the
//! pull-based render chain never touches a buffer from two places at once.
//!
//! Reads and writes are all-or-nothing. A write larger than the free space or
//! a read larger than the buffered data is a no-op returning 0, leaving both
//! positions and the stored contents untouched.

pub struct RingBuffer<T> {
    data: Vec<T>,
    read_pos: usize,
    write_pos: usize,
    len: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Create an empty buffer holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![T::default(); capacity],
            read_pos: 0,
            write_pos: 0,
            len: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of items available to read
    #[inline]
    pub fn available(&self) -> usize {
        self.len
    }

    /// Free space for writing
    #[inline]
    pub fn free(&self) -> usize {
        self.capacity() - self.len
    }

    /// Append all of `input`, or nothing if it doesn't fit
    pub fn write(&mut self, input: &[T]) -> usize {
        let count = input.len();
        if count == 0 || count > self.free() {
            return 0;
        }

        let first = count.min(self.capacity() - self.write_pos);
        self.data[self.write_pos..self.write_pos + first].copy_from_slice(&input[..first]);
        self.data[..count - first].copy_from_slice(&input[first..]);

        self.write_pos = (self.write_pos + count) % self.capacity();
        self.len += count;
        count
    }

    /// Fill all of `output`, or nothing if not enough data is buffered
    pub fn read(&mut self, output: &mut [T]) -> usize {
        let count = output.len();
        if count == 0 || count > self.len {
            return 0;
        }

        let first = count.min(self.capacity() - self.read_pos);
        output[..first].copy_from_slice(&self.data[self.read_pos..self.read_pos + first]);
        output[first..].copy_from_slice(&self.data[..count - first]);

        self.read_pos = (self.read_pos + count) % self.capacity();
        self.len -= count;
        count
    }

    /// Discard everything buffered. Contents are not cleared.
    pub fn empty(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_across_wrap() {
        let mut ring = RingBuffer::<i32>::new(8);
        let mut out = [0; 5];

        assert_eq!(ring.write(&[1, 2, 3, 4, 5, 6]), 6);
        assert_eq!(ring.read(&mut out), 5);
        assert_eq!(out, [1, 2, 3, 4, 5]);

        // Wraps the write position past the end of storage
        assert_eq!(ring.write(&[7, 8, 9, 10, 11]), 5);
        assert_eq!(ring.available(), 6);

        let mut out = [0; 6];
        assert_eq!(ring.read(&mut out), 6);
        assert_eq!(out, [6, 7, 8, 9, 10, 11]);
        assert_eq!(ring.available(), 0);
        assert_eq!(ring.free(), 8);
    }

    #[test]
    fn test_oversized_write_is_noop() {
        let mut ring = RingBuffer::<i32>::new(4);
        assert_eq!(ring.write(&[1, 2, 3]), 3);
        assert_eq!(ring.write(&[4, 5]), 0);
        assert_eq!(ring.available(), 3);

        let mut out = [0; 3];
        assert_eq!(ring.read(&mut out), 3);
        assert_eq!(out, [1, 2, 3]);
    }

    #[test]
    fn test_oversized_read_is_noop() {
        let mut ring = RingBuffer::<i32>::new(4);
        ring.write(&[1, 2]);

        let mut out = [9; 3];
        assert_eq!(ring.read(&mut out), 0);
        assert_eq!(out, [9, 9, 9]);
        assert_eq!(ring.available(), 2);

        let mut out = [0; 2];
        assert_eq!(ring.read(&mut out), 2);
        assert_eq!(out, [1, 2]);
    }

    #[test]
    fn test_empty_resets_positions() {
        let mut ring = RingBuffer::<i32>::new(4);
        ring.write(&[1, 2, 3]);
        ring.empty();
        assert_eq!(ring.available(), 0);
        assert_eq!(ring.free(), 4);

        assert_eq!(ring.write(&[4, 5, 6, 7]), 4);
        let mut out = [0; 4];
        assert_eq!(ring.read(&mut out), 4);
        assert_eq!(out, [4, 5, 6, 7]);
    }

    #[test]
    fn test_interleaved_sequence_preserves_order() {
        let mut ring = RingBuffer::<u32>::new(7);
        let mut next_in = 0u32;
        let mut next_out = 0u32;

        for step in 0..50u32 {
            let write_len = (step % 4 + 1) as usize;
            if write_len <= ring.free() {
                let block: Vec<u32> = (next_in..next_in + write_len as u32).collect();
                assert_eq!(ring.write(&block), write_len);
                next_in += write_len as u32;
            }

            let read_len = (step % 3 + 1) as usize;
            let mut out = vec![0u32; read_len];
            if ring.read(&mut out) == read_len {
                for value in out {
                    assert_eq!(value, next_out);
                    next_out += 1;
                }
            }
        }
        assert_eq!(next_in - next_out, ring.available() as u32);
    }
}
