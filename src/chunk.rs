use bytes::BytesMut;

/// A fixed-capacity byte buffer carrying one PCM burst.
///
/// A chunk is owned by its producer pool and handed to the consumer for
/// the duration of one delivery; it is moved, never cloned. The logical
/// `size` tracks how many of the `capacity` bytes hold valid samples.
#[derive(Debug, Default)]
pub struct Chunk {
    buffer: BytesMut,
    size: usize,
}

impl Chunk {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a chunk with `capacity` zeroed bytes, ready to be filled.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let mut chunk = Self::new();
        chunk.reset(capacity);
        chunk
    }

    /// Drop the current buffer and allocate `capacity` zeroed bytes.
    /// The logical size goes back to zero.
    pub fn reset(&mut self, capacity: usize) {
        self.buffer = BytesMut::zeroed(capacity);
        self.size = 0;
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Writable view over the whole capacity.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// The valid payload: the first `size` bytes of the buffer.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.buffer[..self.size]
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Set the logical payload size. `size` must not exceed the capacity.
    pub fn set_size(&mut self, size: usize) {
        assert!(
            size <= self.buffer.len(),
            "chunk size {} exceeds capacity {}",
            size,
            self.buffer.len()
        );
        self.size = size;
    }
}

#[cfg(test)]
mod tests {
    use super::Chunk;

    #[test]
    fn test_reset_zeroes_and_clears_size() {
        let mut chunk = Chunk::new();
        assert_eq!(chunk.capacity(), 0);

        chunk.reset(16);
        assert_eq!(chunk.capacity(), 16);
        assert_eq!(chunk.size(), 0);
        assert!(chunk.buffer_mut().iter().all(|b| *b == 0));

        chunk.buffer_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);
        chunk.set_size(4);
        assert_eq!(chunk.payload(), &[1, 2, 3, 4]);

        // reset drops old contents
        chunk.reset(8);
        assert_eq!(chunk.size(), 0);
        assert!(chunk.buffer_mut().iter().all(|b| *b == 0));
    }

    #[test]
    #[should_panic(expected = "exceeds capacity")]
    fn test_size_cannot_exceed_capacity() {
        let mut chunk = Chunk::with_capacity(8);
        chunk.set_size(9);
    }
}
