/// Fixed-capacity circular store keeping only the most recent samples.
///
/// One spare slot distinguishes full from empty: `tail` is the next write
/// position and `head` the oldest element still held. There is no pop; reads
/// copy historical windows relative to the tail.
pub struct RingBuffer<T> {
    inner: Box<[T]>,
    head: usize,
    tail: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: vec![T::default(); capacity + 1].into_boxed_slice(),
            head: 0,
            tail: 0,
        }
    }

    /// Number of elements that can be held before the oldest is evicted.
    pub fn capacity(&self) -> usize {
        self.inner.len() - 1
    }

    pub fn len(&self) -> usize {
        if self.tail >= self.head {
            self.tail - self.head
        } else {
            self.tail + self.inner.len() - self.head
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn put(&mut self, item: T) {
        let end = self.inner.len();
        self.inner[self.tail] = item;
        self.tail = (self.tail + 1) % end;
        if self.tail == self.head {
            self.head = (self.head + 1) % end;
        }
    }

    pub fn extend_from_slice(&mut self, items: &[T]) {
        for &item in items {
            self.put(item);
        }
    }

    /// Copies the `count` elements that end `rbegin` positions before the
    /// newest one into `target[..count]`, oldest first.
    ///
    /// # Panics
    /// If fewer than `rbegin + count` elements are buffered or `target` is
    /// shorter than `count`. Callers derive offsets from known fill levels.
    pub fn copy_stride_right(&self, rbegin: usize, count: usize, target: &mut [T]) {
        assert!(
            self.len() >= rbegin + count,
            "ring buffer holds {} elements, window needs {}",
            self.len(),
            rbegin + count
        );
        assert!(target.len() >= count, "target shorter than window");

        let end = self.inner.len();
        // One past the window's newest element, in storage coordinates.
        let r_edge = (self.tail + end - rbegin) % end;
        if r_edge >= count {
            target[..count].copy_from_slice(&self.inner[r_edge - count..r_edge]);
        } else {
            let wrapped = count - r_edge;
            target[..wrapped].copy_from_slice(&self.inner[end - wrapped..end]);
            target[wrapped..count].copy_from_slice(&self.inner[..r_edge]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_len_never_exceeds_capacity() {
        let mut rb = RingBuffer::<i16>::new(5);
        assert!(rb.is_empty());
        for i in 0..23 {
            rb.put(i);
            assert!(rb.len() <= rb.capacity());
        }
        assert_eq!(rb.len(), 5);
    }

    #[test]
    fn test_copy_latest_across_wraparound() {
        let mut rb = RingBuffer::<u32>::new(7);
        let mut target = [0u32; 7];
        // Walk the tail through every storage offset.
        for i in 1..=40u32 {
            rb.put(i);
            let count = rb.len().min(4);
            rb.copy_stride_right(0, count, &mut target);
            let expected: Vec<u32> = (i + 1 - count as u32..=i).collect();
            assert_eq!(&target[..count], expected.as_slice(), "after {i} puts");
        }
    }

    #[test]
    fn test_copy_historical_window() {
        let mut rb = RingBuffer::<u32>::new(10);
        for i in 0..26u32 {
            rb.put(i);
        }
        // Holds 16..=25; skip the newest 3, take the 5 before them.
        let mut target = [0u32; 5];
        rb.copy_stride_right(3, 5, &mut target);
        assert_eq!(target, [18, 19, 20, 21, 22]);

        rb.copy_stride_right(5, 5, &mut target);
        assert_eq!(target, [16, 17, 18, 19, 20]);
    }

    #[test]
    fn test_random_puts_match_tail_of_history() {
        use rand::Rng;
        let mut rng = rand::rng();
        let mut rb = RingBuffer::<i16>::new(64);
        let mut history = Vec::new();
        for _ in 0..1000 {
            let v: i16 = rng.random();
            rb.put(v);
            history.push(v);
        }
        let mut target = vec![0i16; 64];
        for rbegin in [0usize, 1, 17, 40] {
            let count = 64 - rbegin;
            rb.copy_stride_right(rbegin, count, &mut target);
            let end = history.len() - rbegin;
            assert_eq!(&target[..count], &history[end - count..end]);
        }
    }

    #[test]
    #[should_panic]
    fn test_window_longer_than_fill_panics() {
        let mut rb = RingBuffer::<i16>::new(10);
        rb.extend_from_slice(&[1, 2, 3]);
        let mut target = [0i16; 4];
        rb.copy_stride_right(0, 4, &mut target);
    }
}
