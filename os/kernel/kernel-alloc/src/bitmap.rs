use alloc::vec;
use alloc::vec::Vec;

/// Fixed-size bitset; one bit per page.
#[derive(Debug, Clone)]
pub struct Bitmap {
    words: Vec<u64>,
    len: usize,
}

impl Bitmap {
    /// A bitmap of `len` clear bits.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> bool {
        assert!(index < self.len, "bit {index} out of range");
        self.words[index / 64] & (1 << (index % 64)) != 0
    }

    pub fn set(&mut self, index: usize, value: bool) {
        assert!(index < self.len, "bit {index} out of range");
        let mask = 1 << (index % 64);
        if value {
            self.words[index / 64] |= mask;
        } else {
            self.words[index / 64] &= !mask;
        }
    }

    pub fn set_range(&mut self, start: usize, count: usize, value: bool) {
        for i in start..start + count {
            self.set(i, value);
        }
    }

    /// First-fit search for `count` consecutive clear bits.
    #[must_use]
    pub fn find_clear_run(&self, count: usize) -> Option<usize> {
        if count == 0 || count > self.len {
            return None;
        }

        let mut run_start = 0;
        let mut run_len = 0;
        for i in 0..self.len {
            if self.get(i) {
                run_len = 0;
                run_start = i + 1;
                continue;
            }
            run_len += 1;
            if run_len == count {
                return Some(run_start);
            }
        }
        None
    }

    #[must_use]
    pub fn count_clear(&self) -> usize {
        let set: usize = self.words.iter().map(|w| w.count_ones() as usize).sum();
        self.len - set
    }
}
