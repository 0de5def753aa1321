/// Running subtasks of one job vertex, one bit per subtask index.
///
/// Scratch state: rebuilt from attempt states for every plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningStatus {
    words: Vec<u64>,
    len: usize,
}

impl RunningStatus {
    /// A status with `len` subtasks, none running.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    /// Number of subtasks tracked.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set(&mut self, subtask: usize) {
        debug_assert!(subtask < self.len);
        self.words[subtask / 64] |= 1u64 << (subtask % 64);
    }

    pub fn get(&self, subtask: usize) -> bool {
        subtask < self.len && self.words[subtask / 64] & (1u64 << (subtask % 64)) != 0
    }

    /// Number of running subtasks.
    pub fn cardinality(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn none_running(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn all_running(&self) -> bool {
        self.cardinality() == self.len
    }

    /// Forget every running subtask.
    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_bits_across_words() {
        let mut status = RunningStatus::new(130);
        assert!(status.none_running());
        status.set(0);
        status.set(64);
        status.set(129);
        assert!(status.get(64) && status.get(129));
        assert!(!status.get(1) && !status.get(200));
        assert_eq!(status.cardinality(), 3);
        assert!(!status.all_running());

        status.clear();
        assert!(status.none_running());
    }

    #[test]
    fn all_running_compares_against_subtask_count() {
        let mut status = RunningStatus::new(2);
        status.set(0);
        assert!(!status.all_running());
        status.set(1);
        assert!(status.all_running());
    }
}
