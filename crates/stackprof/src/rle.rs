//! Delta-or-repeat encoding shared by the raw stack log and the tag log.

/// A value seen `repeat` times in a row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run<T> {
    pub value: T,
    pub repeat: u64,
}

/// Append-only run-length log. Only the tail run is ever mutated.
#[derive(Debug, Clone)]
pub struct RunLengthLog<T> {
    runs: Vec<Run<T>>,
    pushed: u64,
}

impl<T> Default for RunLengthLog<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RunLengthLog<T> {
    pub fn new() -> Self {
        RunLengthLog {
            runs: Vec::new(),
            pushed: 0,
        }
    }

    /// Bump the tail run if `same` accepts it, otherwise append `make()`.
    ///
    /// `make` only runs when a new run starts, so callers comparing borrowed
    /// data avoid building an owned value for repeats. Returns whether the
    /// tail was repeated.
    pub fn push_with<S, M>(&mut self, same: S, make: M) -> bool
    where
        S: FnOnce(&T) -> bool,
        M: FnOnce() -> T,
    {
        self.pushed += 1;
        if let Some(tail) = self.runs.last_mut()
            && same(&tail.value)
        {
            tail.repeat += 1;
            return true;
        }
        self.runs.push(Run {
            value: make(),
            repeat: 1,
        });
        false
    }

    /// Number of values pushed, counting repeats
    pub fn total(&self) -> u64 {
        self.pushed
    }

    pub fn runs(&self) -> &[Run<T>] {
        &self.runs
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Expand runs back into one item per pushed value
    pub fn expand(&self) -> impl Iterator<Item = &T> {
        self.runs
            .iter()
            .flat_map(|run| std::iter::repeat_n(&run.value, run.repeat as usize))
    }

    /// Take all runs, leaving the log empty
    pub fn take(&mut self) -> Vec<Run<T>> {
        self.pushed = 0;
        std::mem::take(&mut self.runs)
    }
}

impl<T: PartialEq> RunLengthLog<T> {
    pub fn push(&mut self, value: T) -> bool {
        self.pushed += 1;
        if let Some(tail) = self.runs.last_mut()
            && tail.value == value
        {
            tail.repeat += 1;
            return true;
        }
        self.runs.push(Run { value, repeat: 1 });
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consecutive_repeats_collapse() {
        let mut log = RunLengthLog::new();
        assert!(!log.push('a'));
        assert!(log.push('a'));
        assert!(!log.push('b'));
        assert!(!log.push('a'));
        assert_eq!(log.runs().len(), 3);
        assert_eq!(log.runs()[0], Run { value: 'a', repeat: 2 });
        assert_eq!(log.total(), 4);
    }

    #[test]
    fn test_expand_restores_sequence() {
        let input = [1, 1, 1, 2, 3, 3, 1];
        let mut log = RunLengthLog::new();
        for v in input {
            log.push(v);
        }
        let expanded: Vec<i32> = log.expand().copied().collect();
        assert_eq!(expanded, input);
    }

    #[test]
    fn test_push_with_custom_predicate() {
        let mut log: RunLengthLog<Vec<u8>> = RunLengthLog::new();
        let mut built = 0;
        for slice in [&b"ab"[..], b"ab", b"ab", b"cd"] {
            log.push_with(
                |tail| tail.as_slice() == slice,
                || {
                    built += 1;
                    slice.to_vec()
                },
            );
        }
        assert_eq!(built, 2);
        assert_eq!(log.runs()[0].repeat, 3);
    }

    #[test]
    fn test_take_resets() {
        let mut log = RunLengthLog::new();
        log.push(5u8);
        let runs = log.take();
        assert_eq!(runs.len(), 1);
        assert!(log.is_empty());
        assert_eq!(log.total(), 0);
    }
}
