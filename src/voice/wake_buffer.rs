//! Sliding window over the most recent classifier labels

use std::collections::VecDeque;

/// Number of labels kept; the wake phrase is two words
const CAPACITY: usize = 2;

/// The last two labels pushed, oldest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WakeWordBuffer {
    words: VecDeque<String>,
}

impl WakeWordBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self {
            words: VecDeque::with_capacity(CAPACITY + 1),
        }
    }

    /// Append a label, dropping the oldest once two are held
    pub fn push(&mut self, label: impl Into<String>) {
        self.words.push_back(label.into());
        while self.words.len() > CAPACITY {
            self.words.pop_front();
        }
    }

    /// True iff the buffer holds exactly `[first, second]`
    #[must_use]
    pub fn matches(&self, first: &str, second: &str) -> bool {
        self.words.len() == CAPACITY && self.words[0] == first && self.words[1] == second
    }

    /// Empty the buffer
    pub fn reset(&mut self) {
        self.words.clear();
    }

    /// Number of labels held (at most two)
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether no label is held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Held labels, oldest first
    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.words.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_two_most_recent() {
        let mut buffer = WakeWordBuffer::new();
        for (n, label) in ["hello", "go", "zero", "up"].into_iter().enumerate() {
            buffer.push(label);
            assert_eq!(buffer.len(), (n + 1).min(2));
        }
        assert_eq!(buffer.words().collect::<Vec<_>>(), ["zero", "up"]);
    }

    #[test]
    fn test_matches_in_order_only() {
        let mut buffer = WakeWordBuffer::new();
        buffer.push("zero");
        buffer.push("go");
        assert!(!buffer.matches("go", "zero"));

        buffer.push("zero");
        assert!(buffer.matches("go", "zero"));
    }

    #[test]
    fn test_single_word_never_matches() {
        let mut buffer = WakeWordBuffer::new();
        buffer.push("go");
        assert!(!buffer.matches("go", "zero"));
        assert!(!buffer.matches("go", ""));
    }

    #[test]
    fn test_reset_clears_match() {
        let mut buffer = WakeWordBuffer::new();
        buffer.push("go");
        buffer.push("zero");
        buffer.reset();
        assert!(buffer.is_empty());
        assert!(!buffer.matches("go", "zero"));
    }
}
