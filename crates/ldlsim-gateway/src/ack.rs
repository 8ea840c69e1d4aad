//! Acknowledgement tracking for upstream datagrams.

use std::collections::VecDeque;

/// The most recent upstream tokens and whether the server acknowledged them.
///
/// When full, recording a token evicts the oldest. The ack ratio is taken over
/// the tokens still in the window.
#[derive(Debug, Clone)]
pub struct AckWindow {
    entries: VecDeque<(u16, bool)>,
    capacity: usize,
}

impl AckWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        AckWindow {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Remember a token that was just sent.
    pub fn record(&mut self, token: u16) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((token, false));
    }

    /// Mark `token` acknowledged. Returns false if it is unknown or was already acked.
    ///
    /// Tokens wrap, so the newest matching entry wins.
    pub fn acknowledge(&mut self, token: u16) -> bool {
        match self.entries.iter_mut().rev().find(|(t, _)| *t == token) {
            Some((_, acked)) if !*acked => {
                *acked = true;
                true
            }
            _ => false,
        }
    }

    pub fn is_acknowledged(&self, token: u16) -> Option<bool> {
        self.entries.iter().rev().find(|(t, _)| *t == token).map(|(_, acked)| *acked)
    }

    /// Acknowledged share of the window, in percent. Zero when empty.
    pub fn ratio(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        let acked = self.entries.iter().filter(|(_, acked)| *acked).count();
        acked as f64 * 100.0 / self.entries.len() as f64
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_flips_contribution() {
        let mut window = AckWindow::new(32);
        window.record(100);
        window.record(101);
        assert_eq!(window.ratio(), 0.0);
        assert_eq!(window.is_acknowledged(100), Some(false));

        assert!(window.acknowledge(100));
        assert_eq!(window.is_acknowledged(100), Some(true));
        assert_eq!(window.ratio(), 50.0);

        // A duplicate ack changes nothing.
        assert!(!window.acknowledge(100));
        assert_eq!(window.ratio(), 50.0);
    }

    #[test]
    fn test_unknown_token() {
        let mut window = AckWindow::new(4);
        window.record(1);
        assert!(!window.acknowledge(2));
        assert_eq!(window.is_acknowledged(2), None);
    }

    #[test]
    fn test_oldest_evicted() {
        let mut window = AckWindow::new(3);
        for token in 0..3 {
            window.record(token);
            window.acknowledge(token);
        }
        assert_eq!(window.ratio(), 100.0);
        window.record(3);
        assert_eq!(window.len(), 3);
        assert_eq!(window.is_acknowledged(0), None);
        assert!((window.ratio() - 200.0 / 3.0).abs() < 1e-9);
        assert!(!window.acknowledge(0));
    }

    #[test]
    fn test_empty_ratio() {
        let window = AckWindow::new(0);
        assert!(window.is_empty());
        assert_eq!(window.capacity(), 1);
        assert_eq!(window.ratio(), 0.0);
    }
}
