//! Snowball consensus instance.
//!
//! Snowball is the nucleus of the Avalanche consensus family: a single
//! instance converges on one choice out of a conflict set through
//! repeated polling. The conflict graph drives one instance per conflict
//! set; round accounting (which polls count as consecutive) lives there.

use std::collections::HashMap;

use crate::ids::Id;

/// Snowball state for a single conflict set.
#[derive(Debug, Clone)]
pub struct Snowball {
    /// Current preference
    preference: Id,
    /// Choice that produced the current confidence run
    last_preference: Id,
    /// Consecutive successful polls for `last_preference`
    confidence: usize,
    /// Successful poll count per choice
    num_successful_polls: HashMap<Id, usize>,
    /// Whether this instance has finalized
    finalized: bool,
}

impl Snowball {
    /// Creates a new instance preferring `initial`.
    pub fn new(initial: Id) -> Self {
        Self {
            preference: initial,
            last_preference: initial,
            confidence: 0,
            num_successful_polls: HashMap::new(),
            finalized: false,
        }
    }

    /// Returns the current preference.
    pub fn preference(&self) -> Id {
        self.preference
    }

    /// Returns the current confidence run length.
    pub fn confidence(&self) -> usize {
        self.confidence
    }

    /// Returns true once the instance has finalized on [`preference`].
    ///
    /// [`preference`]: Snowball::preference
    pub fn finalized(&self) -> bool {
        self.finalized
    }

    /// Replaces the preference out-of-band.
    ///
    /// Used when the preferred member is removed from the conflict set
    /// before being decided; the confidence run restarts.
    pub fn reprefer(&mut self, choice: Id) {
        self.preference = choice;
        self.last_preference = choice;
        self.confidence = 0;
    }

    /// Records a successful poll (>= alpha votes) for `choice`.
    ///
    /// Returns `true` if this poll finalized the instance; the decided
    /// choice is the current preference, which may differ from `choice`
    /// when another member has accumulated more successful polls.
    pub fn record_successful_poll(&mut self, choice: Id, beta: usize) -> bool {
        if self.finalized {
            return false;
        }

        let polls = self.num_successful_polls.entry(choice).or_insert(0);
        *polls += 1;
        let polls = *polls;

        if polls
            > self
                .num_successful_polls
                .get(&self.preference)
                .copied()
                .unwrap_or(0)
            && choice != self.preference
        {
            self.preference = choice;
        }

        if choice == self.last_preference {
            self.confidence += 1;
        } else {
            self.confidence = 1;
            self.last_preference = choice;
        }

        if self.confidence >= beta {
            self.finalized = true;
        }
        self.finalized
    }

    /// Records an unsuccessful poll: the confidence run breaks, the
    /// preference stands.
    pub fn record_unsuccessful_poll(&mut self) {
        self.confidence = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_id(byte: u8) -> Id {
        Id::from_bytes([byte; 32])
    }

    #[test]
    fn test_single_choice_finalizes_at_beta() {
        let id = make_id(1);
        let mut sb = Snowball::new(id);

        assert_eq!(sb.preference(), id);
        assert!(!sb.record_successful_poll(id, 3));
        assert!(!sb.record_successful_poll(id, 3));
        assert!(sb.record_successful_poll(id, 3));
        assert!(sb.finalized());
        assert_eq!(sb.preference(), id);
    }

    #[test]
    fn test_preference_switches_on_more_successes() {
        let a = make_id(1);
        let b = make_id(2);
        let mut sb = Snowball::new(a);

        sb.record_successful_poll(b, 10);
        assert_eq!(sb.preference(), b);
        assert_eq!(sb.confidence(), 1);
    }

    #[test]
    fn test_confidence_resets_on_switch() {
        let a = make_id(1);
        let b = make_id(2);
        let mut sb = Snowball::new(a);

        sb.record_successful_poll(a, 10);
        sb.record_successful_poll(a, 10);
        assert_eq!(sb.confidence(), 2);

        sb.record_successful_poll(b, 10);
        assert_eq!(sb.confidence(), 1);
        // a still has more successful polls, so preference is unchanged
        assert_eq!(sb.preference(), a);

        sb.record_successful_poll(b, 10);
        sb.record_successful_poll(b, 10);
        assert_eq!(sb.preference(), b);
    }

    #[test]
    fn test_unsuccessful_poll_keeps_preference() {
        let a = make_id(1);
        let mut sb = Snowball::new(a);

        sb.record_successful_poll(a, 3);
        sb.record_successful_poll(a, 3);
        sb.record_unsuccessful_poll();

        assert_eq!(sb.confidence(), 0);
        assert_eq!(sb.preference(), a);
        assert!(!sb.finalized());
    }

    #[test]
    fn test_no_updates_after_finalization() {
        let a = make_id(1);
        let b = make_id(2);
        let mut sb = Snowball::new(a);

        assert!(sb.record_successful_poll(a, 1));
        assert!(!sb.record_successful_poll(b, 1));
        assert_eq!(sb.preference(), a);
    }

    #[test]
    fn test_reprefer() {
        let a = make_id(1);
        let b = make_id(2);
        let mut sb = Snowball::new(a);

        sb.record_successful_poll(a, 5);
        sb.reprefer(b);
        assert_eq!(sb.preference(), b);
        assert_eq!(sb.confidence(), 0);
    }
}
