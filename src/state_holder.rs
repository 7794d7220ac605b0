use heapless::Deque;

use crate::State;

/// Current and previous FSM state plus a short transition history kept for
/// diagnostics dumps.
pub struct StateHolder<const HISTORY: usize> {
    history: Deque<State, HISTORY>,
    previous: State,
    current: State,
}

impl<const HISTORY: usize> StateHolder<HISTORY> {
    pub const fn new() -> Self {
        Self {
            history: Deque::new(),
            previous: State::Initial,
            current: State::Initial,
        }
    }

    /// Installs `state`, moving the current state into the previous slot.
    pub fn transition(&mut self, state: State) {
        if self.history.is_full() {
            self.history.pop_front();
        }
        // Cannot fail: a slot was just freed.
        let _ = self.history.push_back(self.current);

        self.previous = self.current;
        self.current = state;
    }

    pub fn current(&self) -> State {
        self.current
    }

    pub fn previous(&self) -> State {
        self.previous
    }

    pub fn history(&self) -> impl Iterator<Item = State> + '_ {
        self.history.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_previous_and_bounded_history() {
        let mut h: StateHolder<2> = StateHolder::new();
        h.transition(State::AwaitingCommandByte);
        h.transition(State::AwaitingData);
        h.transition(State::AwaitingDone);

        assert_eq!(h.current(), State::AwaitingDone);
        assert_eq!(h.previous(), State::AwaitingData);

        let hist: std::vec::Vec<State> = h.history().collect();
        assert_eq!(hist, [State::AwaitingCommandByte, State::AwaitingData]);
    }
}
