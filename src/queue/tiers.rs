//! Three-tier priority queue, FIFO within a tier.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::queue::item::Priority;

#[derive(Debug)]
pub struct TieredQueue<T> {
    tiers: [VecDeque<(T, Instant)>; 3],
}

impl<T> Default for TieredQueue<T> {
    fn default() -> Self {
        Self {
            tiers: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
        }
    }
}

impl<T: PartialEq> TieredQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: T, priority: Priority, at: Instant) {
        self.tiers[priority.rank()].push_back((value, at));
    }

    /// Pop the next value, highest tier first.
    ///
    /// With `aging` set, the head of each lower tier that has waited at least
    /// that long moves up one tier first, and its wait clock restarts.
    pub fn pop(&mut self, now: Instant, aging: Option<Duration>) -> Option<T> {
        if let Some(threshold) = aging {
            for rank in 1..self.tiers.len() {
                let ripe = self.tiers[rank]
                    .front()
                    .is_some_and(|(_, at)| now.duration_since(*at) >= threshold);
                if ripe {
                    if let Some((value, _)) = self.tiers[rank].pop_front() {
                        self.tiers[rank - 1].push_back((value, now));
                    }
                }
            }
        }
        self.tiers
            .iter_mut()
            .find_map(|tier| tier.pop_front())
            .map(|(value, _)| value)
    }

    pub fn remove(&mut self, value: &T) -> bool {
        for tier in &mut self.tiers {
            if let Some(pos) = tier.iter().position(|(v, _)| v == value) {
                tier.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn drain(&mut self) -> Vec<T> {
        self.tiers
            .iter_mut()
            .flat_map(|tier| tier.drain(..).map(|(value, _)| value))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.iter().all(VecDeque::is_empty)
    }
}
