//! First-order Markov removal effects over customer journeys.
//!
//! Every journey is a path `start → c1 → … → cn → conversion | null`. The
//! removal effect of a channel is the relative drop in the probability of
//! reaching `conversion` from `start` when that channel's state leads nowhere.

use std::collections::{BTreeMap, BTreeSet};

use crate::attribution::Journey;

const START: usize = 0;
const CONVERSION: usize = 1;
const NULL: usize = 2;
const FIRST_CHANNEL: usize = 3;

const MAX_ITERATIONS: usize = 10_000;
const CONVERGENCE: f64 = 1e-12;

/// Transition probabilities between the states of all observed journeys.
#[derive(Debug, Clone)]
pub struct MarkovChain {
    channels: Vec<String>,
    /// Row-normalised transition matrix indexed by state.
    transitions: Vec<Vec<f64>>,
}

impl MarkovChain {
    /// Build the chain from every journey with at least one touchpoint,
    /// converted or not. Touchpoints must already be in time order.
    pub fn build<'a>(journeys: impl IntoIterator<Item = &'a Journey>) -> Self {
        let journeys: Vec<&Journey> = journeys
            .into_iter()
            .filter(|j| !j.touchpoints.is_empty())
            .collect();

        let channels: Vec<String> = journeys
            .iter()
            .flat_map(|j| j.touchpoints.iter().map(|t| t.channel.clone()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let index: BTreeMap<&str, usize> = channels
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), FIRST_CHANNEL + i))
            .collect();

        let size = FIRST_CHANNEL + channels.len();
        let mut counts = vec![vec![0.0; size]; size];
        for journey in &journeys {
            let mut from = START;
            for touch in &journey.touchpoints {
                let to = index[touch.channel.as_str()];
                counts[from][to] += 1.0;
                from = to;
            }
            let end = if journey.converted { CONVERSION } else { NULL };
            counts[from][end] += 1.0;
        }

        for row in counts.iter_mut() {
            let total: f64 = row.iter().sum();
            if total > 0.0 {
                row.iter_mut().for_each(|p| *p /= total);
            }
        }

        Self {
            channels,
            transitions: counts,
        }
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Probability of reaching `conversion` from `start`.
    pub fn conversion_probability(&self) -> f64 {
        self.absorb(None)
    }

    /// `1 − P(conv without channel) / P(conv)` for every channel, in `[0, 1]`.
    /// All zero when nothing converts.
    pub fn removal_effects(&self) -> BTreeMap<String, f64> {
        let base = self.conversion_probability();
        self.channels
            .iter()
            .enumerate()
            .map(|(i, channel)| {
                let effect = if base > 0.0 {
                    (1.0 - self.absorb(Some(FIRST_CHANNEL + i)) / base).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                (channel.clone(), effect)
            })
            .collect()
    }

    /// Absorption probability into `conversion` by value iteration. A removed
    /// state behaves like `null`.
    fn absorb(&self, removed: Option<usize>) -> f64 {
        let size = self.transitions.len();
        let mut value = vec![0.0; size];
        value[CONVERSION] = 1.0;

        for _ in 0..MAX_ITERATIONS {
            let mut delta: f64 = 0.0;
            for state in (START..size).filter(|s| *s != CONVERSION && *s != NULL) {
                let next = if Some(state) == removed {
                    0.0
                } else {
                    self.transitions[state]
                        .iter()
                        .zip(&value)
                        .map(|(p, v)| p * v)
                        .sum()
                };
                delta = delta.max((next - value[state]).abs());
                value[state] = next;
            }
            if delta < CONVERGENCE {
                break;
            }
        }
        value[START]
    }
}
