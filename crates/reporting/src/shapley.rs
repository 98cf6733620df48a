//! Exact Shapley values over the channels of converted journeys.
//!
//! The coalition value `v(S)` is the number of converted journeys whose
//! channel set is contained in `S`. Coalitions are bitmasks, so the channel
//! count is capped by configuration.

use std::collections::{BTreeMap, BTreeSet};

use stratum_core::{StratumError, StratumResult};

use crate::attribution::Journey;

/// Hard ceiling regardless of configuration; `2^20` coalitions.
pub const MAX_CHANNELS: usize = 20;

pub fn shapley_values<'a>(
    converted: impl IntoIterator<Item = &'a Journey>,
    max_channels: usize,
) -> StratumResult<BTreeMap<String, f64>> {
    let sets: Vec<BTreeSet<&str>> = converted
        .into_iter()
        .map(|j| j.touchpoints.iter().map(|t| t.channel.as_str()).collect::<BTreeSet<_>>())
        .filter(|s| !s.is_empty())
        .collect();
    let channels: Vec<&str> = sets
        .iter()
        .flatten()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let n = channels.len();
    let limit = max_channels.min(MAX_CHANNELS);
    if n > limit {
        return Err(StratumError::invalid(format!(
            "shapley attribution supports at most {} channels, journeys contain {}",
            limit, n
        )));
    }
    if n == 0 {
        return Ok(BTreeMap::new());
    }

    // Journeys per exact channel set, then the subset-sum transform gives
    // v(S) for every coalition.
    let mut value = vec![0.0_f64; 1 << n];
    for set in &sets {
        let mask = set
            .iter()
            .fold(0usize, |m, c| m | channels.binary_search(c).map_or(0, |i| 1 << i));
        value[mask] += 1.0;
    }
    for bit in 0..n {
        for mask in 0..(1usize << n) {
            if mask & (1 << bit) != 0 {
                value[mask] += value[mask ^ (1 << bit)];
            }
        }
    }

    // weight[k] = k!(n-k-1)!/n!
    let mut weight = vec![0.0_f64; n];
    for (k, w) in weight.iter_mut().enumerate() {
        *w = factorial(k) * factorial(n - k - 1) / factorial(n);
    }

    let mut phi = vec![0.0_f64; n];
    for mask in 0..(1usize << n) {
        let size = mask.count_ones() as usize;
        for (i, p) in phi.iter_mut().enumerate() {
            if mask & (1 << i) == 0 {
                *p += weight[size] * (value[mask | (1 << i)] - value[mask]);
            }
        }
    }

    Ok(channels
        .into_iter()
        .map(str::to_string)
        .zip(phi)
        .collect())
}

fn factorial(n: usize) -> f64 {
    (1..=n).fold(1.0, |acc, k| acc * k as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribution::Touchpoint;
    use chrono::Utc;

    fn converted(channels: &[&str]) -> Journey {
        Journey {
            id: channels.join(">"),
            touchpoints: channels
                .iter()
                .map(|c| Touchpoint {
                    channel: c.to_string(),
                    timestamp: Utc::now(),
                })
                .collect(),
            converted: true,
            revenue: 10.0,
            converted_at: None,
        }
    }

    #[test]
    fn test_values_sum_to_conversions() {
        let journeys = vec![
            converted(&["search", "email"]),
            converted(&["search"]),
            converted(&["social", "email", "search"]),
        ];
        let values = shapley_values(&journeys, 12).unwrap();
        let total: f64 = values.values().sum();
        assert!((total - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_each_journey_splits_evenly_across_its_channels() {
        let journeys = vec![
            converted(&["a", "b"]),
            converted(&["a"]),
            converted(&["a", "b", "c"]),
            converted(&["c", "c"]),
        ];
        let values = shapley_values(&journeys, 12).unwrap();
        assert!((values["a"] - (0.5 + 1.0 + 1.0 / 3.0)).abs() < 1e-9);
        assert!((values["b"] - (0.5 + 1.0 / 3.0)).abs() < 1e-9);
        assert!((values["c"] - (1.0 / 3.0 + 1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_too_many_channels_is_refused() {
        let names: Vec<String> = (0..5).map(|i| format!("ch{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let journeys = vec![converted(&refs)];
        assert!(matches!(
            shapley_values(&journeys, 4),
            Err(StratumError::Validation(_))
        ));
        assert!(shapley_values(&journeys, 5).is_ok());
    }
}
