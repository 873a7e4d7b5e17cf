//! C6: split a group valve percent across co-located TRVs by their local
//! temperatures (spec.md §4.6).

use std::collections::HashMap;

/// Default compensation factor, percentage points of extra opening per
/// Kelvin a TRV runs colder than the warmest one in its group.
pub const DEFAULT_K_PCT_PER_K: f64 = 8.0;

/// Distribute a group-level valve percent across TRVs based on each TRV's
/// local temperature relative to the warmest TRV in the group.
///
/// The warmest TRV receives exactly `u_total`; colder TRVs are boosted
/// proportionally to their deficit. A TRV with no local reading is treated
/// as neutral (as warm as the warmest). Never reduces a TRV below
/// `u_total`.
pub fn distribute_valve_percent(
    u_total: f64,
    local_temps: &HashMap<String, Option<f64>>,
    k_pct_per_k: f64,
) -> HashMap<String, f64> {
    if local_temps.is_empty() {
        return HashMap::new();
    }

    let warmest = local_temps
        .values()
        .filter_map(|t| *t)
        .fold(f64::NEG_INFINITY, f64::max);
    let t_warm = if warmest.is_finite() {
        warmest
    } else {
        // All-None: nothing to compare against, everyone gets the baseline.
        0.0
    };

    local_temps
        .iter()
        .map(|(trv_id, local)| {
            let deficit = match local {
                Some(t) if warmest.is_finite() => t_warm - t,
                _ => 0.0,
            };
            let pct = (u_total + deficit * k_pct_per_k).clamp(0.0, 100.0);
            (trv_id.clone(), pct)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temps(pairs: &[(&str, Option<f64>)]) -> HashMap<String, Option<f64>> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn empty_map_yields_empty_result() {
        let result = distribute_valve_percent(50.0, &HashMap::new(), DEFAULT_K_PCT_PER_K);
        assert!(result.is_empty());
    }

    #[test]
    fn single_trv_passes_through() {
        let t = temps(&[("a", Some(20.0))]);
        let result = distribute_valve_percent(60.0, &t, DEFAULT_K_PCT_PER_K);
        assert!((result["a"] - 60.0).abs() < 0.01);
    }

    #[test]
    fn zero_command_stays_zero() {
        let t = temps(&[("a", Some(18.0)), ("b", Some(25.0))]);
        let result = distribute_valve_percent(0.0, &t, DEFAULT_K_PCT_PER_K);
        for v in result.values() {
            assert!((*v - 0.0).abs() < 0.01);
        }
    }

    #[test]
    fn three_trv_reference_scenario() {
        let t = temps(&[
            ("trv_1", Some(28.1)),
            ("trv_2", Some(24.3)),
            ("trv_3", Some(19.5)),
        ]);
        let result = distribute_valve_percent(45.0, &t, 8.0);

        assert!((result["trv_1"] - 45.0).abs() < 0.01);
        assert!((result["trv_2"] - 75.4).abs() < 0.1);
        assert!((result["trv_3"] - 100.0).abs() < 0.01);

        assert!(result["trv_3"] > result["trv_2"]);
        assert!(result["trv_2"] > result["trv_1"]);
    }

    #[test]
    fn all_same_temperature_is_uniform() {
        let t = temps(&[("a", Some(21.0)), ("b", Some(21.0)), ("c", Some(21.0))]);
        let result = distribute_valve_percent(60.0, &t, DEFAULT_K_PCT_PER_K);
        for v in result.values() {
            assert!((*v - 60.0).abs() < 0.01);
        }
    }

    #[test]
    fn none_temperature_gets_neutral_baseline() {
        let t = temps(&[
            ("trv_cold", Some(18.0)),
            ("trv_none", None),
            ("trv_warm", Some(25.0)),
        ]);
        let result = distribute_valve_percent(60.0, &t, DEFAULT_K_PCT_PER_K);
        assert!((result["trv_none"] - 60.0).abs() < 0.01);
        assert!(result["trv_cold"] > result["trv_warm"]);
    }

    #[test]
    fn all_none_is_uniform() {
        let t = temps(&[("a", None), ("b", None), ("c", None)]);
        let result = distribute_valve_percent(50.0, &t, DEFAULT_K_PCT_PER_K);
        for v in result.values() {
            assert!((*v - 50.0).abs() < 0.01);
        }
    }

    #[test]
    fn extreme_cold_clamps_to_100() {
        let t = temps(&[("trv_extreme_cold", Some(10.0)), ("trv_warm", Some(24.0))]);
        let result = distribute_valve_percent(95.0, &t, DEFAULT_K_PCT_PER_K);
        assert!((result["trv_warm"] - 95.0).abs() < 0.01);
        assert!((result["trv_extreme_cold"] - 100.0).abs() < 0.01);
    }

    #[test]
    fn never_reduces_below_group_command() {
        let t = temps(&[
            ("a", Some(18.0)),
            ("b", Some(20.0)),
            ("c", Some(22.0)),
            ("d", Some(25.0)),
        ]);
        let result = distribute_valve_percent(50.0, &t, DEFAULT_K_PCT_PER_K);
        for v in result.values() {
            assert!(*v >= 50.0 - 0.01);
        }
    }
}
