//! Phase/topology utility.
//!
//! Given the ordered tab positions `1..N` on a panel, tabs are grouped in
//! consecutive pairs; within each pair one tab is on leg `L1`, the other on
//! `L2`. The phase of tab `t` is `L1 if ((t-1)/2) is even else L2` (integer
//! division), per spec §3.3.

use std::collections::HashSet;

/// One of the two 120 V legs of a split-phase 240 V service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Leg {
    L1,
    L2,
}

/// The result of grouping a set of tabs by leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseDistribution {
    pub l1: Vec<u32>,
    pub l2: Vec<u32>,
    pub balanced: bool,
}

fn is_valid(tab: u32, valid_tabs: &HashSet<u32>) -> bool {
    tab >= 1 && valid_tabs.contains(&tab)
}

/// The leg a tab sits on, or `None` if `tab` is not in `valid_tabs` or is `< 1`.
pub fn tab_phase(tab: u32, valid_tabs: &HashSet<u32>) -> Option<Leg> {
    if !is_valid(tab, valid_tabs) {
        return None;
    }
    let pair_index = (tab - 1) / 2;
    Some(if pair_index % 2 == 0 { Leg::L1 } else { Leg::L2 })
}

/// Whether `a` and `b` sit on opposite legs. Returns `false` on any
/// validation failure rather than propagating an error.
pub fn opposite_phase(a: u32, b: u32, valid_tabs: &HashSet<u32>) -> bool {
    match (tab_phase(a, valid_tabs), tab_phase(b, valid_tabs)) {
        (Some(pa), Some(pb)) => pa != pb,
        _ => false,
    }
}

/// Validates that `(a, b)` forms a legal split-phase pairing: distinct tabs,
/// both valid, and on opposite legs. Returns `Ok(())` or a human-readable
/// rejection message.
pub fn validate_pairing(a: u32, b: u32, valid_tabs: &HashSet<u32>) -> Result<(), String> {
    if a == b {
        return Err(format!("tab {a} cannot pair with itself"));
    }
    let (pa, pb) = (tab_phase(a, valid_tabs), tab_phase(b, valid_tabs));
    let pa = pa.ok_or_else(|| format!("tab {a} is not a valid tab"))?;
    let pb = pb.ok_or_else(|| format!("tab {b} is not a valid tab"))?;
    if pa == pb {
        return Err(format!("tabs {a} and {b} are on the same leg, split-phase pairing requires opposite legs"));
    }
    Ok(())
}

/// Groups `tabs` by leg, silently skipping any tab not in `valid_tabs`.
/// `balanced` is true iff the two legs carry an equal count.
pub fn phase_distribution(tabs: &[u32], valid_tabs: &HashSet<u32>) -> PhaseDistribution {
    let mut l1 = Vec::new();
    let mut l2 = Vec::new();
    for &t in tabs {
        match tab_phase(t, valid_tabs) {
            Some(Leg::L1) => l1.push(t),
            Some(Leg::L2) => l2.push(t),
            None => {}
        }
    }
    let balanced = l1.len() == l2.len();
    PhaseDistribution { l1, l2, balanced }
}

/// Suggests up to `min(|L1|, |L2|)` balanced `(L1_tab, L2_tab)` pairs from
/// `available`, in ascending tab order on each leg.
pub fn suggest_balanced_pairing(available: &[u32], valid_tabs: &HashSet<u32>) -> Vec<(u32, u32)> {
    let dist = phase_distribution(available, valid_tabs);
    let mut l1 = dist.l1;
    let mut l2 = dist.l2;
    l1.sort_unstable();
    l2.sort_unstable();
    l1.into_iter().zip(l2).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid(n: u32) -> HashSet<u32> {
        (1..=n).collect()
    }

    #[test]
    fn adjacent_pair_is_opposite_legs() {
        let v = valid(4);
        assert_eq!(tab_phase(1, &v), Some(Leg::L1));
        assert_eq!(tab_phase(2, &v), Some(Leg::L1));
        assert_eq!(tab_phase(3, &v), Some(Leg::L2));
        assert_eq!(tab_phase(4, &v), Some(Leg::L2));
    }

    #[test]
    fn invalid_tab_returns_none() {
        let v = valid(4);
        assert_eq!(tab_phase(0, &v), None);
        assert_eq!(tab_phase(99, &v), None);
    }

    #[test]
    fn opposite_phase_never_throws_on_invalid_input() {
        let v = valid(4);
        assert!(!opposite_phase(0, 1, &v));
        assert!(!opposite_phase(1, 1, &v));
    }

    #[test]
    fn validate_pairing_rejects_same_tab_and_same_leg() {
        let v = valid(4);
        assert!(validate_pairing(1, 1, &v).is_err());
        assert!(validate_pairing(1, 2, &v).is_err()); // both L1
        assert!(validate_pairing(1, 3, &v).is_ok());
    }

    #[test]
    fn phase_distribution_skips_invalid_tabs() {
        let v = valid(4);
        let dist = phase_distribution(&[1, 3, 999], &v);
        assert_eq!(dist.l1, vec![1]);
        assert_eq!(dist.l2, vec![3]);
        assert!(dist.balanced);
    }

    #[test]
    fn suggest_balanced_pairing_caps_at_smaller_leg() {
        let v = valid(8);
        let pairs = suggest_balanced_pairing(&[1, 2, 3, 5, 7], &v);
        // L1 = {1,2}, L2 = {3,5,7} -> min(2,3) = 2 pairs
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0], (1, 3));
        assert_eq!(pairs[1], (2, 5));
    }

    proptest::proptest! {
        #[test]
        fn opposite_phase_matches_parity_rule(a in 1u32..64, b in 1u32..64) {
            let v: HashSet<u32> = (1..64).collect();
            let expected = (((a - 1) / 2) % 2) != (((b - 1) / 2) % 2);
            prop_assert_eq!(opposite_phase(a, b, &v), expected);
        }
    }
}
