//! The context-dependent bound and disequality model of the arithmetic
//! plugin. Updates append to trails with undo records; on backtrack the
//! trails are truncated and the per-variable maps re-pointed at the previous
//! entries.

use std::collections::BTreeSet;

use fnv::FnvHashMap;
use log::trace;
use num_rational::BigRational;
use num_traits::One;
use num_traits::Zero;

use crate::engine::backtrack::Cd;
use crate::engine::variables::Variable;
use crate::sable_assert_simple;

/// A bound on a variable: its value, strictness, and the constraint
/// variable that justifies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BoundInfo {
    pub(crate) value: BigRational,
    pub(crate) strict: bool,
    pub(crate) reason: Variable,
}

impl BoundInfo {
    pub(crate) fn new(value: BigRational, strict: bool, reason: Variable) -> BoundInfo {
        BoundInfo {
            value,
            strict,
            reason,
        }
    }

    /// `x > value` improves on `x > other.value` if the value is higher, or
    /// equal but strict.
    pub(crate) fn improves_lower(&self, other: &BoundInfo) -> bool {
        match self.value.cmp(&other.value) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => self.strict && !other.strict,
            std::cmp::Ordering::Less => false,
        }
    }

    /// `x < value` improves on `x < other.value` if the value is lower, or
    /// equal but strict.
    pub(crate) fn improves_upper(&self, other: &BoundInfo) -> bool {
        match self.value.cmp(&other.value) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Equal => self.strict && !other.strict,
            std::cmp::Ordering::Greater => false,
        }
    }

    /// A lower and an upper bound clash if the lower value exceeds the
    /// upper, or the values meet and either bound is strict.
    pub(crate) fn in_conflict(lower: &BoundInfo, upper: &BoundInfo) -> bool {
        match lower.value.cmp(&upper.value) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => lower.strict || upper.strict,
            std::cmp::Ordering::Less => false,
        }
    }
}

/// An excluded value together with the constraint variable justifying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DisequalInfo {
    pub(crate) value: BigRational,
    pub(crate) reason: Variable,
}

#[derive(Debug, Clone, Copy)]
struct UndoBound {
    var: Variable,
    previous: Option<usize>,
    is_lower: bool,
}

#[derive(Debug, Clone, Copy)]
struct UndoDisequal {
    var: Variable,
    previous: Option<usize>,
}

/// The outcome of a bound update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BoundUpdate {
    /// The update did not improve the current bound.
    NotImproved,
    Improved,
    /// The update made both bounds meet in a single non-strict point.
    Fixed,
}

#[derive(Debug, Default)]
pub(crate) struct BoundsModel {
    lower_bounds: FnvHashMap<Variable, usize>,
    upper_bounds: FnvHashMap<Variable, usize>,
    bound_trail: Vec<BoundInfo>,
    bound_undo: Vec<UndoBound>,
    bound_trail_size: Cd<usize>,

    disequal_values: FnvHashMap<Variable, usize>,
    disequal_trail: Vec<DisequalInfo>,
    disequal_undo: Vec<UndoDisequal>,
    disequal_trail_size: Cd<usize>,

    /// Variables whose bounds are currently contradictory; consumed by the
    /// plugin's conflict resolution.
    in_conflict: BTreeSet<Variable>,
}

impl BoundsModel {
    pub(crate) fn has_lower_bound(&self, var: Variable) -> bool {
        self.lower_bounds.contains_key(&var)
    }

    pub(crate) fn has_upper_bound(&self, var: Variable) -> bool {
        self.upper_bounds.contains_key(&var)
    }

    pub(crate) fn lower_bound_info(&self, var: Variable) -> &BoundInfo {
        &self.bound_trail[self.lower_bounds[&var]]
    }

    pub(crate) fn upper_bound_info(&self, var: Variable) -> &BoundInfo {
        &self.bound_trail[self.upper_bounds[&var]]
    }

    fn is_fixed(&self, var: Variable) -> bool {
        if !self.has_lower_bound(var) || !self.has_upper_bound(var) {
            return false;
        }
        let lower = self.lower_bound_info(var);
        let upper = self.upper_bound_info(var);
        !lower.strict && !upper.strict && lower.value == upper.value
    }

    /// Update the lower bound of `var` if the new bound improves on the
    /// current one; detects bound and disequality conflicts.
    pub(crate) fn update_lower_bound(
        &mut self,
        var: Variable,
        info: BoundInfo,
        level: usize,
    ) -> BoundUpdate {
        if self.has_lower_bound(var) && !info.improves_lower(self.lower_bound_info(var)) {
            return BoundUpdate::NotImproved;
        }
        trace!("bounds: {var} lower -> {:?}", info);

        let index = self.bound_trail.len();
        self.bound_trail.push(info);
        self.bound_undo.push(UndoBound {
            var,
            previous: self.lower_bounds.get(&var).copied(),
            is_lower: true,
        });
        let _ = self.lower_bounds.insert(var, index);
        self.bound_trail_size.set(level, self.bound_trail.len());

        self.check_after_update(var)
    }

    /// Mirror image of [`BoundsModel::update_lower_bound`].
    pub(crate) fn update_upper_bound(
        &mut self,
        var: Variable,
        info: BoundInfo,
        level: usize,
    ) -> BoundUpdate {
        if self.has_upper_bound(var) && !info.improves_upper(self.upper_bound_info(var)) {
            return BoundUpdate::NotImproved;
        }
        trace!("bounds: {var} upper -> {:?}", info);

        let index = self.bound_trail.len();
        self.bound_trail.push(info);
        self.bound_undo.push(UndoBound {
            var,
            previous: self.upper_bounds.get(&var).copied(),
            is_lower: false,
        });
        let _ = self.upper_bounds.insert(var, index);
        self.bound_trail_size.set(level, self.bound_trail.len());

        self.check_after_update(var)
    }

    fn check_after_update(&mut self, var: Variable) -> BoundUpdate {
        if self.has_lower_bound(var) && self.has_upper_bound(var) {
            let lower = self.lower_bound_info(var);
            let upper = self.upper_bound_info(var);
            if BoundInfo::in_conflict(lower, upper) {
                let _ = self.in_conflict.insert(var);
                return BoundUpdate::Improved;
            }
        }
        if self.is_fixed(var) {
            let value = self.lower_bound_info(var).value.clone();
            if self.is_disequal(var, &value) {
                let _ = self.in_conflict.insert(var);
            }
            return BoundUpdate::Fixed;
        }
        BoundUpdate::Improved
    }

    /// Record that `var` must differ from a value. Values outside the
    /// current bounds window are vacuously satisfied and discarded; a value
    /// the bounds pin down exactly puts `var` in conflict.
    pub(crate) fn add_disequality(&mut self, var: Variable, info: DisequalInfo, level: usize) {
        if self.has_lower_bound(var) {
            let lower = self.lower_bound_info(var);
            if info.value < lower.value || (info.value == lower.value && lower.strict) {
                return;
            }
        }
        if self.has_upper_bound(var) {
            let upper = self.upper_bound_info(var);
            if info.value > upper.value || (info.value == upper.value && upper.strict) {
                return;
            }
        }
        if self.is_disequal(var, &info.value) {
            return;
        }
        trace!("bounds: {var} != {}", info.value);

        let fixed_on_value = self.is_fixed(var) && self.lower_bound_info(var).value == info.value;

        let index = self.disequal_trail.len();
        self.disequal_trail.push(info);
        self.disequal_undo.push(UndoDisequal {
            var,
            previous: self.disequal_values.get(&var).copied(),
        });
        let _ = self.disequal_values.insert(var, index);
        self.disequal_trail_size.set(level, self.disequal_trail.len());

        if fixed_on_value {
            let _ = self.in_conflict.insert(var);
        }
    }

    /// Walk the disequality list of `var`, most recent first.
    fn disequalities(&self, var: Variable) -> impl Iterator<Item = &DisequalInfo> + '_ {
        let mut next = self.disequal_values.get(&var).copied();
        std::iter::from_fn(move || {
            let index = next?;
            next = self.disequal_undo[index].previous;
            Some(&self.disequal_trail[index])
        })
    }

    pub(crate) fn is_disequal(&self, var: Variable, value: &BigRational) -> bool {
        self.disequalities(var).any(|info| info.value == *value)
    }

    /// The recorded justification for `var != value`.
    pub(crate) fn disequal_info(&self, var: Variable, value: &BigRational) -> &DisequalInfo {
        self.disequalities(var)
            .find(|info| info.value == *value)
            .expect("no disequality recorded for this value")
    }

    pub(crate) fn in_conflict(&self) -> bool {
        !self.in_conflict.is_empty()
    }

    /// The conflicting variables, in increasing order; clears the set.
    pub(crate) fn take_variables_in_conflict(&mut self) -> Vec<Variable> {
        let vars = self.in_conflict.iter().copied().collect();
        self.in_conflict.clear();
        vars
    }

    pub(crate) fn backtrack(&mut self, level: usize) {
        self.bound_trail_size.backtrack(level);
        let bound_target = self.bound_trail_size.get_copied();
        for index in (bound_target..self.bound_trail.len()).rev() {
            let undo = self.bound_undo[index];
            let map = if undo.is_lower {
                &mut self.lower_bounds
            } else {
                &mut self.upper_bounds
            };
            match undo.previous {
                Some(previous) => {
                    let _ = map.insert(undo.var, previous);
                }
                None => {
                    let _ = map.remove(&undo.var);
                }
            }
        }
        self.bound_trail.truncate(bound_target);
        self.bound_undo.truncate(bound_target);

        self.disequal_trail_size.backtrack(level);
        let disequal_target = self.disequal_trail_size.get_copied();
        for index in (disequal_target..self.disequal_trail.len()).rev() {
            let undo = self.disequal_undo[index];
            match undo.previous {
                Some(previous) => {
                    let _ = self.disequal_values.insert(undo.var, previous);
                }
                None => {
                    let _ = self.disequal_values.remove(&undo.var);
                }
            }
        }
        self.disequal_trail.truncate(disequal_target);
        self.disequal_undo.truncate(disequal_target);

        self.in_conflict.clear();
    }

    /// Pick a value for `var` inside the current bounds window, avoiding
    /// recorded disequalities. Integer-typed variables get integral picks.
    pub(crate) fn pick(&self, var: Variable, is_integer: bool) -> BigRational {
        let lower = self
            .lower_bounds
            .get(&var)
            .map(|index| &self.bound_trail[*index]);
        let upper = self
            .upper_bounds
            .get(&var)
            .map(|index| &self.bound_trail[*index]);
        let one = BigRational::one();

        match (lower, upper) {
            (Some(lower), Some(upper)) => {
                if is_integer {
                    self.pick_integer_between(var, lower, upper)
                } else {
                    self.pick_rational_between(var, lower, upper)
                }
            }
            (Some(lower), None) => {
                // Above the lower bound and every excluded value.
                let mut base = lower.value.clone();
                for info in self.disequalities(var) {
                    if info.value > base {
                        base = info.value.clone();
                    }
                }
                (base + one).floor()
            }
            (None, Some(upper)) => {
                let mut base = upper.value.clone();
                for info in self.disequalities(var) {
                    if info.value < base {
                        base = info.value.clone();
                    }
                }
                (base - one).ceil()
            }
            (None, None) => {
                // Smallest non-negative integer not excluded.
                let mut candidate = BigRational::zero();
                while self.is_disequal(var, &candidate) {
                    candidate += &one;
                }
                candidate
            }
        }
    }

    fn pick_rational_between(
        &self,
        var: Variable,
        lower: &BoundInfo,
        upper: &BoundInfo,
    ) -> BigRational {
        let two = BigRational::from_integer(2.into());
        let mut candidate = (&lower.value + &upper.value) / &two;
        // Walk towards the upper bound; the excluded set is finite and the
        // sequence strictly increases below it.
        while self.is_disequal(var, &candidate) {
            sable_assert_simple!(lower.value != upper.value, "picking from a conflicting window");
            candidate = (&candidate + &upper.value) / &two;
        }
        candidate
    }

    fn pick_integer_between(
        &self,
        var: Variable,
        lower: &BoundInfo,
        upper: &BoundInfo,
    ) -> BigRational {
        let one = BigRational::one();
        let mut low = lower.value.ceil();
        if low == lower.value && lower.strict {
            low += &one;
        }
        let mut high = upper.value.floor();
        if high == upper.value && upper.strict {
            high -= &one;
        }
        sable_assert_simple!(low <= high, "picking from an empty integer window");

        let two = BigRational::from_integer(2.into());
        let middle = ((&low + &high) / &two).floor();

        let mut candidate = middle.clone();
        while candidate <= high {
            if !self.is_disequal(var, &candidate) {
                return candidate;
            }
            candidate += &one;
        }
        let mut candidate = &middle - &one;
        while candidate >= low {
            if !self.is_disequal(var, &candidate) {
                return candidate;
            }
            candidate -= &one;
        }
        // Every integer in the window is excluded. TODO: report this as a
        // bounds conflict over the excluding constraints instead of leaving
        // the pick to violate one of them.
        middle
    }
}

#[cfg(test)]
mod tests {
    use num_bigint::BigInt;

    use super::*;

    fn rational(value: i64) -> BigRational {
        BigRational::from_integer(BigInt::from(value))
    }

    fn ratio(numerator: i64, denominator: i64) -> BigRational {
        BigRational::new(BigInt::from(numerator), BigInt::from(denominator))
    }

    fn var(index: usize) -> Variable {
        Variable::new(1, index)
    }

    fn reason(index: usize) -> Variable {
        Variable::new(0, index)
    }

    #[test]
    fn non_improving_updates_are_rejected() {
        let mut bounds = BoundsModel::default();
        let x = var(0);

        let first = bounds.update_lower_bound(x, BoundInfo::new(rational(2), false, reason(0)), 0);
        assert_eq!(first, BoundUpdate::Improved);

        // A weaker bound changes nothing.
        let worse = bounds.update_lower_bound(x, BoundInfo::new(rational(1), false, reason(1)), 0);
        assert_eq!(worse, BoundUpdate::NotImproved);
        assert_eq!(bounds.lower_bound_info(x).value, rational(2));
        assert_eq!(bounds.lower_bound_info(x).reason, reason(0));

        // The same value again is not an improvement either.
        let same = bounds.update_lower_bound(x, BoundInfo::new(rational(2), false, reason(2)), 0);
        assert_eq!(same, BoundUpdate::NotImproved);

        // Equal value but strict is strictly better.
        let strict = bounds.update_lower_bound(x, BoundInfo::new(rational(2), true, reason(3)), 0);
        assert_eq!(strict, BoundUpdate::Improved);
        assert!(bounds.lower_bound_info(x).strict);
    }

    #[test]
    fn meeting_bounds_fix_the_variable() {
        let mut bounds = BoundsModel::default();
        let x = var(0);
        let _ = bounds.update_lower_bound(x, BoundInfo::new(rational(3), false, reason(0)), 0);
        let update = bounds.update_upper_bound(x, BoundInfo::new(rational(3), false, reason(1)), 0);
        assert_eq!(update, BoundUpdate::Fixed);
        assert!(!bounds.in_conflict());
    }

    #[test]
    fn crossing_bounds_conflict() {
        let mut bounds = BoundsModel::default();
        let x = var(0);
        let _ = bounds.update_lower_bound(x, BoundInfo::new(rational(5), false, reason(0)), 1);
        let _ = bounds.update_upper_bound(x, BoundInfo::new(rational(4), false, reason(1)), 1);
        assert!(bounds.in_conflict());
        assert_eq!(bounds.take_variables_in_conflict(), vec![x]);
        assert!(!bounds.in_conflict());
    }

    #[test]
    fn equal_bounds_with_strictness_conflict() {
        let mut bounds = BoundsModel::default();
        let x = var(0);
        let _ = bounds.update_lower_bound(x, BoundInfo::new(rational(1), true, reason(0)), 1);
        let _ = bounds.update_upper_bound(x, BoundInfo::new(rational(1), false, reason(1)), 1);
        assert!(bounds.in_conflict());
    }

    #[test]
    fn disequalities_outside_the_window_are_discarded() {
        let mut bounds = BoundsModel::default();
        let x = var(0);
        let _ = bounds.update_lower_bound(x, BoundInfo::new(rational(0), false, reason(0)), 0);
        bounds.add_disequality(
            x,
            DisequalInfo {
                value: rational(-1),
                reason: reason(1),
            },
            0,
        );
        assert!(!bounds.is_disequal(x, &rational(-1)));
    }

    #[test]
    fn disequality_on_the_fixed_point_conflicts() {
        let mut bounds = BoundsModel::default();
        let x = var(0);
        let _ = bounds.update_lower_bound(x, BoundInfo::new(rational(0), false, reason(0)), 0);
        let _ = bounds.update_upper_bound(x, BoundInfo::new(rational(0), false, reason(1)), 0);
        bounds.add_disequality(
            x,
            DisequalInfo {
                value: rational(0),
                reason: reason(2),
            },
            0,
        );
        assert!(bounds.in_conflict());
        assert_eq!(bounds.disequal_info(x, &rational(0)).reason, reason(2));
    }

    #[test]
    fn fixing_onto_a_recorded_disequality_conflicts() {
        let mut bounds = BoundsModel::default();
        let x = var(0);
        let _ = bounds.update_lower_bound(x, BoundInfo::new(rational(0), false, reason(0)), 0);
        bounds.add_disequality(
            x,
            DisequalInfo {
                value: rational(0),
                reason: reason(1),
            },
            0,
        );
        assert!(!bounds.in_conflict());
        let _ = bounds.update_upper_bound(x, BoundInfo::new(rational(0), false, reason(2)), 1);
        assert!(bounds.in_conflict());
    }

    #[test]
    fn backtrack_restores_previous_bounds() {
        let mut bounds = BoundsModel::default();
        let x = var(0);
        let _ = bounds.update_lower_bound(x, BoundInfo::new(rational(0), false, reason(0)), 0);
        let _ = bounds.update_lower_bound(x, BoundInfo::new(rational(5), false, reason(1)), 2);
        let _ = bounds.update_upper_bound(x, BoundInfo::new(rational(3), false, reason(2)), 3);
        assert!(bounds.in_conflict());

        bounds.backtrack(1);
        assert!(!bounds.in_conflict());
        assert_eq!(bounds.lower_bound_info(x).value, rational(0));
        assert!(!bounds.has_upper_bound(x));

        bounds.backtrack(0);
        assert_eq!(bounds.lower_bound_info(x).value, rational(0));
    }

    #[test]
    fn backtrack_restores_disequalities() {
        let mut bounds = BoundsModel::default();
        let x = var(0);
        bounds.add_disequality(
            x,
            DisequalInfo {
                value: rational(1),
                reason: reason(0),
            },
            0,
        );
        bounds.add_disequality(
            x,
            DisequalInfo {
                value: rational(2),
                reason: reason(1),
            },
            2,
        );
        assert!(bounds.is_disequal(x, &rational(2)));

        bounds.backtrack(1);
        assert!(bounds.is_disequal(x, &rational(1)));
        assert!(!bounds.is_disequal(x, &rational(2)));
    }

    #[test]
    fn pick_between_bounds_starts_at_the_midpoint() {
        let mut bounds = BoundsModel::default();
        let x = var(0);
        let _ = bounds.update_lower_bound(x, BoundInfo::new(rational(0), false, reason(0)), 0);
        let _ = bounds.update_upper_bound(x, BoundInfo::new(rational(10), false, reason(1)), 0);
        assert_eq!(bounds.pick(x, false), rational(5));
        assert_eq!(bounds.pick(x, true), rational(5));
    }

    #[test]
    fn pick_avoids_disequalities() {
        let mut bounds = BoundsModel::default();
        let x = var(0);
        let _ = bounds.update_lower_bound(x, BoundInfo::new(rational(0), false, reason(0)), 0);
        let _ = bounds.update_upper_bound(x, BoundInfo::new(rational(10), false, reason(1)), 0);
        bounds.add_disequality(
            x,
            DisequalInfo {
                value: rational(5),
                reason: reason(2),
            },
            0,
        );

        let rational_pick = bounds.pick(x, false);
        assert_ne!(rational_pick, rational(5));
        assert!(rational_pick > rational(0) && rational_pick < rational(10));

        let integer_pick = bounds.pick(x, true);
        assert!(integer_pick.is_integer());
        assert_ne!(integer_pick, rational(5));
    }

    #[test]
    fn pick_with_only_a_lower_bound_clears_all_disequalities() {
        let mut bounds = BoundsModel::default();
        let x = var(0);
        let _ = bounds.update_lower_bound(x, BoundInfo::new(ratio(1, 2), false, reason(0)), 0);
        bounds.add_disequality(
            x,
            DisequalInfo {
                value: rational(3),
                reason: reason(1),
            },
            0,
        );
        let pick = bounds.pick(x, false);
        assert!(pick.is_integer());
        assert!(pick > rational(3));
    }

    #[test]
    fn pick_with_only_an_upper_bound() {
        let mut bounds = BoundsModel::default();
        let x = var(0);
        let _ = bounds.update_upper_bound(x, BoundInfo::new(rational(0), true, reason(0)), 0);
        let pick = bounds.pick(x, false);
        assert!(pick < rational(0));
        assert!(pick.is_integer());
    }

    #[test]
    fn pick_unbounded_skips_excluded_naturals() {
        let mut bounds = BoundsModel::default();
        let x = var(0);
        for (i, value) in [0_i64, 1, 2].iter().enumerate() {
            bounds.add_disequality(
                x,
                DisequalInfo {
                    value: rational(*value),
                    reason: reason(i),
                },
                0,
            );
        }
        assert_eq!(bounds.pick(x, true), rational(3));
    }

    #[test]
    fn strict_integer_window_shrinks_to_inner_points() {
        let mut bounds = BoundsModel::default();
        let x = var(0);
        let _ = bounds.update_lower_bound(x, BoundInfo::new(rational(0), true, reason(0)), 0);
        let _ = bounds.update_upper_bound(x, BoundInfo::new(rational(2), true, reason(1)), 0);
        assert_eq!(bounds.pick(x, true), rational(1));
    }
}
