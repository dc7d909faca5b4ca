//! Final-grade computation for one enrollment.
//!
//! Pure arithmetic over already-loaded values; callers own all lookup and
//! persistence. The attendance curve is piecewise linear: proportional below
//! the section's minimum (strictly under 60), then 60 at the minimum scaling
//! to 100 at the section's maximum. Counts above the maximum keep scaling
//! past 100 — over-attendance is not clamped.

/// 1-decimal rounding applied to every final grade.
pub fn round_off_1_decimal(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Raw attendance grade before normative blending. Total over non-negative
/// inputs; `max_attendance == min_attendance_for_grade` falls back to a flat
/// 40-point bonus instead of dividing by zero.
pub fn attendance_grade(
    attendance_count: i64,
    min_attendance_for_grade: i64,
    max_attendance: i64,
) -> f64 {
    if attendance_count < min_attendance_for_grade && min_attendance_for_grade > 0 {
        return (attendance_count as f64) * 60.0 / (min_attendance_for_grade as f64);
    }

    let above_min = (attendance_count - min_attendance_for_grade) as f64;
    let span = (max_attendance - min_attendance_for_grade) as f64;
    let additional = if span > 0.0 {
        above_min * 40.0 / span
    } else {
        40.0
    };
    60.0 + additional
}

/// Final grade for one enrollment: attendance alone when no normative
/// results exist, otherwise 70% attendance / 30% normative average.
pub fn final_grade(
    attendance_count: i64,
    min_attendance_for_grade: i64,
    max_attendance: i64,
    normative_grades: &[f64],
) -> f64 {
    let attendance = attendance_grade(attendance_count, min_attendance_for_grade, max_attendance);
    if normative_grades.is_empty() {
        return round_off_1_decimal(attendance);
    }

    let normative = normative_grades.iter().sum::<f64>() / (normative_grades.len() as f64);
    round_off_1_decimal(attendance * 0.7 + normative * 0.3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_minimum_is_proportional_under_60() {
        assert_eq!(attendance_grade(0, 12, 20), 0.0);
        assert_eq!(attendance_grade(6, 12, 20), 30.0);
        assert!((attendance_grade(8, 12, 20) - 40.0).abs() < 1e-9);
    }

    #[test]
    fn exact_minimum_is_60_and_exact_maximum_is_100() {
        assert_eq!(attendance_grade(12, 12, 20), 60.0);
        assert_eq!(attendance_grade(20, 12, 20), 100.0);
    }

    #[test]
    fn zero_minimum_uses_above_min_branch() {
        assert_eq!(attendance_grade(0, 0, 20), 60.0);
        assert_eq!(attendance_grade(10, 0, 20), 80.0);
        assert_eq!(attendance_grade(20, 0, 20), 100.0);
    }

    #[test]
    fn equal_thresholds_never_divide_by_zero() {
        // Degenerate section config: flat 40-point bonus once the minimum is met.
        assert_eq!(attendance_grade(10, 10, 10), 100.0);
        assert_eq!(attendance_grade(15, 10, 10), 100.0);
        assert!(attendance_grade(15, 10, 10).is_finite());
        assert_eq!(final_grade(10, 10, 10, &[]), 100.0);
    }

    #[test]
    fn over_attendance_is_not_clamped() {
        // 24 present with min=12, max=20: 4 above the 8-session span.
        assert_eq!(attendance_grade(24, 12, 20), 120.0);
    }

    #[test]
    fn monotonic_in_attendance_count() {
        let mut prev = f64::MIN;
        for count in 0..40 {
            let g = final_grade(count, 12, 20, &[80.0, 90.0]);
            assert!(g >= prev, "grade decreased at count {}", count);
            prev = g;
        }
    }

    #[test]
    fn blends_70_30_with_normatives() {
        // attendance 8/12 -> 40.0; normatives average 85.0.
        assert_eq!(final_grade(8, 12, 20, &[80.0, 90.0]), 53.5);
    }

    #[test]
    fn no_normatives_uses_attendance_alone() {
        // 16 present: 60 + 4*40/8 = 80.0.
        assert_eq!(final_grade(16, 12, 20, &[]), 80.0);
    }

    #[test]
    fn single_normative_counts_as_its_own_average() {
        // attendance 12/12 -> 60.0; blend with one 100: 42 + 30 = 72.0.
        assert_eq!(final_grade(12, 12, 20, &[100.0]), 72.0);
    }

    #[test]
    fn result_is_rounded_to_one_decimal() {
        // attendance 13/12..20 -> 65.0; normatives [70, 72] -> 71.0.
        // 65*0.7 + 71*0.3 = 45.5 + 21.3 = 66.8.
        assert_eq!(final_grade(13, 12, 20, &[70.0, 72.0]), 66.8);
    }
}
