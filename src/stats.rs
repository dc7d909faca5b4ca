//! Read-side rollups over already-loaded enrollment rows.
//!
//! Everything here is pure: the handler layer resolves the parent entity,
//! loads flat rows (no live object graphs), and serializes whatever comes
//! back. Empty input yields a zero-valued result rather than an error;
//! "parent not found" is the caller's concern. All averages round to two
//! decimals. Grouped breakdowns keep first-appearance order so responses are
//! stable across runs.

use serde::Serialize;

pub fn round_off_2_decimals(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// One enrollment inside a section (optionally pre-filtered to a semester).
#[derive(Debug, Clone)]
pub struct EnrollmentRow {
    pub active: bool,
    pub final_grade: Option<f64>,
    pub present_count: i64,
    pub has_paid: bool,
}

/// One normative result, flattened with its normative's identity.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormativeResultRow {
    pub normative_id: String,
    pub normative_name: String,
    pub result: String,
    pub grade: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormativeStats {
    pub normative_id: String,
    pub normative_name: String,
    pub average_grade: f64,
    pub total_results: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionStats {
    pub total_students: usize,
    pub active_students: usize,
    pub average_attendance: f64,
    pub average_grade: f64,
    pub total_payments: usize,
    pub unpaid_students: usize,
    pub normative_stats: Vec<NormativeStats>,
}

fn mean_of_present(grades: impl Iterator<Item = Option<f64>>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for g in grades.flatten() {
        sum += g;
        count += 1;
    }
    if count > 0 {
        sum / (count as f64)
    } else {
        0.0
    }
}

fn group_normative_stats(results: &[NormativeResultRow]) -> Vec<NormativeStats> {
    let mut groups: Vec<NormativeStats> = Vec::new();
    let mut sums: Vec<f64> = Vec::new();
    for r in results {
        match groups.iter().position(|g| g.normative_id == r.normative_id) {
            Some(i) => {
                sums[i] += r.grade;
                groups[i].total_results += 1;
            }
            None => {
                groups.push(NormativeStats {
                    normative_id: r.normative_id.clone(),
                    normative_name: r.normative_name.clone(),
                    average_grade: 0.0,
                    total_results: 1,
                });
                sums.push(r.grade);
            }
        }
    }
    for (g, sum) in groups.iter_mut().zip(sums) {
        g.average_grade = round_off_2_decimals(sum / (g.total_results as f64));
    }
    groups
}

/// Section rollup. `normative_results` carries every result row in scope,
/// across all the section's enrollments.
pub fn section_stats(
    enrollments: &[EnrollmentRow],
    normative_results: &[NormativeResultRow],
) -> SectionStats {
    if enrollments.is_empty() {
        return SectionStats::default();
    }

    let total_students = enrollments.len();
    let active_students = enrollments.iter().filter(|e| e.active).count();

    let average_attendance = enrollments
        .iter()
        .map(|e| e.present_count as f64)
        .sum::<f64>()
        / (total_students as f64);

    let average_grade = mean_of_present(enrollments.iter().map(|e| e.final_grade));

    let total_payments = enrollments.iter().filter(|e| e.has_paid).count();
    let unpaid_students = total_students - total_payments;

    SectionStats {
        total_students,
        active_students,
        average_attendance: round_off_2_decimals(average_attendance),
        average_grade: round_off_2_decimals(average_grade),
        total_payments,
        unpaid_students,
        normative_stats: group_normative_stats(normative_results),
    }
}

/// One enrollment of one student, with its section and semester context.
#[derive(Debug, Clone)]
pub struct StudentEnrollmentRow {
    pub section_id: String,
    pub section_name: String,
    pub max_attendance: i64,
    pub semester_id: String,
    pub semester_name: String,
    pub final_grade: Option<f64>,
    pub present_count: i64,
    pub normative_results: Vec<NormativeResultRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionGrade {
    pub section_id: String,
    pub section_name: String,
    pub semester_id: String,
    pub semester_name: String,
    pub final_grade: Option<f64>,
    pub attendance_count: i64,
    pub attendance_percentage: f64,
    pub normative_results: Vec<NormativeResultRow>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStats {
    pub total_sections: usize,
    pub average_grade: f64,
    pub total_attendances: i64,
    pub attendance_percentage: f64,
    pub section_grades: Vec<SectionGrade>,
}

pub fn student_stats(enrollments: &[StudentEnrollmentRow]) -> StudentStats {
    if enrollments.is_empty() {
        return StudentStats::default();
    }

    let mut section_grades = Vec::with_capacity(enrollments.len());
    for e in enrollments {
        let percentage = if e.max_attendance > 0 {
            (e.present_count as f64) * 100.0 / (e.max_attendance as f64)
        } else {
            0.0
        };
        section_grades.push(SectionGrade {
            section_id: e.section_id.clone(),
            section_name: e.section_name.clone(),
            semester_id: e.semester_id.clone(),
            semester_name: e.semester_name.clone(),
            final_grade: e.final_grade,
            attendance_count: e.present_count,
            attendance_percentage: round_off_2_decimals(percentage),
            normative_results: e.normative_results.clone(),
        });
    }

    let average_grade = mean_of_present(enrollments.iter().map(|e| e.final_grade));
    let total_attendances: i64 = enrollments.iter().map(|e| e.present_count).sum();
    let possible: i64 = enrollments.iter().map(|e| e.max_attendance).sum();
    let overall_percentage = if possible > 0 {
        (total_attendances as f64) * 100.0 / (possible as f64)
    } else {
        0.0
    };

    StudentStats {
        total_sections: enrollments.len(),
        average_grade: round_off_2_decimals(average_grade),
        total_attendances,
        attendance_percentage: round_off_2_decimals(overall_percentage),
        section_grades,
    }
}

/// One enrollment inside a semester, with its section identity.
#[derive(Debug, Clone)]
pub struct SemesterEnrollmentRow {
    pub section_id: String,
    pub section_name: String,
    pub final_grade: Option<f64>,
    pub present_count: i64,
    pub has_paid: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionShortStats {
    pub section_id: String,
    pub section_name: String,
    pub student_count: usize,
    pub average_grade: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterStats {
    pub total_sections: usize,
    pub total_students: usize,
    pub average_grade: f64,
    pub average_attendance: f64,
    pub total_payments: usize,
    pub unpaid_students: usize,
    pub section_stats: Vec<SectionShortStats>,
}

pub fn semester_stats(enrollments: &[SemesterEnrollmentRow]) -> SemesterStats {
    if enrollments.is_empty() {
        return SemesterStats::default();
    }

    let total_students = enrollments.len();
    let average_grade = mean_of_present(enrollments.iter().map(|e| e.final_grade));
    let average_attendance = enrollments
        .iter()
        .map(|e| e.present_count as f64)
        .sum::<f64>()
        / (total_students as f64);
    let total_payments = enrollments.iter().filter(|e| e.has_paid).count();

    let mut per_section: Vec<SectionShortStats> = Vec::new();
    let mut grade_sums: Vec<(f64, usize)> = Vec::new();
    for e in enrollments {
        let i = match per_section.iter().position(|s| s.section_id == e.section_id) {
            Some(i) => i,
            None => {
                per_section.push(SectionShortStats {
                    section_id: e.section_id.clone(),
                    section_name: e.section_name.clone(),
                    student_count: 0,
                    average_grade: 0.0,
                });
                grade_sums.push((0.0, 0));
                per_section.len() - 1
            }
        };
        per_section[i].student_count += 1;
        if let Some(g) = e.final_grade {
            grade_sums[i].0 += g;
            grade_sums[i].1 += 1;
        }
    }
    for (s, (sum, count)) in per_section.iter_mut().zip(grade_sums) {
        if count > 0 {
            s.average_grade = round_off_2_decimals(sum / (count as f64));
        }
    }

    SemesterStats {
        total_sections: per_section.len(),
        total_students,
        average_grade: round_off_2_decimals(average_grade),
        average_attendance: round_off_2_decimals(average_attendance),
        total_payments,
        unpaid_students: total_students - total_payments,
        section_stats: per_section,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nr(id: &str, name: &str, grade: f64) -> NormativeResultRow {
        NormativeResultRow {
            normative_id: id.to_string(),
            normative_name: name.to_string(),
            result: String::new(),
            grade,
        }
    }

    #[test]
    fn section_stats_empty_input_is_all_zero() {
        let s = section_stats(&[], &[]);
        assert_eq!(s.total_students, 0);
        assert_eq!(s.active_students, 0);
        assert_eq!(s.average_attendance, 0.0);
        assert_eq!(s.average_grade, 0.0);
        assert_eq!(s.total_payments, 0);
        assert_eq!(s.unpaid_students, 0);
        assert!(s.normative_stats.is_empty());
    }

    #[test]
    fn section_stats_counts_and_averages() {
        let rows = vec![
            EnrollmentRow {
                active: true,
                final_grade: Some(80.0),
                present_count: 10,
                has_paid: true,
            },
            EnrollmentRow {
                active: true,
                final_grade: Some(60.0),
                present_count: 6,
                has_paid: false,
            },
            EnrollmentRow {
                active: false,
                final_grade: None,
                present_count: 2,
                has_paid: false,
            },
        ];
        let s = section_stats(&rows, &[]);
        assert_eq!(s.total_students, 3);
        assert_eq!(s.active_students, 2);
        assert_eq!(s.average_attendance, 6.0);
        // Null grades are skipped, not treated as zero.
        assert_eq!(s.average_grade, 70.0);
        assert_eq!(s.total_payments, 1);
        assert_eq!(s.unpaid_students, 2);
    }

    #[test]
    fn section_stats_groups_normatives_in_first_appearance_order() {
        let results = vec![
            nr("n1", "Push-ups", 80.0),
            nr("n2", "100m sprint", 90.0),
            nr("n1", "Push-ups", 70.0),
        ];
        let s = section_stats(
            &[EnrollmentRow {
                active: true,
                final_grade: None,
                present_count: 0,
                has_paid: false,
            }],
            &results,
        );
        assert_eq!(s.normative_stats.len(), 2);
        assert_eq!(s.normative_stats[0].normative_id, "n1");
        assert_eq!(s.normative_stats[0].average_grade, 75.0);
        assert_eq!(s.normative_stats[0].total_results, 2);
        assert_eq!(s.normative_stats[1].normative_id, "n2");
        assert_eq!(s.normative_stats[1].total_results, 1);
    }

    #[test]
    fn student_stats_attendance_percentages() {
        let rows = vec![StudentEnrollmentRow {
            section_id: "s1".to_string(),
            section_name: "Swimming".to_string(),
            max_attendance: 20,
            semester_id: "sem1".to_string(),
            semester_name: "Fall".to_string(),
            final_grade: Some(75.0),
            present_count: 10,
            normative_results: vec![],
        }];
        let s = student_stats(&rows);
        assert_eq!(s.total_sections, 1);
        assert_eq!(s.total_attendances, 10);
        assert_eq!(s.attendance_percentage, 50.0);
        assert_eq!(s.section_grades[0].attendance_percentage, 50.0);
        assert_eq!(s.average_grade, 75.0);
    }

    #[test]
    fn student_stats_zero_max_attendance_yields_zero_percentage() {
        let rows = vec![StudentEnrollmentRow {
            section_id: "s1".to_string(),
            section_name: "Chess boxing".to_string(),
            max_attendance: 0,
            semester_id: "sem1".to_string(),
            semester_name: "Fall".to_string(),
            final_grade: None,
            present_count: 4,
            normative_results: vec![],
        }];
        let s = student_stats(&rows);
        assert_eq!(s.attendance_percentage, 0.0);
        assert_eq!(s.section_grades[0].attendance_percentage, 0.0);
        assert_eq!(s.average_grade, 0.0);
    }

    #[test]
    fn student_stats_overall_percentage_spans_enrollments() {
        let mk = |max: i64, present: i64| StudentEnrollmentRow {
            section_id: format!("s{}", max),
            section_name: String::new(),
            max_attendance: max,
            semester_id: "sem1".to_string(),
            semester_name: String::new(),
            final_grade: None,
            present_count: present,
            normative_results: vec![],
        };
        // 15 of 40 possible across both sections.
        let s = student_stats(&[mk(20, 10), mk(20, 5)]);
        assert_eq!(s.total_attendances, 15);
        assert_eq!(s.attendance_percentage, 37.5);
    }

    #[test]
    fn semester_stats_empty_input_is_all_zero() {
        let s = semester_stats(&[]);
        assert_eq!(s.total_sections, 0);
        assert_eq!(s.total_students, 0);
        assert!(s.section_stats.is_empty());
    }

    #[test]
    fn semester_stats_per_section_breakdown() {
        let mk = |section: &str, grade: Option<f64>, present: i64, paid: bool| {
            SemesterEnrollmentRow {
                section_id: section.to_string(),
                section_name: section.to_uppercase(),
                final_grade: grade,
                present_count: present,
                has_paid: paid,
            }
        };
        let rows = vec![
            mk("a", Some(80.0), 10, true),
            mk("a", Some(60.0), 8, false),
            mk("b", None, 4, true),
        ];
        let s = semester_stats(&rows);
        assert_eq!(s.total_sections, 2);
        assert_eq!(s.total_students, 3);
        assert_eq!(s.average_grade, 70.0);
        // (10 + 8 + 4) / 3
        assert_eq!(s.average_attendance, 7.33);
        assert_eq!(s.total_payments, 2);
        assert_eq!(s.unpaid_students, 1);
        assert_eq!(s.section_stats[0].section_id, "a");
        assert_eq!(s.section_stats[0].student_count, 2);
        assert_eq!(s.section_stats[0].average_grade, 70.0);
        assert_eq!(s.section_stats[1].section_id, "b");
        assert_eq!(s.section_stats[1].student_count, 1);
        assert_eq!(s.section_stats[1].average_grade, 0.0);
    }
}
