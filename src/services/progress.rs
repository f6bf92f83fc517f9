use serde::Serialize;

use crate::db::operations::progress::CourseCounts;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CourseProgress {
    pub course_id: String,
    pub total_materials: i64,
    pub completed_materials: i64,
    pub material_percentage: f64,
    pub total_tests: i64,
    pub passed_tests: i64,
    pub test_percentage: f64,
}

pub fn ratio_percentage(done: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let raw = done.min(total) as f64 * 100.0 / total as f64;
    (raw * 100.0).round() / 100.0
}

pub fn course_progress(course_id: &str, counts: CourseCounts) -> CourseProgress {
    CourseProgress {
        course_id: course_id.to_string(),
        total_materials: counts.total_materials,
        completed_materials: counts.completed_materials,
        material_percentage: ratio_percentage(counts.completed_materials, counts.total_materials),
        total_tests: counts.total_tests,
        passed_tests: counts.passed_tests,
        test_percentage: ratio_percentage(counts.passed_tests, counts.total_tests),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_course_reports_zero() {
        let progress = course_progress("c", CourseCounts::default());
        assert_eq!(progress.material_percentage, 0.0);
        assert_eq!(progress.test_percentage, 0.0);
    }

    #[test]
    fn percentages_round_to_two_decimals() {
        let progress = course_progress(
            "c",
            CourseCounts {
                total_materials: 3,
                completed_materials: 2,
                total_tests: 4,
                passed_tests: 1,
            },
        );
        assert_eq!(progress.material_percentage, 66.67);
        assert_eq!(progress.test_percentage, 25.0);
    }
}
