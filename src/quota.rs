//! Upload-quota calculation.
//!
//! The ceiling is derived from the teacher's declared workload: two graded
//! uploads per test per class, plus a fixed bonus. Teachers who have not
//! filled in their profile get the bonus alone.

/// Fixed bonus granted on top of the workload-derived allowance.
const BASE_UPLOADS: i64 = 10;

/// Map a workload profile to an upload ceiling.
///
/// Pure and deterministic: `tests_per_term * 2 * classes_count + 10`, or the
/// floor value `10` when either input is zero or absent.
pub fn calculate_upload_limit(tests_per_term: Option<i64>, classes_count: Option<i64>) -> i64 {
    match (tests_per_term, classes_count) {
        (Some(tests), Some(classes)) if tests > 0 && classes > 0 => {
            tests * 2 * classes + BASE_UPLOADS
        }
        _ => BASE_UPLOADS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formula() {
        assert_eq!(calculate_upload_limit(Some(3), Some(4)), 34);
        assert_eq!(calculate_upload_limit(Some(1), Some(1)), 12);
        assert_eq!(calculate_upload_limit(Some(6), Some(8)), 106);
    }

    #[test]
    fn test_floor_when_absent_or_zero() {
        assert_eq!(calculate_upload_limit(None, None), 10);
        assert_eq!(calculate_upload_limit(Some(0), Some(0)), 10);
        assert_eq!(calculate_upload_limit(Some(3), None), 10);
        assert_eq!(calculate_upload_limit(None, Some(4)), 10);
        assert_eq!(calculate_upload_limit(Some(0), Some(4)), 10);
        assert_eq!(calculate_upload_limit(Some(3), Some(0)), 10);
    }

    #[test]
    fn test_deterministic() {
        for _ in 0..3 {
            assert_eq!(calculate_upload_limit(Some(5), Some(7)), 80);
        }
    }
}
