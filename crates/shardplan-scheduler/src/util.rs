//! Worker-count resolution and stage environment overrides

use shardplan_core::{ShardError, ShardResult};
use std::collections::BTreeMap;

/// Environment overrides handed to a test process
pub type EnvMap = BTreeMap<String, String>;

/// Stops the runtime from pinning its own threads on top of our core binding
pub const UNPIN_ENV: &[(&str, &str)] = &[("REALM_SYNTHETIC_CORE_MAP", "")];

/// Disables runtime auto-configuration so the shard flags are authoritative
pub const MANUAL_CONFIG_ENV: &[(&str, &str)] = &[("LEGATE_AUTO_CONFIG", "0")];

/// Raises minimum chunk sizes so deferred code paths run eagerly
pub const EAGER_ENV: &[(&str, &str)] = &[
    ("CUNUMERIC_FORCE_THUNK", "eager"),
    ("CUNUMERIC_MIN_CPU_CHUNK", "2000000000"),
    ("CUNUMERIC_MIN_OMP_CHUNK", "2000000000"),
    ("CUNUMERIC_MIN_GPU_CHUNK", "2000000000"),
];

/// Build an environment map from constant pairs
pub fn env_map(pairs: &[(&str, &str)]) -> EnvMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Adjust computed workers according to an explicitly requested count
///
/// Without a request the computed count is kept; a request may only lower
/// it. A final count of zero is an error, reported with `detail` when given
/// so the arithmetic behind it can be inspected.
pub fn adjust_workers(
    workers: u32,
    requested_workers: Option<i64>,
    detail: Option<&str>,
) -> ShardResult<u32> {
    let workers = match requested_workers {
        Some(requested) if requested < 0 => {
            return Err(ShardError::Config(
                "requested workers must be non-negative".to_string(),
            ));
        }
        Some(0) => {
            return Err(ShardError::Config(
                "requested workers must not be zero".to_string(),
            ));
        }
        Some(requested) if requested > i64::from(workers) => {
            return Err(ShardError::Config(format!(
                "Requested workers ({}) is greater than computed workers ({})",
                requested, workers
            )));
        }
        Some(requested) => requested as u32,
        None => workers,
    };

    if workers == 0 {
        let mut msg = "Current configuration results in zero workers".to_string();
        if let Some(detail) = detail.filter(|d| !d.is_empty()) {
            msg.push_str(&format!(" [details: {}]", detail));
        }
        return Err(ShardError::ResourceExhausted(msg));
    }

    Ok(workers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_computed_kept_without_request() {
        assert_eq!(adjust_workers(5, None, None).unwrap(), 5);
    }

    #[test]
    fn test_request_lowers_count() {
        assert_eq!(adjust_workers(5, Some(3), None).unwrap(), 3);
        assert_eq!(adjust_workers(5, Some(5), None).unwrap(), 5);
    }

    #[test]
    fn test_request_above_computed() {
        let err = adjust_workers(5, Some(6), None).unwrap_err();
        assert!(matches!(err, ShardError::Config(_)));
        assert!(err.to_string().contains("(6) is greater than computed workers (5)"));
    }

    #[test]
    fn test_request_zero() {
        let err = adjust_workers(5, Some(0), None).unwrap_err();
        assert!(matches!(err, ShardError::Config(_)));
    }

    #[test]
    fn test_request_negative() {
        let err = adjust_workers(5, Some(-1), None).unwrap_err();
        assert!(matches!(err, ShardError::Config(_)));
    }

    #[test]
    fn test_zero_computed() {
        let err = adjust_workers(0, None, None).unwrap_err();
        assert!(matches!(err, ShardError::ResourceExhausted(_)));
        assert!(!err.to_string().contains("details"));
    }

    #[test]
    fn test_zero_computed_with_detail() {
        let err = adjust_workers(0, None, Some("mem_workers=0")).unwrap_err();
        assert!(err
            .to_string()
            .ends_with("zero workers [details: mem_workers=0]"));
    }

    #[test]
    fn test_zero_computed_with_request() {
        let err = adjust_workers(0, Some(1), None).unwrap_err();
        assert!(matches!(err, ShardError::Config(_)));
    }

    #[test]
    fn test_env_map() {
        let env = env_map(UNPIN_ENV);
        assert_eq!(env.len(), 1);
        assert_eq!(env["REALM_SYNTHETIC_CORE_MAP"], "");
    }
}
