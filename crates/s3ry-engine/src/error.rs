use std::time::Duration;

use rand::Rng as _;

use s3ry_core::error::ErrorKind;

/// A classified storage failure.
///
/// Carries the raw service code and message for the log; the retry policy
/// and the UI look only at `kind`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{op}: {message} ({kind})")]
pub struct StoreError {
    /// Classified kind, per the ordered rules in [`classify`].
    pub kind: ErrorKind,
    /// The storage operation that failed (e.g. `UploadPart`).
    pub op: &'static str,
    /// Raw service error code, when the response carried one.
    pub code: Option<String>,
    /// Raw error message.
    pub message: String,
}

impl StoreError {
    /// Build an error with an already-known kind. Custom [`ObjectStore`]
    /// implementations use this for failures that need no classification.
    ///
    /// [`ObjectStore`]: crate::ObjectStore
    pub fn new(kind: ErrorKind, op: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            op,
            code: None,
            message: message.into(),
        }
    }

    /// Classify a raw code/message pair observed during `op`.
    pub fn classified(op: &'static str, code: Option<String>, message: String) -> Self {
        let kind = classify(code.as_deref(), &message);
        Self {
            kind,
            op,
            code,
            message,
        }
    }

    pub(crate) fn cancelled(op: &'static str) -> Self {
        Self::new(ErrorKind::Cancelled, op, "cancellation token observed")
    }

    pub(crate) fn timed_out(op: &'static str, after: Duration) -> Self {
        Self {
            kind: ErrorKind::Transient,
            op,
            code: Some("RequestTimeout".to_string()),
            message: format!("attempt timed out after {after:?}"),
        }
    }

    /// Whether the retry policy may resubmit the failed work.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

fn matches_any(haystack: &str, needles: &[&str]) -> bool {
    let lower = haystack.to_ascii_lowercase();
    needles.iter().any(|n| lower.contains(n))
}

/// Map a raw service code (or, failing that, the message) onto the error
/// taxonomy. Rules are applied in order; the first match wins.
pub(crate) fn classify(code: Option<&str>, message: &str) -> ErrorKind {
    let subject = code.filter(|c| !c.is_empty()).unwrap_or(message);

    if matches_any(subject, &["nosuchbucket", "nosuchkey", "nosuchupload", "notfound", "404"]) {
        return ErrorKind::NotFound;
    }
    if matches_any(
        subject,
        &[
            "accessdenied",
            "signaturedoesnotmatch",
            "invalidaccesskeyid",
            "expiredtoken",
            "tokenrefreshrequired",
            "forbidden",
            "403",
        ],
    ) {
        return ErrorKind::PermissionDenied;
    }
    if matches_any(
        subject,
        &["slowdown", "toomanyrequests", "requestlimitexceeded", "throttl", "429"],
    ) {
        return ErrorKind::Throttled;
    }
    if matches_any(
        subject,
        &[
            "internalerror",
            "serviceunavailable",
            "requesttimeout",
            "timed out",
            "timeout",
            "connection reset",
            "connection closed",
            "broken pipe",
            "dispatch failure",
            "502",
            "503",
            "504",
        ],
    ) {
        return ErrorKind::Transient;
    }
    if matches_any(subject, &["invalidbucketname"]) {
        return ErrorKind::InvalidBucketName;
    }
    if matches_any(subject, &["invalidkey", "keytoolong", "invalidargument"]) {
        return ErrorKind::InvalidKey;
    }

    ErrorKind::Fatal
}

/// Exponential backoff with jitter for `Throttled`/`Transient` failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries per part after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling on any single delay.
    pub max_delay: Duration,
    /// Growth factor between retries.
    pub multiplier: f64,
    /// Fractional jitter applied symmetrically (0.1 = ±10%).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Whether a failure of `kind` on 0-based retry index `attempt` should
    /// be retried.
    pub fn should_retry(&self, kind: ErrorKind, attempt: u32) -> bool {
        kind.is_retryable() && attempt < self.max_retries
    }

    /// Delay before the retry with 0-based index `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let nominal = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let nominal = nominal.min(self.max_delay.as_secs_f64());
        let spread = nominal * self.jitter;
        let jittered = if spread > 0.0 {
            nominal + rand::thread_rng().gen_range(-spread..=spread)
        } else {
            nominal
        };
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_matches_codes_in_order() {
        assert_eq!(classify(Some("NoSuchKey"), ""), ErrorKind::NotFound);
        assert_eq!(classify(Some("NoSuchBucket"), ""), ErrorKind::NotFound);
        assert_eq!(classify(Some("AccessDenied"), ""), ErrorKind::PermissionDenied);
        assert_eq!(
            classify(Some("SignatureDoesNotMatch"), ""),
            ErrorKind::PermissionDenied
        );
        assert_eq!(classify(Some("SlowDown"), ""), ErrorKind::Throttled);
        assert_eq!(classify(Some("TooManyRequests"), ""), ErrorKind::Throttled);
        assert_eq!(classify(Some("InternalError"), ""), ErrorKind::Transient);
        assert_eq!(classify(Some("RequestTimeout"), ""), ErrorKind::Transient);
        assert_eq!(
            classify(Some("InvalidBucketName"), ""),
            ErrorKind::InvalidBucketName
        );
        assert_eq!(classify(Some("KeyTooLongError"), ""), ErrorKind::InvalidKey);
        assert_eq!(classify(Some("TeapotError"), ""), ErrorKind::Fatal);
    }

    #[test]
    fn classify_falls_back_to_message_without_code() {
        assert_eq!(
            classify(None, "connection reset by peer"),
            ErrorKind::Transient
        );
        assert_eq!(classify(None, "dispatch failure: timed out"), ErrorKind::Transient);
        assert_eq!(classify(None, "something exotic"), ErrorKind::Fatal);
    }

    #[test]
    fn code_wins_over_message() {
        // The message mentions a timeout, but the service code is what counts.
        assert_eq!(
            classify(Some("SlowDown"), "request timed out while throttled"),
            ErrorKind::Throttled
        );
    }

    #[test]
    fn retry_policy_delays_grow_and_cap() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(10), Duration::from_secs(30));
    }

    #[test]
    fn retry_policy_jitter_stays_within_band() {
        let policy = RetryPolicy::default();
        for attempt in 0..4 {
            let nominal = 1.0_f64 * 2.0_f64.powi(attempt as i32);
            let nominal = nominal.min(30.0);
            for _ in 0..50 {
                let d = policy.delay(attempt).as_secs_f64();
                assert!(d >= nominal * 0.9 - 1e-6 && d <= nominal * 1.1 + 1e-6);
            }
        }
    }

    #[test]
    fn retry_policy_refuses_terminal_kinds() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(ErrorKind::Transient, 0));
        assert!(policy.should_retry(ErrorKind::Throttled, 2));
        assert!(!policy.should_retry(ErrorKind::Transient, 3));
        assert!(!policy.should_retry(ErrorKind::PermissionDenied, 0));
        assert!(!policy.should_retry(ErrorKind::Cancelled, 0));
    }
}
