/// Classification for retry policy.
///
/// Used to determine how the retry policy should respond to errors from
/// source fetches.
///
/// # Behavior Summary
///
/// | Class | Retried? | Typical causes |
/// |-------|----------|----------------|
/// | `Fatal` | No | malformed request, HTTP 4xx other than 429 |
/// | `Backoff` | Yes, capped exponential backoff | timeout, connection error, HTTP 429/5xx |
/// | `NoRetry` | No | unexpected response shape |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Never retry - the request shape is wrong and retrying won't help.
    /// The source yields no quote for this query.
    Fatal,

    /// Retry with exponential backoff.
    ///
    /// Used for transient failures: timeouts, connection errors, rate
    /// limiting (429) and upstream server errors (5xx). The failure may
    /// clear on its own, so the request is re-issued after an increasing,
    /// capped delay.
    Backoff,

    /// Transient in taxonomy, but retried zero times.
    ///
    /// Used when the source answered with a shape we don't understand.
    /// Re-sending the same request would most likely produce the same
    /// unparseable answer, so the failure is logged and the source yields
    /// no quote immediately.
    NoRetry,
}
