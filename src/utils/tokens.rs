//! Character-based token estimation.
//!
//! Usage tracking works from an approximation (four characters per token on
//! both the request and response side) rather than provider-reported counts,
//! so counters stay comparable across providers that report usage
//! differently or not at all.

/// Estimate the token cost of one completed request.
pub fn estimate_tokens(request_len: usize, response_len: usize) -> u64 {
    (request_len.div_ceil(4) + response_len.div_ceil(4)) as u64
}
