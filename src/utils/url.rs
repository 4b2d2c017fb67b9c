//! Endpoint URL assembly.
//!
//! Both adapters are constructed with an overridable base URL, so joins
//! have to tolerate whatever slash conventions the caller used.

/// Strip trailing slashes from a base URL.
///
/// # Examples
///
/// ```
/// use mimir::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("https://openrouter.ai/api/v1"), "https://openrouter.ai/api/v1");
/// assert_eq!(normalize_base_url("https://openrouter.ai/api/v1/"), "https://openrouter.ai/api/v1");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Join a base URL and an endpoint path with exactly one slash between
/// them, whatever combination of trailing and leading slashes came in.
///
/// # Examples
///
/// ```
/// use mimir::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("https://openrouter.ai/api/v1", "chat/completions"),
///     "https://openrouter.ai/api/v1/chat/completions"
/// );
/// assert_eq!(
///     construct_api_url("https://openrouter.ai/api/v1/", "/chat/completions"),
///     "https://openrouter.ai/api/v1/chat/completions"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalized_base, endpoint)
}
