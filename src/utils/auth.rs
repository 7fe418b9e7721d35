//! Authentication utilities for API requests

/// Add an `Authorization: Bearer` header when an API key is configured.
///
/// Local inference servers usually run without authentication, so a missing
/// or blank key leaves the request untouched.
pub fn add_auth_headers(
    request: reqwest::RequestBuilder,
    api_key: Option<&str>,
) -> reqwest::RequestBuilder {
    match api_key.map(str::trim).filter(|key| !key.is_empty()) {
        Some(key) => request.bearer_auth(key),
        None => request,
    }
}
