//! Credential-injecting [`HttpClient`](super::HttpClient) wrappers.
//!
//! The realtime store accepts either a legacy secret / ID token as the `auth`
//! query parameter ([`UrlParam`]) or an OAuth access token as a bearer header
//! ([`ApiKey`]).

mod api_key;
mod url_param;

pub use api_key::ApiKey;
pub use url_param::UrlParam;
