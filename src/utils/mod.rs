//! Shared utilities

pub mod url_utils;

pub use url_utils::{host_of, is_domain_allowed, normalize_url};
