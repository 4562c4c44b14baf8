//! Utility functions for common operations.
//!
//! - **URL validation**: scheme/host checks and the SSRF destination guard
//!   applied before every feed request
//! - **Guarded DNS**: a resolver for the HTTP client that applies the same
//!   guard to every hostname it connects to, redirect hops included
//!
//! # Examples
//!
//! ```
//! use feedsieve::util::validate_url;
//!
//! assert!(validate_url("https://example.com/feed.xml").is_ok());
//! assert!(validate_url("http://10.0.0.1/feed").is_err());
//! ```

mod resolver;
mod url_validator;

pub use resolver::GuardedResolver;
pub use url_validator::{
    check_literal_host, guard_destination, is_blocked_ip, resolve_public, validate_url,
    UrlValidationError,
};
