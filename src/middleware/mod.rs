//! HTTP plumbing shared by the gateway handler.
//!
//! - **Client identity**: peer address, or forwarding headers from trusted proxies
//! - **Request ID**: generated/propagated by `tower-http` layers configured in
//!   [`crate::routes`]; [`REQUEST_ID_HEADER`] names the header
//!
//! # Layer order
//!
//! ```text
//! Request → Set Request ID → Trace → Propagate Request ID → CORS → Gateway handler
//! ```

pub mod ip;

pub use ip::{CidrRange, TrustedProxyConfig, UNKNOWN_IP, client_identity, peer_addr};

/// Header carrying the request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";
