//! HTTP layer of the commit server.
//!
//! A small axum server that writes files on behalf of local callers (the
//! browser extension, scripts) using the server's own access token, so the
//! token never has to live in the caller.

pub mod handler;
