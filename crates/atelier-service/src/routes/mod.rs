//! HTTP route handlers, grouped by resource.

pub mod users;
pub mod workshops;
