//! HTTP request handlers.

pub mod admin;
