//! print-engine
//!
//! Stamps serial numbers onto SVG templates and renders the copies into a
//! single multi-page PDF.
//! This library exposes modules for the binary and for integration testing.

pub mod api;
pub mod error;
pub mod models;
pub mod rendering;
pub mod server;
pub mod services;
