//! Inkpost - A blog with a gated admin area
//!
//! This library provides the admin authentication layer: credential
//! verification, the session cookie, the edge access gate, and the
//! client-side auth state tracker.

pub mod api;
pub mod config;
pub mod models;
pub mod services;
