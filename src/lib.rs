//! Parceldesk: hostel front-desk parcel tracking with signed QR pickup codes.
//!
//! The binary in `main.rs` is a thin CLI over this library; integration
//! tests in `tests/` drive the same router against `MemoryStore`.

pub mod api;
pub mod cli;
pub mod clock;
pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod models;
pub mod notification;
pub mod qr;
pub mod server;
pub mod signing;
pub mod store;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub lifecycle: lifecycle::ParcelLifecycle,
    pub config: config::Config,
}
