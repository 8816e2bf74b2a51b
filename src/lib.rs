//! resnipe: a reservation-sniping service for a WAF-protected restaurant booking
//! platform. This crate is organized as a library plus a thin `main.rs` binary so
//! that integration tests (`tests/`) can exercise the Upstream Protocol Client,
//! Reservation Queue, Credential Vault, and Booking-Window Resolver directly.

pub mod accounting;
pub mod app;
pub mod app_state;
pub mod booking_window;
pub mod cli;
pub mod config;
pub mod cookie_refresher;
pub mod error;
pub mod formatter;
pub mod headless_browser;
pub mod kvs;
pub mod logging;
pub mod logs;
pub mod queue;
pub mod scheduler;
pub mod services;
pub mod signals;
pub mod status;
pub mod upstream;
pub mod utils;
pub mod vault;
pub mod web;
