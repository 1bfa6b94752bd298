#![warn(rust_2018_idioms)]
//! RFC 1889 transport-session engine.
//!
//! A [`Session`] owns one RTP/RTCP socket pair and the per-source state a
//! conferencing endpoint needs: sequence validation with probation and
//! wraparound tracking, interarrival jitter estimation, a reception-report
//! store, and the bandwidth-scaled randomized RTCP transmission schedule
//! with reconsideration.
//!
//! The engine is single-threaded and poll-driven. The owning loop calls
//! [`Session::recv`] to service at most one datagram, drains typed
//! [`Event`]s with [`Session::poll_event`], and periodically invokes
//! [`Session::send_control`] and [`Session::update`] to run the RTCP timer
//! and expire departed sources. Nothing happens between calls.

pub mod event;
mod net;
mod report_store;
mod scheduler;
pub mod session;
mod source;
mod table;

pub use event::{Event, EventKind};
pub use session::Session;
