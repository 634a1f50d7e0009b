//! A client-side feature flag façade for a workout app.
//!
//! # Overview
//!
//! A [`FlagClient`] owns the one connection to a flag-evaluation [`Backend`] for the lifetime of a
//! session. It evaluates flags into string treatments, tracks business events, flushes buffered
//! data, and forwards the user's consent decision. Evaluation never blocks: until the backend has
//! loaded flag definitions, every flag evaluates to [`CONTROL`].
//!
//! Backend threads report lifecycle changes ([`SdkEvent`]) through a channel. The [`EventLoop`]
//! drains that channel on the consumer-facing context and is the only writer of the observable
//! [`Readiness`] state. Consumers read it through a [`ReadinessWatch`]: while the session is
//! neither ready nor timed out, flag-gated actions should wait; once either happens, they proceed.
//!
//! [`ConsentGate`] holds the user's three-valued consent decision ([`ConsentState`]).
//!
//! [`HttpBackend`] is the default backend. Other backends implement the [`Backend`] trait.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum and only returned while connecting. Evaluation
//! that cannot be made confidently returns [`CONTROL`]; transport failures are retried on the next
//! flush and never surface.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate with the `flagwatch`
//! target. Install a `log`-compatible logger for visibility into client operations.

#![warn(rustdoc::missing_crate_level_docs)]

mod backend;
mod client;
mod config;
mod consent;
mod error;
mod event_loop;
mod key;
mod readiness;
#[cfg(test)]
mod test_support;

pub mod http;
pub mod workout;

pub use backend::{
    Backend, ConnectionParams, EventSink, RejectReason, SdkEvent, TrackResult, CONTROL,
};
pub use client::FlagClient;
pub use config::{ClientConfig, LogLevel};
pub use consent::{ConsentGate, ConsentState, ConsentWatch};
pub use error::{Error, Result};
pub use event_loop::EventLoop;
pub use http::HttpBackend;
pub use key::Key;
pub use readiness::{Readiness, ReadinessSignal, ReadinessWatch};
