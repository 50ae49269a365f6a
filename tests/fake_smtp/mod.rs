#![allow(dead_code, unused_imports)]

//! Fake SMTP submission server for integration testing
//!
//! This module provides an in-process SMTP server that speaks enough
//! of the protocol to test `SmtpTransport` end-to-end:
//!
//! TCP -> greeting -> STARTTLS -> TLS handshake -> EHLO -> AUTH PLAIN
//! -> MAIL FROM -> RCPT TO -> DATA -> QUIT
//!
//! ## Module layout
//!
//! - `server` -- TCP listener, TLS setup, and the command loop
//! - `handlers` -- per-command helpers (paths, AUTH PLAIN, DATA)
//! - `io` -- shared write helpers

mod handlers;
mod io;
mod server;

pub use server::{Delivery, FakeSmtpServer};
