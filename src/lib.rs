//! Booking lifecycle engine for a two-party marketplace.
//!
//! A `Booking` couples a requesting client with a fulfilling retiree and
//! moves through a fixed lifecycle (`request` → `accepted` → `active` →
//! `delivered` → `completed`, with `rejected`/`cancelled` exits). The
//! [`state`] module is the pure transition authority, [`repository`] owns
//! durable records and the append-only history log, and [`service`] is the
//! orchestration layer the API tier talks to.

pub mod booking;
pub mod directory;
pub mod error;
pub mod notify;
pub mod repository;
pub mod service;
pub mod state;
pub mod utils;
