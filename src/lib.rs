//! Formguard - Contact Form Rate Limiting
//!
//! This crate implements the sliding-window rate limiter that guards a
//! contact-form submission endpoint. Request timestamps are kept in Redis so
//! the limit holds across instances; when Redis cannot be reached a call is
//! served by an in-process store instead.

pub mod config;
pub mod error;
pub mod ratelimit;
