//! Offgrid: a request-interposed caching layer.
//!
//! Every request passing through is classified and served by one of several
//! caching strategies, so an origin's responses stay available when it is
//! unreachable and reasonably fresh when it is not.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
