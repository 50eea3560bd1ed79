//! Core business logic for mediarepo.
//!
//! Three engines live here: the thumbnail pipeline, the time-bucketed
//! coalescing cache behind URL previews, and the purge engine. They reach
//! the database and blob storage only through the traits in
//! [`services::stores`] and [`services::storage`].

pub mod services;

pub use services::*;
