//! Turns the engagement creators' posts collect (views, likes, comments) into campaign points.
//!
//! [`engine`] holds the scoring pipeline and the sweep scheduler, written against the storage
//! seams in [`store`]. [`db`] backs those seams with Postgres.

pub mod constants;
pub mod db;
pub mod engine;
pub mod store;
pub mod util;
