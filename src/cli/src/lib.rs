//! Kiln CLI - inspect and maintain a local storage root.

pub mod commands;
pub mod output;
