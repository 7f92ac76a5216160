//! Transport-facing channels (spec §4.5 C5, §4.9 C9).

pub mod server;
