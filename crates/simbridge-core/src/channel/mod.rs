//! Transport channel supervisors.
//!
//! Each submodule owns one wire transport and reports status changes
//! into the shared [`ConnectionState`](crate::state::ConnectionState).

pub(crate) mod command;
pub(crate) mod push;
