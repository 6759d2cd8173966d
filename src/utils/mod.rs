//! Helper utilities, functions, and macros.

#[macro_use]
mod print;

#[macro_use]
mod config;

mod bitmap;
mod error;
mod safetcp;
mod timer;

pub use bitmap::ReplicaMap;
pub use error::AtomRegError;
pub use print::{logger_init, logger_set_me, ME};
pub use timer::Timer;

pub(crate) use safetcp::{
    safe_tcp_read, tcp_bind_with_retry, tcp_connect_with_retry, tcp_write_obj,
};
