//! spfresh C boundary.
//!
//! Every `extern "C"` entry point wraps its body in
//! `std::panic::catch_unwind` so a Rust panic never unwinds into the
//! caller. Handles are registry tokens, not addresses; see
//! `include/spfresh_c_api.h` for the C declarations.

pub mod c_api;
mod registry;

pub use c_api::{
    spfresh_add, spfresh_close, spfresh_open, spfresh_save, spfresh_search, SPFreshIndex,
    SPFreshStatus,
};
