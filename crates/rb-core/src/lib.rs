//! rusty-board/crates/rb-core/src/lib.rs
//!
//! The central domain logic and interface definitions for Rusty-Board:
//! post and thread models, the comment parser, the board store that numbers
//! and persists posts, and the store ports plugins implement.

pub mod board;
pub mod clock;
pub mod error;
pub mod memory;
pub mod models;
pub mod parse;
pub mod traits;

// Re-exporting for easier access in other crates
pub use board::*;
pub use clock::*;
pub use error::*;
pub use memory::*;
pub use models::*;
pub use parse::*;
pub use traits::*;
