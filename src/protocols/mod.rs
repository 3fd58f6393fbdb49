//! Protocol implementations.
//!
//! - `echo`: length-prefixed binary echo, shared by every runtime

pub mod echo;
