//! Domain models for the access core

pub mod access;
pub mod common;
pub mod organization;
pub mod subscription;
pub mod tree;

pub use access::*;
pub use common::*;
pub use organization::*;
pub use subscription::*;
pub use tree::*;
