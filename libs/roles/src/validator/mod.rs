//! Validator role implementation.

mod conv;
mod keys;
mod messages;
pub mod testonly;

pub use self::{keys::*, messages::*};
