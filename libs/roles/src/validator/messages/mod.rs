//! Messages exchanged between validators.
mod block;
mod clock;
mod committee;
mod consensus;
mod genesis;
mod msg;
mod vote;

pub use self::{block::*, clock::*, committee::*, consensus::*, genesis::*, msg::*, vote::*};
