//! Strongly typed messages, keys and quorum certificates for the pala
//! consensus protocol.
pub mod validator;
