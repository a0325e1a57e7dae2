//! Domain specific structures shared by all services

mod message;

pub use message::*;
