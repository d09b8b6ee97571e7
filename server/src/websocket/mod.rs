//! Watch socket bookkeeping.
//!
//! Each connection multiplexes any number of topic watches. The manager
//! tracks the forwarding task of every watch so they can be stopped on
//! `unsubscribe` and when the socket goes away. The message types themselves
//! live in `armory_engine::wire`, shared with the client.

mod manager;

pub use manager::{ConnectionManager, MessageSender};
