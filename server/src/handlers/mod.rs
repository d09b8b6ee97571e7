//! Request handlers for the document store.

mod documents;
mod websocket;

pub use documents::*;
pub use websocket::handle_watch_connection;
