//! Extensions shipped with the server.

pub mod request_id;

pub use request_id::RequestIdExtension;
