//! Types shared between the realtime client, the local store and the console.

pub mod api;
pub mod events;
pub mod models;
