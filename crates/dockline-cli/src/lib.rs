//! Terminal front end for the Dockline chat client.

pub mod config;
pub mod logging;
