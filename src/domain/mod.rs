//! Domain layer: snapshots of the wiki content model and its change notifications.

pub mod events;
pub mod pages;
