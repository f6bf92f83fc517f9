//! Per-user realtime delivery for chat and workflow notifications.

pub mod hub;
pub mod protocol;

pub use hub::{ConnectionGuard, RealtimeEvent, RealtimeHub, RealtimeStats, RoutedEvent};
