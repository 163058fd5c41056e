use std::sync::Weak;

use tokio::{
    task::JoinHandle,
    time::{sleep, Duration},
};

use crate::rooms::RoomRegistry;

/// One-shot deferred removal of an empty room.
///
/// Nothing cancels the task; a rejoin before the deadline is caught by the
/// emptiness re-check in [`RoomRegistry::evict_if_vacant`].
pub fn spawn_room_eviction(
    rooms: Weak<RoomRegistry>,
    room_id: String,
    grace: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        sleep(grace).await;
        if let Some(rooms) = rooms.upgrade() {
            rooms.evict_if_vacant(&room_id);
        }
    })
}
