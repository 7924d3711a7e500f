//! Simulated track library with network-like latency

use std::time::Duration;

use flux_dispatch::TaskManager;
use thiserror::Error;

use crate::action::{PlayerAction, Track};

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("track {0} is not in the library")]
    NotFound(u32),
}

const CATALOG: &[(u32, &str, &str, u32)] = &[
    (1, "Blue in Green", "Miles Davis", 337),
    (2, "So What", "Miles Davis", 562),
    (3, "Naima", "John Coltrane", 261),
    (4, "Peace Piece", "Bill Evans", 402),
    (5, "Moanin'", "Art Blakey", 575),
];

pub async fn fetch_track(id: u32, latency: Duration) -> Result<Track, LibraryError> {
    // Later ids take longer, so completions arrive out of request order
    tokio::time::sleep(latency * (id % 3 + 1)).await;
    CATALOG
        .iter()
        .find(|(track_id, ..)| *track_id == id)
        .map(|&(id, title, artist, duration_secs)| Track {
            id,
            title: title.to_string(),
            artist: artist.to_string(),
            duration_secs,
        })
        .ok_or(LibraryError::NotFound(id))
}

/// Load a track and turn the result into the action reporting it
pub async fn load(id: u32, latency: Duration) -> PlayerAction {
    match fetch_track(id, latency).await {
        Ok(track) => PlayerAction::TrackDidLoad(track),
        Err(e) => PlayerAction::TrackDidFail {
            id,
            reason: e.to_string(),
        },
    }
}

/// Start one load per requested id
///
/// Tasks are keyed by position, so a repeated id loads (and reports) twice.
pub fn spawn_loads(tasks: &mut TaskManager<PlayerAction>, ids: &[u32], latency: Duration) {
    for (index, &id) in ids.iter().enumerate() {
        tasks.spawn(format!("load:{index}"), load(id, latency));
    }
}
