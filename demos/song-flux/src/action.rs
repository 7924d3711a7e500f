use flux_dispatch::{Action, ActionSummary};

#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    pub id: u32,
    pub title: String,
    pub artist: String,
    pub duration_secs: u32,
}

/// Everything that can happen to the player
///
/// `*Did*` variants carry results of async work back into the dispatcher.
#[derive(Action, Clone, Debug, PartialEq)]
pub enum PlayerAction {
    TrackDidLoad(Track),
    TrackDidFail { id: u32, reason: String },
    Skip,
    Scrobble { id: u32 },
    Quit,
}

impl ActionSummary for PlayerAction {
    fn summary(&self) -> String {
        match self {
            PlayerAction::TrackDidLoad(track) => {
                format!("TrackDidLoad({} - {})", track.artist, track.title)
            }
            other => format!("{:?}", other),
        }
    }
}
