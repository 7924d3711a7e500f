//! Playlist and now-playing stores, wired to the dispatcher

use std::cell::Cell;
use std::rc::{Rc, Weak};

use flux_dispatch::{Dispatcher, Store};
use tokio::sync::mpsc;

use crate::action::{PlayerAction, PlayerActionKind, Track};

#[derive(Debug, Default)]
pub struct Playlist {
    pub tracks: Vec<Track>,
    pub failed: Vec<u32>,
    pub position: usize,
}

impl Playlist {
    pub fn current(&self) -> Option<&Track> {
        self.tracks.get(self.position)
    }
}

pub fn playlist_reducer(state: &mut Playlist, action: &PlayerAction) -> bool {
    match action {
        PlayerAction::TrackDidLoad(track) => {
            state.tracks.push(track.clone());
            true
        }
        PlayerAction::TrackDidFail { id, .. } => {
            state.failed.push(*id);
            true
        }
        PlayerAction::Skip if state.position + 1 < state.tracks.len() => {
            state.position += 1;
            true
        }
        _ => false,
    }
}

#[derive(Debug, Default)]
pub struct NowPlaying {
    pub current: Option<Track>,
    pub scrobbled: Vec<u32>,
}

pub fn now_playing_reducer(state: &mut NowPlaying, action: &PlayerAction) -> bool {
    match action {
        PlayerAction::Scrobble { id } => {
            state.scrobbled.push(*id);
            true
        }
        _ => false,
    }
}

pub type PlaylistStore = Store<Playlist, PlayerAction>;
pub type NowPlayingStore = Store<NowPlaying, PlayerAction>;

/// The stores of one player plus the handlers tying them together
pub struct Player {
    pub playlist: Rc<PlaylistStore>,
    pub now_playing: Rc<NowPlayingStore>,
}

impl Player {
    /// Register every store with `dispatcher`
    ///
    /// Once `expected` load results have arrived, the player queues `skips`
    /// skips followed by `Quit` on `action_tx`.
    pub fn new(
        dispatcher: &Rc<Dispatcher<PlayerAction>>,
        action_tx: mpsc::UnboundedSender<PlayerAction>,
        expected: usize,
        skips: usize,
    ) -> Self {
        let playlist = Store::new(Playlist::default(), playlist_reducer);
        let now_playing = Store::new(NowPlaying::default(), now_playing_reducer);

        let loaded = playlist.register(dispatcher, PlayerActionKind::TrackDidLoad);
        let failed = playlist.register(dispatcher, PlayerActionKind::TrackDidFail);
        let skipped = playlist.register(dispatcher, PlayerActionKind::Skip);
        now_playing.register(dispatcher, PlayerActionKind::Scrobble);

        // Now playing follows the playlist cursor, so it must see the
        // playlist's update for the same action first
        for (kind, token) in [
            (PlayerActionKind::TrackDidLoad, loaded),
            (PlayerActionKind::Skip, skipped),
        ] {
            let playlist = playlist.clone();
            let now_playing = now_playing.clone();
            dispatcher.register(kind, move |_, ctx| {
                ctx.wait_for(&[token])?;
                let next = playlist.state().current().cloned();
                now_playing.update(|state| {
                    if state.current == next {
                        return false;
                    }
                    state.current = next;
                    true
                });
                Ok(())
            });
        }

        let remaining = Rc::new(Cell::new(expected));
        for (kind, token) in [
            (PlayerActionKind::TrackDidLoad, loaded),
            (PlayerActionKind::TrackDidFail, failed),
        ] {
            let remaining = remaining.clone();
            let tx = action_tx.clone();
            dispatcher.register(kind, move |_, ctx| {
                ctx.wait_for(&[token])?;
                let left = remaining.get().saturating_sub(1);
                remaining.set(left);
                if left == 0 {
                    tracing::info!("Library loads finished");
                    for _ in 0..skips {
                        let _ = tx.send(PlayerAction::Skip);
                    }
                    let _ = tx.send(PlayerAction::Quit);
                }
                Ok(())
            });
        }

        Self::watch_now_playing(&now_playing, Rc::downgrade(dispatcher), action_tx);

        Self {
            playlist,
            now_playing,
        }
    }

    /// Announce track changes and scrobble them
    ///
    /// The listener runs inside the dispatch that changed the store, so a
    /// direct dispatch is refused; the scrobble goes through the queue instead.
    fn watch_now_playing(
        now_playing: &Rc<NowPlayingStore>,
        dispatcher: Weak<Dispatcher<PlayerAction>>,
        action_tx: mpsc::UnboundedSender<PlayerAction>,
    ) {
        let store = Rc::downgrade(now_playing);
        let announced = Cell::new(None);
        now_playing.subscribe(move || {
            let Some(store) = store.upgrade() else {
                return;
            };
            let Some(track) = store.state().current.clone() else {
                return;
            };
            if announced.replace(Some(track.id)) == Some(track.id) {
                return;
            }
            tracing::info!(artist = %track.artist, title = %track.title, "Now playing");

            let scrobble = PlayerAction::Scrobble { id: track.id };
            if let Some(dispatcher) = dispatcher.upgrade() {
                if let Err(err) = dispatcher.dispatch(scrobble.clone()) {
                    tracing::warn!(error = %err, "Listener dispatch refused, queueing instead");
                }
            }
            let _ = action_tx.send(scrobble);
        });
    }
}
