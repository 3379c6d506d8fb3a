//! Event loop binding a [`StoryPlayer`] to real timers and user input.
//!
//! The player itself is advanced by exactly one event at a time; this module
//! supplies those events from a single-threaded tokio loop: a 100 ms tick
//! interval (polled only while an image item is playing) and an mpsc command
//! channel fed by the UI layer. The loop exits, dropping the timer, the
//! moment any transition closes the viewer, so no orphaned ticks can fire
//! against a discarded cursor.

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::player::{Flow, StoryPlayer, TICK_INTERVAL, ViewSink};

/// User-driven events forwarded from the UI layer.
#[derive(Clone, Debug, PartialEq)]
pub enum PlayerCommand {
    /// Click at `x` on a media surface of `width`, routed through the
    /// three-zone policy.
    SurfaceClick { x: f64, width: f64 },
    Advance,
    Retreat,
    JumpTo(usize),
    TogglePlayPause,
    ToggleMute,
    /// Native player time update for the current video item.
    NativeProgress { position_secs: f64, duration_secs: f64 },
    /// Native player reached end-of-stream.
    MediaEnded,
    /// The current item failed to load.
    MediaLoadFailed,
    /// The deletion sink confirmed removal of the current item.
    DeleteConfirmed,
    Close,
}

/// Drive `player` until it closes or the command channel is dropped.
/// Returns the player so the embedder can read the final corpus state
/// (e.g. `viewed_by_user` flags) before discarding it.
pub async fn run_viewer<S: ViewSink>(
    mut player: StoryPlayer<S>,
    mut commands: mpsc::Receiver<PlayerCommand>,
) -> StoryPlayer<S> {
    // First tick one interval after open; progress starts at 0, not 2%.
    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let flow = tokio::select! {
            _ = ticker.tick(), if player.wants_ticks() => player.tick(),
            cmd = commands.recv() => match cmd {
                Some(cmd) => apply(&mut player, cmd),
                // UI dropped the channel: treat as Close.
                None => Flow::Closed,
            },
        };

        if flow.is_closed() {
            tracing::debug!("viewer session closed");
            return player;
        }
    }
}

fn apply<S: ViewSink>(player: &mut StoryPlayer<S>, cmd: PlayerCommand) -> Flow {
    match cmd {
        PlayerCommand::SurfaceClick { x, width } => player.click(x, width),
        PlayerCommand::Advance => player.advance(),
        PlayerCommand::Retreat => {
            player.retreat();
            Flow::Continue
        }
        PlayerCommand::JumpTo(index) => {
            if let Err(err) = player.jump_to(index) {
                tracing::warn!(%err, "ignoring jump to invalid item index");
            }
            Flow::Continue
        }
        PlayerCommand::TogglePlayPause => {
            player.toggle_play_pause();
            Flow::Continue
        }
        PlayerCommand::ToggleMute => {
            player.toggle_mute();
            Flow::Continue
        }
        PlayerCommand::NativeProgress {
            position_secs,
            duration_secs,
        } => {
            player.native_progress(position_secs, duration_secs);
            Flow::Continue
        }
        PlayerCommand::MediaEnded => player.media_ended(),
        PlayerCommand::MediaLoadFailed => {
            player.media_load_failed();
            Flow::Continue
        }
        PlayerCommand::DeleteConfirmed => player.remove_current(),
        PlayerCommand::Close => Flow::Closed,
    }
}
