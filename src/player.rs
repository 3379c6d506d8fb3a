use std::time::Duration;

use crate::{
    error::{GlimpseError, GlimpseResult},
    model::{AuthorStoryGroup, MediaItem, MediaKind, validate_corpus},
};

/// Fixed display time for image items.
pub const IMAGE_ITEM_SECS: f64 = 5.0;

/// Sampling interval for the image-item progress timer.
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Progress added per tick, in percent (2.0 with the defaults above).
pub const TICK_STEP_PERCENT: f64 = 100.0 * 0.1 / IMAGE_ITEM_SECS;

/// Clamp range for the *displayed* duration estimate of video items. Actual
/// playback position tracking always uses the real media length; this bound
/// only paces the progress bar before/while metadata settles.
pub const MIN_VIDEO_DISPLAY_SECS: f64 = 15.0;
pub const MAX_VIDEO_DISPLAY_SECS: f64 = 30.0;

/// External collaborator that records "item was viewed". Fire-and-forget:
/// the state machine never waits on it and ignores its failures, so the
/// trait has no return value.
pub trait ViewSink {
    fn record_view(&mut self, item_id: &str);
}

impl<F: FnMut(&str)> ViewSink for F {
    fn record_view(&mut self, item_id: &str) {
        self(item_id)
    }
}

/// Whether the viewer stays open after a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Closed,
}

impl Flow {
    pub fn is_closed(self) -> bool {
        self == Flow::Closed
    }
}

/// Horizontal thirds of the media surface: left retreats, right advances,
/// the center toggles play/pause.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClickZone {
    Left,
    Center,
    Right,
}

impl ClickZone {
    /// Zone for a click at `x` on a surface of `width`. `None` for
    /// degenerate surfaces or non-finite input.
    pub fn at(x: f64, width: f64) -> Option<Self> {
        if !x.is_finite() || !width.is_finite() || width <= 0.0 {
            return None;
        }
        let t = (x / width).clamp(0.0, 1.0);
        if t < 1.0 / 3.0 {
            Some(ClickZone::Left)
        } else if t < 2.0 / 3.0 {
            Some(ClickZone::Center)
        } else {
            Some(ClickZone::Right)
        }
    }
}

/// Transient pointer + flags for exactly one open viewer. Created on Open,
/// discarded on Close; never persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackCursor {
    pub author_index: usize,
    pub item_index: usize,
    /// 0–100, monotonic within an item, reset to 0 on item change.
    pub progress_percent: f64,
    pub is_playing: bool,
    pub is_muted: bool,
    /// View-tracking guard: armed (false) each time an item becomes current,
    /// set once the side effect has fired.
    pub view_tracked: bool,
    /// Double-advance guard for the timer/ended race.
    pub has_advanced: bool,
}

/// The sequential ephemeral-media playback engine.
///
/// Owns a session-local copy of the ordered story corpus and a
/// [`PlaybackCursor`], and is advanced by exactly one external event at a
/// time: a timer tick, a native-media notification, or user input. Every
/// item switch goes through one internal transition that atomically resets
/// progress and re-arms both per-item guards.
pub struct StoryPlayer<S: ViewSink> {
    groups: Vec<AuthorStoryGroup>,
    cursor: PlaybackCursor,
    /// Real media length as last reported by the native player, video only.
    video_duration_secs: Option<f64>,
    sink: S,
}

impl<S: ViewSink> StoryPlayer<S> {
    /// Open transition: position the cursor on the first item of
    /// `initial_author_index` with playback running.
    pub fn open(
        groups: Vec<AuthorStoryGroup>,
        initial_author_index: usize,
        sink: S,
    ) -> GlimpseResult<Self> {
        validate_corpus(&groups)?;
        if initial_author_index >= groups.len() {
            return Err(GlimpseError::validation(format!(
                "initial author index {initial_author_index} out of range ({} groups)",
                groups.len()
            )));
        }

        tracing::debug!(
            author_index = initial_author_index,
            groups = groups.len(),
            "opening story viewer"
        );

        Ok(Self {
            groups,
            cursor: PlaybackCursor {
                author_index: initial_author_index,
                item_index: 0,
                progress_percent: 0.0,
                is_playing: true,
                is_muted: false,
                view_tracked: false,
                has_advanced: false,
            },
            video_duration_secs: None,
            sink,
        })
    }

    pub fn cursor(&self) -> &PlaybackCursor {
        &self.cursor
    }

    pub fn current_group(&self) -> &AuthorStoryGroup {
        &self.groups[self.cursor.author_index]
    }

    pub fn current_item(&self) -> &MediaItem {
        &self.current_group().items[self.cursor.item_index]
    }

    /// True while the session driver should poll the 100 ms tick timer:
    /// image item, playback running.
    pub fn wants_ticks(&self) -> bool {
        self.cursor.is_playing && self.current_item().kind == MediaKind::Image
    }

    /// Duration estimate used to pace the progress bar. Images use the fixed
    /// per-item time; videos clamp the reported media length between
    /// [`MIN_VIDEO_DISPLAY_SECS`] and [`MAX_VIDEO_DISPLAY_SECS`].
    pub fn display_duration_secs(&self) -> f64 {
        match self.current_item().kind {
            MediaKind::Image => IMAGE_ITEM_SECS,
            MediaKind::Video => self
                .video_duration_secs
                .unwrap_or(MIN_VIDEO_DISPLAY_SECS)
                .clamp(MIN_VIDEO_DISPLAY_SECS, MAX_VIDEO_DISPLAY_SECS),
        }
    }

    /// Timer tick, image items only. Advances progress linearly and fires
    /// exactly one auto-advance when it reaches 100.
    pub fn tick(&mut self) -> Flow {
        if !self.cursor.is_playing || self.current_item().kind != MediaKind::Image {
            return Flow::Continue;
        }

        self.cursor.progress_percent = (self.cursor.progress_percent + TICK_STEP_PERCENT).min(100.0);
        self.track_view_once();

        if self.cursor.progress_percent >= 100.0 && !self.cursor.has_advanced {
            self.cursor.has_advanced = true;
            return self.advance();
        }
        Flow::Continue
    }

    /// Native-media time update, video items only. Progress is derived from
    /// the reported position rather than an independent timer so it cannot
    /// drift against real decode speed.
    pub fn native_progress(&mut self, position_secs: f64, duration_secs: f64) {
        if self.current_item().kind != MediaKind::Video {
            return;
        }
        if !(duration_secs > 0.0) || !position_secs.is_finite() {
            return;
        }
        self.video_duration_secs = Some(duration_secs);
        self.cursor.progress_percent = (position_secs / duration_secs * 100.0).clamp(0.0, 100.0);
        self.track_view_once();
    }

    /// Native end-of-stream, video items only. Guarded against a second
    /// advance when a timer callback lands in the same window.
    pub fn media_ended(&mut self) -> Flow {
        if self.current_item().kind != MediaKind::Video || self.cursor.has_advanced {
            return Flow::Continue;
        }
        self.cursor.progress_percent = 100.0;
        self.cursor.has_advanced = true;
        self.advance()
    }

    /// One item could not be loaded. Playback has no fatal states: pause on
    /// the failed item and wait for manual navigation.
    pub fn media_load_failed(&mut self) {
        tracing::warn!(item = %self.current_item().id, "media failed to load, pausing");
        self.cursor.is_playing = false;
    }

    /// Move to the next item, crossing into the next author group when the
    /// current one is exhausted; closes the viewer past the last item.
    pub fn advance(&mut self) -> Flow {
        let group_len = self.current_group().items.len();
        if self.cursor.item_index + 1 < group_len {
            self.set_current(self.cursor.author_index, self.cursor.item_index + 1);
            Flow::Continue
        } else if self.cursor.author_index + 1 < self.groups.len() {
            self.set_current(self.cursor.author_index + 1, 0);
            Flow::Continue
        } else {
            tracing::debug!("advanced past the last item, closing viewer");
            Flow::Closed
        }
    }

    /// Move to the previous item, crossing into the previous author group's
    /// last item at a group boundary. A no-op at the very first item:
    /// retreat never closes the viewer.
    pub fn retreat(&mut self) {
        if self.cursor.item_index > 0 {
            self.set_current(self.cursor.author_index, self.cursor.item_index - 1);
        } else if self.cursor.author_index > 0 {
            let author = self.cursor.author_index - 1;
            let last = self.groups[author].items.len() - 1;
            self.set_current(author, last);
        }
    }

    /// Jump straight to an item of the current group (progress-segment
    /// clicks). Out-of-range indices leave the cursor untouched.
    pub fn jump_to(&mut self, item_index: usize) -> GlimpseResult<()> {
        let group_len = self.current_group().items.len();
        if item_index >= group_len {
            return Err(GlimpseError::validation(format!(
                "item index {item_index} out of range ({group_len} items in group)"
            )));
        }
        self.set_current(self.cursor.author_index, item_index);
        Ok(())
    }

    /// Pause/resume without resetting position or progress.
    pub fn toggle_play_pause(&mut self) {
        self.cursor.is_playing = !self.cursor.is_playing;
        tracing::debug!(is_playing = self.cursor.is_playing, "toggled play/pause");
    }

    /// Flip the mute flag. Only video rendering consults it; progress and
    /// play state are untouched.
    pub fn toggle_mute(&mut self) {
        self.cursor.is_muted = !self.cursor.is_muted;
    }

    /// Route a click on the media surface through the three-zone policy.
    pub fn click(&mut self, x: f64, surface_width: f64) -> Flow {
        match ClickZone::at(x, surface_width) {
            Some(ClickZone::Left) => {
                self.retreat();
                Flow::Continue
            }
            Some(ClickZone::Right) => self.advance(),
            Some(ClickZone::Center) => {
                self.toggle_play_pause();
                Flow::Continue
            }
            None => Flow::Continue,
        }
    }

    /// Delete transition, called after the deletion sink confirmed success.
    /// Removes the current item from the session-local collection and
    /// performs the equivalent of Advance against the post-deletion state;
    /// deleting the last item overall closes the viewer.
    pub fn remove_current(&mut self) -> Flow {
        let author = self.cursor.author_index;
        let index = self.cursor.item_index;
        let removed = self.groups[author].items.remove(index);
        tracing::info!(item = %removed.id, "removed deleted item from session");

        if self.groups[author].items.is_empty() {
            self.groups.remove(author);
            if author >= self.groups.len() {
                return Flow::Closed;
            }
            self.set_current(author, 0);
            return Flow::Continue;
        }

        if index < self.groups[author].items.len() {
            // The item that followed shifted into the removed slot.
            self.set_current(author, index);
            Flow::Continue
        } else if author + 1 < self.groups.len() {
            self.set_current(author + 1, 0);
            Flow::Continue
        } else {
            Flow::Closed
        }
    }

    /// The single "item became current" transition: moves the indices and
    /// atomically re-arms both per-item guards. The embedder must restart
    /// the underlying media from position zero after any item switch, even
    /// when the same asset was partially played before.
    fn set_current(&mut self, author_index: usize, item_index: usize) {
        self.cursor.author_index = author_index;
        self.cursor.item_index = item_index;
        self.cursor.progress_percent = 0.0;
        self.cursor.is_playing = true;
        self.cursor.view_tracked = false;
        self.cursor.has_advanced = false;
        self.video_duration_secs = None;
        tracing::debug!(
            author_index,
            item_index,
            item = %self.current_item().id,
            "item became current"
        );
    }

    /// Fire the view-tracking side effect at most once per time the item
    /// becomes current. Called from progress-bearing events so duplicate
    /// rapid triggers collapse into a single sink call.
    fn track_view_once(&mut self) {
        if self.cursor.view_tracked {
            return;
        }
        self.cursor.view_tracked = true;
        let item = &mut self.groups[self.cursor.author_index].items[self.cursor.item_index];
        item.viewed_by_user = true;
        self.sink.record_view(&item.id);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::model::{Author, MediaItem};

    fn item(id: &str, kind: MediaKind) -> MediaItem {
        MediaItem {
            id: id.to_string(),
            kind,
            media_url: format!("https://cdn.example/{id}"),
            thumbnail_url: None,
            caption: None,
            created_at: Utc::now(),
            viewed_by_user: false,
        }
    }

    fn group(author_id: &str, items: Vec<MediaItem>) -> AuthorStoryGroup {
        AuthorStoryGroup {
            author: Author {
                id: author_id.to_string(),
                display_name: author_id.to_string(),
                avatar_url: None,
            },
            items,
        }
    }

    fn two_author_corpus() -> Vec<AuthorStoryGroup> {
        vec![
            group(
                "ana",
                vec![item("a1", MediaKind::Image), item("a2", MediaKind::Video)],
            ),
            group("ben", vec![item("b1", MediaKind::Image)]),
        ]
    }

    fn open(groups: Vec<AuthorStoryGroup>) -> StoryPlayer<impl ViewSink> {
        StoryPlayer::open(groups, 0, |_: &str| {}).unwrap()
    }

    #[test]
    fn open_rejects_out_of_range_author() {
        assert!(StoryPlayer::open(two_author_corpus(), 2, |_: &str| {}).is_err());
    }

    #[test]
    fn open_starts_playing_at_first_item() {
        let player = open(two_author_corpus());
        let c = player.cursor();
        assert_eq!((c.author_index, c.item_index), (0, 0));
        assert!(c.is_playing);
        assert!(!c.view_tracked);
        assert_eq!(c.progress_percent, 0.0);
    }

    #[test]
    fn advance_crosses_group_boundary_and_closes_at_end() {
        let mut player = open(two_author_corpus());
        assert_eq!(player.advance(), Flow::Continue);
        assert_eq!(player.cursor().item_index, 1);
        assert_eq!(player.advance(), Flow::Continue);
        assert_eq!((player.cursor().author_index, player.cursor().item_index), (1, 0));
        assert_eq!(player.advance(), Flow::Closed);
    }

    #[test]
    fn retreat_is_noop_at_first_item() {
        let mut player = open(two_author_corpus());
        let before = player.cursor().clone();
        player.retreat();
        assert_eq!(player.cursor(), &before);
    }

    #[test]
    fn retreat_enters_previous_group_at_last_item() {
        let mut player = StoryPlayer::open(two_author_corpus(), 1, |_: &str| {}).unwrap();
        player.retreat();
        assert_eq!((player.cursor().author_index, player.cursor().item_index), (0, 1));
    }

    #[test]
    fn jump_resets_per_item_state() {
        let mut player = open(two_author_corpus());
        player.cursor.progress_percent = 55.0;
        player.cursor.view_tracked = true;
        player.jump_to(1).unwrap();
        assert_eq!(player.cursor().item_index, 1);
        assert_eq!(player.cursor().progress_percent, 0.0);
        assert!(!player.cursor().view_tracked);
        assert!(player.jump_to(5).is_err());
    }

    #[test]
    fn tick_is_noop_while_paused_or_on_video() {
        let mut player = open(two_author_corpus());
        player.toggle_play_pause();
        assert_eq!(player.tick(), Flow::Continue);
        assert_eq!(player.cursor().progress_percent, 0.0);

        player.toggle_play_pause();
        player.advance(); // a2 is a video
        assert_eq!(player.tick(), Flow::Continue);
        assert_eq!(player.cursor().progress_percent, 0.0);
    }

    #[test]
    fn native_progress_derives_percentage() {
        let mut player = open(two_author_corpus());
        player.advance(); // video item
        player.native_progress(4.5, 18.0);
        assert!((player.cursor().progress_percent - 25.0).abs() < 1e-9);
        assert_eq!(player.display_duration_secs(), 18.0);
    }

    #[test]
    fn display_duration_clamps_video_lengths() {
        let mut player = open(two_author_corpus());
        assert_eq!(player.display_duration_secs(), IMAGE_ITEM_SECS);
        player.advance();
        player.native_progress(0.0, 7.0);
        assert_eq!(player.display_duration_secs(), MIN_VIDEO_DISPLAY_SECS);
        player.native_progress(0.0, 90.0);
        assert_eq!(player.display_duration_secs(), MAX_VIDEO_DISPLAY_SECS);
    }

    #[test]
    fn media_ended_advances_once() {
        let mut player = open(two_author_corpus());
        player.advance(); // video item a2
        assert_eq!(player.media_ended(), Flow::Continue);
        assert_eq!((player.cursor().author_index, player.cursor().item_index), (1, 0));
    }

    #[test]
    fn media_load_failed_pauses_in_place() {
        let mut player = open(two_author_corpus());
        player.media_load_failed();
        assert!(!player.cursor().is_playing);
        assert_eq!((player.cursor().author_index, player.cursor().item_index), (0, 0));
    }

    #[test]
    fn click_zones_partition_in_thirds() {
        assert_eq!(ClickZone::at(10.0, 300.0), Some(ClickZone::Left));
        assert_eq!(ClickZone::at(150.0, 300.0), Some(ClickZone::Center));
        assert_eq!(ClickZone::at(299.0, 300.0), Some(ClickZone::Right));
        assert_eq!(ClickZone::at(100.0, 0.0), None);
    }

    #[test]
    fn delete_last_item_of_middle_group_enters_next_group() {
        let mut player = StoryPlayer::open(two_author_corpus(), 0, |_: &str| {}).unwrap();
        player.advance(); // a2, last of ana's group
        assert_eq!(player.remove_current(), Flow::Continue);
        assert_eq!((player.cursor().author_index, player.cursor().item_index), (0, 0));
        assert_eq!(player.current_item().id, "b1");
    }

    #[test]
    fn delete_shifts_to_next_item_within_group() {
        let mut player = open(two_author_corpus());
        assert_eq!(player.remove_current(), Flow::Continue);
        assert_eq!(player.current_item().id, "a2");
    }

    #[test]
    fn delete_last_item_overall_closes() {
        let mut player = open(vec![group("ana", vec![item("a1", MediaKind::Image)])]);
        assert_eq!(player.remove_current(), Flow::Closed);
    }

    #[test]
    fn mute_toggle_leaves_progress_and_play_state() {
        let mut player = open(two_author_corpus());
        player.toggle_mute();
        assert!(player.cursor().is_muted);
        assert!(player.cursor().is_playing);
        assert_eq!(player.cursor().progress_percent, 0.0);
    }
}
