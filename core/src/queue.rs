//! Speech queue state machine.
//!
//! `QueueState` owns the ordered utterances and the cursor. Every operation is a
//! synchronous transition on `&mut self` that returns a [`Transition`]: the host
//! events to publish and the side effects (engine calls, ducking, option pushes)
//! the owner must carry out, in order. Nothing in here touches the engine, which
//! keeps the whole lifecycle testable without one.
//!
//! Offsets and positions count chars, not bytes.

use crate::config::{ConfigStore, SpeechConfig, SpeechOptions};
use crate::engine::SpeakMode;
use crate::event::SpeechEvent;
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ItemStatus {
    Pending,
    Speaking,
    Paused,
    Completed,
    Error,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Error)
    }

    fn is_actionable(self) -> bool {
        matches!(self, ItemStatus::Pending | ItemStatus::Paused)
    }
}

/// One queued utterance
#[derive(Clone, Debug, Serialize)]
pub struct SpeechItem {
    pub id: String,
    pub text: String,
    pub options: Option<SpeechOptions>,
    pub status: ItemStatus,
    /// Chars already consumed; where a resumed utterance restarts
    pub offset: usize,
    /// Last reported absolute char position, `offset <= position <= len`
    pub position: usize,
    len: usize,
}

impl SpeechItem {
    fn new(id: String, text: String, options: Option<SpeechOptions>) -> Self {
        let len = text.chars().count();
        Self {
            id,
            text,
            options,
            status: ItemStatus::Pending,
            offset: 0,
            position: 0,
            len,
        }
    }

    /// Length of the text in chars
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Unspoken suffix, starting at `offset`
    pub fn remaining_text(&self) -> String {
        self.text.chars().skip(self.offset).collect()
    }
}

/// Side effects requested by a transition
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Push these options to the engine, best effort
    ApplyOptions(SpeechConfig),
    /// Request transient audio ducking if `enabled`
    AcquireDuck { enabled: bool },
    ReleaseDuck,
    Speak {
        id: String,
        text: String,
        mode: SpeakMode,
    },
    StopEngine,
    /// Restore plain global options once the current overrides are done
    ScheduleGlobalApply,
}

/// Output of a state transition
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Transition {
    pub events: Vec<SpeechEvent>,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn emit(&mut self, event: SpeechEvent) {
        self.events.push(event);
    }

    fn effect(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.effects.is_empty()
    }
}

/// Read-only view handed to hosts
#[derive(Clone, Debug, Serialize)]
pub struct QueueSnapshot {
    pub items: Vec<SpeechItem>,
    pub cursor: Option<usize>,
    pub paused: bool,
}

#[derive(Debug, Default)]
pub struct QueueState {
    items: Vec<SpeechItem>,
    cursor: Option<usize>,
    paused: bool,
    // Next `Started` belongs to a resumed utterance
    resuming: bool,
    // Utterance pause() issued an engine stop for, until its acknowledgement arrives
    stop_requested: Option<String>,
}

impl QueueState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn item(&self, id: &str) -> Option<&SpeechItem> {
        self.items.iter().find(|i| i.id == id)
    }

    /// Nothing holds the cursor and playback is not suspended
    pub fn is_idle(&self) -> bool {
        self.cursor.is_none() && !self.paused
    }

    pub fn has_speaking_item(&self) -> bool {
        self.items.iter().any(|i| i.status == ItemStatus::Speaking)
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            items: self.items.clone(),
            cursor: self.cursor,
            paused: self.paused,
        }
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|i| i.id == id)
    }

    /// Append an utterance; starts it straight away when the queue is idle.
    /// Text validation is the caller's job.
    pub fn enqueue(
        &mut self,
        id: String,
        text: String,
        options: Option<SpeechOptions>,
        config: &ConfigStore,
    ) -> Transition {
        let mut t = Transition::default();
        self.items.push(SpeechItem::new(id, text, options));
        if self.is_idle() {
            self.cursor = Some(self.items.len() - 1);
            self.advance(config, &mut t);
        }
        t
    }

    /// Submit the item at the cursor (or the next actionable one after it).
    fn advance(&mut self, config: &ConfigStore, t: &mut Transition) {
        let mut next = self.cursor;
        while let Some(index) = next {
            match self.items.get(index) {
                Some(item) if item.status.is_actionable() => break,
                Some(item) => {
                    debug!(target: "speech_queue", id = %item.id, status = ?item.status, "Skipping settled item");
                    next = Some(index + 1);
                }
                None => next = None,
            }
        }
        self.cursor = next;

        let Some(index) = next else {
            debug!(target: "speech_queue", "Queue drained");
            t.effect(Effect::ScheduleGlobalApply);
            return;
        };

        let is_last = index + 1 == self.items.len();
        let item = &mut self.items[index];
        let effective = config.effective(item.options.as_ref());
        let ducking = effective.ducking;
        t.effect(Effect::ApplyOptions(effective));
        t.effect(Effect::AcquireDuck { enabled: ducking });

        let (text, mode) = if item.status == ItemStatus::Paused {
            item.offset = item.position;
            self.resuming = true;
            (item.remaining_text(), SpeakMode::Flush)
        } else {
            item.offset = 0;
            item.position = 0;
            (item.text.clone(), SpeakMode::Append)
        };
        debug!(target: "speech_queue", id = %item.id, offset = item.offset, ?mode, "Submitting utterance");
        t.effect(Effect::Speak {
            id: item.id.clone(),
            text,
            mode,
        });

        if is_last {
            t.effect(Effect::ScheduleGlobalApply);
        }
    }

    pub fn on_started(&mut self, id: &str) -> Transition {
        let mut t = Transition::default();
        let Some(index) = self.index_of(id) else {
            debug!(target: "speech_queue", %id, "Ignoring start for unknown utterance");
            return t;
        };
        if self.cursor != Some(index) || self.paused || self.items[index].status.is_terminal() {
            debug!(target: "speech_queue", %id, "Ignoring stale start");
            return t;
        }

        let item = &mut self.items[index];
        item.status = ItemStatus::Speaking;
        if self.resuming && item.offset > 0 {
            t.emit(SpeechEvent::Resume { id: item.id.clone() });
        } else {
            t.emit(SpeechEvent::Start { id: item.id.clone() });
        }
        self.resuming = false;
        t
    }

    /// `start`/`end` are relative to the text last submitted for this item
    pub fn on_progress(&mut self, id: &str, start: usize, end: usize) -> Transition {
        let mut t = Transition::default();
        let Some(item) = self.items.iter_mut().find(|i| i.id == id) else {
            return t;
        };
        if item.status.is_terminal() {
            return t;
        }
        item.position = item.offset.saturating_add(start).min(item.len);
        t.emit(SpeechEvent::Progress {
            id: item.id.clone(),
            location: item.position,
            length: end.saturating_sub(start),
        });
        t
    }

    pub fn on_finished(&mut self, id: &str, config: &ConfigStore) -> Transition {
        self.settle(id, ItemStatus::Completed, config)
    }

    pub fn on_errored(&mut self, id: &str, config: &ConfigStore) -> Transition {
        self.settle(id, ItemStatus::Error, config)
    }

    fn settle(&mut self, id: &str, status: ItemStatus, config: &ConfigStore) -> Transition {
        let mut t = Transition::default();
        let Some(index) = self.index_of(id) else {
            debug!(target: "speech_queue", %id, ?status, "Ignoring callback for unknown utterance");
            return t;
        };
        let item = &mut self.items[index];
        if item.status.is_terminal() {
            return t;
        }
        item.status = status;
        if status == ItemStatus::Completed {
            item.position = item.len;
        }
        let id = item.id.clone();
        // A settled utterance will never acknowledge the pause stop
        if self.stop_requested.as_deref() == Some(id.as_str()) {
            self.stop_requested = None;
        }

        t.effect(Effect::ReleaseDuck);
        t.emit(match status {
            ItemStatus::Error => SpeechEvent::Error { id },
            _ => SpeechEvent::Finish { id },
        });

        if !self.paused && self.cursor == Some(index) {
            self.cursor = Some(index + 1);
            self.advance(config, &mut t);
        }
        t
    }

    pub fn on_engine_stopped(
        &mut self,
        id: &str,
        interrupted: bool,
        config: &ConfigStore,
    ) -> Transition {
        let mut t = Transition::default();
        let Some(index) = self.index_of(id) else {
            debug!(target: "speech_queue", %id, "Ignoring stop for unknown utterance");
            return t;
        };
        if self.items[index].status.is_terminal() {
            return t;
        }

        let acknowledges_pause = self.stop_requested.as_deref() == Some(id);
        let paused_here = self.paused && self.cursor == Some(index);
        if acknowledges_pause || paused_here {
            if acknowledges_pause {
                self.stop_requested = None;
            }
            if paused_here && acknowledges_pause {
                let item = &mut self.items[index];
                item.status = ItemStatus::Paused;
                t.emit(SpeechEvent::Pause {
                    id: item.id.clone(),
                });
            } else if paused_here {
                debug!(target: "speech_queue", %id, "Ignoring repeated stop while paused");
            } else {
                debug!(target: "speech_queue", %id, "Pause acknowledged after resume");
            }
            return t;
        }

        debug!(target: "speech_queue", %id, interrupted, "Engine stopped utterance");
        self.items[index].status = ItemStatus::Completed;
        t.effect(Effect::ReleaseDuck);
        t.emit(SpeechEvent::Stopped { id: id.to_string() });
        if self.cursor == Some(index) {
            self.cursor = Some(index + 1);
            self.advance(config, &mut t);
        }
        t
    }

    /// Returns `(false, empty)` without touching state when there is nothing to pause.
    pub fn pause(&mut self, supported: bool) -> (bool, Transition) {
        let mut t = Transition::default();
        if !supported || self.paused || self.items.is_empty() {
            return (false, t);
        }
        let Some(index) = self.cursor else {
            return (false, t);
        };
        match self.items.get_mut(index) {
            Some(item) if item.status == ItemStatus::Speaking => {
                item.status = ItemStatus::Paused;
                debug!(target: "speech_queue", id = %item.id, position = item.position, "Pausing");
                self.stop_requested = Some(item.id.clone());
            }
            _ => return (false, t),
        }
        self.paused = true;
        t.effect(Effect::StopEngine);
        t.effect(Effect::ReleaseDuck);
        (true, t)
    }

    pub fn resume(&mut self, supported: bool, config: &ConfigStore) -> (bool, Transition) {
        let mut t = Transition::default();
        if !supported || !self.paused || self.items.is_empty() {
            return (false, t);
        }
        let Some(cursor) = self.cursor.filter(|&c| c < self.items.len()) else {
            return (false, t);
        };

        match self
            .items
            .iter()
            .position(|i| i.status == ItemStatus::Paused)
        {
            Some(index) => {
                self.cursor = Some(index);
                self.paused = false;
                self.advance(config, &mut t);
                (true, t)
            }
            None => {
                warn!(target: "speech_queue", cursor, "Resume requested but no paused utterance");
                self.paused = false;
                // The paused item settled before the pause took hold; keep draining.
                if self.items[cursor].status.is_terminal() {
                    self.cursor = Some(cursor + 1);
                    self.advance(config, &mut t);
                }
                (false, t)
            }
        }
    }

    /// Unconditionally empties the queue. Engine stop and the `Stopped` event
    /// are only issued when something was actually in flight.
    pub fn stop(&mut self, engine_speaking: bool) -> Transition {
        let mut t = Transition::default();
        if engine_speaking || self.paused || self.cursor.is_some() {
            t.effect(Effect::StopEngine);
            t.effect(Effect::ReleaseDuck);
            if let Some(item) = self.cursor.and_then(|c| self.items.get(c)) {
                t.emit(SpeechEvent::Stopped {
                    id: item.id.clone(),
                });
            }
        }
        self.clear();
        t
    }

    /// Drop every item and reset the cursor and flags
    pub fn clear(&mut self) {
        self.items.clear();
        self.cursor = None;
        self.paused = false;
        self.resuming = false;
        self.stop_requested = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speak_effects(t: &Transition) -> Vec<(String, String, SpeakMode)> {
        t.effects
            .iter()
            .filter_map(|e| match e {
                Effect::Speak { id, text, mode } => Some((id.clone(), text.clone(), *mode)),
                _ => None,
            })
            .collect()
    }

    fn speaking_count(q: &QueueState) -> usize {
        q.snapshot()
            .items
            .iter()
            .filter(|i| i.status == ItemStatus::Speaking)
            .count()
    }

    #[test]
    fn test_enqueue_while_idle_starts_immediately() {
        let cfg = ConfigStore::default();
        let mut q = QueueState::new();
        let t = q.enqueue("a".into(), "hello".into(), None, &cfg);

        assert_eq!(q.cursor(), Some(0));
        assert_eq!(
            speak_effects(&t),
            vec![("a".into(), "hello".into(), SpeakMode::Append)]
        );
        // last item in queue -> global options restored afterwards
        assert_eq!(t.effects.last(), Some(&Effect::ScheduleGlobalApply));
    }

    #[test]
    fn test_enqueue_while_busy_only_appends() {
        let cfg = ConfigStore::default();
        let mut q = QueueState::new();
        q.enqueue("a".into(), "one".into(), None, &cfg);
        // "a" submitted but not yet started: it still owns the cursor
        let t = q.enqueue("b".into(), "two".into(), None, &cfg);
        assert!(t.is_empty());
        assert_eq!(q.cursor(), Some(0));
    }

    #[test]
    fn test_fifo_through_completion() {
        let cfg = ConfigStore::default();
        let mut q = QueueState::new();
        q.enqueue("a".into(), "one".into(), None, &cfg);
        q.enqueue("b".into(), "two".into(), None, &cfg);
        q.enqueue("c".into(), "three".into(), None, &cfg);

        q.on_started("a");
        let t = q.on_finished("a", &cfg);
        assert_eq!(t.events, vec![SpeechEvent::Finish { id: "a".into() }]);
        assert_eq!(speak_effects(&t)[0].0, "b");
        assert_eq!(t.effects[0], Effect::ReleaseDuck);

        q.on_started("b");
        let t = q.on_errored("b", &cfg);
        assert_eq!(t.events, vec![SpeechEvent::Error { id: "b".into() }]);
        assert_eq!(speak_effects(&t)[0].0, "c");

        q.on_started("c");
        let t = q.on_finished("c", &cfg);
        assert!(speak_effects(&t).is_empty());
        assert_eq!(q.cursor(), None);
        assert!(t.effects.contains(&Effect::ScheduleGlobalApply));
    }

    #[test]
    fn test_per_item_options_merged_with_global() {
        let mut cfg = ConfigStore::default();
        cfg.merge(&SpeechOptions {
            pitch: Some(1.5),
            ..Default::default()
        });
        let mut q = QueueState::new();
        let t = q.enqueue(
            "a".into(),
            "hi".into(),
            Some(SpeechOptions {
                rate: Some(9.0),
                ducking: Some(true),
                ..Default::default()
            }),
            &cfg,
        );
        let applied = t
            .effects
            .iter()
            .find_map(|e| match e {
                Effect::ApplyOptions(c) => Some(c.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(applied.rate, 2.0);
        assert_eq!(applied.pitch, 1.5);
        assert!(t.effects.contains(&Effect::AcquireDuck { enabled: true }));
        assert_eq!(cfg.current().rate, 1.0);
    }

    #[test]
    fn test_pause_resume_speaks_only_suffix() {
        let cfg = ConfigStore::default();
        let mut q = QueueState::new();
        q.enqueue("a".into(), "hello brave world".into(), None, &cfg);
        q.on_started("a");
        q.on_progress("a", 6, 11);

        let (ok, t) = q.pause(true);
        assert!(ok);
        assert_eq!(t.effects, vec![Effect::StopEngine, Effect::ReleaseDuck]);

        let t = q.on_engine_stopped("a", true, &cfg);
        assert_eq!(t.events, vec![SpeechEvent::Pause { id: "a".into() }]);
        assert_eq!(q.item("a").unwrap().status, ItemStatus::Paused);

        let (ok, t) = q.resume(true, &cfg);
        assert!(ok);
        assert_eq!(
            speak_effects(&t),
            vec![("a".into(), "brave world".into(), SpeakMode::Flush)]
        );
        assert_eq!(q.item("a").unwrap().offset, 6);

        let t = q.on_started("a");
        assert_eq!(t.events, vec![SpeechEvent::Resume { id: "a".into() }]);

        // progress after resume is relative to the resubmitted suffix
        let t = q.on_progress("a", 6, 11);
        assert_eq!(
            t.events,
            vec![SpeechEvent::Progress {
                id: "a".into(),
                location: 12,
                length: 5
            }]
        );

        let t = q.on_finished("a", &cfg);
        assert_eq!(t.events, vec![SpeechEvent::Finish { id: "a".into() }]);
    }

    #[test]
    fn test_resume_before_stop_ack_still_works() {
        let cfg = ConfigStore::default();
        let mut q = QueueState::new();
        q.enqueue("a".into(), "abcdef".into(), None, &cfg);
        q.on_started("a");
        q.on_progress("a", 3, 4);
        assert!(q.pause(true).0);

        let (ok, t) = q.resume(true, &cfg);
        assert!(ok);
        assert_eq!(speak_effects(&t)[0].1, "def");

        // late acknowledgement of the pause must not complete the item
        let t = q.on_engine_stopped("a", true, &cfg);
        assert!(t.is_empty());
        assert_ne!(q.item("a").unwrap().status, ItemStatus::Completed);

        let t = q.on_started("a");
        assert_eq!(t.events, vec![SpeechEvent::Resume { id: "a".into() }]);
    }

    #[test]
    fn test_pause_rejected_leaves_state_unchanged() {
        let cfg = ConfigStore::default();
        let mut q = QueueState::new();
        assert!(!q.pause(true).0, "empty queue");

        q.enqueue("a".into(), "text".into(), None, &cfg);
        assert!(!q.pause(true).0, "submitted but not speaking yet");

        q.on_started("a");
        assert!(!q.pause(false).0, "unsupported");
        assert_eq!(q.item("a").unwrap().status, ItemStatus::Speaking);
        assert!(!q.is_paused());

        assert!(q.pause(true).0);
        let before = q.snapshot();
        let (ok, t) = q.pause(true);
        assert!(!ok, "already paused");
        assert!(t.is_empty());
        assert_eq!(q.snapshot().cursor, before.cursor);
    }

    #[test]
    fn test_resume_rejections() {
        let cfg = ConfigStore::default();
        let mut q = QueueState::new();
        assert!(!q.resume(true, &cfg).0);
        q.enqueue("a".into(), "text".into(), None, &cfg);
        q.on_started("a");
        assert!(!q.resume(true, &cfg).0, "not paused");
        assert!(q.pause(true).0);
        assert!(!q.resume(false, &cfg).0, "unsupported");
        assert!(q.is_paused());
    }

    #[test]
    fn test_finish_during_pause_then_resume_keeps_draining() {
        let cfg = ConfigStore::default();
        let mut q = QueueState::new();
        q.enqueue("a".into(), "one".into(), None, &cfg);
        q.enqueue("b".into(), "two".into(), None, &cfg);
        q.on_started("a");
        assert!(q.pause(true).0);
        // utterance finished naturally before the stop landed
        let t = q.on_finished("a", &cfg);
        assert!(speak_effects(&t).is_empty());

        let (ok, t) = q.resume(true, &cfg);
        assert!(!ok);
        assert!(!q.is_paused());
        assert_eq!(speak_effects(&t)[0].0, "b");
    }

    #[test]
    fn test_stop_after_pause_race_is_not_mistaken_for_pause_ack() {
        let cfg = ConfigStore::default();
        let mut q = QueueState::new();
        q.enqueue("a".into(), "one".into(), None, &cfg);
        q.enqueue("b".into(), "two".into(), None, &cfg);
        q.enqueue("c".into(), "three".into(), None, &cfg);
        q.on_started("a");
        assert!(q.pause(true).0);
        // "a" ran to the end before the stop landed; no acknowledgement follows
        q.on_finished("a", &cfg);

        let (_, t) = q.resume(true, &cfg);
        assert_eq!(speak_effects(&t)[0].0, "b");
        q.on_started("b");

        let t = q.on_engine_stopped("b", true, &cfg);
        assert_eq!(t.events, vec![SpeechEvent::Stopped { id: "b".into() }]);
        assert_eq!(q.item("b").unwrap().status, ItemStatus::Completed);
        assert_eq!(q.cursor(), Some(2));
        assert_eq!(speak_effects(&t)[0].0, "c");
    }

    #[test]
    fn test_progress_with_huge_offset_is_clamped() {
        let cfg = ConfigStore::default();
        let mut q = QueueState::new();
        q.enqueue("a".into(), "abcdef".into(), None, &cfg);
        q.on_started("a");
        q.on_progress("a", 3, 4);
        q.pause(true);
        q.on_engine_stopped("a", true, &cfg);
        q.resume(true, &cfg);
        q.on_started("a");

        let t = q.on_progress("a", usize::MAX, usize::MAX);
        assert_eq!(
            t.events,
            vec![SpeechEvent::Progress {
                id: "a".into(),
                location: 6,
                length: 0
            }]
        );
    }

    #[test]
    fn test_stop_clears_everything_and_late_callbacks_ignored() {
        let cfg = ConfigStore::default();
        let mut q = QueueState::new();
        q.enqueue("a".into(), "one".into(), None, &cfg);
        q.enqueue("b".into(), "two".into(), None, &cfg);
        q.on_started("a");

        let t = q.stop(true);
        assert_eq!(t.events, vec![SpeechEvent::Stopped { id: "a".into() }]);
        assert!(t.effects.contains(&Effect::StopEngine));
        assert!(q.is_empty());
        assert_eq!(q.cursor(), None);
        assert!(!q.is_paused());

        assert!(q.on_engine_stopped("a", true, &cfg).is_empty());
        assert!(q.on_finished("a", &cfg).is_empty());
        assert!(q.on_started("a").is_empty());
    }

    #[test]
    fn test_stop_when_idle_only_resets() {
        let mut q = QueueState::new();
        let t = q.stop(false);
        assert!(t.is_empty());
        assert!(q.is_empty());
    }

    #[test]
    fn test_unsolicited_engine_stop_completes_and_advances() {
        let cfg = ConfigStore::default();
        let mut q = QueueState::new();
        q.enqueue("a".into(), "one".into(), None, &cfg);
        q.enqueue("b".into(), "two".into(), None, &cfg);
        q.on_started("a");
        let t = q.on_engine_stopped("a", true, &cfg);
        assert_eq!(t.events, vec![SpeechEvent::Stopped { id: "a".into() }]);
        assert_eq!(q.item("a").unwrap().status, ItemStatus::Completed);
        assert_eq!(speak_effects(&t)[0].0, "b");
    }

    #[test]
    fn test_only_cursor_item_can_be_speaking() {
        let cfg = ConfigStore::default();
        let mut q = QueueState::new();
        q.enqueue("a".into(), "one".into(), None, &cfg);
        q.enqueue("b".into(), "two".into(), None, &cfg);
        q.on_started("a");
        // engine race: start for an item that does not hold the cursor
        assert!(q.on_started("b").is_empty());
        assert_eq!(speaking_count(&q), 1);

        q.on_finished("a", &cfg);
        q.on_started("b");
        assert_eq!(speaking_count(&q), 1);
        assert_eq!(q.item("b").unwrap().status, ItemStatus::Speaking);
    }

    #[test]
    fn test_multibyte_offsets_count_chars() {
        let cfg = ConfigStore::default();
        let mut q = QueueState::new();
        q.enqueue("a".into(), "héllo wörld".into(), None, &cfg);
        q.on_started("a");
        q.on_progress("a", 6, 11);
        q.pause(true);
        q.on_engine_stopped("a", true, &cfg);
        let (_, t) = q.resume(true, &cfg);
        assert_eq!(speak_effects(&t)[0].1, "wörld");
    }

    #[test]
    fn test_resume_at_zero_offset_reports_start() {
        let cfg = ConfigStore::default();
        let mut q = QueueState::new();
        q.enqueue("a".into(), "abc".into(), None, &cfg);
        q.on_started("a");
        q.pause(true);
        q.on_engine_stopped("a", true, &cfg);
        q.resume(true, &cfg);
        let t = q.on_started("a");
        assert_eq!(t.events, vec![SpeechEvent::Start { id: "a".into() }]);
    }
}
