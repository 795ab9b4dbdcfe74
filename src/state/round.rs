//! Round state machine
//!
//! `Idle -> Revealing -> Transitioning -> Idle`. The pure bookkeeping lives on
//! [`Round`]; the `impl AppState` block below wires it to the entry source,
//! the timers and the broadcast channel.

use futures::future::BoxFuture;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::entry::MASK_CHAR;
use super::AppState;
use crate::protocol::ServerMessage;
use crate::timer::Timer;
use crate::types::*;

/// Answer with not-yet-revealed letters hidden.
///
/// Always as long (in chars) as the answer; positions only ever go from
/// hidden to shown.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedAnswer {
    answer: Vec<char>,
    shown: Vec<bool>,
}

impl MaskedAnswer {
    /// Mask every character except the always-visible ones
    pub fn new(answer: &str, excluded: &HashSet<char>) -> Self {
        let answer: Vec<char> = answer.chars().collect();
        let shown = answer.iter().map(|c| excluded.contains(c)).collect();
        Self { answer, shown }
    }

    pub fn len(&self) -> usize {
        self.answer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answer.is_empty()
    }

    pub fn masked_count(&self) -> usize {
        self.shown.iter().filter(|shown| !**shown).count()
    }

    /// A partial reveal only happens while at least two letters are hidden
    pub fn more_splits_available(&self) -> bool {
        self.masked_count() >= 2
    }

    /// Reveal one hidden position chosen uniformly at random.
    /// Returns the revealed index, or None if nothing is hidden.
    pub fn reveal_random<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<usize> {
        let hidden: Vec<usize> = self
            .shown
            .iter()
            .enumerate()
            .filter(|(_, shown)| !**shown)
            .map(|(i, _)| i)
            .collect();
        if hidden.is_empty() {
            return None;
        }
        let index = hidden[rng.random_range(0..hidden.len())];
        self.shown[index] = true;
        Some(index)
    }
}

impl fmt::Display for MaskedAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (c, shown) in self.answer.iter().zip(&self.shown) {
            write!(f, "{}", if *shown { *c } else { MASK_CHAR })?;
        }
        Ok(())
    }
}

/// Outcome of one reveal timer firing
#[derive(Debug, Clone, PartialEq)]
pub enum SplitStep {
    /// One more letter shown
    Split { answer: String, current_value: f64 },
    /// Fewer than two letters were hidden: full answer, round over
    Reveal { answer: String },
    /// No round is revealing
    Inactive,
}

/// The single round aggregate. Only ever touched under `AppState::round`.
#[derive(Debug)]
pub struct Round {
    phase: RoundPhase,
    entry: Option<RoundEntry>,
    mask: Option<MaskedAnswer>,
    current_value: f64,
    /// Fixed at round start, never redistributed
    split_value: f64,
    attempts: Vec<AttemptRecord>,
    attempt_counts: HashMap<PlayerId, u32>,
    /// Players that reported this round's entry (cache of the store)
    reporters: HashSet<PlayerId>,
    pub(crate) split_timer: Timer,
    /// Transition delay or provider retry, never both
    pub(crate) fetch_timer: Timer,
}

impl Default for Round {
    fn default() -> Self {
        Self::new()
    }
}

impl Round {
    pub fn new() -> Self {
        Self {
            phase: RoundPhase::Idle,
            entry: None,
            mask: None,
            current_value: 0.0,
            split_value: 0.0,
            attempts: Vec::new(),
            attempt_counts: HashMap::new(),
            reporters: HashSet::new(),
            split_timer: Timer::new(),
            fetch_timer: Timer::new(),
        }
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn entry(&self) -> Option<&RoundEntry> {
        self.entry.as_ref()
    }

    pub fn entry_id(&self) -> Option<EntryId> {
        self.entry.as_ref().map(|e| e.id)
    }

    pub fn mask(&self) -> Option<&MaskedAnswer> {
        self.mask.as_ref()
    }

    pub fn current_value(&self) -> f64 {
        self.current_value
    }

    pub fn split_value(&self) -> f64 {
        self.split_value
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    /// A reveal step is scheduled
    pub fn reveal_timer_armed(&self) -> bool {
        self.split_timer.is_armed()
    }

    /// A fetch (provider retry or next round) is scheduled
    pub fn fetch_timer_armed(&self) -> bool {
        self.fetch_timer.is_armed()
    }

    /// Answer as clients should currently see it
    pub fn visible_answer(&self) -> Option<String> {
        match self.phase {
            RoundPhase::Revealing => self.mask.as_ref().map(|m| m.to_string()),
            RoundPhase::Transitioning => self.entry.as_ref().map(|e| e.answer.clone()),
            RoundPhase::Idle => None,
        }
    }

    /// Drop the previous entry and wait for a new one
    pub fn enter_idle(&mut self) {
        self.phase = RoundPhase::Idle;
        self.entry = None;
        self.mask = None;
        self.current_value = 0.0;
        self.split_value = 0.0;
        self.attempts.clear();
        self.attempt_counts.clear();
        self.reporters.clear();
    }

    /// Accept `entry` as the active round. Returns the ROUND announcement.
    pub fn begin(&mut self, entry: RoundEntry, excluded: &HashSet<char>) -> ServerMessage {
        self.attempts.clear();
        self.attempt_counts.clear();
        self.reporters.clear();

        let mask = MaskedAnswer::new(&entry.answer, excluded);
        self.current_value = round2(entry.value);
        self.split_value = match mask.masked_count() {
            0 => 0.0,
            hidden => round2(self.current_value / hidden as f64),
        };

        let msg = ServerMessage::Round {
            entry_id: entry.id,
            category: entry.category.clone(),
            clue: entry.clue.clone(),
            answer: mask.to_string(),
            current_value: self.current_value,
        };

        self.mask = Some(mask);
        self.entry = Some(entry);
        self.phase = RoundPhase::Revealing;
        msg
    }

    /// One reveal step. Switches to `Transitioning` on a full reveal.
    pub fn advance<R: Rng + ?Sized>(&mut self, rng: &mut R) -> SplitStep {
        if self.phase != RoundPhase::Revealing {
            return SplitStep::Inactive;
        }
        let (Some(entry), Some(mask)) = (self.entry.as_ref(), self.mask.as_mut()) else {
            return SplitStep::Inactive;
        };

        if !mask.more_splits_available() {
            let answer = entry.answer.clone();
            self.phase = RoundPhase::Transitioning;
            return SplitStep::Reveal { answer };
        }

        mask.reveal_random(rng);
        let answer = mask.to_string();
        self.current_value = round2(self.current_value - self.split_value);
        SplitStep::Split {
            answer,
            current_value: self.current_value,
        }
    }

    /// End the round early (correct attempt)
    pub fn finish(&mut self) {
        self.phase = RoundPhase::Transitioning;
    }

    /// Case-insensitive exact match against the full answer
    pub fn is_correct(&self, message: &str) -> bool {
        self.entry
            .as_ref()
            .is_some_and(|e| e.answer.to_lowercase() == message.to_lowercase())
    }

    pub fn attempts_by(&self, player_id: &PlayerId) -> u32 {
        self.attempt_counts.get(player_id).copied().unwrap_or(0)
    }

    pub fn free_attempts_left(&self, player_id: &PlayerId, quota: u32) -> u32 {
        quota.saturating_sub(self.attempts_by(player_id))
    }

    /// Append to the attempt log; the ordinal is the log position
    pub fn record_attempt(
        &mut self,
        player_id: &PlayerId,
        username: &str,
        message: String,
        correct: bool,
    ) -> AttemptRecord {
        let record = AttemptRecord {
            ordinal: self.attempts.len(),
            player_id: player_id.clone(),
            username: username.to_string(),
            message,
            correct,
            correct_answer: if correct {
                self.entry.as_ref().map(|e| e.answer.clone())
            } else {
                None
            },
        };
        *self.attempt_counts.entry(player_id.clone()).or_insert(0) += 1;
        self.attempts.push(record.clone());
        record
    }

    pub fn has_reported(&self, player_id: &PlayerId) -> bool {
        self.reporters.contains(player_id)
    }

    /// Remember a report, but only if `entry_id` is still the active entry
    pub fn mark_reported(&mut self, entry_id: EntryId, player_id: &PlayerId) {
        if self.entry_id() == Some(entry_id) {
            self.reporters.insert(player_id.clone());
        }
    }
}

impl AppState {
    /// Kick off the first fetch
    pub fn start(self: &Arc<Self>) {
        tokio::spawn(self.request_new_entry());
    }

    /// Enter `Idle` and fetch candidates until one is accepted.
    ///
    /// Invalid and banned candidates loop immediately; provider errors arm
    /// the fetch timer with the fixed retry interval and return.
    pub fn request_new_entry(self: &Arc<Self>) -> BoxFuture<'static, ()> {
        let state = self.clone();
        Box::pin(async move {
            {
                let mut round = state.round.lock().await;
                round.fetch_timer.cancel();
                round.split_timer.cancel();
                round.enter_idle();
            }

            let mut rejected = 0u32;
            loop {
                let candidate = match state.source.fetch_random_entry().await {
                    Ok(candidate) => candidate,
                    Err(e) => {
                        let retry = state.config.source_retry_interval;
                        tracing::warn!(
                            source = state.source.name(),
                            "Entry fetch failed: {}. Retrying in {:?}",
                            e,
                            retry
                        );
                        state.set_source_running(false);
                        let mut round = state.round.lock().await;
                        state.schedule_fetch(&mut round, retry);
                        return;
                    }
                };
                state.set_source_running(true);

                let accepted = candidate.into_round_entry(&state.config, &mut rand::rng());
                let entry = match accepted {
                    Ok(entry) => entry,
                    Err(reason) => {
                        rejected += 1;
                        tracing::debug!(rejected, "Rejected entry: {}, requesting another one", reason);
                        // A source that answers without awaiting must not starve the runtime
                        tokio::task::yield_now().await;
                        continue;
                    }
                };

                if state.reports.is_banned(entry.id).await {
                    rejected += 1;
                    tracing::info!(entry_id = entry.id, rejected, "Banned entry received, requesting another one");
                    tokio::task::yield_now().await;
                    continue;
                }

                let mut round = state.round.lock().await;
                tracing::info!(
                    entry_id = entry.id,
                    value = entry.value,
                    rejected,
                    "Starting round: {}",
                    entry.clue
                );
                let announcement = round.begin(entry, &state.config.excluded_characters);
                state.arm_split_timer(&mut round);
                state.broadcast(announcement);
                return;
            }
        })
    }

    /// Run one reveal step right away, as if the reveal timer had fired
    pub async fn advance_split(self: &Arc<Self>) {
        let mut round = self.round.lock().await;
        round.split_timer.cancel();
        self.apply_split(&mut round);
    }

    fn on_split_timer(self: Arc<Self>, generation: u64) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let mut round = self.round.lock().await;
            if !round.split_timer.fired(generation) {
                return;
            }
            self.apply_split(&mut round);
        })
    }

    fn apply_split(self: &Arc<Self>, round: &mut Round) {
        match round.advance(&mut rand::rng()) {
            SplitStep::Split {
                answer,
                current_value,
            } => {
                self.arm_split_timer(round);
                self.broadcast(ServerMessage::Split {
                    answer,
                    current_value,
                });
            }
            SplitStep::Reveal { answer } => {
                tracing::info!("Revealing answer: {}", answer);
                self.finish_round(round);
                self.broadcast(ServerMessage::Reveal { answer });
            }
            SplitStep::Inactive => {}
        }
    }

    /// Stop revealing and arm the transition delay
    pub(crate) fn finish_round(self: &Arc<Self>, round: &mut Round) {
        round.split_timer.cancel();
        round.finish();
        self.schedule_fetch(round, self.config.round_end_delay);
    }

    fn arm_split_timer(self: &Arc<Self>, round: &mut Round) {
        let state = self.clone();
        round
            .split_timer
            .arm(self.config.split_interval, move |generation| {
                state.on_split_timer(generation)
            });
    }

    fn schedule_fetch(self: &Arc<Self>, round: &mut Round, delay: Duration) {
        let state = self.clone();
        round.fetch_timer.arm(delay, move |generation| {
            Box::pin(async move {
                {
                    let mut round = state.round.lock().await;
                    if !round.fetch_timer.fired(generation) {
                        return;
                    }
                }
                state.request_new_entry().await;
            }) as BoxFuture<'static, ()>
        });
    }
}
