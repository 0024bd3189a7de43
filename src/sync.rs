use crate::compose::{compose_division, participant_count};
use crate::config::{load_config_inner, now_ms, AppConfig};
use crate::matchdata::MatchService;
use crate::types::*;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, sleep, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

// ── Optimistic reducer ─────────────────────────────────────────────────

/// Apply a scorekeeper delta to a local snapshot. Pure: this is the
/// optimistic half of a mutation, shown until the authoritative read-back
/// replaces it. Win flags are never touched here; only the service decides
/// those.
pub fn apply_delta(state: &LiveMatchState, delta: &StateDelta) -> LiveMatchState {
  let mut next = state.clone();
  match delta {
    StateDelta::Score { side: MatchSide::A, delta } => {
      next.score_a = add_clamped(next.score_a, *delta);
    }
    StateDelta::Score { side: MatchSide::B, delta } => {
      next.score_b = add_clamped(next.score_b, *delta);
    }
    StateDelta::Penalty { side: MatchSide::A, delta } => {
      next.penalties_a = add_clamped(next.penalties_a, *delta);
    }
    StateDelta::Penalty { side: MatchSide::B, delta } => {
      next.penalties_b = add_clamped(next.penalties_b, *delta);
    }
    StateDelta::Timer { delta_seconds } => {
      let clamped = i32::try_from(*delta_seconds).unwrap_or(if *delta_seconds > 0 {
        i32::MAX
      } else {
        i32::MIN
      });
      next.timer_seconds = add_clamped(next.timer_seconds, clamped);
    }
  }
  next
}

fn add_clamped(value: u32, delta: i32) -> u32 {
  if delta >= 0 {
    value.saturating_add(delta as u32)
  } else {
    value.saturating_sub(delta.unsigned_abs())
  }
}

/// Write a delta and immediately read the full match back. The service may
/// have folded rule logic (win decisions, penalty escalation) into the
/// result; whatever it says is the new truth.
pub fn propose_and_read_back<S: MatchService + ?Sized>(
  service: &S,
  match_id: u64,
  delta: &StateDelta,
) -> Result<LiveMatchState, String> {
  service.propose(match_id, delta)?;
  service.match_state(match_id)
}

// ── Scorekeeper session ────────────────────────────────────────────────

/// Foreground read-write view over one match. Mutations are optimistic and
/// reconciled against the service on every action; the last authoritative
/// snapshot always wins, with no local merge.
pub struct ScorekeeperSession<S: MatchService> {
  service: Arc<S>,
  match_id: u64,
  displayed: LiveMatchState,
  authoritative: LiveMatchState,
  status: SyncStatus,
}

impl<S: MatchService> ScorekeeperSession<S> {
  pub fn new(service: Arc<S>, match_id: u64) -> Self {
    ScorekeeperSession {
      service,
      match_id,
      displayed: LiveMatchState::default(),
      authoritative: LiveMatchState::default(),
      status: SyncStatus::Degraded,
    }
  }

  pub fn displayed(&self) -> &LiveMatchState {
    &self.displayed
  }

  pub fn status(&self) -> SyncStatus {
    self.status
  }

  pub fn refresh(&mut self) -> Result<(), String> {
    match self.service.match_state(self.match_id) {
      Ok(state) => {
        self.authoritative = state.clone();
        self.displayed = state;
        self.status = SyncStatus::Live;
        Ok(())
      }
      Err(err) => {
        // Stale view beats a broken one; keep showing what we had.
        self.status = SyncStatus::Degraded;
        Err(err)
      }
    }
  }

  pub fn submit(&mut self, delta: StateDelta) -> Result<(), String> {
    self.displayed = apply_delta(&self.displayed, &delta);
    if let Err(err) = self.service.propose(self.match_id, &delta) {
      // The write never landed; drop the optimistic delta and fall back to
      // the last snapshot the service confirmed.
      self.displayed = self.authoritative.clone();
      self.status = SyncStatus::Degraded;
      return Err(err);
    }
    match self.service.match_state(self.match_id) {
      Ok(state) => {
        self.authoritative = state.clone();
        self.displayed = state;
        self.status = SyncStatus::Live;
        Ok(())
      }
      Err(err) => {
        // The write landed but the read-back did not; the optimistic value
        // stands until the next successful read replaces it.
        self.status = SyncStatus::Degraded;
        Err(err)
      }
    }
  }
}

// ── Spectator session ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SpectatorView {
  pub match_id: u64,
  pub state: LiveMatchState,
  pub status: SyncStatus,
  pub last_tick_ms: Option<u64>,
}

pub type SharedSpectatorView = Arc<Mutex<SpectatorView>>;

/// One poll of the authoritative match state into a spectator view. A failed
/// tick leaves the previous snapshot on screen and only flips the status; a
/// successful one replaces every field. The epoch guard discards responses
/// that land after the owning session tore down or restarted.
pub fn spectator_tick<S: MatchService + ?Sized>(
  service: &S,
  view: &SharedSpectatorView,
  epoch: &AtomicU64,
) {
  let (match_id, epoch_before) = {
    let guard = view.lock().unwrap_or_else(|e| e.into_inner());
    (guard.match_id, epoch.load(Ordering::SeqCst))
  };
  let result = service.match_state(match_id);
  if epoch.load(Ordering::SeqCst) != epoch_before {
    return;
  }
  let mut guard = view.lock().unwrap_or_else(|e| e.into_inner());
  match result {
    Ok(state) => {
      guard.state = state;
      guard.status = SyncStatus::Live;
      guard.last_tick_ms = Some(now_ms());
    }
    Err(err) => {
      guard.status = SyncStatus::Degraded;
      warn!("spectator poll for match {match_id} failed: {err}");
    }
  }
}

/// Smooth countdown between ticks. Display-only: the next reconciliation
/// overwrites the timer with whatever the service reports.
pub fn displayed_timer_seconds(view: &SpectatorView, now: u64) -> u32 {
  if !view.state.timer_running {
    return view.state.timer_seconds;
  }
  let elapsed_secs = view
    .last_tick_ms
    .map(|tick| now.saturating_sub(tick) / 1000)
    .unwrap_or(0);
  view
    .state
    .timer_seconds
    .saturating_sub(u32::try_from(elapsed_secs).unwrap_or(u32::MAX))
}

/// Background read-only polling loop for one match. Owns its timer; tearing
/// the session down stops the thread and invalidates any in-flight response.
pub struct SpectatorSession {
  view: SharedSpectatorView,
  stop: Arc<AtomicBool>,
  epoch: Arc<AtomicU64>,
  handle: Option<JoinHandle<()>>,
}

impl SpectatorSession {
  pub fn spawn_default<S: MatchService + 'static>(service: Arc<S>, match_id: u64) -> Self {
    Self::spawn(service, match_id, SPECTATOR_POLL_INTERVAL_MS)
  }

  pub fn spawn<S: MatchService + 'static>(service: Arc<S>, match_id: u64, interval_ms: u64) -> Self {
    let view: SharedSpectatorView = Arc::new(Mutex::new(SpectatorView {
      match_id,
      state: LiveMatchState::default(),
      status: SyncStatus::Degraded,
      last_tick_ms: None,
    }));
    let stop = Arc::new(AtomicBool::new(false));
    let epoch = Arc::new(AtomicU64::new(0));

    let loop_view = view.clone();
    let loop_stop = stop.clone();
    let loop_epoch = epoch.clone();
    let handle = thread::spawn(move || {
      info!("spectator session started for match {match_id}");
      while !loop_stop.load(Ordering::SeqCst) {
        spectator_tick(service.as_ref(), &loop_view, &loop_epoch);
        // Sleep in slices so teardown does not wait out a full interval.
        let mut remaining = interval_ms;
        while remaining > 0 && !loop_stop.load(Ordering::SeqCst) {
          let step = remaining.min(100);
          sleep(Duration::from_millis(step));
          remaining -= step;
        }
      }
      info!("spectator session stopped for match {match_id}");
    });

    SpectatorSession {
      view,
      stop,
      epoch,
      handle: Some(handle),
    }
  }

  pub fn view(&self) -> SharedSpectatorView {
    self.view.clone()
  }

  pub fn snapshot(&self) -> SpectatorView {
    self.view.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }

  pub fn shutdown(mut self) {
    self.stop.store(true, Ordering::SeqCst);
    self.epoch.fetch_add(1, Ordering::SeqCst);
    if let Some(handle) = self.handle.take() {
      let _ = handle.join();
    }
  }
}

impl Drop for SpectatorSession {
  fn drop(&mut self) {
    self.stop.store(true, Ordering::SeqCst);
    self.epoch.fetch_add(1, Ordering::SeqCst);
  }
}

// ── Division board refresh ─────────────────────────────────────────────

/// Refresh one division's match list unless a refresh is already running.
/// The in-flight claim and the staleness check happen under one lock, so at
/// most one read per division is ever on the wire; callers that lose the
/// race just get the cached list back.
pub fn maybe_refresh_division<S: MatchService + ?Sized>(
  service: &S,
  store: &SharedBoardStore,
  division_id: u64,
  force: bool,
) -> Option<Vec<BracketMatch>> {
  let cached = {
    let mut guard = store.lock().unwrap_or_else(|e| e.into_inner());
    let entry = guard.entry(division_id).or_default();
    let stale = match entry.last_fetch {
      Some(last) => last
        .elapsed()
        .map(|age| age.as_millis() as u64)
        .unwrap_or(u64::MAX)
        > BOARD_IDLE_REFRESH_MS,
      None => true,
    };
    let needs_refresh = force || entry.matches.is_none() || stale;
    if !needs_refresh || entry.fetch_in_flight {
      return entry.matches.clone();
    }
    entry.fetch_in_flight = true;
    entry.matches.clone()
  };

  let result = service.division_matches(division_id);

  let mut guard = store.lock().unwrap_or_else(|e| e.into_inner());
  let entry = guard.entry(division_id).or_default();
  entry.fetch_in_flight = false;
  match result {
    Ok(matches) => {
      entry.last_fetch = Some(SystemTime::now());
      entry.last_error = None;
      entry.matches = Some(matches.clone());
      Some(matches)
    }
    Err(err) => {
      warn!("division {division_id} refresh failed: {err}");
      entry.last_error = Some(err);
      cached
    }
  }
}

pub fn division_snapshot(store: &SharedBoardStore, division_id: u64) -> BoardSnapshot {
  let guard = store.lock().unwrap_or_else(|e| e.into_inner());
  let entry = guard.get(&division_id);
  let tree = entry
    .and_then(|state| state.matches.as_ref())
    .map(|matches| compose_division(participant_count(matches), matches));
  BoardSnapshot {
    tree,
    last_error: entry.and_then(|state| state.last_error.clone()),
    last_fetch_ms: entry
      .and_then(|state| state.last_fetch)
      .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
      .map(|duration| duration.as_millis() as u64),
  }
}

/// Process-lifetime coarse poll over the configured divisions. Per-view
/// sessions own their own timers; this one backs the shared board cache.
pub fn spawn_division_polling<S: MatchService + 'static>(service: Arc<S>, store: SharedBoardStore) {
  thread::spawn(move || loop {
    let config = load_config_inner().unwrap_or_else(|_| AppConfig::default());
    if !config.board_polling || config.division_ids.is_empty() {
      sleep(Duration::from_millis(BOARD_POLL_INTERVAL_MS));
      continue;
    }
    for division_id in &config.division_ids {
      maybe_refresh_division(service.as_ref(), &store, *division_id, true);
    }
    sleep(Duration::from_millis(BOARD_POLL_INTERVAL_MS));
  });
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{MatchKey, Winner};
  use std::collections::{HashMap, VecDeque};
  use std::sync::mpsc::{channel, Receiver};
  use std::sync::atomic::AtomicU32;

  struct StubService {
    reads: Mutex<VecDeque<Result<LiveMatchState, String>>>,
    divisions: Mutex<VecDeque<Result<Vec<BracketMatch>, String>>>,
    propose_result: Mutex<Result<(), String>>,
    read_count: AtomicU32,
    division_count: AtomicU32,
    propose_count: AtomicU32,
    epoch_to_bump: Option<Arc<AtomicU64>>,
    gate: Mutex<Option<Receiver<()>>>,
  }

  impl StubService {
    fn new() -> Self {
      StubService {
        reads: Mutex::new(VecDeque::new()),
        divisions: Mutex::new(VecDeque::new()),
        propose_result: Mutex::new(Ok(())),
        read_count: AtomicU32::new(0),
        division_count: AtomicU32::new(0),
        propose_count: AtomicU32::new(0),
        epoch_to_bump: None,
        gate: Mutex::new(None),
      }
    }

    fn push_read(&self, result: Result<LiveMatchState, String>) {
      self.reads.lock().unwrap().push_back(result);
    }

    fn push_division(&self, result: Result<Vec<BracketMatch>, String>) {
      self.divisions.lock().unwrap().push_back(result);
    }
  }

  impl MatchService for StubService {
    fn match_state(&self, _match_id: u64) -> Result<LiveMatchState, String> {
      self.read_count.fetch_add(1, Ordering::SeqCst);
      if let Some(epoch) = &self.epoch_to_bump {
        epoch.fetch_add(1, Ordering::SeqCst);
      }
      self
        .reads
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Err("no scripted read".to_string()))
    }

    fn division_matches(&self, _division_id: u64) -> Result<Vec<BracketMatch>, String> {
      self.division_count.fetch_add(1, Ordering::SeqCst);
      if let Some(gate) = self.gate.lock().unwrap().as_ref() {
        let _ = gate.recv();
      }
      self
        .divisions
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn propose(&self, _match_id: u64, _delta: &StateDelta) -> Result<(), String> {
      self.propose_count.fetch_add(1, Ordering::SeqCst);
      self.propose_result.lock().unwrap().clone()
    }
  }

  fn state(score_a: u32, score_b: u32) -> LiveMatchState {
    LiveMatchState {
      score_a,
      score_b,
      ..LiveMatchState::default()
    }
  }

  fn real_match(id: u64, round: u32, slot: usize) -> BracketMatch {
    BracketMatch {
      key: MatchKey::Real { id },
      round,
      slot,
      participant_a_id: Some(id * 2),
      participant_b_id: Some(id * 2 + 1),
      name_a: None,
      name_b: None,
      score_a: 0,
      score_b: 0,
      winner: Winner::None,
      is_bye: false,
    }
  }

  #[test]
  fn test_apply_delta_clamps_at_zero() {
    let base = state(0, 2);
    let down_a = apply_delta(&base, &StateDelta::Score { side: MatchSide::A, delta: -1 });
    assert_eq!(down_a.score_a, 0);
    let up_a = apply_delta(&base, &StateDelta::Score { side: MatchSide::A, delta: 1 });
    assert_eq!(up_a.score_a, 1);
    let down_b = apply_delta(&base, &StateDelta::Score { side: MatchSide::B, delta: -3 });
    assert_eq!(down_b.score_b, 0);
    let timer = apply_delta(&base, &StateDelta::Timer { delta_seconds: -10 });
    assert_eq!(timer.timer_seconds, 0);
  }

  #[test]
  fn test_reconciliation_replaces_local_state_wholesale() {
    let service = Arc::new(StubService::new());
    let mut s1 = state(1, 0);
    s1.senshu_a = true;
    let s2 = state(4, 3);
    service.push_read(Ok(s1));
    service.push_read(Ok(s2.clone()));

    let mut session = ScorekeeperSession::new(service.clone(), 7);
    session.refresh().unwrap();
    // Local tampering between authoritative reads must not survive.
    session.displayed = apply_delta(session.displayed(), &StateDelta::Score {
      side: MatchSide::A,
      delta: 5,
    });
    session.refresh().unwrap();
    assert_eq!(*session.displayed(), s2);
  }

  #[test]
  fn test_optimistic_delta_then_read_back() {
    let service = Arc::new(StubService::new());
    service.push_read(Ok(state(0, 0)));
    let mut read_back = state(1, 0);
    read_back.win_a = false;
    service.push_read(Ok(read_back.clone()));

    let mut session = ScorekeeperSession::new(service.clone(), 7);
    session.refresh().unwrap();

    let optimistic = apply_delta(session.displayed(), &StateDelta::Score {
      side: MatchSide::A,
      delta: 1,
    });
    assert_eq!(optimistic.score_a, 1);

    session
      .submit(StateDelta::Score { side: MatchSide::A, delta: 1 })
      .unwrap();
    // No flicker: the optimistic value and the read-back agree exactly.
    assert_eq!(*session.displayed(), read_back);
    assert_eq!(service.propose_count.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_rejected_write_rolls_back_to_authoritative() {
    let service = Arc::new(StubService::new());
    service.push_read(Ok(state(2, 2)));
    *service.propose_result.lock().unwrap() = Err("score rejected".to_string());

    let mut session = ScorekeeperSession::new(service.clone(), 7);
    session.refresh().unwrap();
    let err = session
      .submit(StateDelta::Score { side: MatchSide::A, delta: 1 })
      .unwrap_err();
    assert!(err.contains("rejected"));
    assert_eq!(*session.displayed(), state(2, 2));
    assert_eq!(session.status(), SyncStatus::Degraded);
  }

  #[test]
  fn test_spectator_tick_failure_keeps_state_and_degrades() {
    let service = StubService::new();
    service.push_read(Ok(state(3, 1)));
    service.push_read(Err("connection reset".to_string()));
    service.push_read(Ok(state(4, 1)));

    let view: SharedSpectatorView = Arc::new(Mutex::new(SpectatorView {
      match_id: 7,
      state: LiveMatchState::default(),
      status: SyncStatus::Degraded,
      last_tick_ms: None,
    }));
    let epoch = AtomicU64::new(0);

    spectator_tick(&service, &view, &epoch);
    assert_eq!(view.lock().unwrap().status, SyncStatus::Live);
    assert_eq!(view.lock().unwrap().state, state(3, 1));

    spectator_tick(&service, &view, &epoch);
    // The failed tick leaves the last good snapshot on screen.
    assert_eq!(view.lock().unwrap().status, SyncStatus::Degraded);
    assert_eq!(view.lock().unwrap().state, state(3, 1));

    spectator_tick(&service, &view, &epoch);
    assert_eq!(view.lock().unwrap().status, SyncStatus::Live);
    assert_eq!(view.lock().unwrap().state, state(4, 1));
  }

  #[test]
  fn test_stale_response_is_discarded_after_epoch_bump() {
    let epoch = Arc::new(AtomicU64::new(0));
    let mut service = StubService::new();
    service.epoch_to_bump = Some(epoch.clone());
    service.push_read(Ok(state(9, 9)));

    let view: SharedSpectatorView = Arc::new(Mutex::new(SpectatorView {
      match_id: 7,
      state: state(1, 1),
      status: SyncStatus::Live,
      last_tick_ms: None,
    }));

    // The view tears down while the request is in flight; the response must
    // not be applied.
    spectator_tick(&service, &view, &epoch);
    assert_eq!(view.lock().unwrap().state, state(1, 1));
  }

  #[test]
  fn test_displayed_timer_counts_down_between_ticks() {
    let mut view = SpectatorView {
      match_id: 7,
      state: state(0, 0),
      status: SyncStatus::Live,
      last_tick_ms: Some(10_000),
    };
    view.state.timer_seconds = 60;
    view.state.timer_running = true;
    assert_eq!(displayed_timer_seconds(&view, 12_500), 58);
    view.state.timer_running = false;
    assert_eq!(displayed_timer_seconds(&view, 12_500), 60);
  }

  #[test]
  fn test_division_refresh_suppresses_concurrent_reads() {
    let (release, gate) = channel();
    let service = StubService::new();
    *service.gate.lock().unwrap() = Some(gate);
    service.push_division(Ok(vec![real_match(1, 1, 0)]));
    let service = Arc::new(service);
    let store: SharedBoardStore = Arc::new(Mutex::new(HashMap::new()));

    let worker_service = service.clone();
    let worker_store = store.clone();
    let worker = thread::spawn(move || {
      maybe_refresh_division(worker_service.as_ref(), &worker_store, 5, true)
    });

    // Wait until the first refresh has claimed the in-flight slot.
    while service.division_count.load(Ordering::SeqCst) == 0 {
      thread::yield_now();
    }

    // An explicit refresh while one is in flight is a no-op.
    let second = maybe_refresh_division(service.as_ref(), &store, 5, true);
    assert!(second.is_none());
    assert_eq!(service.division_count.load(Ordering::SeqCst), 1);

    release.send(()).unwrap();
    let first = worker.join().unwrap();
    assert_eq!(first.unwrap().len(), 1);

    // After completion an explicit refresh goes through again.
    *service.gate.lock().unwrap() = None;
    service.push_division(Ok(Vec::new()));
    maybe_refresh_division(service.as_ref(), &store, 5, true);
    assert_eq!(service.division_count.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn test_division_refresh_error_keeps_cached_list() {
    let service = StubService::new();
    service.push_division(Ok(vec![real_match(1, 1, 0)]));
    service.push_division(Err("service unavailable".to_string()));
    let store: SharedBoardStore = Arc::new(Mutex::new(HashMap::new()));

    let first = maybe_refresh_division(&service, &store, 5, true).unwrap();
    assert_eq!(first.len(), 1);

    let second = maybe_refresh_division(&service, &store, 5, true).unwrap();
    assert_eq!(second.len(), 1);
    let guard = store.lock().unwrap();
    let entry = guard.get(&5).unwrap();
    assert!(entry.last_error.as_deref().unwrap().contains("unavailable"));
    assert!(!entry.fetch_in_flight);
  }
}
