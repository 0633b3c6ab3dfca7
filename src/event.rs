use crate::types::PlayerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

/// The closed set of loggable event kinds.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    GameStart,
    GameEnd,
    PhaseChange,
    RoundStart,
    RoundEnd,
    PlayerAction,
    PlayerVote,
    PlayerNominate,
    VoteCast,
    ElectionResult,
    QuestResult,
    PolicyEnacted,
    PresidentialPower,
    InvestigationResult,
    PlayerEliminated,
    Discussion,
    VetoProposed,
    VetoResponse,
    AgentReasoning,
    Error,
    Info,
    LLMCall,
}

/// A single append-only log entry.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub match_id: String,
    pub round: usize,
    pub data: Value,
    pub player: Option<PlayerId>,
    pub private: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Cooldown window for repeated identical error events, in seconds.
const ERROR_THROTTLE_SECS: f64 = 2.0;

/// Per-match append-only event log.
///
/// Entries are kept in memory for assertions and replay, and mirrored to a
/// JSONL sink when an output directory is configured. Events flagged private
/// and scoped to a player are excluded from any view intended for another
/// player.
pub struct GameLog {
    match_id: String,
    round: usize,
    entries: Vec<Event>,
    sink: Option<BufWriter<File>>,
    /// `(player, code, detail)` -> last emission time and suppressed count.
    throttle: HashMap<(Option<PlayerId>, String, String), (DateTime<Utc>, usize)>,
}

impl GameLog {
    pub fn new(match_id: impl Into<String>) -> Self {
        Self {
            match_id: match_id.into(),
            round: 0,
            entries: Vec::new(),
            sink: None,
            throttle: HashMap::new(),
        }
    }

    /// Creates a log that mirrors every entry to `<dir>/<match_id>.jsonl`.
    pub fn with_sink(match_id: impl Into<String>, dir: &Path) -> std::io::Result<Self> {
        let match_id = match_id.into();
        std::fs::create_dir_all(dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("{match_id}.jsonl")))?;
        Ok(Self {
            sink: Some(BufWriter::new(file)),
            ..Self::new(match_id)
        })
    }

    pub fn match_id(&self) -> &str {
        &self.match_id
    }

    pub fn round(&self) -> usize {
        self.round
    }

    pub fn set_round(&mut self, round: usize) {
        self.round = round;
    }

    fn append(&mut self, mut event: Event) {
        // Attach the count of identical errors suppressed since the last
        // emission, then clear the counter.
        if event.kind == EventKind::Error {
            let key = throttle_key(&event);
            if let Some((_, suppressed)) = self.throttle.get_mut(&key) {
                if *suppressed > 0 {
                    event
                        .metadata
                        .insert("suppressed".to_string(), Value::from(*suppressed));
                    *suppressed = 0;
                }
            }
        }
        if let Some(sink) = &mut self.sink {
            if let Ok(line) = serde_json::to_string(&event) {
                let _ = writeln!(sink, "{line}");
                let _ = sink.flush();
            }
        }
        self.entries.push(event);
    }

    fn event(&self, kind: EventKind, data: Value) -> Event {
        Event {
            timestamp: Utc::now(),
            kind,
            match_id: self.match_id.clone(),
            round: self.round,
            data,
            player: None,
            private: false,
            metadata: Map::new(),
        }
    }

    /// Records a public event.
    pub fn push(&mut self, kind: EventKind, data: Value) {
        let event = self.event(kind, data);
        self.append(event);
    }

    /// Records a public event attributed to a player.
    pub fn push_player(&mut self, player: PlayerId, kind: EventKind, data: Value) {
        let mut event = self.event(kind, data);
        event.player = Some(player);
        self.append(event);
    }

    /// Records an event visible only to `player`.
    pub fn push_private(&mut self, player: PlayerId, kind: EventKind, data: Value) {
        let mut event = self.event(kind, data);
        event.player = Some(player);
        event.private = true;
        self.append(event);
    }

    /// Records a rule-rejection or agent failure, throttled by
    /// `(player, code, detail)` so a misbehaving agent repeating the same
    /// mistake does not flood the log.
    pub fn error(&mut self, player: Option<PlayerId>, code: &str, detail: &str) {
        let key = (player, code.to_string(), detail.to_string());
        let now = Utc::now();
        if let Some((last, suppressed)) = self.throttle.get_mut(&key) {
            let elapsed = (now - *last)
                .to_std()
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
            if elapsed < ERROR_THROTTLE_SECS {
                *suppressed += 1;
                return;
            }
            *last = now;
        } else {
            self.throttle.insert(key, (now, 0));
        }
        let mut event = self.event(
            EventKind::Error,
            serde_json::json!({ "code": code, "detail": detail }),
        );
        event.player = player;
        self.append(event);
    }

    /// Records a detected state inconsistency and the recovery applied.
    /// Warnings never abort a match.
    pub fn warn_invariant(&mut self, detail: &str, recovery: &str) {
        log::warn!("[{}] invariant violation: {detail} ({recovery})", self.match_id);
        self.push(
            EventKind::Info,
            serde_json::json!({ "warning": detail, "recovery": recovery }),
        );
    }

    pub fn entries(&self) -> &[Event] {
        &self.entries
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    /// All events visible to `viewer`: public events plus the viewer's own
    /// private events. `None` yields the spectator view (public only).
    pub fn view_for(&self, viewer: Option<PlayerId>) -> Vec<&Event> {
        self.entries
            .iter()
            .filter(|e| !e.private || (e.player.is_some() && e.player == viewer))
            .collect()
    }
}

fn throttle_key(event: &Event) -> (Option<PlayerId>, String, String) {
    let code = event
        .data
        .get("code")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let detail = event
        .data
        .get("detail")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    (event.player, code, detail)
}
