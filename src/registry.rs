use crate::among_us::{AmongUs, AmongUsConfig};
use crate::avalon::{Avalon, AvalonConfig};
use crate::engine::Engine;
use crate::error::SchedulerError;
use crate::event::GameLog;
use crate::secret_hitler::{SecretHitler, SecretHitlerConfig};
use crate::sheriff::{Sheriff, SheriffConfig};
use crate::spyfall::{Spyfall, SpyfallConfig};
use crate::werewolf::{Werewolf, WerewolfConfig};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// The six games the harness can run.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    SecretHitler,
    Avalon,
    Werewolf,
    Spyfall,
    AmongUs,
    Sheriff,
}

impl GameKind {
    pub const ALL: [GameKind; 6] = [
        GameKind::SecretHitler,
        GameKind::Avalon,
        GameKind::Werewolf,
        GameKind::Spyfall,
        GameKind::AmongUs,
        GameKind::Sheriff,
    ];

    pub fn name(self) -> &'static str {
        match self {
            GameKind::SecretHitler => "secret_hitler",
            GameKind::Avalon => "avalon",
            GameKind::Werewolf => "werewolf",
            GameKind::Spyfall => "spyfall",
            GameKind::AmongUs => "among_us",
            GameKind::Sheriff => "sheriff",
        }
    }
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GameKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "secret_hitler" | "secrethitler" => Ok(GameKind::SecretHitler),
            "avalon" => Ok(GameKind::Avalon),
            "werewolf" => Ok(GameKind::Werewolf),
            "spyfall" => Ok(GameKind::Spyfall),
            "among_us" | "amongus" => Ok(GameKind::AmongUs),
            "sheriff" => Ok(GameKind::Sheriff),
            other => Err(SchedulerError::UnknownGame(other.to_string())),
        }
    }
}

/// Player-count envelope for a game: the hard bounds the CLI enforces and the
/// band outside which it only warns.
#[derive(Clone, Copy, Debug)]
pub struct GameSpec {
    pub min_players: usize,
    pub max_players: usize,
    pub recommended: (usize, usize),
}

pub fn game_spec(kind: GameKind) -> GameSpec {
    match kind {
        GameKind::SecretHitler => GameSpec {
            min_players: 5,
            max_players: 10,
            recommended: (5, 7),
        },
        GameKind::Avalon => GameSpec {
            min_players: 5,
            max_players: 10,
            recommended: (5, 8),
        },
        GameKind::Werewolf => GameSpec {
            min_players: 5,
            max_players: 20,
            recommended: (7, 12),
        },
        GameKind::Spyfall => GameSpec {
            min_players: 3,
            max_players: 12,
            recommended: (4, 8),
        },
        GameKind::AmongUs => GameSpec {
            min_players: 4,
            max_players: 15,
            recommended: (5, 10),
        },
        GameKind::Sheriff => GameSpec {
            min_players: 3,
            max_players: 5,
            recommended: (4, 4),
        },
    }
}

pub fn validate_player_count(kind: GameKind, n_players: usize) -> Result<(), SchedulerError> {
    let spec = game_spec(kind);
    if n_players < spec.min_players || n_players > spec.max_players {
        return Err(SchedulerError::PlayerCount {
            game: kind.name().to_string(),
            min: spec.min_players,
            max: spec.max_players,
            got: n_players,
        });
    }
    let (lo, hi) = spec.recommended;
    if n_players < lo || n_players > hi {
        log::warn!(
            "{kind} plays best with {lo}-{hi} players; {n_players} is legal but sub-optimal"
        );
    }
    Ok(())
}

/// Builds a ready-to-reset engine for one match. `overrides` patches the
/// game's config object field-by-field; `role_assignment` is the schedule's
/// fixed role table.
pub fn build_engine(
    kind: GameKind,
    n_players: usize,
    seed: u64,
    role_assignment: Option<&Value>,
    overrides: Option<&Value>,
    log: GameLog,
) -> Result<Box<dyn Engine>, SchedulerError> {
    validate_player_count(kind, n_players)?;
    let engine: Box<dyn Engine> = match kind {
        GameKind::SecretHitler => {
            let cfg: SecretHitlerConfig = patched_config(
                SecretHitlerConfig {
                    n_players,
                    seed,
                    ..SecretHitlerConfig::default()
                },
                overrides,
                role_assignment,
            )?;
            Box::new(SecretHitler::new(cfg, log).map_err(config_err)?)
        }
        GameKind::Avalon => {
            let cfg: AvalonConfig = patched_config(
                AvalonConfig {
                    n_players,
                    seed,
                    ..AvalonConfig::default()
                },
                overrides,
                role_assignment,
            )?;
            Box::new(Avalon::new(cfg, log).map_err(config_err)?)
        }
        GameKind::Werewolf => {
            let cfg: WerewolfConfig = patched_config(
                WerewolfConfig {
                    n_players,
                    seed,
                    ..WerewolfConfig::default()
                },
                overrides,
                role_assignment,
            )?;
            Box::new(Werewolf::new(cfg, log).map_err(config_err)?)
        }
        GameKind::Spyfall => {
            let cfg: SpyfallConfig = patched_config(
                SpyfallConfig {
                    n_players,
                    seed,
                    ..SpyfallConfig::default()
                },
                overrides,
                role_assignment,
            )?;
            Box::new(Spyfall::new(cfg, log).map_err(config_err)?)
        }
        GameKind::AmongUs => {
            let mut base = AmongUsConfig {
                n_players,
                seed,
                ..AmongUsConfig::default()
            };
            if n_players < 7 {
                base.n_impostors = 1;
            }
            let cfg: AmongUsConfig = patched_config(base, overrides, role_assignment)?;
            Box::new(AmongUs::new(cfg, log).map_err(config_err)?)
        }
        GameKind::Sheriff => {
            let cfg: SheriffConfig = patched_config(
                SheriffConfig {
                    n_players,
                    seed,
                    ..SheriffConfig::default()
                },
                overrides,
                role_assignment,
            )?;
            Box::new(Sheriff::new(cfg, log).map_err(config_err)?)
        }
    };
    Ok(engine)
}

fn config_err(err: crate::error::GameError) -> SchedulerError {
    SchedulerError::Config(err.to_string())
}

fn patched_config<T: Serialize + DeserializeOwned>(
    base: T,
    overrides: Option<&Value>,
    role_assignment: Option<&Value>,
) -> Result<T, SchedulerError> {
    let mut value = serde_json::to_value(&base)?;
    if let Some(Value::Object(extra)) = overrides {
        if let Value::Object(obj) = &mut value {
            for (key, patch) in extra {
                obj.insert(key.clone(), patch.clone());
            }
        }
    }
    if let Some(table) = role_assignment {
        if let Value::Object(obj) = &mut value {
            obj.insert("role_assignment".to_string(), table.clone());
        }
    }
    Ok(serde_json::from_value(value)?)
}
