#![cfg(test)]

use super::*;
use crate::engine::Engine;
use crate::event::{EventKind, GameLog};
use crate::types::{Action, ActionKind};
use std::collections::BTreeMap;

fn new_game(n_players: usize, seed: u64) -> SecretHitler {
    let cfg = SecretHitlerConfig {
        n_players,
        seed,
        role_assignment: None,
    };
    let mut game = SecretHitler::new(cfg, GameLog::new("test")).unwrap();
    game.reset();
    game
}

/// A 5-player game with a fixed role table: players 3 and 4 are fascists,
/// player 4 is Hitler.
fn fixed_game(seed: u64) -> SecretHitler {
    let cfg = SecretHitlerConfig {
        n_players: 5,
        seed,
        role_assignment: Some(RoleAssignment {
            liberals: vec![0, 1, 2],
            fascists: vec![3, 4],
            hitler: Some(4),
        }),
    };
    let mut game = SecretHitler::new(cfg, GameLog::new("test")).unwrap();
    game.reset();
    game
}

fn single(action: Action) -> BTreeMap<PlayerId, Action> {
    let mut batch = BTreeMap::new();
    batch.insert(action.player, action);
    batch
}

/// Steps through a discussion phase with everyone staying silent.
fn skip_discussion(game: &mut SecretHitler) {
    while matches!(
        game.state,
        GameState::Discussion { .. } | GameState::VetoDiscussion { .. }
    ) {
        let speaker = game.current_actors()[0];
        game.step(single(Action::new(speaker, ActionKind::Skip)));
    }
}

fn vote_all(game: &mut SecretHitler, ja: bool) {
    let voters: BTreeMap<PlayerId, Action> = game
        .current_actors()
        .into_iter()
        .map(|p| {
            (
                p,
                Action::new(p, ActionKind::Vote).with("vote", if ja { "ja" } else { "nein" }),
            )
        })
        .collect();
    game.step(voters);
}

/// Advances a fresh round to the legislative session with the given nominee.
fn elect(game: &mut SecretHitler, nominee: PlayerId) {
    let president = game.president;
    game.step(single(
        Action::new(president, ActionKind::Nominate).with("target", nominee),
    ));
    skip_discussion(game);
    vote_all(game, true);
}

#[test]
fn scenario_first_fascist_policy() {
    let mut game = fixed_game(11);
    // Deterministic deck: president draws liberal, fascist, fascist.
    game.deck.draw = vec![
        Policy::Liberal,
        Policy::Liberal,
        Policy::Liberal,
        Policy::Liberal,
        Policy::Fascist,
        Policy::Fascist,
    ];

    assert_eq!(game.president, 0);
    elect(&mut game, 1);
    assert!(matches!(
        game.state,
        GameState::Legislative {
            turn: LegislativeTurn::President { .. }
        }
    ));

    // President discards the liberal; chancellor enacts a fascist policy.
    let GameState::Legislative {
        turn: LegislativeTurn::President { cards },
    } = game.state
    else {
        panic!("expected president turn");
    };
    assert_eq!(cards, [Policy::Liberal, Policy::Fascist, Policy::Fascist]);
    game.step(single(Action::new(0, ActionKind::Discard).with("index", 0)));
    game.step(single(Action::new(1, ActionKind::Enact).with("index", 0)));

    assert_eq!(game.fascist_policies, 1);
    // No presidential power triggers at one fascist policy in a 5-player game.
    assert!(matches!(game.state, GameState::Nomination));

    let kinds: Vec<EventKind> = game
        .log()
        .view_for(None)
        .iter()
        .map(|e| e.kind)
        .filter(|k| {
            matches!(
                k,
                EventKind::PlayerNominate | EventKind::ElectionResult | EventKind::PolicyEnacted
            )
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::PlayerNominate,
            EventKind::ElectionResult,
            EventKind::PolicyEnacted
        ]
    );
    let election = game
        .log()
        .entries()
        .iter()
        .find(|e| e.kind == EventKind::ElectionResult)
        .unwrap();
    assert_eq!(election.data["ja"], 5);
    assert_eq!(election.data["passed"], true);
    let enacted = game
        .log()
        .entries()
        .iter()
        .find(|e| e.kind == EventKind::PolicyEnacted)
        .unwrap();
    assert_eq!(enacted.data["fascist_total"], 1);
}

#[test]
fn tracker_is_never_left_at_three() {
    let mut game = fixed_game(3);
    for _ in 0..3 {
        let president = game.president;
        let nominee = game.eligible_chancellors()[0];
        game.step(single(
            Action::new(president, ActionKind::Nominate).with("target", nominee),
        ));
        skip_discussion(&mut game);
        vote_all(&mut game, false);
        assert!(game.election_tracker < 3);
    }
    // The third failure triggered a chaos enactment and reset the tracker.
    assert_eq!(game.election_tracker, 0);
    assert_eq!(game.liberal_policies + game.fascist_policies, 1);
    assert!(game.term_limits_waived);
}

#[test]
fn double_vote_is_idempotent() {
    let mut game = fixed_game(5);
    let president = game.president;
    game.step(single(
        Action::new(president, ActionKind::Nominate).with("target", 1),
    ));
    skip_discussion(&mut game);

    game.step(single(Action::new(0, ActionKind::Vote).with("vote", "ja")));
    let errors_before = game.log().count(EventKind::Error);
    game.step(single(Action::new(0, ActionKind::Vote).with("vote", "nein")));
    assert!(game.log().count(EventKind::Error) > errors_before);
    let GameState::Voting { votes } = &game.state else {
        panic!("expected voting phase");
    };
    assert_eq!(votes.count(|v| *v), 1);
    assert_eq!(votes.count(|v| !*v), 0);
}

#[test]
fn dead_players_cannot_act() {
    let mut game = fixed_game(5);
    game.players[2].alive = false;
    let errors_before = game.log().count(EventKind::Error);
    game.step(single(Action::new(2, ActionKind::Vote).with("vote", "ja")));
    assert!(game.log().count(EventKind::Error) > errors_before);
    assert!(matches!(game.state, GameState::Nomination));
}

#[test]
fn observation_isolation_for_liberals() {
    let game = fixed_game(17);
    let obs = game.observations();
    for liberal in [0usize, 1, 2] {
        assert!(!obs[&liberal].data.contains_key("fascist_team"));
        assert!(!obs[&liberal].data.contains_key("hitler"));
    }
    assert!(obs[&3].data.contains_key("fascist_team"));
    assert_eq!(obs[&3].data["hitler"], 4);
}

#[test]
fn term_limits_exclude_last_government() {
    let mut game = fixed_game(7);
    game.deck.draw = vec![Policy::Fascist; 9];
    elect(&mut game, 1);
    game.step(single(Action::new(0, ActionKind::Discard).with("index", 0)));
    game.step(single(Action::new(1, ActionKind::Enact).with("index", 0)));

    // Next round: president 1 may not renominate chancellor 1 (self) and the
    // last chancellor; with five alive the last president stays eligible.
    assert_eq!(game.president, 1);
    let eligible = game.eligible_chancellors();
    assert!(eligible.contains(&0));
    assert!(!eligible.contains(&1));
    assert!(eligible.contains(&2));
}

#[test]
fn hitler_chancellor_after_three_fascist_policies_wins() {
    let mut game = fixed_game(23);
    game.fascist_policies = 3;
    elect(&mut game, 4);
    assert!(game.terminal());
    assert_eq!(game.winner().as_deref(), Some("fascists"));
    assert_eq!(
        game.win_reason().as_deref(),
        Some("Hitler was elected chancellor")
    );
}

#[test]
fn execution_of_hitler_ends_the_game() {
    let mut game = fixed_game(29);
    game.fascist_policies = 3;
    // Reach the execution power by enacting the fourth fascist policy.
    game.deck.draw = vec![Policy::Fascist; 9];
    elect(&mut game, 1);
    game.step(single(Action::new(0, ActionKind::Discard).with("index", 0)));
    game.step(single(Action::new(1, ActionKind::Enact).with("index", 0)));
    assert!(matches!(
        game.state,
        GameState::ExecutivePower {
            power: PresidentialPower::Execution
        }
    ));
    game.step(single(Action::new(0, ActionKind::Eliminate).with("target", 4)));
    assert!(game.terminal());
    assert_eq!(game.winner().as_deref(), Some("liberals"));
    assert_eq!(game.win_reason().as_deref(), Some("Hitler was executed"));
    assert_eq!(game.log().count(EventKind::PlayerEliminated), 1);
}

#[test]
fn liberal_policy_track_win() {
    let mut game = fixed_game(31);
    game.liberal_policies = 4;
    game.deck.draw = vec![Policy::Liberal; 6];
    elect(&mut game, 1);
    game.step(single(Action::new(0, ActionKind::Discard).with("index", 0)));
    game.step(single(Action::new(1, ActionKind::Enact).with("index", 0)));
    assert!(game.terminal());
    assert_eq!(game.winner().as_deref(), Some("liberals"));
}

#[test]
fn veto_flow_increments_tracker_when_accepted() {
    let mut game = fixed_game(37);
    game.fascist_policies = 5;
    game.deck.draw = vec![Policy::Fascist; 6];
    elect(&mut game, 1);
    game.step(single(Action::new(0, ActionKind::Discard).with("index", 0)));
    // Chancellor proposes a veto; everyone discusses; president accepts.
    game.step(single(Action::new(1, ActionKind::Veto)));
    assert!(matches!(game.state, GameState::VetoDiscussion { .. }));
    skip_discussion(&mut game);
    assert!(matches!(
        game.state,
        GameState::Legislative {
            turn: LegislativeTurn::VetoRequested { .. }
        }
    ));
    game.step(single(Action::new(0, ActionKind::Veto).with("accept", true)));
    assert_eq!(game.election_tracker, 1);
    assert!(matches!(game.state, GameState::Nomination));
    assert_eq!(game.log().count(EventKind::VetoProposed), 1);
    assert_eq!(game.log().count(EventKind::VetoResponse), 1);
}

#[test]
fn rejected_veto_forces_enactment() {
    let mut game = fixed_game(41);
    game.fascist_policies = 5;
    game.deck.draw = vec![Policy::Fascist; 6];
    elect(&mut game, 1);
    game.step(single(Action::new(0, ActionKind::Discard).with("index", 0)));
    game.step(single(Action::new(1, ActionKind::Veto)));
    skip_discussion(&mut game);
    game.step(single(Action::new(0, ActionKind::Veto).with("accept", false)));
    // A second veto proposal is rejected; the chancellor must enact.
    let errors_before = game.log().count(EventKind::Error);
    game.step(single(Action::new(1, ActionKind::Veto)));
    assert!(game.log().count(EventKind::Error) > errors_before);
    game.step(single(Action::new(1, ActionKind::Enact).with("index", 0)));
    assert!(game.terminal());
    assert_eq!(game.winner().as_deref(), Some("fascists"));
}

#[test]
fn repeated_invalid_nominations_fall_back() {
    let mut game = fixed_game(43);
    let president = game.president;
    // Nominating yourself is illegal; after three rejections the engine
    // nominates on the president's behalf.
    for _ in 0..3 {
        game.step(single(
            Action::new(president, ActionKind::Nominate).with("target", president),
        ));
    }
    assert!(matches!(game.state, GameState::Discussion { .. }));
    assert!(game.chancellor_nominee.is_some());
    assert_ne!(game.chancellor_nominee, Some(president));
}

#[test]
fn special_election_returns_rotation() {
    let mut game = new_game(8, 47);
    game.fascist_policies = 2;
    game.deck.draw = vec![Policy::Fascist; 9];
    let nominee = game.eligible_chancellors()[0];
    elect(&mut game, nominee);
    game.step(single(
        Action::new(game.president, ActionKind::Discard).with("index", 0),
    ));
    game.step(single(Action::new(nominee, ActionKind::Enact).with("index", 0)));
    assert!(matches!(
        game.state,
        GameState::ExecutivePower {
            power: PresidentialPower::CallSpecialElection
        }
    ));
    // President 0 appoints player 5; after 5's round, rotation resumes at 1.
    game.step(single(Action::new(0, ActionKind::Nominate).with("target", 5)));
    assert_eq!(game.president, 5);
    let president = game.president;
    let target = game.eligible_chancellors()[0];
    game.step(single(
        Action::new(president, ActionKind::Nominate).with("target", target),
    ));
    skip_discussion(&mut game);
    vote_all(&mut game, false);
    assert_eq!(game.president, 1);
}

#[test]
fn replay_determinism() {
    let run = |seed: u64| {
        let mut game = fixed_game(seed);
        let president = game.president;
        game.step(single(
            Action::new(president, ActionKind::Nominate).with("target", 1),
        ));
        skip_discussion(&mut game);
        vote_all(&mut game, true);
        game.step(single(Action::new(0, ActionKind::Discard).with("index", 0)));
        game.step(single(Action::new(1, ActionKind::Enact).with("index", 1)));
        game.log()
            .entries()
            .iter()
            .map(|e| (e.kind, e.data.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(run(99), run(99));
}
