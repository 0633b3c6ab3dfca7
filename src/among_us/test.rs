#![cfg(test)]

use super::*;
use crate::engine::Engine;
use crate::event::{EventKind, GameLog};
use std::collections::BTreeMap;

/// 5 players, player 0 the only impostor, everyone in the Cafeteria.
fn fixed_game(seed: u64) -> AmongUs {
    let cfg = AmongUsConfig {
        n_players: 5,
        seed,
        n_impostors: 1,
        role_assignment: Some(RoleAssignment { impostors: vec![0] }),
        ..AmongUsConfig::default()
    };
    let mut game = AmongUs::new(cfg, GameLog::new("test")).unwrap();
    game.reset();
    game
}

fn single(action: Action) -> BTreeMap<PlayerId, Action> {
    let mut batch = BTreeMap::new();
    batch.insert(action.player, action);
    batch
}

fn batch(actions: Vec<Action>) -> BTreeMap<PlayerId, Action> {
    actions.into_iter().map(|a| (a.player, a)).collect()
}

#[test]
fn rejected_move_leaves_the_room_unchanged() {
    let mut game = fixed_game(1);
    let before = game.players[1].location;
    let errors_before = game.log().count(EventKind::Error);
    // Reactor is nowhere near the Cafeteria.
    game.step(single(Action::new(1, ActionKind::Move).with("room", "Reactor")));
    assert!(game.log().count(EventKind::Error) > errors_before);
    assert_eq!(game.players[1].location, before);
}

#[test]
fn victim_escapes_the_kill_by_moving_first() {
    let mut game = fixed_game(2);
    game.players[0].kill_cooldown = 0;
    // Impostor 0 knifes player 1; player 1 walks to Weapons in the same step.
    game.step(batch(vec![
        Action::new(0, ActionKind::Kill).with("target", 1),
        Action::new(1, ActionKind::Move).with("room", "Weapons"),
    ]));
    assert!(game.players[1].alive);
    assert_eq!(game.players[1].location, Some("Weapons"));
    let error = game
        .log()
        .entries()
        .iter()
        .find(|e| e.kind == EventKind::Error)
        .expect("kill rejection");
    assert!(error.data["detail"]
        .as_str()
        .unwrap()
        .contains("TARGET_DIFFERENT_ROOM"));
    // No meeting was triggered, and the failed kill left the cooldown alone.
    assert!(matches!(game.state, GameState::Task));
    assert_eq!(game.players[0].kill_cooldown, 0);
}

#[test]
fn kill_then_report_starts_a_meeting_and_teleports_everyone() {
    let mut game = fixed_game(3);
    game.players[0].kill_cooldown = 0;
    game.step(single(Action::new(0, ActionKind::Kill).with("target", 1)));
    assert!(!game.players[1].alive);
    assert!(game.players[1].is_corpse());

    // Player 2 shares the room with the body and reports it.
    game.step(single(Action::new(2, ActionKind::Report)));
    assert!(matches!(game.state, GameState::Discussion { .. }));

    // Everyone talks once per round for the configured rounds, then votes.
    while matches!(game.state, GameState::Discussion { .. }) {
        let speakers = game.current_actors();
        game.step(batch(
            speakers
                .into_iter()
                .map(|p| Action::new(p, ActionKind::Speak).with("statement", "sus"))
                .collect(),
        ));
    }
    assert!(matches!(game.state, GameState::Voting { .. }));

    // Everyone votes out the impostor.
    let voters = game.current_actors();
    game.step(batch(
        voters
            .into_iter()
            .map(|p| {
                if p == 0 {
                    Action::new(0, ActionKind::Skip)
                } else {
                    Action::new(p, ActionKind::Vote).with("target", 0)
                }
            })
            .collect(),
    ));
    assert!(game.terminal());
    assert_eq!(game.winner().as_deref(), Some("crewmates"));
    assert_eq!(game.win_reason().as_deref(), Some("All impostors ejected"));
    // The ejected impostor is off the map, distinct from a corpse.
    assert!(game.players[0].ejected);
    assert_eq!(game.players[0].location, None);
    assert!(!game.players[0].is_corpse());
}

#[test]
fn report_beats_emergency_in_the_same_step() {
    let mut game = fixed_game(4);
    game.players[0].kill_cooldown = 0;
    game.step(single(Action::new(0, ActionKind::Kill).with("target", 1)));
    // Player 2 reports; player 3 calls an emergency in the same step.
    game.step(batch(vec![
        Action::new(2, ActionKind::Report),
        Action::new(3, ActionKind::Emergency),
    ]));
    assert!(matches!(game.state, GameState::Discussion { .. }));
    let precedence = game
        .log()
        .entries()
        .iter()
        .filter(|e| e.kind == EventKind::Error)
        .any(|e| e.data["detail"].as_str().unwrap_or("").contains("precedence"));
    assert!(precedence);
    // The emergency was rejected, so player 3 keeps the one-shot.
    assert!(!game.players[3].has_called_emergency);
}

#[test]
fn emergency_only_from_cafeteria_and_once_per_life() {
    let mut game = fixed_game(5);
    game.step(single(Action::new(2, ActionKind::Move).with("room", "Weapons")));
    let errors_before = game.log().count(EventKind::Error);
    game.step(single(Action::new(2, ActionKind::Emergency)));
    assert!(game.log().count(EventKind::Error) > errors_before);
    assert!(matches!(game.state, GameState::Task));

    // Back in the Cafeteria the call works, exactly once.
    game.step(single(Action::new(2, ActionKind::Move).with("room", "Cafeteria")));
    game.step(single(Action::new(2, ActionKind::Emergency)));
    assert!(matches!(game.state, GameState::Discussion { .. }));
    assert!(game.players[2].has_called_emergency);
}

#[test]
fn vents_are_impostor_only() {
    let mut game = fixed_game(6);
    let errors_before = game.log().count(EventKind::Error);
    // Crewmate 1 tries the Cafeteria-Admin vent.
    game.step(single(Action::new(1, ActionKind::Vent).with("room", "Admin")));
    assert!(game.log().count(EventKind::Error) > errors_before);
    assert_eq!(game.players[1].location, Some("Cafeteria"));
    // The impostor drops through it.
    game.step(single(Action::new(0, ActionKind::Vent).with("room", "Admin")));
    assert_eq!(game.players[0].location, Some("Admin"));
}

#[test]
fn tasks_complete_only_in_their_room() {
    let mut game = fixed_game(7);
    // Hand player 1 a deterministic task in Weapons.
    game.players[1].tasks = vec![TaskAssignment {
        name: "Clear Asteroids",
        room: "Weapons",
        done: false,
    }];
    let errors_before = game.log().count(EventKind::Error);
    game.step(single(
        Action::new(1, ActionKind::CompleteTask).with("task", "Clear Asteroids"),
    ));
    assert!(game.log().count(EventKind::Error) > errors_before);
    assert!(!game.players[1].tasks[0].done);

    game.step(single(Action::new(1, ActionKind::Move).with("room", "Weapons")));
    game.step(single(
        Action::new(1, ActionKind::CompleteTask).with("task", "Clear Asteroids"),
    ));
    assert!(game.players[1].tasks[0].done);
}

#[test]
fn completing_all_crew_tasks_wins() {
    let mut game = fixed_game(8);
    for p in 1..5 {
        for task in &mut game.players[p].tasks {
            task.done = true;
        }
    }
    let mut last = game.players[4].tasks.pop().unwrap();
    last.done = false;
    last.name = "Fix Wiring";
    last.room = "Cafeteria";
    game.players[4].tasks.push(last);
    game.step(single(
        Action::new(4, ActionKind::CompleteTask).with("task", "Fix Wiring"),
    ));
    assert!(game.terminal());
    assert_eq!(game.winner().as_deref(), Some("crewmates"));
    assert_eq!(game.win_reason().as_deref(), Some("All tasks completed"));
}

#[test]
fn kill_parity_ends_the_game_without_a_meeting() {
    let mut game = fixed_game(9);
    // Bring it down to impostor + 2 crew.
    game.players[3].alive = false;
    game.players[3].location = None;
    game.players[4].alive = false;
    game.players[4].location = None;
    game.players[0].kill_cooldown = 0;
    // The kill leaves 1 impostor vs 1 crew; a report in the same step is moot.
    game.step(batch(vec![
        Action::new(0, ActionKind::Kill).with("target", 1),
        Action::new(2, ActionKind::Report),
    ]));
    assert!(game.terminal());
    assert_eq!(game.winner().as_deref(), Some("impostors"));
    assert!(game
        .log()
        .entries()
        .iter()
        .all(|e| !matches!(e.kind, EventKind::Discussion)));
}

#[test]
fn kill_requires_cooldown_and_colocation() {
    let mut game = fixed_game(10);
    // Fresh impostors start on cooldown.
    let errors_before = game.log().count(EventKind::Error);
    game.step(single(Action::new(0, ActionKind::Kill).with("target", 1)));
    assert!(game.log().count(EventKind::Error) > errors_before);
    assert!(game.players[1].alive);
}

#[test]
fn voting_timeout_auto_skips_and_ties_eject_no_one() {
    let mut game = fixed_game(11);
    game.players[0].kill_cooldown = 0;
    game.step(single(Action::new(0, ActionKind::Kill).with("target", 1)));
    game.step(single(Action::new(2, ActionKind::Report)));
    // Sit out the discussion via the idle timeout.
    for _ in 0..game.cfg.discussion_idle_limit {
        game.step(BTreeMap::new());
    }
    assert!(matches!(game.state, GameState::Voting { .. }));
    // Two votes split between 0 and 2; the rest time out to skip.
    game.step(batch(vec![
        Action::new(3, ActionKind::Vote).with("target", 0),
        Action::new(4, ActionKind::Vote).with("target", 2),
    ]));
    for _ in 0..game.cfg.voting_idle_limit {
        game.step(BTreeMap::new());
    }
    // Tie between 0 and 2 (skip also has 2): no ejection, back to tasks.
    assert!(matches!(game.state, GameState::Task));
    assert!(game.players[0].alive);
    assert!(game.players[2].alive);
    // Meeting end teleported the living to the Cafeteria and cleared the body.
    for p in [0usize, 2, 3, 4] {
        assert_eq!(game.players[p].location, Some("Cafeteria"));
    }
    assert_eq!(game.players[1].location, None);
    assert!(!game.players[1].ejected);
    // Impostor cooldown was reset by the meeting.
    assert_eq!(game.players[0].kill_cooldown, game.cfg.kill_cooldown);
}

#[test]
fn round_limit_forces_an_impostor_win() {
    let cfg = AmongUsConfig {
        n_players: 5,
        seed: 12,
        n_impostors: 1,
        max_task_rounds: 2,
        role_assignment: Some(RoleAssignment { impostors: vec![0] }),
        ..AmongUsConfig::default()
    };
    let mut game = AmongUs::new(cfg, GameLog::new("test")).unwrap();
    game.reset();
    game.step(BTreeMap::new());
    assert!(!game.terminal());
    game.step(BTreeMap::new());
    assert!(game.terminal());
    assert_eq!(game.winner().as_deref(), Some("impostors"));
    assert_eq!(game.win_reason().as_deref(), Some("Round limit reached"));
}

#[test]
fn observation_isolation_for_crewmates() {
    let game = fixed_game(13);
    let obs = game.observations();
    for p in 1..5 {
        assert!(!obs[&p].data.contains_key("impostors"));
        assert!(!obs[&p].data.contains_key("vent_rooms"));
    }
    assert_eq!(obs[&0].data["impostors"], serde_json::json!([0]));
}

#[test]
fn double_vote_is_rejected() {
    let mut game = fixed_game(14);
    game.players[0].kill_cooldown = 0;
    game.step(single(Action::new(0, ActionKind::Kill).with("target", 1)));
    game.step(single(Action::new(2, ActionKind::Report)));
    for _ in 0..game.cfg.discussion_idle_limit {
        game.step(BTreeMap::new());
    }
    game.step(single(Action::new(3, ActionKind::Vote).with("target", 0)));
    let errors_before = game.log().count(EventKind::Error);
    game.step(single(Action::new(3, ActionKind::Vote).with("target", 2)));
    assert!(game.log().count(EventKind::Error) > errors_before);
    let GameState::Voting { votes, .. } = &game.state else {
        panic!("expected voting");
    };
    assert_eq!(votes.count(|b| *b == MeetingBallot::Target(0)), 1);
    assert_eq!(votes.count(|b| *b == MeetingBallot::Target(2)), 0);
}
