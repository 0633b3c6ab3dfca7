#![cfg(test)]

use super::*;
use crate::engine::Engine;
use crate::event::{EventKind, GameLog};
use std::collections::BTreeMap;

fn single(action: Action) -> BTreeMap<PlayerId, Action> {
    let mut batch = BTreeMap::new();
    batch.insert(action.player, action);
    batch
}

/// Minimal deduction setup: player 0 is the only werewolf, 1 and 2 are plain
/// villagers, no seer or doctor, one debate statement per day.
fn tiny_game(seed: u64) -> Werewolf {
    let cfg = WerewolfConfig {
        n_players: 3,
        seed,
        n_werewolves: Some(1),
        include_seer: false,
        include_doctor: false,
        max_debate_turns: 1,
        role_assignment: Some(RoleAssignment {
            villagers: vec![1, 2],
            werewolves: vec![0],
        }),
        ..WerewolfConfig::default()
    };
    let mut game = Werewolf::new(cfg, GameLog::new("test")).unwrap();
    game.reset();
    game
}

fn seven_game(seed: u64) -> Werewolf {
    let cfg = WerewolfConfig {
        n_players: 7,
        seed,
        n_werewolves: Some(2),
        // Seat 2 becomes the seer, seat 3 the doctor.
        role_assignment: Some(RoleAssignment {
            villagers: vec![2, 3, 4, 5, 6],
            werewolves: vec![0, 1],
        }),
        ..WerewolfConfig::default()
    };
    let mut game = Werewolf::new(cfg, GameLog::new("test")).unwrap();
    game.reset();
    game
}

fn bid_all(game: &mut Werewolf, amounts: &[(PlayerId, i64)]) {
    let batch: BTreeMap<PlayerId, Action> = amounts
        .iter()
        .map(|(p, b)| (*p, Action::new(*p, ActionKind::Bid).with("bid", *b)))
        .collect();
    game.step(batch);
}

#[test]
fn lone_wolf_wins_through_a_tied_day_vote() {
    let mut game = tiny_game(1);
    // Night 1: the werewolf takes villager 1; there is no doctor.
    game.step(single(Action::new(0, ActionKind::Eliminate).with("target", 1)));
    assert!(!game.players[1].alive);
    assert!(!game.terminal());

    // Day: bidding, one statement, then a tied vote with no elimination.
    assert!(matches!(game.state, GameState::DayBidding { .. }));
    bid_all(&mut game, &[(0, 0), (2, 0)]);
    let speaker = game.current_actors()[0];
    game.step(single(
        Action::new(speaker, ActionKind::Speak).with("statement", "It wasn't me."),
    ));
    assert!(matches!(game.state, GameState::DayVoting { .. }));
    let mut votes = BTreeMap::new();
    votes.insert(0, Action::new(0, ActionKind::Vote).with("target", 2));
    votes.insert(2, Action::new(2, ActionKind::Vote).with("target", 0));
    game.step(votes);
    assert!(game.players[0].alive && game.players[2].alive);
    assert!(!game.terminal());

    // Night 2: the last villager falls and the wolves win.
    game.step(single(Action::new(0, ActionKind::Eliminate).with("target", 2)));
    assert!(game.terminal());
    assert_eq!(game.winner().as_deref(), Some("werewolves"));
}

#[test]
fn eliminations_match_the_shrinking_alive_set() {
    let mut game = tiny_game(2);
    game.step(single(Action::new(0, ActionKind::Eliminate).with("target", 1)));
    let eliminated = game.log().count(EventKind::PlayerEliminated);
    let alive = game.players.iter().filter(|p| p.alive).count();
    assert_eq!(eliminated, game.players.len() - alive);
}

#[test]
fn night_kill_does_not_reveal_the_role() {
    let mut game = tiny_game(3);
    game.step(single(Action::new(0, ActionKind::Eliminate).with("target", 1)));
    let event = game
        .log()
        .entries()
        .iter()
        .find(|e| e.kind == EventKind::PlayerEliminated)
        .unwrap();
    assert!(event.data.get("role").is_none());
}

#[test]
fn doctor_save_prevents_the_kill() {
    let mut game = seven_game(5);
    // Wolves 0 and 1 both target the seer; the first submission stands.
    let mut batch = BTreeMap::new();
    batch.insert(0, Action::new(0, ActionKind::Eliminate).with("target", 2));
    batch.insert(1, Action::new(1, ActionKind::Eliminate).with("target", 4));
    game.step(batch);
    assert!(matches!(game.state, GameState::NightDoctor));
    // The doctor protects the seer.
    game.step(single(Action::new(3, ActionKind::Protect).with("target", 2)));
    // The seer investigates wolf 0 and learns its role privately.
    game.step(single(Action::new(2, ActionKind::Investigate).with("target", 0)));
    assert!(game.players[2].alive);
    assert_eq!(game.log().count(EventKind::PlayerEliminated), 0);

    let seer_view = game.log().view_for(Some(2));
    assert!(seer_view
        .iter()
        .any(|e| e.kind == EventKind::InvestigationResult));
    let villager_view = game.log().view_for(Some(4));
    assert!(!villager_view
        .iter()
        .any(|e| e.kind == EventKind::InvestigationResult));
}

#[test]
fn first_submitted_wolf_target_stands() {
    let mut game = seven_game(7);
    let mut batch = BTreeMap::new();
    batch.insert(0, Action::new(0, ActionKind::Eliminate).with("target", 4));
    batch.insert(1, Action::new(1, ActionKind::Eliminate).with("target", 5));
    game.step(batch);
    // No doctor save: protect someone else, investigate, then check who died.
    game.step(single(Action::new(3, ActionKind::Protect).with("target", 3)));
    game.step(single(Action::new(2, ActionKind::Investigate).with("target", 5)));
    assert!(!game.players[4].alive);
    assert!(game.players[5].alive);
}

#[test]
fn previous_speaker_cannot_bid() {
    let mut game = seven_game(9);
    let mut batch = BTreeMap::new();
    batch.insert(0, Action::new(0, ActionKind::Eliminate).with("target", 6));
    game.step(batch);
    game.step(single(Action::new(3, ActionKind::Protect).with("target", 3)));
    game.step(single(Action::new(2, ActionKind::Investigate).with("target", 0)));

    // First bidding round: player 4 outbids everyone and speaks.
    let GameState::DayBidding { bids } = &game.state else {
        panic!("expected bidding");
    };
    let bidders = bids.pending();
    let batch: BTreeMap<PlayerId, Action> = bidders
        .iter()
        .map(|p| {
            let bid = if *p == 4 { 4 } else { 0 };
            (*p, Action::new(*p, ActionKind::Bid).with("bid", bid))
        })
        .collect();
    game.step(batch);
    assert!(matches!(game.state, GameState::DayDebate { speaker: 4 }));
    game.step(single(
        Action::new(4, ActionKind::Speak).with("statement", "I saw something."),
    ));

    // Next bidding round excludes the previous speaker.
    let GameState::DayBidding { bids } = &game.state else {
        panic!("expected bidding");
    };
    assert!(!bids.is_eligible(4));
    assert!(bids.is_eligible(5));
}

#[test]
fn bid_out_of_range_is_rejected() {
    let mut game = tiny_game(11);
    game.step(single(Action::new(0, ActionKind::Eliminate).with("target", 1)));
    let errors_before = game.log().count(EventKind::Error);
    game.step(single(Action::new(0, ActionKind::Bid).with("bid", 9)));
    assert!(game.log().count(EventKind::Error) > errors_before);
    let GameState::DayBidding { bids } = &game.state else {
        panic!("expected bidding");
    };
    assert!(!bids.has_cast(0));
}

#[test]
fn dead_players_cannot_vote() {
    let mut game = seven_game(13);
    let mut batch = BTreeMap::new();
    batch.insert(0, Action::new(0, ActionKind::Eliminate).with("target", 6));
    game.step(batch);
    game.step(single(Action::new(3, ActionKind::Protect).with("target", 3)));
    game.step(single(Action::new(2, ActionKind::Investigate).with("target", 0)));
    assert!(!game.players[6].alive);
    let errors_before = game.log().count(EventKind::Error);
    game.step(single(Action::new(6, ActionKind::Bid).with("bid", 2)));
    assert!(game.log().count(EventKind::Error) > errors_before);
}

#[test]
fn village_wins_when_wolves_are_gone() {
    let mut game = tiny_game(17);
    game.players[0].alive = false;
    assert!(game.check_game_over());
    assert_eq!(game.winner().as_deref(), Some("village"));
    assert_eq!(game.win_reason().as_deref(), Some("All werewolves eliminated"));
}

#[test]
fn round_cap_forces_a_draw() {
    let mut game = tiny_game(19);
    game.cfg.max_rounds = 1;
    game.step(single(Action::new(0, ActionKind::Eliminate).with("target", 1)));
    bid_all(&mut game, &[(0, 0), (2, 0)]);
    let speaker = game.current_actors()[0];
    game.step(single(
        Action::new(speaker, ActionKind::Speak).with("statement", "hm"),
    ));
    let mut votes = BTreeMap::new();
    votes.insert(0, Action::new(0, ActionKind::Skip));
    votes.insert(2, Action::new(2, ActionKind::Skip));
    game.step(votes);
    assert!(game.terminal());
    assert_eq!(game.winner(), None);
    assert!(game.draw);
}

#[test]
fn bidding_tie_break_is_deterministic_per_seed() {
    let run = |seed: u64| {
        let mut game = seven_game(seed);
        let mut batch = BTreeMap::new();
        batch.insert(0, Action::new(0, ActionKind::Eliminate).with("target", 6));
        game.step(batch);
        game.step(single(Action::new(3, ActionKind::Protect).with("target", 6)));
        game.step(single(Action::new(2, ActionKind::Investigate).with("target", 0)));
        let GameState::DayBidding { bids } = &game.state else {
            panic!("expected bidding");
        };
        let bidders = bids.pending();
        let batch: BTreeMap<PlayerId, Action> = bidders
            .iter()
            .map(|p| (*p, Action::new(*p, ActionKind::Bid).with("bid", 2)))
            .collect();
        game.step(batch);
        let GameState::DayDebate { speaker } = game.state else {
            panic!("expected debate");
        };
        speaker
    };
    assert_eq!(run(23), run(23));
}
