#![cfg(test)]

use super::*;
use crate::engine::Engine;
use crate::event::{EventKind, GameLog};
use std::collections::BTreeMap;

/// 5 players with fixed seats: good 0-2 (Merlin at 0), evil 3-4 (Assassin at 3).
fn fixed_game(seed: u64) -> Avalon {
    let cfg = AvalonConfig {
        n_players: 5,
        seed,
        role_assignment: Some(RoleAssignment {
            good: vec![0, 1, 2],
            evil: vec![3, 4],
        }),
        ..AvalonConfig::default()
    };
    let mut game = Avalon::new(cfg, GameLog::new("test")).unwrap();
    game.reset();
    game
}

fn single(action: Action) -> BTreeMap<PlayerId, Action> {
    let mut batch = BTreeMap::new();
    batch.insert(action.player, action);
    batch
}

fn propose(game: &mut Avalon, team: Vec<PlayerId>) {
    let leader = game.leader;
    game.step(single(Action::new(leader, ActionKind::ProposeTeam).with(
        "team",
        Value::Array(team.into_iter().map(Value::from).collect()),
    )));
}

fn skip_discussion(game: &mut Avalon) {
    while matches!(game.state, GameState::TeamDiscussion { .. }) {
        let speaker = game.current_actors()[0];
        game.step(single(Action::new(speaker, ActionKind::Skip)));
    }
}

fn team_vote_all(game: &mut Avalon, approve: bool) {
    let batch: BTreeMap<PlayerId, Action> = game
        .current_actors()
        .into_iter()
        .map(|p| {
            (
                p,
                Action::new(p, ActionKind::Vote)
                    .with("vote", if approve { "approve" } else { "reject" }),
            )
        })
        .collect();
    game.step(batch);
}

fn quest_vote(game: &mut Avalon, fails_from: &[PlayerId]) {
    let batch: BTreeMap<PlayerId, Action> = game
        .current_actors()
        .into_iter()
        .map(|p| {
            let vote = if fails_from.contains(&p) { "fail" } else { "success" };
            (p, Action::new(p, ActionKind::Vote).with("vote", vote))
        })
        .collect();
    game.step(batch);
}

/// Runs one full quest round: propose leader+next seats, approve, cast ballots.
fn run_quest(game: &mut Avalon, fails_from: &[PlayerId]) {
    let size = quest_size(game.n(), game.quest);
    let leader = game.leader;
    let mut team = vec![leader];
    team.extend((0..game.n()).filter(|p| *p != leader).take(size - 1));
    propose(game, team);
    skip_discussion(game);
    team_vote_all(game, true);
    quest_vote(game, fails_from);
}

#[test]
fn five_consecutive_rejections_hand_the_game_to_evil() {
    let mut game = fixed_game(2);
    for i in 0..5 {
        assert!(!game.terminal(), "game ended early at proposal {i}");
        let team = vec![game.leader, (game.leader + 1) % 5];
        propose(&mut game, team);
        skip_discussion(&mut game);
        team_vote_all(&mut game, false);
    }
    assert!(game.terminal());
    assert_eq!(game.winner().as_deref(), Some("evil"));
    assert_eq!(
        game.win_reason().as_deref(),
        Some("5 consecutive team rejections")
    );
    let end = game
        .log()
        .entries()
        .iter()
        .find(|e| e.kind == EventKind::GameEnd)
        .unwrap();
    assert_eq!(end.data["reason"], "5 consecutive team rejections");
}

#[test]
fn quest_bookkeeping_is_consistent() {
    let mut game = fixed_game(3);
    run_quest(&mut game, &[]);
    run_quest(&mut game, &[3]);
    run_quest(&mut game, &[]);
    let succeeded = game.quest_results.iter().filter(|q| q.succeeded).count();
    let failed = game.quest_results.iter().filter(|q| !q.succeeded).count();
    assert_eq!(succeeded + failed, game.quest_results.len());
    assert_eq!(game.log().count(EventKind::QuestResult), 3);
}

#[test]
fn three_successes_then_assassin_misses_merlin() {
    let mut game = fixed_game(5);
    run_quest(&mut game, &[]);
    run_quest(&mut game, &[]);
    run_quest(&mut game, &[]);
    assert!(matches!(game.state, GameState::Assassination));
    // Assassin (seat 3) shoots a servant, not Merlin (seat 0).
    game.step(single(Action::new(3, ActionKind::Eliminate).with("target", 1)));
    assert_eq!(game.winner().as_deref(), Some("good"));
}

#[test]
fn assassin_finding_merlin_wins_for_evil() {
    let mut game = fixed_game(5);
    run_quest(&mut game, &[]);
    run_quest(&mut game, &[]);
    run_quest(&mut game, &[]);
    game.step(single(Action::new(3, ActionKind::Eliminate).with("target", 0)));
    assert_eq!(game.winner().as_deref(), Some("evil"));
    assert_eq!(game.win_reason().as_deref(), Some("Assassin killed Merlin"));
}

#[test]
fn three_failed_quests_end_the_game() {
    let mut game = fixed_game(7);
    run_quest(&mut game, &[3]);
    run_quest(&mut game, &[3]);
    run_quest(&mut game, &[3]);
    assert!(game.terminal());
    assert_eq!(game.winner().as_deref(), Some("evil"));
    assert_eq!(game.win_reason().as_deref(), Some("Three quests failed"));
}

#[test]
fn wrong_team_size_is_rejected() {
    let mut game = fixed_game(11);
    let errors_before = game.log().count(EventKind::Error);
    propose(&mut game, vec![0, 1, 2]);
    assert!(game.log().count(EventKind::Error) > errors_before);
    assert!(matches!(game.state, GameState::TeamSelection));
    propose(&mut game, vec![0, 0]);
    assert!(matches!(game.state, GameState::TeamSelection));
    propose(&mut game, vec![0, 1]);
    assert!(matches!(game.state, GameState::TeamDiscussion { .. }));
}

#[test]
fn duplicate_statements_are_dropped() {
    let mut game = fixed_game(13);
    propose(&mut game, vec![0, 1]);
    let speaker = game.current_actors()[0];
    game.step(single(
        Action::new(speaker, ActionKind::Speak).with("statement", "Trust me."),
    ));
    let next = game.current_actors()[0];
    game.step(single(
        Action::new(next, ActionKind::Speak).with("statement", "I agree."),
    ));
    // The same player cannot land "Trust me." twice in this round; a later
    // speaker repeating someone else's words is fine.
    assert_eq!(game.log().count(EventKind::Discussion), 2);
    let third = game.current_actors()[0];
    game.step(single(
        Action::new(third, ActionKind::Speak).with("statement", "  TRUST ME. "),
    ));
    assert_eq!(game.log().count(EventKind::Discussion), 3);
}

#[test]
fn good_players_cannot_sabotage_quests() {
    let mut game = fixed_game(17);
    propose(&mut game, vec![0, 1]);
    skip_discussion(&mut game);
    team_vote_all(&mut game, true);
    let errors_before = game.log().count(EventKind::Error);
    game.step(single(Action::new(0, ActionKind::Vote).with("vote", "fail")));
    assert!(game.log().count(EventKind::Error) > errors_before);
    // Ballot was not recorded.
    let GameState::QuestVoting { ballots } = &game.state else {
        panic!("expected quest voting");
    };
    assert!(!ballots.has_cast(0));
}

#[test]
fn visibility_table() {
    let cfg = AvalonConfig {
        n_players: 7,
        seed: 1,
        include_percival: true,
        include_morgana: true,
        include_mordred: true,
        role_assignment: Some(RoleAssignment {
            good: vec![0, 1, 2, 3],
            evil: vec![4, 5, 6],
        }),
        ..AvalonConfig::default()
    };
    // Seats: 0 Merlin, 1 Percival, 2-3 Servants, 4 Assassin, 5 Morgana, 6 Mordred.
    let mut game = Avalon::new(cfg, GameLog::new("test")).unwrap();
    let obs = game.reset();

    // Merlin sees evil except Mordred.
    assert_eq!(obs[&0].data["known_evil"], serde_json::json!([4, 5]));
    // Percival sees Merlin and Morgana without distinction.
    assert_eq!(obs[&1].data["merlin_candidates"], serde_json::json!([0, 5]));
    // Servants see nothing.
    assert!(!obs[&2].data.contains_key("known_evil"));
    assert!(!obs[&2].data.contains_key("evil_team"));
    // Evil see each other.
    assert_eq!(obs[&4].data["evil_team"], serde_json::json!([5, 6]));
}

#[test]
fn quest_fail_thresholds() {
    assert_eq!(fails_needed(5, 3), 1);
    assert_eq!(fails_needed(7, 3), 2);
    assert_eq!(fails_needed(7, 2), 1);
    assert_eq!(fails_needed(10, 3), 2);
}

#[test]
fn anonymized_quest_ballots() {
    let mut game = fixed_game(19);
    propose(&mut game, vec![0, 3]);
    skip_discussion(&mut game);
    team_vote_all(&mut game, true);
    quest_vote(&mut game, &[3]);
    let result = game
        .log()
        .view_for(None)
        .into_iter()
        .find(|e| e.kind == EventKind::QuestResult)
        .unwrap();
    assert_eq!(result.data["fails"], 1);
    // The public record never names who cast the fail.
    assert!(result.data.get("votes").is_none());
}
