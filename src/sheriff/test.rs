#![cfg(test)]

use super::*;
use crate::engine::Engine;
use crate::event::{EventKind, GameLog};
use std::collections::BTreeMap;

fn new_game(n_players: usize, seed: u64) -> Sheriff {
    let cfg = SheriffConfig {
        n_players,
        seed,
        ..SheriffConfig::default()
    };
    let mut game = Sheriff::new(cfg, GameLog::new("test")).unwrap();
    game.reset();
    game
}

fn single(action: Action) -> BTreeMap<PlayerId, Action> {
    let mut batch = BTreeMap::new();
    batch.insert(action.player, action);
    batch
}

fn card_named(game: &Sheriff, name: &str) -> CardId {
    (0..game.cards.len())
        .find(|c| game.cards[*c].name == name)
        .unwrap()
}

/// Drives a full round where every merchant skips the market, bags one card,
/// declares apples, offers nothing, and the sheriff passes everyone.
fn play_quiet_round(game: &mut Sheriff) {
    for merchant in game.merchants() {
        game.step(single(Action::new(merchant, ActionKind::Skip)));
    }
    for merchant in game.merchants() {
        let card = game.players[merchant].hand[0];
        game.step(single(
            Action::new(merchant, ActionKind::LoadBag)
                .with("cards", Value::Array(vec![Value::from(card)])),
        ));
    }
    for merchant in game.merchants() {
        game.step(single(
            Action::new(merchant, ActionKind::Declare)
                .with("goods", "apples")
                .with("count", 1),
        ));
    }
    for merchant in game.merchants() {
        game.step(single(Action::new(merchant, ActionKind::Skip)));
    }
    // No offers were made, so the engine goes straight to inspection.
    let sheriff = game.sheriff;
    for merchant in game.merchants() {
        game.step(single(
            Action::new(sheriff, ActionKind::Inspect)
                .with("merchant", merchant)
                .with("choice", "pass"),
        ));
    }
}

#[test]
fn quiet_round_restores_hand_sizes_and_rotates_the_sheriff() {
    let mut game = new_game(4, 1);
    assert_eq!(game.sheriff, 0);
    play_quiet_round(&mut game);
    assert_eq!(game.sheriff, 1);
    assert_eq!(game.round, 2);
    for p in 0..4 {
        assert_eq!(game.players[p].hand.len(), game.cfg.hand_size);
        assert!(game.players[p].bag.is_empty());
    }
}

#[test]
fn game_ends_after_the_sheriff_rotations() {
    let mut game = new_game(3, 2);
    // 3 players serve 3 times each: nine rounds.
    for _ in 0..9 {
        assert!(!game.terminal());
        play_quiet_round(&mut game);
    }
    assert!(game.terminal());
    assert!(game.winner().is_some());
    assert_eq!(game.win_reason().as_deref(), Some("Highest final score"));
}

#[test]
fn bribe_then_inspect_refunds_the_gold() {
    let mut game = new_game(3, 3);
    let apple = card_named(&game, "apples");
    // Sheriff 0 accepted a 5-gold bribe from merchant 1 during negotiation.
    game.players[0].gold = 55;
    game.players[1].gold = 45;
    game.accepted_bribes.push(AcceptedBribe {
        merchant: 1,
        gold: 5,
        bag_goods: vec![],
    });
    game.players[1].bag = vec![apple];
    game.players[1].declared = Some((LegalType::Apples, 1));
    game.state = GameState::Inspect {
        queue: vec![1, 2],
        next: 0,
    };

    game.step(single(
        Action::new(0, ActionKind::Inspect)
            .with("merchant", 1)
            .with("choice", "inspect"),
    ));

    let refund = game
        .log()
        .entries()
        .iter()
        .find(|e| e.data.get("bribe_refund").is_some())
        .expect("refund event");
    assert_eq!(refund.data["gold"], 5);
    // Refund restores the pre-bribe balance, then the truthful-inspection
    // penalty moves 2 gold from sheriff to merchant.
    assert_eq!(game.players[0].gold, 48);
    assert_eq!(game.players[1].gold, 52);
    // The apple was delivered to the stand.
    assert_eq!(game.players[1].stand, vec![apple]);
}

#[test]
fn untruthful_inspection_confiscates_and_fines() {
    let mut game = new_game(3, 4);
    let apple = card_named(&game, "apples");
    let silk = card_named(&game, "silk");
    game.players[1].bag = vec![apple, silk];
    game.players[1].declared = Some((LegalType::Apples, 2));
    game.state = GameState::Inspect {
        queue: vec![1, 2],
        next: 0,
    };
    let sheriff_gold = game.players[0].gold;
    let merchant_gold = game.players[1].gold;

    game.step(single(
        Action::new(0, ActionKind::Inspect)
            .with("merchant", 1)
            .with("choice", "inspect"),
    ));

    // The silk (penalty 4) is confiscated; the apple is delivered.
    assert_eq!(game.players[1].stand, vec![apple]);
    assert!(game.discard_left.contains(&silk));
    assert_eq!(game.players[0].gold, sheriff_gold + 4);
    assert_eq!(game.players[1].gold, merchant_gold - 4);
}

#[test]
fn pass_delivers_promised_bag_goods_to_the_sheriff() {
    let mut game = new_game(3, 5);
    let apple = card_named(&game, "apples");
    let silk = card_named(&game, "silk");
    game.players[1].bag = vec![apple, silk];
    game.players[1].declared = Some((LegalType::Apples, 2));
    game.accepted_bribes.push(AcceptedBribe {
        merchant: 1,
        gold: 0,
        bag_goods: vec![silk],
    });
    game.state = GameState::Inspect {
        queue: vec![1, 2],
        next: 0,
    };

    game.step(single(
        Action::new(0, ActionKind::Inspect)
            .with("merchant", 1)
            .with("choice", "pass"),
    ));

    assert_eq!(game.players[1].stand, vec![apple]);
    assert_eq!(game.players[0].stand, vec![silk]);
}

#[test]
fn empty_bag_is_force_loaded() {
    let mut game = new_game(3, 6);
    for merchant in game.merchants() {
        game.step(single(Action::new(merchant, ActionKind::Skip)));
    }
    let first_card = game.players[1].hand[0];
    game.step(single(
        Action::new(1, ActionKind::LoadBag).with("cards", Value::Array(vec![])),
    ));
    assert_eq!(game.players[1].bag, vec![first_card]);
    assert_eq!(game.players[1].hand.len(), game.cfg.hand_size - 1);
}

#[test]
fn invalid_declaration_defaults_to_apples() {
    let mut game = new_game(3, 7);
    for merchant in game.merchants() {
        game.step(single(Action::new(merchant, ActionKind::Skip)));
    }
    for merchant in game.merchants() {
        let card = game.players[merchant].hand[0];
        game.step(single(
            Action::new(merchant, ActionKind::LoadBag)
                .with("cards", Value::Array(vec![Value::from(card)])),
        ));
    }
    // Declares a count that does not match the bag.
    game.step(single(
        Action::new(game.merchants()[0], ActionKind::Declare)
            .with("goods", "silk")
            .with("count", 3),
    ));
    let merchant = game.merchants()[0];
    assert_eq!(game.players[merchant].declared, Some((LegalType::Apples, 1)));
}

#[test]
fn accepted_bribe_moves_gold_and_stand_goods() {
    let mut game = new_game(3, 8);
    let apple = card_named(&game, "apples");
    game.players[1].stand.push(apple);
    game.state = GameState::NegotiateOffers {
        round_no: 1,
        pending: game.merchants(),
        offers: BTreeMap::new(),
    };
    game.step(single(
        Action::new(1, ActionKind::Offer)
            .with("gold", 5)
            .with("stand_goods", Value::Array(vec![Value::from(apple)])),
    ));
    game.step(single(Action::new(2, ActionKind::Skip)));
    assert!(matches!(game.state, GameState::NegotiateResponses { .. }));
    game.step(single(
        Action::new(0, ActionKind::BribeResponse)
            .with("merchant", 1)
            .with("accept", true),
    ));
    assert_eq!(game.players[0].gold, 55);
    assert_eq!(game.players[1].gold, 45);
    assert!(game.players[0].stand.contains(&apple));
    assert!(!game.players[1].stand.contains(&apple));
    assert!(matches!(game.state, GameState::Inspect { .. }));
}

#[test]
fn offer_cannot_exceed_gold() {
    let mut game = new_game(3, 9);
    game.players[1].gold = 2;
    game.state = GameState::NegotiateOffers {
        round_no: 1,
        pending: game.merchants(),
        offers: BTreeMap::new(),
    };
    let errors_before = game.log().count(EventKind::Error);
    game.step(single(Action::new(1, ActionKind::Offer).with("gold", 10)));
    assert!(game.log().count(EventKind::Error) > errors_before);
}

#[test]
fn king_and_queen_bonuses_with_tie_rules() {
    let mut game = new_game(4, 10);
    let apples: Vec<CardId> = (0..game.cards.len())
        .filter(|c| game.cards[*c].name == "apples")
        .take(6)
        .collect();
    for p in 0..4 {
        game.players[p].stand.clear();
    }
    // Player 0 has three apples, player 1 two, player 2 one.
    game.players[0].stand.extend(&apples[0..3]);
    game.players[1].stand.extend(&apples[3..5]);
    game.players[2].stand.extend(&apples[5..6]);
    let bonuses = game.royal_bonuses();
    assert_eq!(bonuses[&0], 20);
    assert_eq!(bonuses[&1], 10);
    assert_eq!(bonuses[&2], 0);

    // A tie at the top voids both King and Queen for that good.
    game.players[1].stand.push(apples[5]);
    game.players[2].stand.clear();
    game.players[2].stand.extend(&apples[0..3]);
    game.players[0].stand.clear();
    game.players[0].stand.extend(&apples[3..5]);
    // Now players 1 and 2 both hold three; player 0 holds two.
    let counts: Vec<usize> = (0..4).map(|p| game.stand_count(p, LegalType::Apples)).collect();
    assert_eq!(counts[1], 3);
    assert_eq!(counts[2], 3);
    let bonuses = game.royal_bonuses();
    assert_eq!(bonuses[&1], 0);
    assert_eq!(bonuses[&2], 0);
    assert_eq!(bonuses[&0], 0);
}

#[test]
fn royal_goods_count_as_their_type_for_bonuses() {
    let cfg = SheriffConfig {
        n_players: 4,
        seed: 11,
        include_royal: true,
        ..SheriffConfig::default()
    };
    let mut game = Sheriff::new(cfg, GameLog::new("test")).unwrap();
    game.reset();
    for p in 0..4 {
        game.players[p].stand.clear();
    }
    let golden = card_named(&game, "golden_apples");
    let apples: Vec<CardId> = (0..game.cards.len())
        .filter(|c| game.cards[*c].name == "apples")
        .take(2)
        .collect();
    // Golden apples count as three apples for the tally.
    game.players[0].stand.push(golden);
    game.players[1].stand.extend(&apples);
    assert_eq!(game.stand_count(0, LegalType::Apples), 3);
    assert_eq!(game.stand_count(1, LegalType::Apples), 2);
    let bonuses = game.royal_bonuses();
    assert_eq!(bonuses[&0], 20);
    assert_eq!(bonuses[&1], 10);
}

#[test]
fn sheriff_can_end_negotiation_early() {
    let mut game = new_game(3, 12);
    game.state = GameState::NegotiateResponses {
        round_no: 1,
        pending: vec![1, 2],
        offers: BTreeMap::new(),
    };
    game.step(single(Action::new(0, ActionKind::Skip)));
    assert!(matches!(game.state, GameState::Inspect { .. }));
    assert!(game.accepted_bribes.is_empty());
}

#[test]
fn inspection_must_follow_queue_order() {
    let mut game = new_game(3, 13);
    game.state = GameState::Inspect {
        queue: vec![1, 2],
        next: 0,
    };
    let errors_before = game.log().count(EventKind::Error);
    game.step(single(
        Action::new(0, ActionKind::Inspect)
            .with("merchant", 2)
            .with("choice", "pass"),
    ));
    assert!(game.log().count(EventKind::Error) > errors_before);
    let GameState::Inspect { next, .. } = game.state else {
        panic!("expected inspect phase");
    };
    assert_eq!(next, 0);
}
