use parking_lot::Mutex;
use server::clock::ManualClock;
use server::error::{ForbiddenReason, RoomError, StateReason};
use server::hub::Notifier;
use server::protocol::{JoinTicket, RoomStatusView, ServerMessage};
use server::room::{GameId, RoomStatus, TerminationCheck, Timeouts};
use server::rooms::RoomManager;
use server::session::Session;
use server::store::InMemoryRoomStore;
use std::sync::Arc;

#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<(GameId, ServerMessage)>>,
    closed: Mutex<Vec<GameId>>,
}

impl RecordingNotifier {
    fn take(&self) -> Vec<ServerMessage> {
        self.events.lock().drain(..).map(|(_, msg)| msg).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn publish(&self, game_id: GameId, message: ServerMessage) {
        self.events.lock().push((game_id, message));
    }

    fn close(&self, game_id: GameId) {
        self.closed.lock().push(game_id);
    }
}

struct Harness {
    manager: RoomManager,
    clock: Arc<ManualClock>,
    notifier: Arc<RecordingNotifier>,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = RoomManager::with_seed(
        Arc::new(InMemoryRoomStore::new()),
        notifier.clone(),
        clock.clone(),
        Timeouts::default(),
        42,
    );
    Harness {
        manager,
        clock,
        notifier,
    }
}

fn session(ticket: &JoinTicket) -> Session {
    Session::new(ticket.game_id, ticket.token)
}

fn fill_room(h: &Harness, players: u8) -> Vec<JoinTicket> {
    let host = h.manager.create_room("Host", players).unwrap();
    let mut tickets = vec![host.clone()];
    for i in 2..=players {
        tickets.push(h.manager.join_room(&host.room_code, &format!("p{i}")).unwrap());
    }
    tickets
}

fn started_room(h: &Harness, players: u8) -> Vec<JoinTicket> {
    let tickets = fill_room(h, players);
    h.manager.start_game(session(&tickets[0])).unwrap();
    h.notifier.take();
    tickets
}

fn current_turn(h: &Harness, ticket: &JoinTicket) -> u8 {
    h.manager.snapshot(ticket.game_id).unwrap().current_turn
}

#[test]
fn seats_are_assigned_in_join_order() {
    let h = harness();
    let tickets = fill_room(&h, 4);
    let seats: Vec<u8> = tickets.iter().map(|t| t.seat).collect();
    assert_eq!(seats, vec![1, 2, 3, 4]);
    assert!(tickets.iter().all(|t| t.game_id == tickets[0].game_id));
    assert_eq!(tickets[0].room_code.len(), 6);
    assert!(tickets[0]
        .room_code
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
}

#[test]
fn full_room_rejects_new_names_but_accepts_rejoin() {
    let h = harness();
    let tickets = fill_room(&h, 2);
    let code = &tickets[0].room_code;

    let err = h.manager.join_room(code, "late").unwrap_err();
    assert_eq!(err, RoomError::InvalidState(StateReason::Full));

    let again = h.manager.join_room(&code.to_lowercase(), "  P2 ").unwrap();
    assert!(again.rejoined);
    assert_eq!(again.seat, 2);
    assert_eq!(again.token, tickets[1].token);
}

#[test]
fn create_validates_name_and_capacity() {
    let h = harness();
    for capacity in [0, 1, 9] {
        assert!(matches!(
            h.manager.create_room("Host", capacity),
            Err(RoomError::BadRequest(_))
        ));
    }
    assert!(matches!(
        h.manager.create_room("   ", 4),
        Err(RoomError::BadRequest(_))
    ));
    assert_eq!(
        h.manager.join_room("NOPE00", "ann").unwrap_err(),
        RoomError::NotFound
    );
}

#[test]
fn unstarted_room_expires_after_five_minutes() {
    let h = harness();
    let host = h.manager.create_room("Host", 3).unwrap();

    h.clock.advance_secs(300);
    match h.manager.room_status(&host.room_code, None) {
        RoomStatusView::Waiting {
            time_left_seconds, ..
        } => assert_eq!(time_left_seconds, 0),
        other => panic!("expected waiting, got {other:?}"),
    }

    h.clock.advance_secs(1);
    assert_eq!(
        h.manager.join_room(&host.room_code, "ann").unwrap_err(),
        RoomError::InvalidState(StateReason::Expired)
    );
    assert_eq!(
        h.manager.join_room(&host.room_code, "ann").unwrap_err(),
        RoomError::NotFound
    );
    assert_eq!(
        h.manager.room_status(&host.room_code, None),
        RoomStatusView::Expired
    );
    assert_eq!(*h.notifier.closed.lock(), vec![host.game_id]);
}

#[test]
fn status_check_expires_room_on_its_own() {
    let h = harness();
    let host = h.manager.create_room("Host", 2).unwrap();
    h.clock.advance_secs(301);
    assert_eq!(
        h.manager.room_status(&host.room_code, Some(host.token)),
        RoomStatusView::Expired
    );
    assert_eq!(
        h.manager.start_game(session(&host)).unwrap_err(),
        RoomError::NotFound
    );
}

#[test]
fn room_status_reports_lobby_start_and_removal() {
    let h = harness();
    let tickets = fill_room(&h, 3);
    let code = &tickets[0].room_code;

    match h.manager.room_status(code, Some(tickets[2].token)) {
        RoomStatusView::Waiting {
            seats, capacity, ..
        } => {
            assert_eq!(capacity, 3);
            assert_eq!(seats.len(), 3);
        }
        other => panic!("expected waiting, got {other:?}"),
    }

    h.manager.remove_seat(session(&tickets[0]), 2).unwrap();
    assert_eq!(
        h.manager.room_status(code, Some(tickets[1].token)),
        RoomStatusView::Removed
    );

    let replacement = h.manager.join_room(code, "p4").unwrap();
    assert_eq!(replacement.seat, 3);
    h.manager.start_game(session(&tickets[0])).unwrap();
    assert_eq!(
        h.manager.room_status(code, Some(tickets[2].token)),
        RoomStatusView::Started {
            game_id: tickets[0].game_id
        }
    );
}

#[test]
fn only_the_host_starts_a_full_room() {
    let h = harness();
    let host = h.manager.create_room("Host", 3).unwrap();
    let p2 = h.manager.join_room(&host.room_code, "p2").unwrap();

    assert_eq!(
        h.manager.start_game(session(&host)).unwrap_err(),
        RoomError::InvalidState(StateReason::NotFull)
    );
    let p3 = h.manager.join_room(&host.room_code, "p3").unwrap();
    assert_eq!(
        h.manager.start_game(session(&p3)).unwrap_err(),
        RoomError::Forbidden(ForbiddenReason::HostOnly)
    );

    let snapshot = h.manager.start_game(session(&host)).unwrap();
    assert_eq!(snapshot.status, RoomStatus::InProgress);
    assert!(snapshot.seats.iter().all(|s| s.hand_size > 0));
    assert_eq!(
        snapshot.seats.iter().map(|s| s.hand_size).sum::<usize>(),
        52
    );

    assert_eq!(
        h.manager.start_game(session(&host)).unwrap_err(),
        RoomError::InvalidState(StateReason::AlreadyStarted)
    );
    assert_eq!(
        h.manager.join_room(&host.room_code, "late").unwrap_err(),
        RoomError::InvalidState(StateReason::AlreadyStarted)
    );
    // a seated player may still come back by name
    assert!(h.manager.join_room(&host.room_code, "P2").unwrap().rejoined);
    assert_eq!(p2.seat, 2);
}

#[test]
fn seven_of_hearts_opens_and_turn_advances() {
    let h = harness();
    let tickets = started_room(&h, 4);

    let opener = tickets
        .iter()
        .find(|t| {
            h.manager
                .seat_view(session(t))
                .unwrap()
                .your_hand
                .iter()
                .any(|c| c.id == 7)
        })
        .unwrap();
    assert_eq!(current_turn(&h, opener), opener.seat);

    let view = h.manager.play_card(session(opener), 7).unwrap();
    assert_eq!(view.room.current_turn, opener.seat % 4 + 1);
    assert_eq!(view.room.layout["H"].len(), 1);
    assert_eq!(view.room.layout["H"][0].code, "7H");
    assert!(view.your_hand.iter().all(|c| c.id != 7));
    let next_turn = view.room.current_turn;
    assert!(h
        .notifier
        .take()
        .iter()
        .any(|m| matches!(m, ServerMessage::RoomState(s) if s.current_turn == next_turn)));
}

#[test]
fn empty_layout_only_takes_sevens() {
    let h = harness();
    let tickets = started_room(&h, 4);
    let turn = current_turn(&h, &tickets[0]);
    let player = &tickets[usize::from(turn) - 1];

    let view = h.manager.seat_view(session(player)).unwrap();
    assert!(!view.valid_moves.is_empty());
    assert!(view.valid_moves.iter().all(|id| (id - 1) % 13 == 6));

    // card 21 is the 8 of Diamonds
    assert_eq!(
        h.manager.play_card(session(player), 21).unwrap_err(),
        RoomError::InvalidMove
    );
    assert!(matches!(
        h.manager.play_card(session(player), 53),
        Err(RoomError::InvalidMove)
    ));
}

#[test]
fn acting_out_of_turn_is_forbidden() {
    let h = harness();
    let tickets = started_room(&h, 3);
    let turn = current_turn(&h, &tickets[0]);
    let other = tickets.iter().find(|t| t.seat != turn).unwrap();

    assert_eq!(
        h.manager.play_card(session(other), 7).unwrap_err(),
        RoomError::Forbidden(ForbiddenReason::NotYourTurn)
    );
    assert_eq!(
        h.manager.pass_turn(session(other)).unwrap_err(),
        RoomError::Forbidden(ForbiddenReason::NotYourTurn)
    );

    let player = &tickets[usize::from(turn) - 1];
    let view = h.manager.pass_turn(session(player)).unwrap();
    assert_eq!(view.room.current_turn, turn % 3 + 1);
}

#[test]
fn halted_room_rejects_moves_until_reconnect() {
    let h = harness();
    let tickets = started_room(&h, 4);
    let turn = current_turn(&h, &tickets[0]);
    let player = &tickets[usize::from(turn) - 1];
    let absent = tickets.iter().find(|t| t.seat != turn).unwrap();

    assert!(h.manager.on_disconnect(session(absent)).unwrap());
    assert!(!h.manager.on_disconnect(session(player)).unwrap());
    let events = h.notifier.take();
    assert!(events.iter().any(|m| matches!(
        m,
        ServerMessage::PlayerDisconnected { seat, reconnect_time_left: 120 } if *seat == absent.seat
    )));

    assert_eq!(
        h.manager.play_card(session(player), 7).unwrap_err(),
        RoomError::InvalidState(StateReason::Halted)
    );
    assert_eq!(
        h.manager.pass_turn(session(player)).unwrap_err(),
        RoomError::InvalidState(StateReason::Halted)
    );
    assert_eq!(
        h.manager.reconnect(session(player)).unwrap_err(),
        RoomError::Forbidden(ForbiddenReason::NotDisconnectedSeat)
    );

    h.clock.advance_secs(60);
    let view = h.manager.reconnect(session(absent)).unwrap();
    assert_eq!(view.room.status, RoomStatus::InProgress);
    assert_eq!(view.your_seat, absent.seat);
    assert_eq!(view.room.seats.len(), 4);
    assert!(h
        .notifier
        .take()
        .iter()
        .any(|m| matches!(m, ServerMessage::PlayerReconnected { seat } if *seat == absent.seat)));

    assert!(h.manager.play_card(session(player), 7).is_ok());
}

#[test]
fn rejoining_by_name_clears_the_disconnect() {
    let h = harness();
    let tickets = started_room(&h, 3);
    let code = &tickets[0].room_code;
    assert!(h.manager.on_disconnect(session(&tickets[1])).unwrap());

    h.clock.advance_secs(45);
    let again = h.manager.join_room(code, "P2").unwrap();
    assert!(again.rejoined);
    assert!(again.started);
    assert_eq!(again.seat, 2);
    assert_eq!(again.token, tickets[1].token);

    let snapshot = h.manager.snapshot(tickets[0].game_id).unwrap();
    assert_eq!(snapshot.status, RoomStatus::InProgress);
    assert_eq!(snapshot.disconnected_seat, None);
    assert_eq!(snapshot.reconnect_time_left, 0);
    assert_eq!(
        h.manager.check_termination(tickets[0].game_id).unwrap(),
        TerminationCheck::Idle
    );
}

#[test]
fn timed_out_seat_is_removed_and_others_renumbered() {
    let h = harness();
    let tickets = started_room(&h, 4);
    h.manager.on_disconnect(session(&tickets[1])).unwrap();

    h.clock.advance_secs(119);
    assert_eq!(
        h.manager.check_termination(tickets[0].game_id).unwrap(),
        TerminationCheck::Pending {
            seat: 2,
            time_remaining: 1
        }
    );

    h.clock.advance_secs(1);
    assert_eq!(
        h.manager.check_termination(tickets[0].game_id).unwrap(),
        TerminationCheck::Removed {
            seat: 2,
            name: "p2".to_string()
        }
    );

    let snapshot = h.manager.snapshot(tickets[0].game_id).unwrap();
    assert_eq!(snapshot.status, RoomStatus::InProgress);
    assert_eq!(snapshot.capacity, 3);
    let numbers: Vec<u8> = snapshot.seats.iter().map(|s| s.seat).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    let names: Vec<&str> = snapshot.seats.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Host", "p3", "p4"]);

    assert_eq!(
        h.manager.seat_view(session(&tickets[2])).unwrap().your_seat,
        2
    );
    assert_eq!(
        h.manager.seat_view(session(&tickets[1])).unwrap_err(),
        RoomError::SessionExpired
    );
    let events = h.notifier.take();
    assert!(events
        .iter()
        .any(|m| matches!(m, ServerMessage::SeatRemoved { seat: 2, .. })));
    assert!(!events
        .iter()
        .any(|m| matches!(m, ServerMessage::GameOver { .. })));
}

#[test]
fn timeout_with_two_players_terminates_the_game() {
    let h = harness();
    let tickets = started_room(&h, 2);
    h.manager.on_disconnect(session(&tickets[1])).unwrap();
    h.clock.advance_secs(120);

    assert!(matches!(
        h.manager.check_termination(tickets[0].game_id).unwrap(),
        TerminationCheck::Terminated { seat: 2, .. }
    ));
    let view = h.manager.seat_view(session(&tickets[0])).unwrap();
    assert_eq!(view.room.status, RoomStatus::Finished);
    assert!(view.room.game_over);
    assert!(view.room.terminated_by_disconnect);
    assert_eq!(view.room.winner, None);
    assert!(view.message.contains("did not reconnect"));
    assert!(h.notifier.take().iter().any(|m| matches!(
        m,
        ServerMessage::GameOver {
            winner: None,
            terminated_by_disconnect: true
        }
    )));
    assert_eq!(
        h.manager.check_termination(tickets[0].game_id).unwrap(),
        TerminationCheck::Finished
    );
}

#[test]
fn player_view_runs_the_timeout_check() {
    let h = harness();
    let tickets = started_room(&h, 3);
    h.manager.on_disconnect(session(&tickets[2])).unwrap();

    h.clock.advance_secs(125);
    h.manager.heartbeat(session(&tickets[0])).unwrap();
    h.manager.heartbeat(session(&tickets[1])).unwrap();

    let view = h.manager.player_view(session(&tickets[0])).unwrap();
    assert_eq!(view.room.seats.len(), 2);
    assert_eq!(view.room.disconnected_seat, None);
    assert_eq!(view.room.status, RoomStatus::InProgress);
    assert_eq!(
        h.manager.player_view(session(&tickets[2])).unwrap_err(),
        RoomError::SessionExpired
    );
}

#[test]
fn silent_seat_is_flagged_and_heartbeat_resumes() {
    let h = harness();
    let tickets = started_room(&h, 3);

    h.clock.advance_secs(20);
    assert_eq!(h.manager.check_inactivity(tickets[0].game_id).unwrap(), None);

    h.clock.advance_secs(1);
    h.manager.heartbeat(session(&tickets[0])).unwrap();
    assert_eq!(
        h.manager.check_inactivity(tickets[0].game_id).unwrap(),
        Some(2)
    );
    // already halted, nothing more to flag
    assert_eq!(h.manager.check_inactivity(tickets[0].game_id).unwrap(), None);
    assert_eq!(
        h.manager.snapshot(tickets[0].game_id).unwrap().status,
        RoomStatus::Halted
    );

    h.notifier.take();
    h.manager.heartbeat(session(&tickets[1])).unwrap();
    assert_eq!(
        h.manager.snapshot(tickets[0].game_id).unwrap().status,
        RoomStatus::InProgress
    );
    assert!(h
        .notifier
        .take()
        .iter()
        .any(|m| matches!(m, ServerMessage::PlayerReconnected { seat: 2 })));
}

#[test]
fn host_removal_rules() {
    let h = harness();
    let tickets = started_room(&h, 3);

    assert_eq!(
        h.manager.remove_seat(session(&tickets[1]), 3).unwrap_err(),
        RoomError::Forbidden(ForbiddenReason::HostOnly)
    );
    assert_eq!(
        h.manager.remove_seat(session(&tickets[0]), 1).unwrap_err(),
        RoomError::Forbidden(ForbiddenReason::CannotRemoveSelf)
    );
    assert_eq!(
        h.manager.remove_seat(session(&tickets[0]), 7).unwrap_err(),
        RoomError::NotFound
    );

    let snapshot = h.manager.remove_seat(session(&tickets[0]), 3).unwrap();
    assert_eq!(snapshot.seats.len(), 2);
    assert!(!snapshot.game_over);
    assert!(snapshot.current_turn <= 2);

    let snapshot = h.manager.remove_seat(session(&tickets[0]), 2).unwrap();
    assert!(snapshot.game_over);
    assert_eq!(snapshot.winner, None);
    assert!(!snapshot.terminated_by_disconnect);
    assert_eq!(
        h.manager.pass_turn(session(&tickets[0])).unwrap_err(),
        RoomError::InvalidState(StateReason::GameOver)
    );
}

#[test]
fn a_round_plays_out_to_a_winner_with_scores() {
    let h = harness();
    let tickets = started_room(&h, 3);
    let game_id = tickets[0].game_id;

    let mut winner = None;
    for _ in 0..2000 {
        let turn = current_turn(&h, &tickets[0]);
        let player = session(&tickets[usize::from(turn) - 1]);
        let view = h.manager.seat_view(player).unwrap();
        let view = match view.valid_moves.first() {
            Some(&card) => h.manager.play_card(player, card).unwrap(),
            None => h.manager.pass_turn(player).unwrap(),
        };
        if view.room.game_over {
            winner = view.room.winner;
            break;
        }
    }

    let winner = winner.expect("round should finish");
    let snapshot = h.manager.snapshot(game_id).unwrap();
    assert_eq!(snapshot.status, RoomStatus::Finished);
    assert_eq!(snapshot.current_turn, winner);
    let winner_seat = snapshot.seats.iter().find(|s| s.seat == winner).unwrap();
    assert_eq!(winner_seat.hand_size, 0);

    let scores = snapshot.scores.expect("scores once finished");
    assert_eq!(scores.len(), 3);
    assert_eq!(scores[0].seat, winner);
    assert_eq!(scores[0].score, 0);
    assert!(scores.windows(2).all(|w| w[0].score <= w[1].score));
    let held: usize = snapshot.seats.iter().map(|s| s.hand_size).sum();
    let laid: usize = snapshot.layout.values().map(Vec::len).sum();
    assert_eq!(held + laid, 52);

    assert!(h.notifier.take().iter().any(|m| matches!(
        m,
        ServerMessage::GameOver { winner: Some(w), terminated_by_disconnect: false } if *w == winner
    )));
    assert_eq!(
        h.manager
            .play_card(session(&tickets[usize::from(winner) - 1]), 7)
            .unwrap_err(),
        RoomError::InvalidState(StateReason::GameOver)
    );
}

#[test]
fn janitor_purges_only_stale_rooms() {
    let h = harness();
    let lobby = h.manager.create_room("Lobby", 4).unwrap();
    let running = started_room(&h, 2);
    let finished = started_room(&h, 2);
    h.manager
        .remove_seat(session(&finished[0]), 2)
        .unwrap();

    h.clock.advance_secs(301);
    assert_eq!(h.manager.purge_stale(), vec![lobby.game_id]);
    assert_eq!(
        h.manager.join_room(&lobby.room_code, "x").unwrap_err(),
        RoomError::NotFound
    );

    h.clock.advance_secs(3600);
    assert_eq!(h.manager.purge_stale(), vec![finished[0].game_id]);
    assert_eq!(
        h.manager.snapshot(finished[0].game_id).unwrap_err(),
        RoomError::NotFound
    );
    assert!(h.manager.snapshot(running[0].game_id).is_ok());
}
