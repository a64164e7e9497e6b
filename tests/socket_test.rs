//! Plays real games over a websocket against a server bound to an
//! ephemeral port.

use pokequiz::api;
use pokequiz::client::{
    ClientPhase, ConnectionConfig, ConnectionManager, ConnectionStatus, Expectation, RoundSession,
    SessionEvent, Submitted,
};
use pokequiz::config::{GameConfig, ServerConfig};
use pokequiz::error::{ClientError, ErrorCode};
use pokequiz::protocol::ServerMessage;
use pokequiz::state::AppState;
use pokequiz::types::{Answer, GameMode, Question, Stat};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::AbortHandle;

async fn spawn_server_at(game: GameConfig) -> SocketAddr {
    let state = Arc::new(AppState::new(ServerConfig {
        game,
        ..ServerConfig::default()
    }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, api::router(state)).await.unwrap();
    });
    addr
}

async fn spawn_server(game: GameConfig) -> String {
    ws_url(spawn_server_at(game).await)
}

fn ws_url(addr: SocketAddr) -> String {
    format!("ws://{}/ws", addr)
}

/// TCP relay in front of the server. `cut` drops every link that is open
/// right now; new connections are still relayed afterwards.
struct Relay {
    addr: SocketAddr,
    links: Arc<Mutex<Vec<AbortHandle>>>,
}

impl Relay {
    async fn spawn(upstream: SocketAddr) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let links = Arc::new(Mutex::new(Vec::new()));
        let accepted = links.clone();
        tokio::spawn(async move {
            while let Ok((mut inbound, _)) = listener.accept().await {
                let link = tokio::spawn(async move {
                    if let Ok(mut outbound) = TcpStream::connect(upstream).await {
                        let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                    }
                });
                accepted.lock().unwrap().push(link.abort_handle());
            }
        });
        Self { addr, links }
    }

    fn cut(&self) {
        for link in self.links.lock().unwrap().drain(..) {
            link.abort();
        }
    }
}

fn connection(endpoint: &str) -> ConnectionManager {
    ConnectionManager::new(
        ConnectionConfig::new(endpoint)
            .with_max_reconnect_attempts(1)
            .with_request_timeout(Duration::from_secs(2)),
    )
}

async fn player(endpoint: &str, name: &str) -> RoundSession {
    RoundSession::start(connection(endpoint), name).await.unwrap()
}

fn bulbasaur_hp() -> Question {
    Question::StatGuess {
        pokemon: "Bulbasaur".to_string(),
        stat: Stat::Hp,
        choices: vec![39, 44, 45, 50],
        answer: 45,
    }
}

#[tokio::test]
async fn test_single_round_over_websocket() {
    let endpoint = spawn_server(GameConfig {
        max_rounds: 1,
        ..GameConfig::default()
    })
    .await;

    let mut ash = player(&endpoint, "Ash").await;
    let code = ash.create_room().await.unwrap();
    assert!(ash.controller().is_host());

    let mut misty = player(&endpoint, "Misty").await;
    let room = misty.join_room(&code).await.unwrap();
    assert_eq!(room.players.len(), 2);
    assert_eq!(misty.controller().phase, ClientPhase::Lobby);

    ash.select_game(GameMode::StatGuess).await.unwrap();
    ash.start_game(Some(bulbasaur_hp())).await.unwrap();
    assert_eq!(ash.controller().phase, ClientPhase::Answering);

    // Either the broadcast arrives or Misty rehydrates; both open the round
    misty
        .expect_or_rehydrate(Duration::from_secs(2), |m| {
            matches!(m, ServerMessage::GameStarted { .. })
        })
        .await
        .unwrap();
    assert_eq!(misty.controller().phase, ClientPhase::Answering);
    assert_eq!(misty.controller().round, 1);

    let submitted = misty.submit(Answer::Value(45)).await.unwrap();
    assert!(matches!(
        submitted,
        Submitted::Accepted { correct: true, points_awarded } if points_awarded >= 100
    ));
    // Only one submission per round leaves the client
    assert_eq!(misty.submit(Answer::Value(44)).await.unwrap(), Submitted::Skipped);

    let submitted = ash.submit(Answer::Value(39)).await.unwrap();
    assert_eq!(
        submitted,
        Submitted::Accepted {
            correct: false,
            points_awarded: 0
        }
    );

    misty
        .expect_or_rehydrate(Duration::from_secs(2), |m| {
            matches!(m, ServerMessage::GameOver { .. })
        })
        .await
        .unwrap();
    let view = misty.controller();
    assert_eq!(view.phase, ClientPhase::GameOver);
    assert_eq!(view.leaderboard[0].name, "Misty");
    assert_eq!(view.leaderboard[1].name, "Ash");
}

#[tokio::test]
async fn test_countdown_sends_no_answer_sentinel() {
    let endpoint = spawn_server(GameConfig {
        max_rounds: 1,
        round_time: Duration::from_secs(1),
        ..GameConfig::default()
    })
    .await;

    let mut ash = player(&endpoint, "Ash").await;
    ash.create_room().await.unwrap();
    ash.select_game(GameMode::CompareStat).await.unwrap();
    ash.start_game(None).await.unwrap();

    let timed_out = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ash.next_event().await.unwrap() {
                SessionEvent::TimedOut { round } => return round,
                SessionEvent::Tick { remaining } => {
                    assert!(remaining <= Duration::from_secs(1));
                }
                _ => {}
            }
        }
    })
    .await
    .expect("countdown should run out");
    assert_eq!(timed_out, 1);

    let outcome = ash
        .expect_or_rehydrate(Duration::from_secs(2), |m| {
            matches!(m, ServerMessage::GameOver { .. })
        })
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        Expectation::Event(_) | Expectation::Rehydrated(_)
    ));
    assert_eq!(ash.controller().phase, ClientPhase::GameOver);
    assert_eq!(ash.controller().leaderboard[0].score, 0);
}

#[tokio::test]
async fn test_rejections_surface_error_codes() {
    let endpoint = spawn_server(GameConfig::default()).await;

    let mut brock = player(&endpoint, "Brock").await;
    match brock.join_room("NOPE").await {
        Err(ClientError::Rejected { code, .. }) => assert_eq!(code, ErrorCode::RoomNotFound),
        other => panic!("Expected RoomNotFound, got {:?}", other),
    }
    assert!(matches!(
        brock.start_game(None).await,
        Err(ClientError::NotInRoom)
    ));

    let mut ash = player(&endpoint, "Ash").await;
    let code = ash.create_room().await.unwrap();

    let mut copycat = player(&endpoint, "Ash").await;
    let err = copycat.join_room(&code).await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NameTaken));
    // The refused player still sees the room
    assert_eq!(copycat.controller().room_code.as_deref(), Some(code.as_str()));
    assert_eq!(copycat.controller().players.len(), 1);

    // Any member may pick the game; starting and ending stay with the host
    brock.join_room(&code).await.unwrap();
    let room = brock.select_game(GameMode::StatGuess).await.unwrap();
    assert_eq!(room.selected_game, Some(GameMode::StatGuess));
    let err = brock.start_game(None).await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NotHost));
    let err = brock.end_game().await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NotHost));

    let connection = ash.close();
    connection.stop().await;
    assert_eq!(connection.status(), ConnectionStatus::Stopped);
}

#[tokio::test]
async fn test_reconnect_mid_round_resumes_seat() {
    let server = spawn_server_at(GameConfig::default()).await;
    let relay = Relay::spawn(server).await;

    let mut ash = player(&ws_url(server), "Ash").await;
    let code = ash.create_room().await.unwrap();

    let misty_conn = ConnectionManager::new(
        ConnectionConfig::new(ws_url(relay.addr))
            .with_max_reconnect_attempts(3)
            .with_reconnect_backoff(Duration::from_millis(300))
            .with_request_timeout(Duration::from_secs(2)),
    );
    misty_conn.ensure_connection().await.unwrap();
    // Already up: nothing new is spawned
    misty_conn.ensure_connection().await.unwrap();
    let mut misty = RoundSession::start(misty_conn.clone(), "Misty").await.unwrap();
    misty.join_room(&code).await.unwrap();

    ash.select_game(GameMode::StatGuess).await.unwrap();
    ash.start_game(Some(bulbasaur_hp())).await.unwrap();
    misty
        .expect_or_rehydrate(Duration::from_secs(2), |m| {
            matches!(m, ServerMessage::GameStarted { .. })
        })
        .await
        .unwrap();
    assert_eq!(misty.controller().phase, ClientPhase::Answering);

    tokio::time::sleep(Duration::from_millis(300)).await;
    relay.cut();

    let mut status = misty_conn.watch_status();
    tokio::time::timeout(
        Duration::from_secs(2),
        status.wait_for(|s| *s != ConnectionStatus::Connected),
    )
    .await
    .expect("socket loss should be noticed")
    .unwrap();

    // Fails while down and is not replayed later
    let err = misty.submit(Answer::Value(45)).await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::TransportError));
    assert!(!misty.controller().has_submitted());
    assert_eq!(misty.controller().phase, ClientPhase::Answering);

    let room = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let SessionEvent::Resynced(room) = misty.next_event().await.unwrap() {
                return room;
            }
        }
    })
    .await
    .expect("session should resync after reconnect");

    assert!(room.player("Misty").unwrap().connected);
    assert_eq!(room.host_name.as_deref(), Some("Ash"));
    assert_eq!(misty.room_code(), Some(code.as_str()));
    assert_eq!(misty.controller().round, 1);
    assert_eq!(misty.controller().phase, ClientPhase::Answering);

    // Countdown continues from the original start, not from the reconnect
    let remaining = misty.controller().remaining(chrono::Utc::now());
    assert!(remaining < Duration::from_secs(20));
    assert!(remaining > Duration::from_secs(10));

    misty_conn.ensure_connection().await.unwrap();
    assert_eq!(misty_conn.status(), ConnectionStatus::Connected);

    let submitted = misty.submit(Answer::Value(45)).await.unwrap();
    assert!(matches!(submitted, Submitted::Accepted { correct: true, .. }));
    ash.submit(Answer::Value(39)).await.unwrap();

    let room = ash.rehydrate().await.unwrap();
    let results = room.last_results.expect("round should be resolved");
    assert_eq!(results.submissions.len(), 2);
    assert_eq!(
        results
            .submissions
            .iter()
            .filter(|s| s.player_name == "Misty")
            .count(),
        1
    );
}
