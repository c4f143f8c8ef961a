//! WebSocket protocol against a live server on a loopback port.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crash_round::core::rng::SequenceSeedSource;
use crash_round::game::{InMemoryHistoryStore, InMemoryLedger, RoundConfig};
use crash_round::network::{AuthConfig, Authenticator, ClientMessage, ErrorCode, GameServer, ServerConfig, ServerMessage};
use crash_round::{Amount, ParticipantId, RoundPhase, RoundSupervisor, SupervisorConfig};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Running {
    url: String,
    server: Arc<GameServer>,
    engine_shutdown: broadcast::Sender<()>,
}

impl Running {
    fn stop(&self) {
        self.server.shutdown();
        let _ = self.engine_shutdown.send(());
    }
}

async fn start(betting_window: Duration) -> Running {
    let config = SupervisorConfig {
        round: RoundConfig {
            betting_window,
            cooldown: Duration::from_millis(100),
            flight_duration: Duration::from_millis(1_500),
            tick_interval: Duration::from_millis(20),
        },
        ..SupervisorConfig::default()
    };
    let (supervisor, hub) = RoundSupervisor::new(
        config,
        Box::new(SequenceSeedSource::new([9; 32])),
        Arc::new(InMemoryLedger::with_opening_balance(Amount::from_minor(10_000))),
        Arc::new(InMemoryHistoryStore::default()),
    );
    let (engine_shutdown, rx) = broadcast::channel(1);
    tokio::spawn(supervisor.run(rx));

    let auth = Authenticator::new(AuthConfig {
        insecure_dev_mode: true,
        ..AuthConfig::default()
    })
    .unwrap();
    let server = Arc::new(GameServer::new(ServerConfig::default(), hub, auth));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let serving = server.clone();
    tokio::spawn(async move { serving.serve(listener).await });

    Running {
        url,
        server,
        engine_shutdown,
    }
}

async fn send(client: &mut Client, msg: &ClientMessage) {
    let text = serde_json::to_string(msg).unwrap();
    client.send(Message::Text(text)).await.unwrap();
}

async fn recv(client: &mut Client) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for server")
            .expect("connection closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Skip broadcast round events until a direct reply arrives.
async fn reply(client: &mut Client) -> ServerMessage {
    loop {
        match recv(client).await {
            ServerMessage::Tick { .. }
            | ServerMessage::RoundCreated { .. }
            | ServerMessage::BetPlaced { .. }
            | ServerMessage::FlightStarted { .. }
            | ServerMessage::CashedOut { .. }
            | ServerMessage::Crashed { .. }
            | ServerMessage::RoundAborted { .. }
            | ServerMessage::Snapshot { .. } => continue,
            other => return other,
        }
    }
}

#[tokio::test]
async fn test_snapshot_then_authenticated_bet() {
    let running = start(Duration::from_secs(10)).await;
    let (mut client, _) = connect_async(running.url.as_str()).await.unwrap();

    match recv(&mut client).await {
        ServerMessage::Snapshot { round, history } => {
            assert_eq!(round.phase, RoundPhase::Waiting);
            assert!(round.crash_point.is_none());
            assert!(history.is_empty());
        }
        other => panic!("expected snapshot first, got {:?}", other),
    }

    // Spectators cannot bet.
    send(
        &mut client,
        &ClientMessage::PlaceBet {
            stake: 10.0,
            auto_cash_out_threshold: None,
        },
    )
    .await;
    match reply(&mut client).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::NotAuthenticated),
        other => panic!("expected error, got {:?}", other),
    }

    send(&mut client, &ClientMessage::Auth { token: "alice".into() }).await;
    match reply(&mut client).await {
        ServerMessage::AuthResult {
            success, participant_id, ..
        } => {
            assert!(success);
            assert_eq!(participant_id, Some(ParticipantId::from_subject("alice")));
        }
        other => panic!("expected auth result, got {:?}", other),
    }

    send(
        &mut client,
        &ClientMessage::PlaceBet {
            stake: 12.5,
            auto_cash_out_threshold: Some(2.0),
        },
    )
    .await;
    match reply(&mut client).await {
        ServerMessage::BetAccepted { stake, .. } => assert_eq!(stake, Amount::from_minor(1_250)),
        other => panic!("expected bet accepted, got {:?}", other),
    }

    send(
        &mut client,
        &ClientMessage::PlaceBet {
            stake: 1.0,
            auto_cash_out_threshold: None,
        },
    )
    .await;
    match reply(&mut client).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::DuplicateBet),
        other => panic!("expected duplicate bet error, got {:?}", other),
    }

    send(&mut client, &ClientMessage::Ping { timestamp: 42 }).await;
    match reply(&mut client).await {
        ServerMessage::Pong { timestamp, .. } => assert_eq!(timestamp, 42),
        other => panic!("expected pong, got {:?}", other),
    }

    running.stop();
}

#[tokio::test]
async fn test_invalid_frames_reported() {
    let running = start(Duration::from_secs(10)).await;
    let (mut client, _) = connect_async(running.url.as_str()).await.unwrap();
    assert!(matches!(recv(&mut client).await, ServerMessage::Snapshot { .. }));

    client.send(Message::Text("{\"type\":\"launch\"}".into())).await.unwrap();
    match reply(&mut client).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::InvalidMessage),
        other => panic!("expected error, got {:?}", other),
    }

    client.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
    match reply(&mut client).await {
        ServerMessage::Error { code, .. } => assert_eq!(code, ErrorCode::InvalidMessage),
        other => panic!("expected error, got {:?}", other),
    }

    running.stop();
}

#[tokio::test]
async fn test_spectator_follows_round_to_crash() {
    let running = start(Duration::from_millis(100)).await;
    let (mut client, _) = connect_async(running.url.as_str()).await.unwrap();
    assert!(matches!(recv(&mut client).await, ServerMessage::Snapshot { .. }));

    let mut flying = false;
    loop {
        match recv(&mut client).await {
            ServerMessage::FlightStarted { .. } => flying = true,
            ServerMessage::Crashed { crash_point, .. } if flying => {
                assert!(crash_point.hundredths() >= 100);
                break;
            }
            _ => {}
        }
    }

    send(&mut client, &ClientMessage::History { limit: Some(5) }).await;
    match reply(&mut client).await {
        ServerMessage::History { entries } => assert!(!entries.is_empty()),
        other => panic!("expected history, got {:?}", other),
    }

    running.stop();
}
