//! Network Layer
//!
//! WebSocket transport for spectators and players.
//! Holds no round state - every command goes through the hub in `game/`.

pub mod auth;
pub mod protocol;
pub mod server;
pub mod session;

pub use auth::{AuthConfig, AuthError, Authenticator, Identity, TokenClaims};
pub use protocol::{BetRequest, ClientMessage, ErrorCode, ServerMessage};
pub use server::{GameServer, GameServerError, ServerConfig};
pub use session::{ConnectionId, ConnectionRegistry, SessionError};
