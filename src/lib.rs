mod app;
mod error;
pub mod game;
mod identity;
pub mod input;
mod lobby;
mod mesh;
mod profile;
mod protocol;
mod session;
mod ui;

pub use app::App;
pub use error::Error;
pub use identity::PeerIdentity;
pub use lobby::{GarbageAttack, Lobby, LobbyConfig, derive_seed};
pub use mesh::{Inbound, PeerMesh};
pub use profile::PlayerProfile;
pub use protocol::{ActivePiece, BoardSnapshot, PeerMessage, ResultRecord};
pub use session::{Session, SessionStats};
