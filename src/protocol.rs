//! Messages exchanged between peers.
//!
//! One tagged enum covers the whole protocol so the lobby consumer can match
//! exhaustively. Messages are postcard-encoded inside length-delimited frames;
//! a frame that fails to decode is logged and dropped, never fatal.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum PeerMessage {
    /// First frame on every link: the self-reported listen address, so an
    /// inbound connection arriving from an ephemeral port can be keyed by the
    /// address the peer is actually dialable at. Consumed by the mesh layer.
    Hello { listen_addr: String, name: String },
    /// The sender declares itself ready for the next round. `sender` is the
    /// self-reported listen address, not the transport-observed one.
    Ready { sender: String },
    /// Start the round with the given shared piece seed.
    Start { seed: u64 },
    /// Garbage attack. Receivers ignore attacks whose sender is themselves.
    Garbage {
        lines: u32,
        sender: String,
        name: String,
    },
    /// The sender's game ended. `score` is the survival time in whole
    /// seconds; `extra` is the colon-joined `sent:received:final_score`
    /// stats string.
    Lose {
        score: u32,
        sender: String,
        extra: String,
    },
    /// Consolidated, already-ranked results text. The first one received is
    /// final; later duplicates are ignored.
    GameResults { results: String },
    /// Periodic snapshot of the sender's board for opponent rendering.
    GameState { board: BoardSnapshot },
}

/// The active piece inside a [`BoardSnapshot`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ActivePiece {
    pub piece_type: String,
    pub x: i32,
    pub y: i32,
    pub rotation: u8,
    pub color: u8,
}

/// A flattened board plus the metadata needed to render it remotely.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BoardSnapshot {
    pub cells: Vec<u8>,
    pub width: u16,
    pub height: u16,
    pub score: u32,
    pub player_name: String,
    pub active_piece: Option<ActivePiece>,
}

impl BoardSnapshot {
    /// Cell at (x, y), or empty when the snapshot dimensions don't cover it.
    pub fn cell(&self, x: usize, y: usize) -> u8 {
        if x >= self.width as usize || y >= self.height as usize {
            return 0;
        }
        self.cells
            .get(y * self.width as usize + x)
            .copied()
            .unwrap_or(0)
    }
}

/// One peer's final outcome for a round, ranked by survival time descending.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub name: String,
    pub survival_secs: f64,
    pub attacks_sent: u32,
    pub attacks_received: u32,
    pub score: u32,
}

impl ResultRecord {
    /// Build a record from a `Lose` payload. Malformed numeric fields in
    /// `extra` default to zero rather than failing the whole record.
    pub fn from_lose(name: String, score: u32, extra: &str) -> Self {
        let mut fields = extra.split(':');
        let mut next_u32 = || {
            fields
                .next()
                .and_then(|f| f.trim().parse::<u32>().ok())
                .unwrap_or(0)
        };
        let attacks_sent = next_u32();
        let attacks_received = next_u32();
        let final_score = next_u32();
        Self {
            name,
            survival_secs: f64::from(score),
            attacks_sent,
            attacks_received,
            score: final_score,
        }
    }

    /// The colon-joined stats string carried in a `Lose` message.
    pub fn extra_field(&self) -> String {
        format!(
            "{}:{}:{}",
            self.attacks_sent, self.attacks_received, self.score
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lose_extra_round_trips() {
        let record = ResultRecord {
            name: "alice".into(),
            survival_secs: 93.0,
            attacks_sent: 15,
            attacks_received: 8,
            score: 4200,
        };
        let parsed = ResultRecord::from_lose("alice".into(), 93, &record.extra_field());
        assert_eq!(parsed, record);
    }

    #[test]
    fn malformed_extra_fields_default_to_zero() {
        let record = ResultRecord::from_lose("bob".into(), 30, "12:oops");
        assert_eq!(record.attacks_sent, 12);
        assert_eq!(record.attacks_received, 0);
        assert_eq!(record.score, 0);

        let record = ResultRecord::from_lose("bob".into(), 30, "");
        assert_eq!(record.attacks_sent, 0);
        assert_eq!(record.score, 0);
    }

    #[test]
    fn snapshot_cell_is_bounds_checked() {
        let board = BoardSnapshot {
            cells: vec![0, 1, 2, 3],
            width: 2,
            height: 2,
            score: 0,
            player_name: "x".into(),
            active_piece: None,
        };
        assert_eq!(board.cell(1, 1), 3);
        assert_eq!(board.cell(2, 0), 0);
        assert_eq!(board.cell(0, 5), 0);
    }

    #[test]
    fn messages_survive_postcard_round_trip() {
        let msg = PeerMessage::Garbage {
            lines: 3,
            sender: "localhost:50051".into(),
            name: "alice".into(),
        };
        let bytes = postcard::to_stdvec(&msg).unwrap();
        let back: PeerMessage = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(back, msg);
    }
}
