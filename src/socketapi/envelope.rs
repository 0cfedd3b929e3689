//! Socket message envelope
//!
//! Every frame exchanged with a client carries one envelope: an optional
//! correlation id (`cid`) and exactly one message-kind field. The JSON shape
//! follows the proto3 mapping the clients already speak, so field names are
//! lowerCamelCase and the message kind is the key of the populated field:
//!
//! ```json
//! {"cid":"7","matchFind":{"gameName":"ATGame","queueProperties":{"player_count":"2"}}}
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Wire codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Envelope payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

// ============================================================================
// Envelope
// ============================================================================

/// A single structured message exchanged over the socket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Correlation id chosen by the client, echoed back on replies
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cid: String,
    /// The populated message kind
    #[serde(flatten)]
    pub message: EnvelopeMessage,
}

impl Envelope {
    /// Create an envelope without a correlation id
    pub fn new(message: EnvelopeMessage) -> Self {
        Self {
            cid: String::new(),
            message,
        }
    }

    /// Create an envelope answering the request identified by `cid`
    pub fn with_cid(cid: impl Into<String>, message: EnvelopeMessage) -> Self {
        Self {
            cid: cid.into(),
            message,
        }
    }

    /// Decode an envelope from a text frame
    pub fn from_json(json: &str) -> CodecResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Decode an envelope from raw frame bytes
    pub fn from_slice(data: &[u8]) -> CodecResult<Self> {
        Self::from_json(std::str::from_utf8(data)?)
    }

    /// Encode the envelope as a text frame payload
    pub fn to_json(&self) -> CodecResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Name of the populated message kind, for logging
    pub fn kind(&self) -> &'static str {
        self.message.kind()
    }
}

// ============================================================================
// Message kinds
// ============================================================================

/// The message kinds an envelope can carry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum EnvelopeMessage {
    /// Ask matchmaking for a match of the given game
    MatchFind(MatchFind),
    /// Matchmaking progress for a match the user is queued in
    MatchEntry(MatchEntry),
    /// Join a match that is awaiting players
    MatchJoin(MatchJoin),
    /// Leave a match before it starts
    MatchLeave(MatchLeave),
    /// A match has started
    MatchStart(MatchStart),
    /// Game state update sent by a player
    GameUpdate(GameUpdate),
    /// Game state update relayed to players
    GameUpdateResp(GameUpdate),
    /// Error reply
    Error(ErrorMessage),
}

impl EnvelopeMessage {
    /// Name of the message kind as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            EnvelopeMessage::MatchFind(_) => "matchFind",
            EnvelopeMessage::MatchEntry(_) => "matchEntry",
            EnvelopeMessage::MatchJoin(_) => "matchJoin",
            EnvelopeMessage::MatchLeave(_) => "matchLeave",
            EnvelopeMessage::MatchStart(_) => "matchStart",
            EnvelopeMessage::GameUpdate(_) => "gameUpdate",
            EnvelopeMessage::GameUpdateResp(_) => "gameUpdateResp",
            EnvelopeMessage::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchFind {
    pub game_name: String,
    pub queue_properties: HashMap<String, String>,
}

/// Matchmaking states reported in [`MatchEntry::state`]
pub mod match_state {
    pub const MATCH_SEARCHING: i32 = 0;
    pub const MATCH_AWAITING_PLAYERS: i32 = 1;
    pub const MATCH_READY: i32 = 2;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchEntry {
    pub match_id: String,
    pub state: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchJoin {
    pub match_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchLeave {
    pub match_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchStart {
    pub game_data: GameData,
}

/// Game descriptor; `metadata` is an opaque JSON document owned by the game
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct GameData {
    pub id: String,
    pub name: String,
    pub metadata: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct GameUpdate {
    #[serde(rename = "gameID")]
    pub game_id: String,
    pub metadata: String,
}

/// Error codes carried in [`ErrorMessage::code`]
pub mod error_code {
    pub const RUNTIME_EXCEPTION: i32 = 0;
    pub const UNRECOGNIZED_PAYLOAD: i32 = 1;
    pub const MISSING_PAYLOAD: i32 = 2;
    pub const BAD_INPUT: i32 = 3;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorMessage {
    pub code: i32,
    pub message: String,
}

impl ErrorMessage {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
