use serde::{Deserialize, Serialize};
use yard_core::{new_id, now_millis};

use crate::calc;

/// Material recorded for a piece when none was given. Absence of material
/// is a valid business state.
pub const UNSPECIFIED_MATERIAL: &str = "unspecified";

fn default_material() -> String {
    UNSPECIFIED_MATERIAL.to_string()
}

/// Generate a client-side placeholder business number.
pub fn placeholder_number() -> String {
    format!("TMP-{}-{}", now_millis(), &new_id()[..4])
}

// ── Identity ────────────────────────────────────────────────────────

/// Why an entity still carries provisional identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Origin {
    /// Created while there was no connectivity; no remote call attempted.
    Offline,
    /// A remote create was attempted (or the record was repaired) but the
    /// server never confirmed it.
    #[default]
    Unconfirmed,
}

/// Provenance of a platform's identifiers.
///
/// A `Provisional` entity has never been confirmed by the remote system and
/// must never be assumed to exist there. A `Synced` entity carries the
/// server-issued id and business number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Identity {
    Provisional {
        #[serde(default)]
        id: String,
        #[serde(default)]
        business_number: String,
        #[serde(default)]
        origin: Origin,
    },
    Synced {
        #[serde(default)]
        id: String,
        #[serde(default)]
        business_number: String,
    },
}

impl Default for Identity {
    fn default() -> Self {
        Identity::Provisional {
            id: String::new(),
            business_number: String::new(),
            origin: Origin::Unconfirmed,
        }
    }
}

impl Identity {
    /// Fresh provisional identifiers.
    pub fn provisional(origin: Origin) -> Self {
        Identity::Provisional {
            id: new_id(),
            business_number: placeholder_number(),
            origin,
        }
    }

    pub fn synced(id: impl Into<String>, business_number: impl Into<String>) -> Self {
        Identity::Synced {
            id: id.into(),
            business_number: business_number.into(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Identity::Provisional { id, .. } | Identity::Synced { id, .. } => id,
        }
    }

    pub fn business_number(&self) -> &str {
        match self {
            Identity::Provisional { business_number, .. }
            | Identity::Synced { business_number, .. } => business_number,
        }
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, Identity::Provisional { .. })
    }

    pub fn origin(&self) -> Option<Origin> {
        match self {
            Identity::Provisional { origin, .. } => Some(*origin),
            Identity::Synced { .. } => None,
        }
    }

    pub(crate) fn set_id(&mut self, value: String) {
        match self {
            Identity::Provisional { id, .. } | Identity::Synced { id, .. } => *id = value,
        }
    }

    pub(crate) fn set_business_number(&mut self, value: String) {
        match self {
            Identity::Provisional { business_number, .. }
            | Identity::Synced { business_number, .. } => *business_number = value,
        }
    }
}

// ── Status ──────────────────────────────────────────────────────────

/// Platform lifecycle. Forward-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlatformStatus {
    #[default]
    InProgress,
    Completed,
    Exported,
}

impl PlatformStatus {
    /// Whether moving from `self` to `next` respects the forward-only lifecycle.
    /// Staying in place is allowed.
    pub fn can_become(self, next: PlatformStatus) -> bool {
        next >= self
    }
}

impl std::fmt::Display for PlatformStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PlatformStatus::InProgress => "IN_PROGRESS",
            PlatformStatus::Completed => "COMPLETED",
            PlatformStatus::Exported => "EXPORTED",
        };
        f.write_str(s)
    }
}

// ── Piece ───────────────────────────────────────────────────────────

/// Piece: one measured item on a platform. Owned by exactly one platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Piece {
    #[serde(default)]
    pub id: String,

    /// 1-based position within the owning platform.
    #[serde(default)]
    pub sequence_number: u32,

    #[serde(default)]
    pub length: f64,

    /// Width copied from the platform when the piece was created.
    #[serde(default)]
    pub standard_width: f64,

    /// Derived: `length * standard_width`, 3 decimals.
    #[serde(default)]
    pub linear_meters: f64,

    #[serde(default = "default_material")]
    pub material: String,
}

// ── Platform ────────────────────────────────────────────────────────

/// Platform: a received batch of material, the root inventory entity.
///
/// Every field that damaged data could lack is `#[serde(default)]`, so a
/// record with a missing id or length still loads and the integrity pass
/// can see (and fix) it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Platform {
    #[serde(default)]
    pub identity: Identity,

    #[serde(default)]
    pub material_types: Vec<String>,

    #[serde(default)]
    pub provider: String,

    #[serde(default)]
    pub driver: String,

    #[serde(default)]
    pub reception_date: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default)]
    pub standard_width: f64,

    #[serde(default)]
    pub pieces: Vec<Piece>,

    /// Derived: sum of piece lengths.
    #[serde(default)]
    pub total_length: f64,

    /// Derived: sum of piece linear meters.
    #[serde(default)]
    pub total_linear_meters: f64,

    #[serde(default)]
    pub status: PlatformStatus,

    /// True whenever the authoritative copy may not exist remotely.
    #[serde(default)]
    pub needs_sync: bool,

    #[serde(default)]
    pub created_at: String,

    #[serde(default)]
    pub updated_at: String,
}

impl Platform {
    pub fn id(&self) -> &str {
        self.identity.id()
    }

    pub fn business_number(&self) -> &str {
        self.identity.business_number()
    }

    pub fn piece(&self, piece_id: &str) -> Option<&Piece> {
        self.pieces.iter().find(|p| p.id == piece_id)
    }

    /// Renumber pieces `1..=n`, recompute every piece's linear meters from
    /// its own width, and recompute the platform totals.
    pub fn recompute(&mut self) {
        for (i, piece) in self.pieces.iter_mut().enumerate() {
            piece.sequence_number = (i + 1) as u32;
            piece.linear_meters = calc::linear_meters(piece.length, piece.standard_width);
        }
        let totals = calc::platform_totals(&self.pieces);
        self.total_length = totals.total_length;
        self.total_linear_meters = totals.total_linear_meters;
    }

    /// Rewrite the standard width on the platform and on every piece, then
    /// recompute all derived values.
    pub fn apply_width(&mut self, width: f64) {
        self.standard_width = width;
        for piece in &mut self.pieces {
            piece.standard_width = width;
        }
        self.recompute();
    }

    /// Append a new piece carrying the platform's current width.
    pub(crate) fn push_piece(&mut self, draft: &NewPiece) -> Piece {
        let piece = Piece {
            id: new_id(),
            sequence_number: self.pieces.len() as u32 + 1,
            length: draft.length,
            standard_width: self.standard_width,
            linear_meters: calc::linear_meters(draft.length, self.standard_width),
            material: draft.material.clone().unwrap_or_else(default_material),
        };
        self.pieces.push(piece.clone());
        piece
    }
}

// ── Inputs ──────────────────────────────────────────────────────────

/// Attributes for a new platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPlatform {
    #[serde(default)]
    pub material_types: Vec<String>,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub reception_date: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub standard_width: f64,
    #[serde(default)]
    pub pieces: Vec<NewPiece>,
}

/// A piece to add.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPiece {
    pub length: f64,
    #[serde(default)]
    pub material: Option<String>,
}

impl NewPiece {
    pub fn new(length: f64) -> Self {
        Self { length, material: None }
    }
}

/// Partial update of a platform. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reception_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PlatformStatus>,
}

/// Partial update of a piece.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PiecePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material: Option<String>,
}

// ── Views ───────────────────────────────────────────────────────────

/// Read-only sync overview for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub total: usize,
    /// Entities with a sync attempt currently in flight.
    pub pending: usize,
    pub synced: usize,
    pub needs_sync: usize,
    pub is_online: bool,
}
