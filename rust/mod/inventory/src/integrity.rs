//! Integrity verification and repair of the working set.
//!
//! `verify` never mutates. `repair_platform` applies only fixes that have a
//! deterministic safe default; anything else is left for a human and keeps
//! showing up in `verify`.

use std::collections::HashSet;

use yard_core::new_id;

use crate::calc;
use crate::config::InventoryConfig;
use crate::model::{placeholder_number, Identity, Origin, Platform};
use crate::repo::WorkingSet;

/// Tolerance for comparing stored derived values with recomputed ones.
const EPSILON: f64 = 1e-9;

/// One broken invariant.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Violation {
    #[error("platform id is missing")]
    MissingPlatformId,

    #[error("business number is missing")]
    MissingBusinessNumber,

    #[error("standard width {0} is not positive")]
    NonPositiveWidth(f64),

    #[error("piece at position {index} has no id")]
    MissingPieceId { index: usize },

    #[error("piece id {id} is used more than once")]
    DuplicatePieceId { id: String },

    #[error("piece {piece}: length {length} is not positive")]
    NonPositiveLength { piece: String, length: f64 },

    #[error("piece {piece}: standard width {width} is not positive")]
    NonPositivePieceWidth { piece: String, width: f64 },

    #[error("piece {piece}: linear meters {found}, expected {expected}")]
    StaleLinearMeters { piece: String, found: f64, expected: f64 },

    #[error("piece sequence numbers are not 1..={count}")]
    SequenceOutOfOrder { count: usize },

    #[error("totals {length}/{linear} do not match pieces ({expected_length}/{expected_linear})")]
    StaleTotals {
        length: f64,
        linear: f64,
        expected_length: f64,
        expected_linear: f64,
    },

    #[error("provisional identity is not flagged for sync")]
    UnflaggedProvisional,

    #[error("stored under a different key than its id {id}")]
    KeyMismatch { id: String },

    #[error("record cannot be parsed: {0}")]
    Unreadable(String),
}

impl Violation {
    /// Whether `repair` has a safe default for this violation.
    pub fn is_repairable(&self) -> bool {
        !matches!(self, Violation::Unreadable(_))
    }
}

/// A violation located by collection key.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrityError {
    pub key: String,
    pub violation: Violation,
}

impl std::fmt::Display for IntegrityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.key, self.violation)
    }
}

#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub is_valid: bool,
    pub errors: Vec<IntegrityError>,
}

impl VerifyReport {
    /// Errors for one collection key.
    pub fn for_key<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a IntegrityError> + 'a {
        self.errors.iter().filter(move |e| e.key == key)
    }
}

fn positive(x: f64) -> bool {
    x.is_finite() && x > 0.0
}

fn differs(a: f64, b: f64) -> bool {
    !((a - b).abs() < EPSILON)
}

/// Every invariant violation of one platform stored under `key`.
pub fn check_platform(key: &str, p: &Platform) -> Vec<Violation> {
    let mut out = Vec::new();

    if p.id().is_empty() {
        out.push(Violation::MissingPlatformId);
    } else if p.id() != key {
        out.push(Violation::KeyMismatch { id: p.id().to_string() });
    }
    if p.business_number().is_empty() {
        out.push(Violation::MissingBusinessNumber);
    }
    if !positive(p.standard_width) {
        out.push(Violation::NonPositiveWidth(p.standard_width));
    }
    if p.identity.is_provisional() && !p.needs_sync {
        out.push(Violation::UnflaggedProvisional);
    }

    let mut seen = HashSet::new();
    let mut in_order = true;
    for (index, piece) in p.pieces.iter().enumerate() {
        if piece.id.is_empty() {
            out.push(Violation::MissingPieceId { index });
        } else if !seen.insert(piece.id.as_str()) {
            out.push(Violation::DuplicatePieceId { id: piece.id.clone() });
        }
        if !positive(piece.length) {
            out.push(Violation::NonPositiveLength {
                piece: piece.id.clone(),
                length: piece.length,
            });
        }
        if !positive(piece.standard_width) {
            out.push(Violation::NonPositivePieceWidth {
                piece: piece.id.clone(),
                width: piece.standard_width,
            });
        }
        let expected = calc::linear_meters(piece.length, piece.standard_width);
        if differs(piece.linear_meters, expected) {
            out.push(Violation::StaleLinearMeters {
                piece: piece.id.clone(),
                found: piece.linear_meters,
                expected,
            });
        }
        if piece.sequence_number as usize != index + 1 {
            in_order = false;
        }
    }
    if !in_order {
        out.push(Violation::SequenceOutOfOrder { count: p.pieces.len() });
    }

    // Totals are checked against the stored piece values; a stale piece is
    // reported on its own above.
    let totals = calc::platform_totals(&p.pieces);
    if differs(p.total_length, totals.total_length)
        || differs(p.total_linear_meters, totals.total_linear_meters)
    {
        out.push(Violation::StaleTotals {
            length: p.total_length,
            linear: p.total_linear_meters,
            expected_length: totals.total_length,
            expected_linear: totals.total_linear_meters,
        });
    }

    out
}

/// Walk the whole working set. Never mutates.
pub fn verify(set: &WorkingSet) -> VerifyReport {
    let mut errors: Vec<IntegrityError> = set
        .quarantined
        .iter()
        .map(|(key, reason)| IntegrityError {
            key: key.clone(),
            violation: Violation::Unreadable(reason.clone()),
        })
        .collect();

    for (key, platform) in &set.platforms {
        errors.extend(check_platform(key, platform).into_iter().map(|violation| IntegrityError {
            key: key.clone(),
            violation,
        }));
    }

    VerifyReport {
        is_valid: errors.is_empty(),
        errors,
    }
}

/// Apply every safe default to `p`. Returns whether anything changed.
///
/// Rekeying (when the id changes) is the caller's concern.
pub fn repair_platform(p: &mut Platform, config: &InventoryConfig) -> bool {
    let before = p.clone();

    if p.id().is_empty() {
        // A generated id was never issued by the server.
        let business_number = match p.business_number() {
            "" => placeholder_number(),
            bn => bn.to_string(),
        };
        p.identity = Identity::Provisional {
            id: new_id(),
            business_number,
            origin: Origin::Unconfirmed,
        };
    }
    if p.business_number().is_empty() {
        p.identity.set_business_number(placeholder_number());
    }
    if p.identity.is_provisional() {
        p.needs_sync = true;
    }
    if !positive(p.standard_width) {
        p.standard_width = config.default_width;
    }

    let mut seen = HashSet::new();
    for piece in &mut p.pieces {
        if piece.id.is_empty() || seen.contains(&piece.id) {
            piece.id = new_id();
        }
        seen.insert(piece.id.clone());
        if !positive(piece.length) {
            piece.length = config.fallback_length;
        }
        if !positive(piece.standard_width) {
            piece.standard_width = p.standard_width;
        }
    }

    p.recompute();

    let changed = *p != before;
    if changed {
        p.updated_at = yard_core::now_rfc3339();
    }
    changed
}
