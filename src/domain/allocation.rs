//! Allocation engine: selects and consumes lots from a pool.
//!
//! Pure functions, no I/O. Services lock the relevant rows first, run an
//! allocation over the locked snapshot, then persist the resulting draws
//! inside the same atomic unit.
//!
//! All weighted-value arithmetic floors per lot, never once on a total.
//! That rounding choice shifts value toward burn and is part of the
//! economy's observable behavior; do not "fix" it.

use crate::config::BP_SCALE;
use crate::error::LedgerError;

/// Ordering policy for lot consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Consume the lowest-value lots first (sink-style spends: destroy the
    /// least real value).
    AscendingWeight,
    /// Consume the highest-value lots first (support and cashout: extract
    /// the most real value per rubis).
    DescendingWeight,
}

/// Read view of a consumable lot; implemented by both user lots and chest
/// lots so one engine serves both pools.
pub trait WeightedLot {
    /// Row id; ties in weight order break on ascending id.
    fn lot_key(&self) -> i64;
    /// Provenance tag.
    fn lot_origin(&self) -> &str;
    /// Fixed weight in basis points.
    fn lot_weight_bp(&self) -> i32;
    /// Units still available.
    fn lot_remaining(&self) -> i64;
}

impl WeightedLot for super::lot::Lot {
    fn lot_key(&self) -> i64 {
        self.id.0
    }
    fn lot_origin(&self) -> &str {
        &self.origin
    }
    fn lot_weight_bp(&self) -> i32 {
        self.weight_bp
    }
    fn lot_remaining(&self) -> i64 {
        self.amount_remaining
    }
}

impl WeightedLot for super::lot::ChestLot {
    fn lot_key(&self) -> i64 {
        self.id.0
    }
    fn lot_origin(&self) -> &str {
        &self.origin
    }
    fn lot_weight_bp(&self) -> i32 {
        self.weight_bp
    }
    fn lot_remaining(&self) -> i64 {
        self.amount_remaining
    }
}

/// One lot consumption decided by [`allocate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotDraw {
    /// Key of the consumed lot.
    pub lot_key: i64,
    /// Origin of the consumed lot.
    pub origin: String,
    /// Weight of the consumed lot.
    pub weight_bp: i32,
    /// Units taken.
    pub amount_used: i64,
    /// Units left on the lot after the draw.
    pub remaining_after: i64,
}

/// One lot consumption decided by [`allocate_for_value`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueDraw {
    /// Key of the consumed lot.
    pub lot_key: i64,
    /// Origin of the consumed lot.
    pub origin: String,
    /// Weight of the consumed lot.
    pub weight_bp: i32,
    /// Units taken.
    pub amount_used: i64,
    /// Units left on the lot after the draw.
    pub remaining_after: i64,
    /// Cents of target value this draw covered.
    pub value_covered_cents: i64,
}

/// Floored real value of `amount` units at `weight_bp`.
#[must_use]
pub fn lot_value(amount: i64, weight_bp: i32) -> i64 {
    let v = i128::from(amount) * i128::from(weight_bp) / i128::from(BP_SCALE);
    clamp_i128(v)
}

/// Minimal units of a `weight_bp` lot needed to cover `target_cents`:
/// `ceil(target × 10000 / weight)`. Zero-weight lots can never cover
/// value; callers must skip them.
#[must_use]
pub fn units_for_value(target_cents: i64, weight_bp: i32) -> i64 {
    if weight_bp <= 0 {
        return i64::MAX;
    }
    let w = i128::from(weight_bp);
    let n = i128::from(target_cents) * i128::from(BP_SCALE);
    clamp_i128((n + w - 1) / w)
}

/// Selects draws covering exactly `amount` units from `lots` under the
/// given ordering policy.
///
/// Lots are ordered by weight (per `direction`) with ascending key as the
/// tie break, then consumed front to back. The returned draws satisfy
/// `Σ amount_used == amount`.
///
/// # Errors
///
/// [`LedgerError::InsufficientLots`] if the pool cannot cover `amount`.
/// When the caller has already verified the cached balance, this error
/// signals balance/lot drift and must not be swallowed.
pub fn allocate<L: WeightedLot>(
    lots: &[L],
    amount: i64,
    direction: Direction,
) -> Result<Vec<LotDraw>, LedgerError> {
    let ordered = order_by_weight(lots, direction);

    let mut need = amount;
    let mut draws = Vec::new();
    for lot in ordered {
        if need == 0 {
            break;
        }
        let available = lot.lot_remaining();
        if available <= 0 {
            continue;
        }
        let used = available.min(need);
        need -= used;
        draws.push(LotDraw {
            lot_key: lot.lot_key(),
            origin: lot.lot_origin().to_string(),
            weight_bp: lot.lot_weight_bp(),
            amount_used: used,
            remaining_after: available - used,
        });
    }

    if need > 0 {
        return Err(LedgerError::InsufficientLots {
            covered: amount - need,
            requested: amount,
        });
    }
    Ok(draws)
}

/// Selects the minimal descending-weight draws whose combined real value
/// covers `target_cents` (cashout).
///
/// For each candidate lot the minimal units are
/// `ceil(target_remaining × 10000 / weight)`, capped at the lot's
/// remainder. A capped draw covers `floor(units × weight / 10000)` cents;
/// an uncapped draw covers the whole remaining target. Zero-weight lots
/// are skipped.
///
/// # Errors
///
/// [`LedgerError::InsufficientValue`] if the pool's total weighted value
/// cannot reach the target even after exhausting every lot.
pub fn allocate_for_value<L: WeightedLot>(
    lots: &[L],
    target_cents: i64,
) -> Result<Vec<ValueDraw>, LedgerError> {
    let ordered = order_by_weight(lots, Direction::DescendingWeight);

    let mut target_rem = target_cents;
    let mut draws = Vec::new();
    for lot in ordered {
        if target_rem == 0 {
            break;
        }
        let weight = lot.lot_weight_bp();
        let available = lot.lot_remaining();
        if weight <= 0 || available <= 0 {
            continue;
        }
        let need = units_for_value(target_rem, weight);
        let used = need.min(available);
        let covered = if used == need {
            target_rem
        } else {
            lot_value(used, weight)
        };
        target_rem -= covered;
        draws.push(ValueDraw {
            lot_key: lot.lot_key(),
            origin: lot.lot_origin().to_string(),
            weight_bp: weight,
            amount_used: used,
            remaining_after: available - used,
            value_covered_cents: covered,
        });
    }

    if target_rem > 0 {
        return Err(LedgerError::InsufficientValue {
            covered_cents: target_cents - target_rem,
            target_cents,
        });
    }
    Ok(draws)
}

/// A weight-tagged pool slice that payouts are carved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Key of the backing lot.
    pub lot_key: i64,
    /// Weight carried into carved pieces.
    pub weight_bp: i32,
    /// Units available in this segment.
    pub amount: i64,
}

/// One carved slice of a recipient's payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarvedPiece {
    /// Key of the backing lot.
    pub lot_key: i64,
    /// Weight inherited from the backing segment.
    pub weight_bp: i32,
    /// Units carved.
    pub amount: i64,
}

/// Carves one payout per entry of `needs` out of `segments`, in order.
///
/// A pointer walks the segments front to back, deducting from the current
/// segment until the current need is met and advancing when a segment is
/// exhausted. Zero-amount segments and zero needs are skipped. Guarantees
/// `Σ carved == Σ needs` and that every piece inherits its segment's
/// weight.
///
/// # Errors
///
/// [`LedgerError::ChestEmptyRace`] if the segments run out before the
/// needs are met. When the caller summed the pool under lock beforehand
/// this is an invariant violation, not a recoverable condition.
pub fn carve(segments: &[Segment], needs: &[i64]) -> Result<Vec<Vec<CarvedPiece>>, LedgerError> {
    let mut iter = segments.iter().copied();
    let mut current: Option<Segment> = iter.next();

    let mut out = Vec::with_capacity(needs.len());
    for &need in needs {
        let mut pieces = Vec::new();
        let mut rem = need;
        while rem > 0 {
            let Some(seg) = current.as_mut() else {
                return Err(LedgerError::ChestEmptyRace { short: rem });
            };
            if seg.amount == 0 {
                current = iter.next();
                continue;
            }
            let take = seg.amount.min(rem);
            pieces.push(CarvedPiece {
                lot_key: seg.lot_key,
                weight_bp: seg.weight_bp,
                amount: take,
            });
            seg.amount -= take;
            rem -= take;
        }
        out.push(pieces);
    }
    Ok(out)
}

/// Stable weight ordering with ascending key as the tie break.
fn order_by_weight<L: WeightedLot>(lots: &[L], direction: Direction) -> Vec<&L> {
    let mut ordered: Vec<&L> = lots.iter().collect();
    match direction {
        Direction::AscendingWeight => {
            ordered.sort_by_key(|l| (l.lot_weight_bp(), l.lot_key()));
        }
        Direction::DescendingWeight => {
            ordered.sort_by_key(|l| (std::cmp::Reverse(l.lot_weight_bp()), l.lot_key()));
        }
    }
    ordered
}

#[allow(clippy::cast_possible_truncation)]
fn clamp_i128(v: i128) -> i64 {
    if v > i128::from(i64::MAX) {
        i64::MAX
    } else {
        v as i64
    }
}
