//! Support value split: platform fee, moderator shares, streamer residual.

use crate::config::BP_SCALE;

/// Computed distribution of one support's real-backed value.
///
/// All figures are rubis. `platform + streamer + Σ mod_shares` equals the
/// support value exactly; the unbacked remainder of the spent amount is
/// burned by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportSplit {
    /// Real-value-backed fraction of the spent rubis.
    pub support_value: i64,
    /// Platform fee taken off the top.
    pub platform_amount: i64,
    /// Residual credited to the streamer owner.
    pub streamer_amount: i64,
    /// Total credited to moderators.
    pub mods_total: i64,
    /// Per-moderator share, aligned with the caller's moderator list.
    pub mod_shares: Vec<i64>,
}

impl SupportSplit {
    /// Splits `support_value` between platform, moderators, and streamer.
    ///
    /// `platform = floor(value × platform_fee_bp / 10000)`; the remainder
    /// ("winners") yields `mods_total = floor(winners × mods_percent_bp /
    /// 10000)` divided equally among `mod_count` moderators with the
    /// division remainder assigned to the last moderator in the caller's
    /// stable order. With no moderators the whole winners share goes to
    /// the streamer.
    #[must_use]
    pub fn compute(
        support_value: i64,
        platform_fee_bp: i64,
        mods_percent_bp: i64,
        mod_count: usize,
    ) -> Self {
        let platform_amount = mul_bp(support_value, platform_fee_bp);
        let winners = support_value - platform_amount;

        let mods_total = if mod_count == 0 {
            0
        } else {
            mul_bp(winners, mods_percent_bp)
        };
        let streamer_amount = winners - mods_total;

        let mut mod_shares = Vec::with_capacity(mod_count);
        if mod_count > 0 {
            let count = i64::try_from(mod_count).unwrap_or(i64::MAX);
            let each = mods_total / count;
            let mut distributed = 0;
            for _ in 1..mod_count {
                mod_shares.push(each);
                distributed += each;
            }
            mod_shares.push(mods_total - distributed);
        }

        Self {
            support_value,
            platform_amount,
            streamer_amount,
            mods_total,
            mod_shares,
        }
    }

    /// Total rubis paid out of this split.
    #[must_use]
    pub fn paid_out(&self) -> i64 {
        self.platform_amount + self.streamer_amount + self.mods_total
    }
}

#[allow(clippy::cast_possible_truncation)]
fn mul_bp(value: i64, bp: i64) -> i64 {
    (i128::from(value) * i128::from(bp) / i128::from(BP_SCALE)) as i64
}
