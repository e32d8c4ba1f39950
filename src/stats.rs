//! Encoding statistics.
//!
//! A plain snapshot of the encoder's counters, for compiler logging and
//! for sizing regressions in tests. No atomics: one encoder instance is
//! owned by one compiler thread.

/// Counters describing one encoded method.
///
/// Obtained from [`StackMapStream::stats`](crate::stream::StackMapStream::stats);
/// the distinct-mask counts and the encoded size are meaningful once
/// `prepare_for_fill_in` has run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeStats {
    /// Total safepoints recorded.
    pub stack_maps: usize,
    /// Safepoints with at least one inline frame.
    pub stack_maps_with_inline_info: usize,
    /// Total inline frames across all safepoints.
    pub inline_infos: usize,
    /// Distinct vreg locations interned in the catalog.
    pub catalog_entries: usize,
    /// Distinct register masks in the register mask table.
    pub distinct_register_masks: usize,
    /// Distinct stack masks in the stack mask table.
    pub distinct_stack_masks: usize,
    /// Safepoints whose vreg map reuses an earlier map's offset.
    pub shared_vreg_maps: usize,
    /// Total size of the encoded blob in bytes.
    pub encoded_bytes: usize,
}

impl EncodeStats {
    /// Fraction of safepoints whose vreg map was shared, in `[0, 1]`.
    pub fn vreg_map_sharing_ratio(&self) -> f64 {
        if self.stack_maps == 0 {
            0.0
        } else {
            self.shared_vreg_maps as f64 / self.stack_maps as f64
        }
    }
}
