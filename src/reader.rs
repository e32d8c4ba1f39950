//! Decoder for the encoded stack map blob.
//!
//! [`CodeInfo`] parses the header once and hands out lightweight views into
//! the tables. It is the consumer-side counterpart of
//! [`StackMapStream`](crate::stream::StackMapStream): GC root enumeration,
//! stack walking and deoptimization read through this API, and the debug
//! readback verifier uses it to check every blob right after encoding.
//!
//! The format is trusted: the blob is produced in-process by the encoder,
//! so malformed input is an encoder bug, not a recoverable condition.

use crate::bits::{load_bit, load_bits, BitVector};
use crate::encoding::{
    vreg_map_entry_bits, vreg_map_live_mask_bytes, CodeInfoEncoding, InlineInfoEncoding,
    StackMapEncoding,
};
use crate::isa::{CodeOffset, InstructionSet};
use crate::location::{decode_entry, VRegLocation};
use crate::stream::MethodRef;

// =============================================================================
// CodeInfo
// =============================================================================

/// A decoded view over an encoded stack map blob.
#[derive(Debug)]
pub struct CodeInfo<'a> {
    data: &'a [u8],
    encoding: CodeInfoEncoding,
}

impl<'a> CodeInfo<'a> {
    /// Parse the header of `data`, which must start with a blob produced by
    /// the encoder.
    pub fn new(data: &'a [u8]) -> Self {
        let encoding = CodeInfoEncoding::parse(data);
        CodeInfo { data, encoding }
    }

    /// The parsed encoding descriptor.
    #[inline]
    pub fn encoding(&self) -> &CodeInfoEncoding {
        &self.encoding
    }

    /// Number of stack maps in the blob.
    #[inline]
    pub fn num_stack_maps(&self) -> u32 {
        self.encoding.num_stack_maps
    }

    /// Width of every stack mask in the blob, in bits.
    #[inline]
    pub fn num_stack_mask_bits(&self) -> u32 {
        self.encoding.stack_mask_bits
    }

    /// The stack map at `index`.
    pub fn stack_map_at(&self, index: u32) -> StackMapRef<'a> {
        debug_assert!(index < self.encoding.num_stack_maps);
        StackMapRef {
            table: self.table(
                self.encoding.stack_maps_offset,
                self.encoding.stack_maps_table_bytes(),
            ),
            row: (index * self.encoding.stack_map.total_bits()) as usize,
            encoding: self.encoding.stack_map,
        }
    }

    /// The interned register mask at `index`.
    pub fn register_mask_at(&self, index: u32) -> u32 {
        debug_assert!(index < self.encoding.num_register_masks);
        let table = self.table(
            self.encoding.register_masks_offset,
            self.encoding.register_masks_table_bytes(),
        );
        let bits = self.encoding.register_mask_bits as usize;
        load_bits(table, index as usize * bits, bits)
    }

    /// One bit of the interned stack mask at `index`.
    pub fn stack_mask_bit(&self, index: u32, bit: u32) -> bool {
        debug_assert!(index < self.encoding.num_stack_masks);
        debug_assert!(bit < self.encoding.stack_mask_bits);
        let table = self.table(
            self.encoding.stack_masks_offset,
            self.encoding.stack_masks_table_bytes(),
        );
        load_bit(
            table,
            (index * self.encoding.stack_mask_bits + bit) as usize,
        )
    }

    /// Copy the interned stack mask at `index` out into a [`BitVector`].
    pub fn stack_mask_at(&self, index: u32) -> BitVector {
        let mut mask = BitVector::with_capacity(self.encoding.stack_mask_bits as usize);
        for bit in 0..self.encoding.stack_mask_bits {
            if self.stack_mask_bit(index, bit) {
                mask.set_bit(bit as usize);
            }
        }
        mask
    }

    /// The location catalog entry at `index`.
    ///
    /// Catalog entries are variable-sized, so this walks from the start;
    /// fine for the verifier and deopt, which touch few entries.
    pub fn catalog_location_at(&self, index: u32) -> VRegLocation {
        debug_assert!(index < self.encoding.num_catalog_entries);
        let catalog = self.table(self.encoding.catalog_offset, self.encoding.catalog_bytes);
        let mut offset = 0;
        let mut remaining = index;
        loop {
            let (location, size) = decode_entry(catalog, offset);
            if remaining == 0 {
                return location;
            }
            remaining -= 1;
            offset += size;
        }
    }

    /// The vreg map of `stack_map`, or `None` when the safepoint has no
    /// live vregs. `num_vregs` comes from the method metadata; it is not
    /// stored in the blob.
    pub fn vreg_map_of(&self, stack_map: StackMapRef<'a>, num_vregs: u32) -> Option<VRegMapRef<'a>> {
        let offset = stack_map.vreg_map_offset()?;
        Some(self.vreg_map_at(offset, num_vregs))
    }

    /// The inline chain of `stack_map`, or `None` when nothing is inlined
    /// at that safepoint.
    pub fn inline_info_of(&self, stack_map: StackMapRef<'a>) -> Option<InlineInfoRef<'a>> {
        let start_index = stack_map.inline_info_index()?;
        debug_assert!(start_index < self.encoding.num_inline_infos);
        Some(InlineInfoRef {
            table: self.table(
                self.encoding.inline_infos_offset,
                self.encoding.inline_infos_table_bytes(),
            ),
            start_index,
            encoding: self.encoding.inline_info,
        })
    }

    /// The vreg map of one frame of an inline chain.
    pub fn vreg_map_at_depth(
        &self,
        inline_info: InlineInfoRef<'a>,
        depth: u32,
        num_vregs: u32,
    ) -> Option<VRegMapRef<'a>> {
        let offset = inline_info.vreg_map_offset_at(depth)?;
        Some(self.vreg_map_at(offset, num_vregs))
    }

    fn vreg_map_at(&self, offset: u32, num_vregs: u32) -> VRegMapRef<'a> {
        let start = (self.encoding.vreg_maps_offset + offset) as usize;
        let end = (self.encoding.vreg_maps_offset + self.encoding.vreg_maps_bytes) as usize;
        VRegMapRef {
            region: &self.data[start..end],
            num_vregs,
            entry_bits: vreg_map_entry_bits(self.encoding.num_catalog_entries),
        }
    }

    #[inline]
    fn table(&self, offset: u32, bytes: u32) -> &'a [u8] {
        &self.data[offset as usize..][..bytes as usize]
    }
}

// =============================================================================
// StackMapRef
// =============================================================================

/// View of one stack map record.
#[derive(Debug, Clone, Copy)]
pub struct StackMapRef<'a> {
    table: &'a [u8],
    row: usize,
    encoding: StackMapEncoding,
}

impl StackMapRef<'_> {
    /// Bytecode offset of the safepoint.
    #[inline]
    pub fn bc_offset(&self) -> u32 {
        self.encoding.bc_offset.load(self.table, self.row)
    }

    /// Native PC offset, widened back to bytes for `isa`.
    #[inline]
    pub fn native_pc_offset(&self, isa: InstructionSet) -> u32 {
        CodeOffset::from_compressed(self.encoding.native_pc.load(self.table, self.row)).offset(isa)
    }

    /// Index into the register mask table.
    #[inline]
    pub fn register_mask_index(&self) -> u32 {
        self.encoding.register_mask_index.load(self.table, self.row)
    }

    /// Index into the stack mask table.
    #[inline]
    pub fn stack_mask_index(&self) -> u32 {
        self.encoding.stack_mask_index.load(self.table, self.row)
    }

    /// Byte offset of this safepoint's vreg map within the vreg map
    /// region, or `None` when no vreg is live.
    #[inline]
    pub fn vreg_map_offset(&self) -> Option<u32> {
        self.encoding.vreg_map_offset.load_opt(self.table, self.row)
    }

    /// Start index of this safepoint's inline chain.
    #[inline]
    pub fn inline_info_index(&self) -> Option<u32> {
        self.encoding.inline_info_index.load_opt(self.table, self.row)
    }

    /// Whether anything is inlined at this safepoint.
    #[inline]
    pub fn has_inline_info(&self) -> bool {
        self.inline_info_index().is_some()
    }
}

// =============================================================================
// InlineInfoRef
// =============================================================================

/// View of one stack map's inline chain.
#[derive(Debug, Clone, Copy)]
pub struct InlineInfoRef<'a> {
    table: &'a [u8],
    start_index: u32,
    encoding: InlineInfoEncoding,
}

impl InlineInfoRef<'_> {
    #[inline]
    fn row(&self, depth: u32) -> usize {
        ((self.start_index + depth) * self.encoding.total_bits()) as usize
    }

    /// Index of the chain's first record in the inline info table.
    #[inline]
    pub fn start_index(&self) -> u32 {
        self.start_index
    }

    /// Number of frames in the chain.
    #[inline]
    pub fn depth(&self) -> u32 {
        self.encoding.depth.load(self.table, self.row(0))
    }

    /// Raw method index field of the frame at `depth`.
    #[inline]
    pub fn method_index_at(&self, depth: u32) -> u32 {
        self.encoding.method_index.load(self.table, self.row(depth))
    }

    /// Raw extra data field of the frame at `depth`.
    #[inline]
    pub fn extra_data_at(&self, depth: u32) -> u32 {
        self.encoding.extra_data.load(self.table, self.row(depth))
    }

    /// Whether the frame at `depth` stores the method object itself rather
    /// than a method index.
    #[inline]
    pub fn encodes_method_object_at(&self, depth: u32) -> bool {
        self.extra_data_at(depth) & 1 == 0
    }

    /// The method reference of the frame at `depth`.
    pub fn method_at(&self, depth: u32) -> MethodRef {
        let method_index = self.method_index_at(depth);
        let extra_data = self.extra_data_at(depth);
        if self.encodes_method_object_at(depth) {
            MethodRef::Object(u64::from(method_index) << 32 | u64::from(extra_data))
        } else {
            MethodRef::Index(method_index)
        }
    }

    /// Bytecode offset of the call site in the frame at `depth`, when one
    /// was recorded.
    #[inline]
    pub fn bc_offset_at(&self, depth: u32) -> Option<u32> {
        self.encoding.bc_offset.load_opt(self.table, self.row(depth))
    }

    /// Vreg map offset of the frame at `depth`.
    #[inline]
    pub fn vreg_map_offset_at(&self, depth: u32) -> Option<u32> {
        self.encoding
            .vreg_map_offset
            .load_opt(self.table, self.row(depth))
    }
}

// =============================================================================
// VRegMapRef
// =============================================================================

/// View of one vreg map: a live bit mask followed by packed catalog
/// indices for the live vregs.
#[derive(Debug, Clone, Copy)]
pub struct VRegMapRef<'a> {
    /// Tail of the vreg map region starting at this map.
    region: &'a [u8],
    num_vregs: u32,
    entry_bits: u32,
}

impl VRegMapRef<'_> {
    /// Whether the vreg at `index` is live at this safepoint.
    #[inline]
    pub fn is_live(&self, index: u32) -> bool {
        debug_assert!(index < self.num_vregs);
        load_bit(self.region, index as usize)
    }

    /// Number of live vregs in this map.
    pub fn live_count(&self) -> u32 {
        (0..self.num_vregs).filter(|&reg| self.is_live(reg)).count() as u32
    }

    /// Catalog index of the vreg at `index`, or `None` when it is dead.
    pub fn catalog_index_of(&self, index: u32) -> Option<u32> {
        if !self.is_live(index) {
            return None;
        }
        let rank = (0..index).filter(|&reg| self.is_live(reg)).count();
        let base = vreg_map_live_mask_bytes(self.num_vregs) * 8;
        Some(load_bits(
            self.region,
            base + rank * self.entry_bits as usize,
            self.entry_bits as usize,
        ))
    }

    /// Location of the vreg at `index`; dead vregs read as
    /// [`VRegLocation::None`].
    pub fn location_of(&self, index: u32, info: &CodeInfo<'_>) -> VRegLocation {
        match self.catalog_index_of(index) {
            Some(catalog_index) => info.catalog_location_at(catalog_index),
            None => VRegLocation::None,
        }
    }
}
