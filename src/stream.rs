//! Streaming construction of the encoded stack map blob.
//!
//! The register allocator drives one [`StackMapStream`] per compiled method:
//! it opens an entry per safepoint, records where every vreg lives (and the
//! inline chain active at that point), then asks for the final size and
//! writes the blob into a caller-provided region.
//!
//! ```ignore
//! let mut stream = StackMapStream::new(InstructionSet::X86_64);
//!
//! stream.begin_stack_map_entry(bc, native_pc, regs, Some(&sp_mask), 2, 0);
//! stream.add_vreg_entry(VRegLocation::Register(5));
//! stream.add_vreg_entry(VRegLocation::Stack(16));
//! stream.end_stack_map_entry();
//!
//! let size = stream.prepare_for_fill_in();
//! let mut blob = vec![0u8; size];
//! stream.fill_in(&mut blob);
//! ```
//!
//! Compactness comes from three deduplication dimensions on top of the
//! bit-packing done by [`encoding`](crate::encoding):
//!
//! - vreg locations are interned once in the location catalog and referred
//!   to by dense index
//! - register masks and stack masks each get a deduplicated side table,
//!   stack maps store small indices into them
//! - a safepoint whose vreg map is identical to an earlier one reuses that
//!   map's byte offset outright (found via a rolling hash over the map,
//!   falling back to full comparison on collisions)
//!
//! Because every table offset depends on sizes known only once all entries
//! are in, nothing is emitted incrementally; the blob is laid out in one
//! pass by [`fill_in`](StackMapStream::fill_in).
//!
//! Misuse of the streaming protocol (nested entries, cursor overruns, wrong
//! region size) is a caller bug and is checked in debug builds only.

use std::collections::hash_map::Entry;

use rustc_hash::FxHashMap;

use crate::bits::{bytes_for_bits, load_bit, min_bits_to_store, store_bit, store_bits, BitVector};
use crate::encoding::{
    vreg_map_entry_bits, vreg_map_live_mask_bytes, CodeInfoEncoding, InlineInfoEncoding,
    StackMapEncoding,
};
use crate::isa::{CodeOffset, InstructionSet};
use crate::location::{LocationCatalog, VRegLocation};
use crate::stats::EncodeStats;
use crate::verify;

// =============================================================================
// MethodRef
// =============================================================================

/// Identity of an inlined method, as recorded in an inline info record.
///
/// On the wire, the method index field holds either the bytecode-level
/// method index or the high half of the pointer; the extra data field
/// holds 1 or the low half. Pointers are word-aligned, so the low bit of
/// the extra data disambiguates the two forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodRef {
    /// A direct reference to the method object, as pointer bits.
    /// The low half must be even.
    Object(u64),
    /// A method index resolvable against the enclosing method's bytecode
    /// module.
    Index(u32),
}

impl MethodRef {
    /// Whether this reference encodes the method object itself.
    #[inline]
    pub const fn encodes_object(self) -> bool {
        matches!(self, MethodRef::Object(_))
    }

    /// Value of the method index field on the wire.
    #[inline]
    pub(crate) fn method_index_field(self) -> u32 {
        match self {
            MethodRef::Object(bits) => (bits >> 32) as u32,
            MethodRef::Index(index) => index,
        }
    }

    /// Value of the extra data field on the wire.
    #[inline]
    pub(crate) fn extra_data_field(self) -> u32 {
        match self {
            MethodRef::Object(bits) => bits as u32,
            MethodRef::Index(_) => 1,
        }
    }
}

// =============================================================================
// Recorded entries
// =============================================================================

/// One safepoint, as recorded during streaming.
#[derive(Debug)]
pub(crate) struct StackMapEntry {
    pub(crate) bc_offset: u32,
    pub(crate) native_pc: CodeOffset,
    pub(crate) register_mask: u32,
    pub(crate) stack_mask: Option<BitVector>,
    pub(crate) num_vregs: u32,
    pub(crate) inlining_depth: u8,
    /// Start of this entry's slice of the shared catalog index array.
    pub(crate) vreg_locations_start: usize,
    /// Start of this entry's slice of the inline info array.
    pub(crate) inline_infos_start: usize,
    /// Live mask over the entry's vregs; absent when `num_vregs == 0`.
    pub(crate) live_vregs: Option<BitVector>,
    /// Rolling hash over the vreg map, for offset sharing.
    pub(crate) vreg_map_hash: u32,
    /// Index of an earlier entry with a bit-identical vreg map.
    pub(crate) same_vreg_map_as: Option<u32>,
    /// Dense index into the register mask table (assigned at prepare).
    pub(crate) register_mask_index: u32,
    /// Dense index into the stack mask table (assigned at prepare).
    pub(crate) stack_mask_index: u32,
}

/// One frame of an inline chain, as recorded during streaming.
#[derive(Debug)]
pub(crate) struct InlineInfoEntry {
    pub(crate) method: MethodRef,
    pub(crate) bc_offset: Option<u32>,
    pub(crate) num_vregs: u32,
    pub(crate) vreg_locations_start: usize,
    pub(crate) live_vregs: Option<BitVector>,
}

// =============================================================================
// StackMapStream
// =============================================================================

/// Builder for the encoded stack map blob of one compiled method.
///
/// See the [module documentation](self) for the streaming protocol.
pub struct StackMapStream {
    isa: InstructionSet,

    pub(crate) stack_maps: Vec<StackMapEntry>,
    pub(crate) inline_infos: Vec<InlineInfoEntry>,
    pub(crate) catalog: LocationCatalog,
    /// Shared array of catalog indices; every vreg map owns a contiguous
    /// slice, appended strictly in admission order.
    pub(crate) vreg_location_indices: Vec<u32>,

    current_entry: Option<StackMapEntry>,
    current_inline: Option<InlineInfoEntry>,
    current_vreg: u32,

    bc_offset_max: u32,
    register_mask_max: u32,
    /// Highest set stack mask bit seen so far, -1 when none.
    stack_mask_max: i32,
    stack_maps_with_inline_info: u32,

    /// Rolling hash -> indices of entries that introduced that hash.
    map_hash_buckets: FxHashMap<u32, Vec<u32>>,

    /// Distinct register masks in first-seen order (filled at prepare).
    register_masks: Vec<u32>,
    /// Byte-packed stack mask intern buffer (filled at prepare).
    stack_masks: Vec<u8>,

    /// Compressed encoding descriptor (filled at prepare).
    header: Vec<u8>,
    pub(crate) encoding: CodeInfoEncoding,
    needed_size: usize,
}

impl StackMapStream {
    /// Create a stream for a method compiled for `isa`.
    pub fn new(isa: InstructionSet) -> Self {
        StackMapStream {
            isa,
            stack_maps: Vec::new(),
            inline_infos: Vec::new(),
            catalog: LocationCatalog::new(),
            vreg_location_indices: Vec::new(),
            current_entry: None,
            current_inline: None,
            current_vreg: 0,
            bc_offset_max: 0,
            register_mask_max: 0,
            stack_mask_max: -1,
            stack_maps_with_inline_info: 0,
            map_hash_buckets: FxHashMap::default(),
            register_masks: Vec::new(),
            stack_masks: Vec::new(),
            header: Vec::new(),
            encoding: CodeInfoEncoding::default(),
            needed_size: 0,
        }
    }

    /// The instruction set this stream compresses native PCs for.
    #[inline]
    pub fn instruction_set(&self) -> InstructionSet {
        self.isa
    }

    // =========================================================================
    // Streaming API
    // =========================================================================

    /// Open a new safepoint entry.
    ///
    /// `num_vregs` vreg locations must be recorded with
    /// [`add_vreg_entry`](Self::add_vreg_entry) before the entry is closed,
    /// and `inlining_depth` inline frames with
    /// [`begin_inline_info_entry`](Self::begin_inline_info_entry).
    pub fn begin_stack_map_entry(
        &mut self,
        bc_offset: u32,
        native_pc_offset: u32,
        register_mask: u32,
        stack_mask: Option<&BitVector>,
        num_vregs: u32,
        inlining_depth: u8,
    ) {
        debug_assert!(
            self.current_entry.is_none(),
            "end_stack_map_entry not called after begin_stack_map_entry"
        );
        debug_assert_ne!(bc_offset, u32::MAX, "invalid bytecode offset");

        if let Some(mask) = stack_mask {
            if let Some(highest) = mask.highest_set_bit() {
                self.stack_mask_max = self.stack_mask_max.max(highest as i32);
            }
        }
        if inlining_depth > 0 {
            self.stack_maps_with_inline_info += 1;
        }
        self.bc_offset_max = self.bc_offset_max.max(bc_offset);
        self.register_mask_max = self.register_mask_max.max(register_mask);
        self.current_vreg = 0;

        self.current_entry = Some(StackMapEntry {
            bc_offset,
            native_pc: CodeOffset::from_offset(native_pc_offset, self.isa),
            register_mask,
            stack_mask: stack_mask.cloned(),
            num_vregs,
            inlining_depth,
            vreg_locations_start: self.vreg_location_indices.len(),
            inline_infos_start: self.inline_infos.len(),
            live_vregs: (num_vregs != 0).then(|| BitVector::with_capacity(num_vregs as usize)),
            vreg_map_hash: 0,
            same_vreg_map_as: None,
            register_mask_index: 0,
            stack_mask_index: 0,
        });
    }

    /// Record the location of the next vreg of the open entry (or of the
    /// open inline frame). `VRegLocation::None` marks a dead vreg: it
    /// advances the cursor without touching the catalog or the live mask.
    pub fn add_vreg_entry(&mut self, location: VRegLocation) {
        {
            let num_vregs = match (&self.current_inline, &self.current_entry) {
                (Some(inline), _) => inline.num_vregs,
                (None, Some(entry)) => entry.num_vregs,
                (None, None) => unreachable!("no open stack map entry"),
            };
            debug_assert!(self.current_vreg < num_vregs, "vreg cursor out of range");
        }

        if !location.is_none() {
            let catalog_index = self.catalog.intern(location);
            self.vreg_location_indices.push(catalog_index);

            if let Some(inline) = self.current_inline.as_mut() {
                inline
                    .live_vregs
                    .as_mut()
                    .expect("inline frame declared zero vregs")
                    .set_bit(self.current_vreg as usize);
            } else {
                let entry = self
                    .current_entry
                    .as_mut()
                    .expect("no open stack map entry");
                entry
                    .live_vregs
                    .as_mut()
                    .expect("stack map entry declared zero vregs")
                    .set_bit(self.current_vreg as usize);
                // Cheap rolling hash; collisions are resolved by the full
                // comparison in find_same_vreg_map.
                entry.vreg_map_hash = entry
                    .vreg_map_hash
                    .wrapping_add(1u32.wrapping_shl(self.current_vreg))
                    .wrapping_add(location.value() as u32)
                    .wrapping_add(location.kind() as u32);
            }
        }
        self.current_vreg += 1;
    }

    /// Open an inline frame of the current entry.
    pub fn begin_inline_info_entry(
        &mut self,
        method: MethodRef,
        bc_offset: Option<u32>,
        num_vregs: u32,
    ) {
        debug_assert!(
            self.current_inline.is_none(),
            "end_inline_info_entry not called after begin_inline_info_entry"
        );
        debug_assert!(
            self.current_entry.is_some(),
            "inline frame outside a stack map entry"
        );
        if let MethodRef::Object(bits) = method {
            debug_assert_eq!(bits & 1, 0, "method pointer low bit must be clear");
        }
        debug_assert_ne!(bc_offset, Some(u32::MAX), "use None for an absent bytecode offset");

        self.current_inline = Some(InlineInfoEntry {
            method,
            bc_offset,
            num_vregs,
            vreg_locations_start: self.vreg_location_indices.len(),
            live_vregs: (num_vregs != 0).then(|| BitVector::with_capacity(num_vregs as usize)),
        });
        self.current_vreg = 0;
    }

    /// Close the open inline frame. All of its vregs must have been
    /// recorded.
    pub fn end_inline_info_entry(&mut self) {
        let inline = self.current_inline.take().expect("no open inline frame");
        debug_assert_eq!(
            self.current_vreg, inline.num_vregs,
            "inline frame contains fewer vregs than declared"
        );
        self.inline_infos.push(inline);
    }

    /// Close the open safepoint entry, resolving vreg map sharing against
    /// all earlier entries.
    pub fn end_stack_map_entry(&mut self) {
        debug_assert!(self.current_inline.is_none(), "unterminated inline frame");
        let mut entry = self.current_entry.take().expect("no open stack map entry");

        entry.same_vreg_map_as = self.find_same_vreg_map(&entry);
        let index = self.stack_maps.len() as u32;
        if entry.same_vreg_map_as.is_none() {
            // Entries that matched are not added: any later duplicate will
            // match the bucket's first entry instead.
            self.map_hash_buckets
                .entry(entry.vreg_map_hash)
                .or_default()
                .push(index);
        }
        self.stack_maps.push(entry);
    }

    // =========================================================================
    // Vreg map sharing
    // =========================================================================

    /// Find the earliest prior entry whose vreg map is bit-identical to
    /// `entry`'s.
    fn find_same_vreg_map(&self, entry: &StackMapEntry) -> Option<u32> {
        let candidates = self.map_hash_buckets.get(&entry.vreg_map_hash)?;
        candidates
            .iter()
            .copied()
            .find(|&candidate| self.have_same_vreg_maps(&self.stack_maps[candidate as usize], entry))
    }

    /// Structural equality of two entries' vreg maps: identical vreg count,
    /// identical live mask, identical catalog index slices.
    fn have_same_vreg_maps(&self, a: &StackMapEntry, b: &StackMapEntry) -> bool {
        match (&a.live_vregs, &b.live_vregs) {
            (None, None) => true,
            (None, Some(_)) | (Some(_), None) => false,
            (Some(live_a), Some(live_b)) => {
                if a.num_vregs != b.num_vregs || live_a != live_b {
                    return false;
                }
                let num_live = live_a.count_ones() as usize;
                let slice_a =
                    &self.vreg_location_indices[a.vreg_locations_start..][..num_live];
                let slice_b =
                    &self.vreg_location_indices[b.vreg_locations_start..][..num_live];
                slice_a == slice_b
            }
        }
    }

    // =========================================================================
    // Sizing
    // =========================================================================

    /// Serialized size of one vreg map: live bit mask plus one packed
    /// catalog index per live vreg. Zero when the map has no vregs at all.
    fn vreg_map_size(&self, num_vregs: u32, live_vregs: Option<&BitVector>) -> usize {
        if num_vregs == 0 {
            return 0;
        }
        let live = live_vregs.expect("nonzero vreg count without live mask");
        let entry_bits = vreg_map_entry_bits(self.catalog.len() as u32) as usize;
        vreg_map_live_mask_bytes(num_vregs)
            + bytes_for_bits(live.count_ones() as usize * entry_bits)
    }

    /// Total bytes of the vreg map region. Entries sharing an earlier map
    /// contribute nothing; every inline frame contributes its own map.
    fn compute_vreg_maps_size(&self) -> usize {
        let mut size = 0;
        let mut inline_index = 0;
        for entry in &self.stack_maps {
            if entry.same_vreg_map_as.is_none() {
                size += self.vreg_map_size(entry.num_vregs, entry.live_vregs.as_ref());
            }
            for _ in 0..entry.inlining_depth {
                let inline = &self.inline_infos[inline_index];
                inline_index += 1;
                size += self.vreg_map_size(inline.num_vregs, inline.live_vregs.as_ref());
            }
        }
        debug_assert_eq!(inline_index, self.inline_infos.len());
        size
    }

    /// Observed maxima of the inline info fields:
    /// `(depth, method_index, extra_data, bc_offset)`.
    ///
    /// Frames without a bytecode offset do not contribute to its maximum,
    /// so a chain of offset-less frames costs no bits.
    fn compute_inline_info_maxima(&self) -> (u32, u32, u32, Option<u32>) {
        let mut max_depth = 0u32;
        let mut max_method_index = 0u32;
        let mut max_extra_data = 0u32;
        let mut max_bc_offset: Option<u32> = None;
        for entry in &self.stack_maps {
            max_depth = max_depth.max(u32::from(entry.inlining_depth));
        }
        for inline in &self.inline_infos {
            max_method_index = max_method_index.max(inline.method.method_index_field());
            max_extra_data = max_extra_data.max(inline.method.extra_data_field());
            if let Some(bc) = inline.bc_offset {
                max_bc_offset = Some(max_bc_offset.map_or(bc, |max| max.max(bc)));
            }
        }
        (max_depth, max_method_index, max_extra_data, max_bc_offset)
    }

    /// Assign dense indices for the distinct register mask values, in
    /// first-seen order. Returns the distinct count.
    fn prepare_register_masks(&mut self) -> u32 {
        debug_assert!(self.register_masks.is_empty());
        let mut dedup: FxHashMap<u32, u32> = FxHashMap::default();
        for entry in &mut self.stack_maps {
            let mask = entry.register_mask;
            entry.register_mask_index = match dedup.entry(mask) {
                Entry::Occupied(existing) => *existing.get(),
                Entry::Vacant(vacant) => {
                    let index = self.register_masks.len() as u32;
                    self.register_masks.push(mask);
                    vacant.insert(index);
                    index
                }
            };
        }
        dedup.len() as u32
    }

    /// Materialize every entry's stack mask into a byte-packed buffer of
    /// uniform `ceil(bits / 8)`-byte slots and assign dense indices by byte
    /// content. Returns the distinct count.
    ///
    /// The buffer is allocated at its final size up front; the distinct
    /// slots are the prefix that fill_in later copies out bit by bit.
    fn prepare_stack_masks(&mut self, stack_mask_bits: u32) -> u32 {
        debug_assert!(self.stack_masks.is_empty());
        let slot_bytes = bytes_for_bits(stack_mask_bits as usize);
        let mut buffer = vec![0u8; slot_bytes * self.stack_maps.len()];
        let mut dedup: FxHashMap<Box<[u8]>, u32> = FxHashMap::default();
        for entry in &mut self.stack_maps {
            let index = dedup.len() as u32;
            let slot = &mut buffer[index as usize * slot_bytes..][..slot_bytes];
            if let Some(mask) = &entry.stack_mask {
                for bit in mask.iter_set_bits() {
                    debug_assert!(bit < stack_mask_bits as usize);
                    store_bit(slot, bit, true);
                }
            }
            entry.stack_mask_index = match dedup.entry(Box::from(&*slot)) {
                Entry::Occupied(existing) => *existing.get(),
                Entry::Vacant(vacant) => {
                    vacant.insert(index);
                    index
                }
            };
        }
        self.stack_masks = buffer;
        dedup.len() as u32
    }

    /// Compute every field width and table size, serialize the header, and
    /// return the total byte size `fill_in` will need. One-shot.
    pub fn prepare_for_fill_in(&mut self) -> usize {
        debug_assert!(
            self.current_entry.is_none(),
            "end_stack_map_entry not called after begin_stack_map_entry"
        );
        debug_assert!(self.header.is_empty(), "prepare_for_fill_in already called");

        let vreg_maps_bytes = self.compute_vreg_maps_size() as u32;
        let (max_depth, max_method_index, max_extra_data, max_bc_offset) =
            self.compute_inline_info_maxima();
        let stack_mask_bits = (self.stack_mask_max + 1) as u32;
        let num_stack_masks = self.prepare_stack_masks(stack_mask_bits);
        let num_register_masks = self.prepare_register_masks();
        let max_native_pc = self
            .stack_maps
            .iter()
            .map(|entry| entry.native_pc)
            .max()
            .unwrap_or_default();

        let mut encoding = CodeInfoEncoding {
            num_stack_maps: self.stack_maps.len() as u32,
            stack_map: StackMapEncoding::set_from_sizes(
                max_native_pc.compressed(),
                self.bc_offset_max,
                vreg_maps_bytes,
                self.inline_infos.len() as u32,
                num_register_masks,
                num_stack_masks,
            ),
            num_inline_infos: self.inline_infos.len() as u32,
            inline_info: InlineInfoEncoding::set_from_sizes(
                max_depth,
                max_method_index,
                max_extra_data,
                max_bc_offset,
                vreg_maps_bytes,
            ),
            num_catalog_entries: self.catalog.len() as u32,
            catalog_bytes: self.catalog.byte_size() as u32,
            vreg_maps_bytes,
            num_register_masks,
            register_mask_bits: min_bits_to_store(self.register_mask_max),
            num_stack_masks,
            stack_mask_bits,
            ..CodeInfoEncoding::default()
        };
        encoding.compress(&mut self.header);
        encoding.compute_table_offsets(self.header.len() as u32);
        self.needed_size = encoding.total_size as usize;
        self.encoding = encoding;
        self.needed_size
    }

    // =========================================================================
    // Fill-in
    // =========================================================================

    /// Write the whole blob into `region`, which must be exactly the size
    /// returned by [`prepare_for_fill_in`](Self::prepare_for_fill_in).
    ///
    /// In debug builds the freshly written blob is immediately decoded and
    /// checked against the recorded entries.
    pub fn fill_in(&self, region: &mut [u8]) {
        debug_assert!(
            self.current_entry.is_none(),
            "end_stack_map_entry not called after begin_stack_map_entry"
        );
        debug_assert_ne!(self.needed_size, 0, "prepare_for_fill_in not called");
        debug_assert_eq!(region.len(), self.needed_size, "region size mismatch");

        // The caller's region may be dirty; the packed tables leave padding
        // bits unwritten, so clear everything for a deterministic blob.
        region.fill(0);

        let encoding = &self.encoding;
        region[..self.header.len()].copy_from_slice(&self.header);

        self.catalog.write(
            &mut region[encoding.catalog_offset as usize..][..encoding.catalog_bytes as usize],
        );

        // Vreg map offsets already emitted, for same-map sharing.
        let mut map_offsets: Vec<Option<u32>> = Vec::with_capacity(self.stack_maps.len());
        let mut next_map_offset = 0u32;
        let mut next_inline_index = 0u32;

        for (i, entry) in self.stack_maps.iter().enumerate() {
            let row = i * encoding.stack_map.total_bits() as usize;
            {
                let table = &mut region[encoding.stack_maps_offset as usize..]
                    [..encoding.stack_maps_table_bytes() as usize];
                encoding.stack_map.bc_offset.store(table, row, entry.bc_offset);
                encoding
                    .stack_map
                    .native_pc
                    .store(table, row, entry.native_pc.compressed());
                encoding
                    .stack_map
                    .register_mask_index
                    .store(table, row, entry.register_mask_index);
                encoding
                    .stack_map
                    .stack_mask_index
                    .store(table, row, entry.stack_mask_index);
            }

            let live_count = entry.live_vregs.as_ref().map_or(0, BitVector::count_ones);
            let map_offset = if entry.num_vregs == 0 || live_count == 0 {
                None
            } else if let Some(earlier) = entry.same_vreg_map_as {
                map_offsets[earlier as usize]
            } else {
                let size = self.vreg_map_size(entry.num_vregs, entry.live_vregs.as_ref());
                let offset = next_map_offset;
                next_map_offset += size as u32;
                self.write_vreg_map(
                    &mut region[(encoding.vreg_maps_offset + offset) as usize..][..size],
                    entry.num_vregs,
                    entry.live_vregs.as_ref().expect("live vregs without mask"),
                    entry.vreg_locations_start,
                );
                Some(offset)
            };
            map_offsets.push(map_offset);

            let inline_index = if entry.inlining_depth != 0 {
                let start = next_inline_index;
                debug_assert_eq!(start as usize, entry.inline_infos_start);
                next_inline_index += u32::from(entry.inlining_depth);
                next_map_offset =
                    self.fill_in_inline_chain(region, entry, start, next_map_offset);
                Some(start)
            } else {
                None
            };
            {
                let table = &mut region[encoding.stack_maps_offset as usize..]
                    [..encoding.stack_maps_table_bytes() as usize];
                encoding
                    .stack_map
                    .vreg_map_offset
                    .store_opt(table, row, map_offset);
                encoding
                    .stack_map
                    .inline_info_index
                    .store_opt(table, row, inline_index);
            }
        }
        debug_assert!(next_map_offset <= encoding.vreg_maps_bytes);
        debug_assert_eq!(next_inline_index, encoding.num_inline_infos);

        self.fill_in_stack_masks(region);
        self.fill_in_register_masks(region);

        if cfg!(debug_assertions) {
            verify::check_code_info(self, region);
        }
    }

    /// Emit the inline records of one entry's chain, including their vreg
    /// maps. Returns the advanced vreg map cursor.
    // TODO: share vreg maps across inline frames; every frame currently
    // emits its own copy even when an identical map was already written.
    fn fill_in_inline_chain(
        &self,
        region: &mut [u8],
        entry: &StackMapEntry,
        start: u32,
        mut next_map_offset: u32,
    ) -> u32 {
        let encoding = &self.encoding;
        for depth in 0..u32::from(entry.inlining_depth) {
            let record = entry.inline_infos_start + depth as usize;
            let inline = &self.inline_infos[record];
            let row = record * encoding.inline_info.total_bits() as usize;

            let map_offset = if inline.num_vregs == 0 {
                None
            } else {
                let size = self.vreg_map_size(inline.num_vregs, inline.live_vregs.as_ref());
                let offset = next_map_offset;
                next_map_offset += size as u32;
                self.write_vreg_map(
                    &mut region[(encoding.vreg_maps_offset + offset) as usize..][..size],
                    inline.num_vregs,
                    inline.live_vregs.as_ref().expect("live vregs without mask"),
                    inline.vreg_locations_start,
                );
                Some(offset)
            };

            let table = &mut region[encoding.inline_infos_offset as usize..]
                [..encoding.inline_infos_table_bytes() as usize];
            if depth == 0 {
                // Later records of the chain leave the depth field clear.
                encoding
                    .inline_info
                    .depth
                    .store(table, row, u32::from(entry.inlining_depth));
            }
            encoding
                .inline_info
                .method_index
                .store(table, row, inline.method.method_index_field());
            encoding
                .inline_info
                .extra_data
                .store(table, row, inline.method.extra_data_field());
            encoding
                .inline_info
                .bc_offset
                .store_opt(table, row, inline.bc_offset);
            encoding
                .inline_info
                .vreg_map_offset
                .store_opt(table, row, map_offset);
        }
        next_map_offset
    }

    /// Materialize one vreg map: the live bit mask, then one packed catalog
    /// index per live vreg, taken from the shared index array.
    fn write_vreg_map(
        &self,
        map_region: &mut [u8],
        num_vregs: u32,
        live_vregs: &BitVector,
        locations_start: usize,
    ) {
        for bit in live_vregs.iter_set_bits() {
            debug_assert!(bit < num_vregs as usize);
            store_bit(map_region, bit, true);
        }
        let entry_bits = vreg_map_entry_bits(self.catalog.len() as u32) as usize;
        let indices_base = vreg_map_live_mask_bytes(num_vregs) * 8;
        let num_live = live_vregs.count_ones() as usize;
        for k in 0..num_live {
            let catalog_index = self.vreg_location_indices[locations_start + k];
            store_bits(
                map_region,
                indices_base + k * entry_bits,
                catalog_index,
                entry_bits,
            );
        }
    }

    /// Copy the distinct stack masks from the byte-packed intern buffer
    /// into the bit-packed table.
    fn fill_in_stack_masks(&self, region: &mut [u8]) {
        let encoding = &self.encoding;
        let mask_bits = encoding.stack_mask_bits as usize;
        if mask_bits == 0 {
            return;
        }
        let slot_bytes = bytes_for_bits(mask_bits);
        let table = &mut region[encoding.stack_masks_offset as usize..]
            [..encoding.stack_masks_table_bytes() as usize];
        for i in 0..encoding.num_stack_masks as usize {
            let source = &self.stack_masks[i * slot_bytes..][..slot_bytes];
            for bit in 0..mask_bits {
                store_bit(table, i * mask_bits + bit, load_bit(source, bit));
            }
        }
    }

    /// Emit the distinct register masks at the packed bit width.
    fn fill_in_register_masks(&self, region: &mut [u8]) {
        let encoding = &self.encoding;
        let mask_bits = encoding.register_mask_bits as usize;
        let table = &mut region[encoding.register_masks_offset as usize..]
            [..encoding.register_masks_table_bytes() as usize];
        for (i, &mask) in self.register_masks.iter().enumerate() {
            store_bits(table, i * mask_bits, mask, mask_bits);
        }
    }

    // =========================================================================
    // Stats
    // =========================================================================

    /// Snapshot of the encoder's dedup and size counters. The distinct
    /// counts and the encoded size are populated by `prepare_for_fill_in`.
    pub fn stats(&self) -> EncodeStats {
        EncodeStats {
            stack_maps: self.stack_maps.len(),
            stack_maps_with_inline_info: self.stack_maps_with_inline_info as usize,
            inline_infos: self.inline_infos.len(),
            catalog_entries: self.catalog.len(),
            distinct_register_masks: self.encoding.num_register_masks as usize,
            distinct_stack_masks: self.encoding.num_stack_masks as usize,
            shared_vreg_maps: self
                .stack_maps
                .iter()
                .filter(|entry| entry.same_vreg_map_as.is_some())
                .count(),
            encoded_bytes: self.needed_size,
        }
    }

    #[inline]
    pub(crate) fn isa(&self) -> InstructionSet {
        self.isa
    }
}

// =============================================================================
// Tests
// =============================================================================
