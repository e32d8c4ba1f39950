//! Vreg locations and the deduplicated location catalog.
//!
//! Every live vreg at a safepoint maps to a physical location: a hardware
//! register, an FPU register, a frame slot, or a constant. The set of
//! distinct locations across a method is tiny compared to the number of
//! safepoints, so locations are interned once into an ordered catalog and
//! vreg maps store dense catalog indices instead of full locations.
//!
//! # Wire form
//!
//! A catalog entry is one byte when the payload is small (3-bit kind tag in
//! the low bits, 5-bit payload above it) and five bytes otherwise (a large
//! kind tag followed by the 32-bit payload, little-endian). Stack offsets
//! take the short form when they are a nonnegative multiple of the frame
//! slot size below 128, storing the slot number; constants when they are in
//! `[0, 32)`. Register numbers must always fit the short payload.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

// =============================================================================
// VRegLocation
// =============================================================================

/// Location kind, as folded into the vreg map rolling hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum LocationKind {
    None = 0,
    Register = 1,
    FpuRegister = 2,
    Constant = 3,
    Stack = 4,
}

/// Physical location of one vreg at one safepoint.
///
/// `None` marks a dead vreg; it is never interned in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VRegLocation {
    None,
    /// Core register number.
    Register(u8),
    /// FPU register number.
    FpuRegister(u8),
    /// Constant value, materialized on deoptimization.
    Constant(i32),
    /// Frame slot at this byte offset.
    Stack(i32),
}

impl VRegLocation {
    /// The kind of this location.
    #[inline]
    pub fn kind(self) -> LocationKind {
        match self {
            VRegLocation::None => LocationKind::None,
            VRegLocation::Register(_) => LocationKind::Register,
            VRegLocation::FpuRegister(_) => LocationKind::FpuRegister,
            VRegLocation::Constant(_) => LocationKind::Constant,
            VRegLocation::Stack(_) => LocationKind::Stack,
        }
    }

    /// The payload as a signed value (0 for `None`).
    #[inline]
    pub fn value(self) -> i32 {
        match self {
            VRegLocation::None => 0,
            VRegLocation::Register(r) | VRegLocation::FpuRegister(r) => i32::from(r),
            VRegLocation::Constant(v) | VRegLocation::Stack(v) => v,
        }
    }

    /// Whether this is the dead-vreg marker.
    #[inline]
    pub fn is_none(self) -> bool {
        matches!(self, VRegLocation::None)
    }
}

// =============================================================================
// Wire encoding
// =============================================================================

/// Byte size of a frame slot; short stack entries store slot numbers.
pub const FRAME_SLOT_BYTES: i32 = 4;

const KIND_BITS: u32 = 3;
const SHORT_PAYLOAD_LIMIT: i32 = 32; // 5 payload bits

const TAG_REGISTER: u8 = 1;
const TAG_FPU_REGISTER: u8 = 2;
const TAG_CONSTANT: u8 = 3;
const TAG_STACK: u8 = 4;
const TAG_LARGE_CONSTANT: u8 = 5;
const TAG_LARGE_STACK: u8 = 6;

const SHORT_ENTRY_BYTES: usize = 1;
const LARGE_ENTRY_BYTES: usize = 5;

#[inline]
fn has_short_form(location: VRegLocation) -> bool {
    match location {
        VRegLocation::None => unreachable!("dead vregs have no wire form"),
        VRegLocation::Register(_) | VRegLocation::FpuRegister(_) => true,
        VRegLocation::Constant(v) => (0..SHORT_PAYLOAD_LIMIT).contains(&v),
        VRegLocation::Stack(offset) => {
            offset >= 0
                && offset % FRAME_SLOT_BYTES == 0
                && offset / FRAME_SLOT_BYTES < SHORT_PAYLOAD_LIMIT
        }
    }
}

/// Serialized size of one catalog entry in bytes.
#[inline]
pub fn entry_size(location: VRegLocation) -> usize {
    if has_short_form(location) {
        SHORT_ENTRY_BYTES
    } else {
        LARGE_ENTRY_BYTES
    }
}

#[inline]
fn short_entry(tag: u8, payload: u8) -> u8 {
    debug_assert!(i32::from(payload) < SHORT_PAYLOAD_LIMIT);
    tag | (payload << KIND_BITS)
}

/// Encode one catalog entry into its wire form.
pub(crate) fn encode_entry(location: VRegLocation) -> SmallVec<[u8; LARGE_ENTRY_BYTES]> {
    let mut out = SmallVec::new();
    match location {
        VRegLocation::None => unreachable!("dead vregs have no wire form"),
        VRegLocation::Register(r) => out.push(short_entry(TAG_REGISTER, r)),
        VRegLocation::FpuRegister(r) => out.push(short_entry(TAG_FPU_REGISTER, r)),
        VRegLocation::Constant(v) => {
            if has_short_form(location) {
                out.push(short_entry(TAG_CONSTANT, v as u8));
            } else {
                out.push(TAG_LARGE_CONSTANT);
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        VRegLocation::Stack(offset) => {
            if has_short_form(location) {
                out.push(short_entry(TAG_STACK, (offset / FRAME_SLOT_BYTES) as u8));
            } else {
                out.push(TAG_LARGE_STACK);
                out.extend_from_slice(&offset.to_le_bytes());
            }
        }
    }
    debug_assert_eq!(out.len(), entry_size(location));
    out
}

/// Decode the catalog entry starting at `offset`; returns the location and
/// its serialized size.
pub(crate) fn decode_entry(bytes: &[u8], offset: usize) -> (VRegLocation, usize) {
    let head = bytes[offset];
    let tag = head & ((1 << KIND_BITS) - 1);
    let payload = head >> KIND_BITS;
    match tag {
        TAG_REGISTER => (VRegLocation::Register(payload), SHORT_ENTRY_BYTES),
        TAG_FPU_REGISTER => (VRegLocation::FpuRegister(payload), SHORT_ENTRY_BYTES),
        TAG_CONSTANT => (VRegLocation::Constant(i32::from(payload)), SHORT_ENTRY_BYTES),
        TAG_STACK => (
            VRegLocation::Stack(i32::from(payload) * FRAME_SLOT_BYTES),
            SHORT_ENTRY_BYTES,
        ),
        TAG_LARGE_CONSTANT | TAG_LARGE_STACK => {
            let value = i32::from_le_bytes(
                bytes[offset + 1..offset + LARGE_ENTRY_BYTES]
                    .try_into()
                    .unwrap(),
            );
            let location = if tag == TAG_LARGE_CONSTANT {
                VRegLocation::Constant(value)
            } else {
                VRegLocation::Stack(value)
            };
            (location, LARGE_ENTRY_BYTES)
        }
        _ => unreachable!("corrupt location catalog entry"),
    }
}

// =============================================================================
// LocationCatalog
// =============================================================================

/// Ordered set of unique vreg locations with dense indices.
///
/// The first location interned gets index 0, the next distinct one index 1,
/// and so on; an index is stable for the life of the catalog.
#[derive(Debug, Default)]
pub struct LocationCatalog {
    entries: Vec<VRegLocation>,
    indices: FxHashMap<VRegLocation, u32>,
}

impl LocationCatalog {
    /// Create an empty catalog.
    #[inline]
    pub fn new() -> Self {
        LocationCatalog::default()
    }

    /// Intern `location`, returning its dense index.
    pub fn intern(&mut self, location: VRegLocation) -> u32 {
        debug_assert!(!location.is_none(), "dead vregs are not interned");
        if let VRegLocation::Register(r) | VRegLocation::FpuRegister(r) = location {
            debug_assert!(
                i32::from(r) < SHORT_PAYLOAD_LIMIT,
                "register number out of range"
            );
        }
        if let Some(&index) = self.indices.get(&location) {
            return index;
        }
        let index = self.entries.len() as u32;
        self.entries.push(location);
        self.indices.insert(location, index);
        index
    }

    /// Number of distinct locations.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The location at `index`.
    #[inline]
    pub fn get(&self, index: u32) -> VRegLocation {
        self.entries[index as usize]
    }

    /// Serialized size of the whole catalog in bytes.
    pub fn byte_size(&self) -> usize {
        self.entries.iter().map(|&loc| entry_size(loc)).sum()
    }

    /// Serialize all entries into `region`, which must be exactly
    /// [`byte_size`](Self::byte_size) bytes.
    pub(crate) fn write(&self, region: &mut [u8]) {
        let mut offset = 0;
        for &location in &self.entries {
            let encoded = encode_entry(location);
            region[offset..offset + encoded.len()].copy_from_slice(&encoded);
            offset += encoded.len();
        }
        debug_assert_eq!(offset, region.len());
    }
}

// =============================================================================
// Tests
// =============================================================================
