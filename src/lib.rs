//! Compact stack map (safepoint metadata) encoding for a method JIT.
//!
//! At every safepoint in generated code the runtime must be able to find
//! the live managed references (for GC root enumeration and stack walking)
//! and reconstruct the abstract machine state (for deoptimization). This
//! crate builds that metadata as one compact binary blob per compiled
//! method, and decodes it back.
//!
//! # Architecture
//!
//! ```text
//!   register allocator / code generator
//!                 │ begin/add/end per safepoint
//!                 ▼
//!        ┌─────────────────┐   interns locations   ┌─────────────────┐
//!        │  StackMapStream │ ────────────────────▶ │ LocationCatalog │
//!        └─────────────────┘                       └─────────────────┘
//!                 │ prepare_for_fill_in: dedup masks, pick bit widths
//!                 ▼
//!        ┌─────────────────┐      fill_in          ┌─────────────────┐
//!        │ CodeInfoEncoding│ ────────────────────▶ │   byte region   │
//!        └─────────────────┘                       └─────────────────┘
//!                                                           │
//!                                    CodeInfo (reader) ◀────┘
//! ```
//!
//! Deduplication happens on three independent axes: vreg locations (the
//! catalog), register/stack masks (interned side tables), and whole vreg
//! maps (offset sharing between safepoints with identical maps). Every
//! numeric field is then bit-packed to the width of its observed maximum,
//! so typical blobs are a few bytes per safepoint.
//!
//! The encoder buffers everything and lays the blob out in a single pass:
//! table offsets depend on sizes that are only known once all entries have
//! been recorded.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod bits;
pub mod encoding;
pub mod isa;
pub mod location;
pub mod reader;
pub mod stats;
pub mod stream;
mod verify;

pub use bits::BitVector;
pub use encoding::CodeInfoEncoding;
pub use isa::{CodeOffset, InstructionSet};
pub use location::{LocationCatalog, LocationKind, VRegLocation};
pub use reader::{CodeInfo, InlineInfoRef, StackMapRef, VRegMapRef};
pub use stats::EncodeStats;
pub use stream::{MethodRef, StackMapStream};
