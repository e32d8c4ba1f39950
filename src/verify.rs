//! Readback verification of freshly encoded blobs.
//!
//! Run from [`fill_in`](crate::stream::StackMapStream::fill_in) in debug
//! builds: decode everything that was just written and assert it matches
//! the recorded entries bit for bit. A failure here is an encoder bug, not
//! bad input, so the checks are plain `assert`s.

use crate::bits::BitVector;
use crate::location::VRegLocation;
use crate::reader::{CodeInfo, VRegMapRef};
use crate::stream::StackMapStream;

/// Decode `region` and check every stack map against the stream's
/// recorded entries.
pub(crate) fn check_code_info(stream: &StackMapStream, region: &[u8]) {
    let info = CodeInfo::new(region);
    assert_eq!(info.num_stack_maps() as usize, stream.stack_maps.len());
    let num_stack_mask_bits = info.num_stack_mask_bits();

    for (index, entry) in stream.stack_maps.iter().enumerate() {
        let stack_map = info.stack_map_at(index as u32);

        assert_eq!(
            stack_map.native_pc_offset(stream.isa()),
            entry.native_pc.offset(stream.isa())
        );
        assert_eq!(stack_map.bc_offset(), entry.bc_offset);

        assert_eq!(stack_map.register_mask_index(), entry.register_mask_index);
        assert_eq!(
            info.register_mask_at(stack_map.register_mask_index()),
            entry.register_mask
        );

        assert_eq!(stack_map.stack_mask_index(), entry.stack_mask_index);
        // An absent source mask must read back as all zeros over the full
        // stack mask width.
        for bit in 0..num_stack_mask_bits {
            let expected = entry
                .stack_mask
                .as_ref()
                .is_some_and(|mask| mask.is_set(bit as usize));
            assert_eq!(
                info.stack_mask_bit(stack_map.stack_mask_index(), bit),
                expected
            );
        }

        check_vreg_map(
            stream,
            &info,
            info.vreg_map_of(stack_map, entry.num_vregs),
            entry.num_vregs,
            entry.live_vregs.as_ref(),
            entry.vreg_locations_start,
        );

        assert_eq!(stack_map.has_inline_info(), entry.inlining_depth != 0);
        if entry.inlining_depth != 0 {
            let inline_info = info
                .inline_info_of(stack_map)
                .expect("inline chain missing after encode");
            assert_eq!(inline_info.start_index() as usize, entry.inline_infos_start);
            assert_eq!(inline_info.depth(), u32::from(entry.inlining_depth));

            for depth in 0..u32::from(entry.inlining_depth) {
                let inline = &stream.inline_infos[entry.inline_infos_start + depth as usize];
                assert_eq!(
                    inline_info.encodes_method_object_at(depth),
                    inline.method.encodes_object()
                );
                assert_eq!(inline_info.method_at(depth), inline.method);
                assert_eq!(inline_info.bc_offset_at(depth), inline.bc_offset);

                check_vreg_map(
                    stream,
                    &info,
                    info.vreg_map_at_depth(inline_info, depth, inline.num_vregs),
                    inline.num_vregs,
                    inline.live_vregs.as_ref(),
                    inline.vreg_locations_start,
                );
            }
        }
    }
}

/// Check that a decoded vreg map matches the recorded live mask and
/// location slice.
fn check_vreg_map(
    stream: &StackMapStream,
    info: &CodeInfo<'_>,
    map: Option<VRegMapRef<'_>>,
    num_vregs: u32,
    live_vregs: Option<&BitVector>,
    locations_start: usize,
) {
    let mut location_index = locations_start;
    for reg in 0..num_vregs {
        let expected = if live_vregs.is_some_and(|mask| mask.is_set(reg as usize)) {
            let catalog_index = stream.vreg_location_indices[location_index];
            location_index += 1;
            stream.catalog.get(catalog_index)
        } else {
            VRegLocation::None
        };
        match map {
            Some(map) => assert_eq!(map.location_of(reg, info), expected),
            None => assert!(expected.is_none(), "live vreg lost in encoding"),
        }
    }
    if num_vregs == 0 {
        assert!(map.is_none());
    }
}
