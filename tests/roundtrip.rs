//! End-to-end encode/decode scenarios.
//!
//! Every test drives the public streaming API, encodes a blob, and decodes
//! it back with `CodeInfo`. These run with debug assertions on, so the
//! encoder's own readback verifier also checks each blob during `fill_in`.

use stackmap_stream::{
    BitVector, CodeInfo, InstructionSet, MethodRef, StackMapStream, VRegLocation,
};

fn mask_of(bits: &[usize]) -> BitVector {
    let mut mask = BitVector::new();
    for &bit in bits {
        mask.set_bit(bit);
    }
    mask
}

fn encode(stream: &mut StackMapStream) -> Vec<u8> {
    let size = stream.prepare_for_fill_in();
    let mut blob = vec![0xa5u8; size]; // dirty region; fill_in must not care
    stream.fill_in(&mut blob);
    blob
}

#[test]
fn test_empty_stream_encodes_header_only() {
    let mut stream = StackMapStream::new(InstructionSet::X86_64);
    let blob = encode(&mut stream);

    let info = CodeInfo::new(&blob);
    assert_eq!(info.num_stack_maps(), 0);
    assert_eq!(info.encoding().num_catalog_entries, 0);
    assert_eq!(info.encoding().num_register_masks, 0);
    assert_eq!(info.encoding().num_stack_masks, 0);
    // Nothing but the header.
    assert_eq!(info.encoding().total_size as usize, blob.len());
    assert_eq!(info.encoding().catalog_offset as usize, blob.len());
}

#[test]
fn test_single_map_one_live_register() {
    let mut stream = StackMapStream::new(InstructionSet::X86_64);
    stream.begin_stack_map_entry(10, 4, 0x3, Some(&mask_of(&[1])), 1, 0);
    stream.add_vreg_entry(VRegLocation::Register(5));
    stream.end_stack_map_entry();
    let blob = encode(&mut stream);

    let info = CodeInfo::new(&blob);
    assert_eq!(info.num_stack_maps(), 1);
    assert_eq!(info.encoding().num_catalog_entries, 1);
    assert_eq!(info.catalog_location_at(0), VRegLocation::Register(5));

    let stack_map = info.stack_map_at(0);
    assert_eq!(stack_map.bc_offset(), 10);
    assert_eq!(stack_map.native_pc_offset(InstructionSet::X86_64), 4);
    assert_eq!(info.register_mask_at(stack_map.register_mask_index()), 0x3);
    assert_eq!(
        info.stack_mask_at(stack_map.stack_mask_index()),
        mask_of(&[1])
    );

    let map = info.vreg_map_of(stack_map, 1).expect("map must be present");
    assert!(map.is_live(0));
    assert_eq!(map.location_of(0, &info), VRegLocation::Register(5));
}

#[test]
fn test_identical_vreg_maps_share_one_encoding() {
    let mut stream = StackMapStream::new(InstructionSet::X86_64);
    for (bc, native) in [(10u32, 0u32), (20, 16)] {
        stream.begin_stack_map_entry(bc, native, 0, None, 1, 0);
        stream.add_vreg_entry(VRegLocation::Register(5));
        stream.end_stack_map_entry();
    }
    let blob = encode(&mut stream);

    let info = CodeInfo::new(&blob);
    assert_eq!(info.encoding().num_catalog_entries, 1);

    let first = info.stack_map_at(0).vreg_map_offset();
    let second = info.stack_map_at(1).vreg_map_offset();
    assert!(first.is_some());
    assert_eq!(first, second);

    // One map: a 1-byte live mask plus one 1-bit catalog index.
    assert_eq!(info.encoding().vreg_maps_bytes, 2);
    assert_eq!(stream.stats().shared_vreg_maps, 1);
}

#[test]
fn test_dead_register_between_live_ones() {
    let mut stream = StackMapStream::new(InstructionSet::X86_64);
    stream.begin_stack_map_entry(0, 0, 0, None, 3, 0);
    stream.add_vreg_entry(VRegLocation::Register(2));
    stream.add_vreg_entry(VRegLocation::None);
    stream.add_vreg_entry(VRegLocation::Stack(16));
    stream.end_stack_map_entry();
    let blob = encode(&mut stream);

    let info = CodeInfo::new(&blob);
    assert_eq!(info.encoding().num_catalog_entries, 2);

    let map = info
        .vreg_map_of(info.stack_map_at(0), 3)
        .expect("map must be present");
    assert!(map.is_live(0));
    assert!(!map.is_live(1));
    assert!(map.is_live(2));
    assert_eq!(map.live_count(), 2);
    assert_eq!(map.location_of(0, &info), VRegLocation::Register(2));
    assert_eq!(map.location_of(1, &info), VRegLocation::None);
    assert_eq!(map.location_of(2, &info), VRegLocation::Stack(16));
}

#[test]
fn test_inlining_depth_two() {
    let method_bits = 0x0000_7f00_1234_5678u64;

    let mut stream = StackMapStream::new(InstructionSet::Arm64);
    stream.begin_stack_map_entry(5, 8, 0x1, None, 1, 2);
    stream.add_vreg_entry(VRegLocation::Register(0));

    stream.begin_inline_info_entry(MethodRef::Object(method_bits), Some(3), 1);
    stream.add_vreg_entry(VRegLocation::Constant(7));
    stream.end_inline_info_entry();

    stream.begin_inline_info_entry(MethodRef::Index(42), None, 2);
    stream.add_vreg_entry(VRegLocation::None);
    stream.add_vreg_entry(VRegLocation::Stack(8));
    stream.end_inline_info_entry();

    stream.end_stack_map_entry();
    let blob = encode(&mut stream);

    let info = CodeInfo::new(&blob);
    assert_eq!(info.encoding().num_inline_infos, 2);

    let stack_map = info.stack_map_at(0);
    assert!(stack_map.has_inline_info());
    let chain = info.inline_info_of(stack_map).expect("chain present");
    assert_eq!(chain.depth(), 2);

    assert!(chain.encodes_method_object_at(0));
    assert_eq!(chain.method_at(0), MethodRef::Object(method_bits));
    assert_eq!(chain.bc_offset_at(0), Some(3));
    let frame0 = info
        .vreg_map_at_depth(chain, 0, 1)
        .expect("frame 0 map present");
    assert_eq!(frame0.location_of(0, &info), VRegLocation::Constant(7));

    assert!(!chain.encodes_method_object_at(1));
    assert_eq!(chain.method_at(1), MethodRef::Index(42));
    assert_eq!(chain.bc_offset_at(1), None);
    let frame1 = info
        .vreg_map_at_depth(chain, 1, 2)
        .expect("frame 1 map present");
    assert_eq!(frame1.location_of(0, &info), VRegLocation::None);
    assert_eq!(frame1.location_of(1, &info), VRegLocation::Stack(8));

    // The outer map is separate from the inline frames' maps.
    let outer = info
        .vreg_map_of(stack_map, 1)
        .expect("outer map present");
    assert_eq!(outer.location_of(0, &info), VRegLocation::Register(0));
}

#[test]
fn test_entries_differing_only_by_stack_mask() {
    let mut stream = StackMapStream::new(InstructionSet::X86_64);
    for mask in [mask_of(&[0]), mask_of(&[2, 5])] {
        stream.begin_stack_map_entry(0, 0, 0, Some(&mask), 1, 0);
        stream.add_vreg_entry(VRegLocation::Register(1));
        stream.end_stack_map_entry();
    }
    let blob = encode(&mut stream);

    let info = CodeInfo::new(&blob);
    // One shared vreg map, two distinct stack masks.
    assert_eq!(
        info.stack_map_at(0).vreg_map_offset(),
        info.stack_map_at(1).vreg_map_offset()
    );
    assert_eq!(info.encoding().num_stack_masks, 2);
    assert_eq!(info.encoding().stack_mask_bits, 6);
    assert_eq!(
        info.stack_mask_at(info.stack_map_at(1).stack_mask_index()),
        mask_of(&[2, 5])
    );
}

#[test]
fn test_mask_tables_deduplicate_and_resolve() {
    let register_masks = [0x11u32, 0x22, 0x11, 0x22, 0x11];
    let stack_masks = [
        mask_of(&[0]),
        mask_of(&[0]),
        mask_of(&[7]),
        mask_of(&[0]),
        mask_of(&[7]),
    ];

    let mut stream = StackMapStream::new(InstructionSet::X86_64);
    for (i, (&register_mask, stack_mask)) in
        register_masks.iter().zip(&stack_masks).enumerate()
    {
        stream.begin_stack_map_entry(i as u32, i as u32 * 4, register_mask, Some(stack_mask), 0, 0);
        stream.end_stack_map_entry();
    }
    let blob = encode(&mut stream);

    let info = CodeInfo::new(&blob);
    assert_eq!(info.encoding().num_register_masks, 2);
    assert_eq!(info.encoding().num_stack_masks, 2);

    for i in 0..5 {
        let stack_map = info.stack_map_at(i as u32);
        assert_eq!(
            info.register_mask_at(stack_map.register_mask_index()),
            register_masks[i]
        );
        assert_eq!(
            info.stack_mask_at(stack_map.stack_mask_index()),
            stack_masks[i]
        );
    }
}

#[test]
fn test_field_widths_track_observed_maxima() {
    // Maximum native pc 16 on a 1-byte-aligned target needs 5 bits.
    let mut stream = StackMapStream::new(InstructionSet::X86);
    stream.begin_stack_map_entry(8, 16, 0, None, 0, 0);
    stream.end_stack_map_entry();
    let blob = encode(&mut stream);
    let encoding = CodeInfo::new(&blob).encoding().clone();
    assert_eq!(encoding.stack_map.native_pc.bit_size(), 5);
    assert_eq!(encoding.stack_map.bc_offset.bit_size(), 4);

    // One less than a power of two drops a bit.
    let mut stream = StackMapStream::new(InstructionSet::X86);
    stream.begin_stack_map_entry(7, 15, 0, None, 0, 0);
    stream.end_stack_map_entry();
    let blob = encode(&mut stream);
    let encoding = CodeInfo::new(&blob).encoding().clone();
    assert_eq!(encoding.stack_map.native_pc.bit_size(), 4);
    assert_eq!(encoding.stack_map.bc_offset.bit_size(), 3);

    // Thumb2 halves the native pc before sizing.
    let mut stream = StackMapStream::new(InstructionSet::Thumb2);
    stream.begin_stack_map_entry(0, 16, 0, None, 0, 0);
    stream.end_stack_map_entry();
    let blob = encode(&mut stream);
    let encoding = CodeInfo::new(&blob).encoding().clone();
    assert_eq!(encoding.stack_map.native_pc.bit_size(), 4);
}

#[test]
fn test_absent_maps_encode_as_no_map() {
    let mut stream = StackMapStream::new(InstructionSet::X86_64);

    // No vregs at all.
    stream.begin_stack_map_entry(0, 0, 0, None, 0, 0);
    stream.end_stack_map_entry();

    // Declared vregs, none live.
    stream.begin_stack_map_entry(1, 4, 0, None, 3, 0);
    stream.add_vreg_entry(VRegLocation::None);
    stream.add_vreg_entry(VRegLocation::None);
    stream.add_vreg_entry(VRegLocation::None);
    stream.end_stack_map_entry();

    let blob = encode(&mut stream);
    let info = CodeInfo::new(&blob);
    assert_eq!(info.stack_map_at(0).vreg_map_offset(), None);
    assert_eq!(info.stack_map_at(1).vreg_map_offset(), None);
    assert!(info.vreg_map_of(info.stack_map_at(1), 3).is_none());
}

#[test]
fn test_large_mixed_method_roundtrip() {
    let mut stream = StackMapStream::new(InstructionSet::Arm64);
    let stack_mask = mask_of(&[0, 2, 17]);
    for i in 0u32..64 {
        let register_mask = 1 << (i % 7);
        stream.begin_stack_map_entry(
            i * 3,
            i * 8,
            register_mask,
            if i % 2 == 0 { Some(&stack_mask) } else { None },
            4,
            0,
        );
        stream.add_vreg_entry(VRegLocation::Register((i % 5) as u8));
        stream.add_vreg_entry(VRegLocation::None);
        stream.add_vreg_entry(VRegLocation::Constant(i as i32 % 3));
        stream.add_vreg_entry(VRegLocation::Stack((i as i32 % 4) * 4));
        stream.end_stack_map_entry();
    }
    let blob = encode(&mut stream);

    let info = CodeInfo::new(&blob);
    assert_eq!(info.num_stack_maps(), 64);
    assert_eq!(info.encoding().num_register_masks, 7);
    assert_eq!(info.encoding().num_stack_masks, 2);

    for i in 0u32..64 {
        let stack_map = info.stack_map_at(i);
        assert_eq!(stack_map.bc_offset(), i * 3);
        assert_eq!(stack_map.native_pc_offset(InstructionSet::Arm64), i * 8);
        assert_eq!(
            info.register_mask_at(stack_map.register_mask_index()),
            1 << (i % 7)
        );
        let map = info.vreg_map_of(stack_map, 4).expect("map present");
        assert_eq!(
            map.location_of(0, &info),
            VRegLocation::Register((i % 5) as u8)
        );
        assert_eq!(map.location_of(1, &info), VRegLocation::None);
        assert_eq!(
            map.location_of(2, &info),
            VRegLocation::Constant(i as i32 % 3)
        );
        assert_eq!(
            map.location_of(3, &info),
            VRegLocation::Stack((i as i32 % 4) * 4)
        );
    }

    // 64 safepoints share 5 * 3 * 4 = 60 distinct maps at most; dedup must
    // have found the repeats.
    assert!(stream.stats().shared_vreg_maps > 0);
}
