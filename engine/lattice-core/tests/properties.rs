use lattice_core::{
    Error, FieldSpec, HeapBuffer, MemoryStack, ScratchAllocator, compute_layout,
    compute_layout_for_target, read_bool32, read_f32, read_f64, read_i8, read_i16, read_i32,
    read_i64, read_pointer, read_u8, read_u16, read_u32, read_u64, write_bool32, write_f32,
    write_f64, write_i8, write_i16, write_i32, write_i64, write_pointer, write_u8, write_u16,
    write_u32, write_u64,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn random_field(rng: &mut ChaCha8Rng) -> FieldSpec {
    match rng.gen_range(0..4) {
        0 => FieldSpec::pointer(),
        1 => FieldSpec::primitive(1 << rng.gen_range(0..4)).array(rng.gen_range(1..5)),
        2 => FieldSpec::new(rng.gen_range(1..24), 1 << rng.gen_range(0..5)),
        _ => FieldSpec::primitive(1 << rng.gen_range(0..4)),
    }
}

fn resolved_align(field: &FieldSpec, pointer_size: usize) -> usize {
    match *field {
        FieldSpec::Fixed { align, .. } => align,
        FieldSpec::Pointer { .. } => pointer_size,
    }
}

#[test]
fn layout_offsets_are_ordered_and_aligned() {
    let mut rng = ChaCha8Rng::seed_from_u64(0x1a77_1ce5);

    for _ in 0..2_000 {
        let fields = (0..rng.gen_range(1..12))
            .map(|_| random_field(&mut rng))
            .collect::<Vec<_>>();

        for pointer_size in [4, 8] {
            let layout = compute_layout_for_target(&fields, pointer_size).unwrap();
            let offsets = layout.offsets();
            assert_eq!(offsets.len(), fields.len());

            let mut max_align = 1;
            for (i, field) in fields.iter().enumerate() {
                let align = resolved_align(field, pointer_size);
                max_align = max_align.max(align);
                assert_eq!(offsets[i] % align, 0);
                if i > 0 {
                    assert!(offsets[i] >= offsets[i - 1]);
                }
            }

            assert_eq!(layout.align(), max_align);
            assert_eq!(layout.size() % layout.align(), 0);
            assert!(layout.size() >= *offsets.last().unwrap());
        }
    }
}

#[test]
fn layout_matches_repr_c() {
    #[repr(C)]
    struct Features {
        s_type: i32,
        p_next: *mut std::ffi::c_void,
        enabled: u32,
    }

    #[repr(C)]
    struct Mixed {
        a: u8,
        b: u16,
        c: [u8; 3],
        d: u64,
        e: u8,
    }

    let layout = compute_layout(&[
        FieldSpec::primitive(4),
        FieldSpec::pointer(),
        FieldSpec::primitive(4),
    ])
    .unwrap();
    assert_eq!(layout.size(), std::mem::size_of::<Features>());
    assert_eq!(layout.align(), std::mem::align_of::<Features>());
    assert_eq!(
        layout.offsets(),
        &[
            std::mem::offset_of!(Features, s_type),
            std::mem::offset_of!(Features, p_next),
            std::mem::offset_of!(Features, enabled),
        ]
    );

    let layout = compute_layout(&[
        FieldSpec::primitive(1),
        FieldSpec::primitive(2),
        FieldSpec::primitive(1).array(3),
        FieldSpec::new(8, std::mem::align_of::<u64>()),
        FieldSpec::primitive(1),
    ])
    .unwrap();
    assert_eq!(layout.size(), std::mem::size_of::<Mixed>());
    assert_eq!(layout.align(), std::mem::align_of::<Mixed>());
    assert_eq!(
        layout.offsets(),
        &[
            std::mem::offset_of!(Mixed, a),
            std::mem::offset_of!(Mixed, b),
            std::mem::offset_of!(Mixed, c),
            std::mem::offset_of!(Mixed, d),
            std::mem::offset_of!(Mixed, e),
        ]
    );
}

#[test]
fn primitive_round_trip() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let mut bytes = [0u8; 32];

    for _ in 0..1_000 {
        let offset = rng.gen_range(0..16);
        let ptr = unsafe { bytes.as_mut_ptr().add(offset) };

        unsafe {
            let v: i8 = rng.r#gen();
            write_i8(ptr, v);
            assert_eq!(read_i8(ptr), v);

            let v: u8 = rng.r#gen();
            write_u8(ptr, v);
            assert_eq!(read_u8(ptr), v);

            let v: i16 = rng.r#gen();
            write_i16(ptr, v);
            assert_eq!(read_i16(ptr), v);

            let v: u16 = rng.r#gen();
            write_u16(ptr, v);
            assert_eq!(read_u16(ptr), v);

            let v: i32 = rng.r#gen();
            write_i32(ptr, v);
            assert_eq!(read_i32(ptr), v);

            let v: u32 = rng.r#gen();
            write_u32(ptr, v);
            assert_eq!(read_u32(ptr), v);

            let v: i64 = rng.r#gen();
            write_i64(ptr, v);
            assert_eq!(read_i64(ptr), v);

            let v: u64 = rng.r#gen();
            write_u64(ptr, v);
            assert_eq!(read_u64(ptr), v);

            let v: f32 = rng.r#gen();
            write_f32(ptr, v);
            assert_eq!(read_f32(ptr).to_bits(), v.to_bits());

            let v: f64 = rng.r#gen();
            write_f64(ptr, v);
            assert_eq!(read_f64(ptr).to_bits(), v.to_bits());

            let v: usize = rng.r#gen();
            write_pointer(ptr, v);
            assert_eq!(read_pointer(ptr), v);

            let v: bool = rng.r#gen();
            write_bool32(ptr, v);
            assert_eq!(read_bool32(ptr), v);
        }
    }
}

#[test]
fn allocations_fill_capacity_exactly() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    for _ in 0..200 {
        let capacity = rng.gen_range(0..512);
        let size = rng.gen_range(1..33);
        let align = 1 << rng.gen_range(0..4);
        let stack = MemoryStack::new(capacity);

        let base = stack.allocate(0, 16).unwrap().as_ptr() as usize;
        let mut expected_end = 0;
        loop {
            let start = (base + expected_end).next_multiple_of(align) - base;
            let result = stack.allocate(size, align);
            if start + size <= capacity {
                let ptr = result.unwrap().as_ptr() as usize;
                assert_eq!(ptr, base + start);
                expected_end = start + size;
                assert_eq!(stack.offset(), expected_end);
            } else {
                assert_eq!(
                    result,
                    Err(Error::OutOfArenaMemory {
                        requested: size,
                        align,
                        available: capacity - expected_end,
                    })
                );
                assert_eq!(stack.offset(), expected_end);
                break;
            }
        }
    }
}

#[test]
fn frames_restore_offset() {
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    let stack = MemoryStack::new(4096);

    for _ in 0..500 {
        let before = stack.offset();
        let first = {
            let frame = stack.push_frame();
            let first = frame.allocate(24, 8).unwrap();
            for _ in 0..rng.gen_range(0..20) {
                let _ = frame.allocate(rng.gen_range(0..64), 1 << rng.gen_range(0..5));
            }
            first
        };
        assert_eq!(stack.offset(), before);

        let frame = stack.push_frame();
        assert_eq!(frame.allocate(24, 8).unwrap(), first);
    }
}

#[test]
fn last_element_address() {
    let layout = compute_layout(&[FieldSpec::primitive(4), FieldSpec::primitive(8)]).unwrap();
    for count in 1..20 {
        let buffer = HeapBuffer::calloc(&layout, count).unwrap();
        let view = buffer.view();
        let last = view.at(count - 1).unwrap();
        assert_eq!(
            last.as_ptr() as usize,
            view.as_ptr() as usize + (count - 1) * layout.size()
        );
        assert_eq!(
            view.at(count).unwrap_err(),
            Error::IndexOutOfRange {
                index: count,
                count
            }
        );
    }
}
