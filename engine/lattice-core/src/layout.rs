use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;

use crate::{Error, LayoutFault, POINTER_SIZE, Result, checked_align_up, layout_from_size_align};

/// Size and alignment of a single struct member.
///
/// Pointer members are resolved against a target pointer width when the
/// layout is computed, so the same field list can describe a struct for both
/// 32 and 64 bit targets.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum FieldSpec {
    Fixed {
        size: usize,
        align: usize,
        count: usize,
    },
    Pointer {
        count: usize,
    },
}

impl FieldSpec {
    pub const fn new(size: usize, align: usize) -> FieldSpec {
        FieldSpec::Fixed {
            size,
            align,
            count: 1,
        }
    }

    /// A naturally aligned member, where alignment equals size.
    pub const fn primitive(size: usize) -> FieldSpec {
        FieldSpec::new(size, size)
    }

    pub const fn pointer() -> FieldSpec {
        FieldSpec::Pointer { count: 1 }
    }

    /// A member that embeds another struct by value.
    pub fn nested(layout: &StructLayout) -> FieldSpec {
        FieldSpec::new(layout.size(), layout.align())
    }

    /// A fixed-length inline array of this member.
    pub const fn array(self, len: usize) -> FieldSpec {
        match self {
            FieldSpec::Fixed { size, align, count } => FieldSpec::Fixed {
                size,
                align,
                count: count.saturating_mul(len),
            },
            FieldSpec::Pointer { count } => FieldSpec::Pointer {
                count: count.saturating_mul(len),
            },
        }
    }

    /// Returns `(size, align)` for the given target pointer width.
    fn resolve(self, pointer_size: usize) -> std::result::Result<(usize, usize), LayoutFault> {
        let (size, align, count) = match self {
            FieldSpec::Fixed { size, align, count } => (size, align, count),
            FieldSpec::Pointer { count } => {
                if pointer_size != 4 && pointer_size != 8 {
                    return Err(LayoutFault::UnknownPointerWidth(pointer_size));
                }
                (pointer_size, pointer_size, count)
            }
        };

        if size == 0 || count == 0 {
            return Err(LayoutFault::ZeroSized);
        }

        if align == 0 || !align.is_power_of_two() {
            return Err(LayoutFault::BadAlignment(align));
        }

        let size = size.checked_mul(count).ok_or(LayoutFault::Overflow)?;
        Ok((size, align))
    }
}

/// The computed size, alignment and member offsets of a native struct.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct StructLayout {
    size: usize,
    align: usize,
    offsets: Box<[usize]>,
}

impl StructLayout {
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline(always)]
    pub fn align(&self) -> usize {
        self.align
    }

    #[inline(always)]
    pub fn field_count(&self) -> usize {
        self.offsets.len()
    }

    #[inline(always)]
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Byte offset of the field at `index`, in declaration order.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not a field of this layout.
    #[inline(always)]
    pub fn offset_of(&self, index: usize) -> usize {
        self.offsets[index]
    }

    pub fn alloc_layout(&self) -> std::alloc::Layout {
        // SAFETY: Size and alignment were validated when the layout was computed.
        unsafe { layout_from_size_align(self.size, self.align) }
    }

    /// Size in bytes of `count` consecutive elements of this layout.
    pub fn array_size(&self, count: usize) -> Result<usize> {
        self.size
            .checked_mul(count)
            .filter(|&size| size <= isize::MAX as usize)
            .ok_or(Error::CapacityOverflow {
                count,
                stride: self.size,
            })
    }
}

/// Computes a struct layout for the host's pointer width.
pub fn compute_layout(fields: &[FieldSpec]) -> Result<StructLayout> {
    compute_layout_for_target(fields, POINTER_SIZE)
}

/// Computes a struct layout following the C rules: members stay in declaration
/// order, each member is placed at the next multiple of its alignment, and the
/// total size is padded out to the largest member alignment.
pub fn compute_layout_for_target(fields: &[FieldSpec], pointer_size: usize) -> Result<StructLayout> {
    if fields.is_empty() {
        return Err(Error::InvalidLayout {
            field: 0,
            reason: LayoutFault::NoFields,
        });
    }

    let mut offset = 0_usize;
    let mut align = 1_usize;
    let mut offsets = Vec::with_capacity(fields.len());

    for (i, field) in fields.iter().enumerate() {
        let fault = |reason| Error::InvalidLayout { field: i, reason };

        let (field_size, field_align) = field.resolve(pointer_size).map_err(fault)?;
        let field_offset =
            checked_align_up(offset, field_align).ok_or(fault(LayoutFault::Overflow))?;

        offsets.push(field_offset);
        offset = field_offset
            .checked_add(field_size)
            .ok_or(fault(LayoutFault::Overflow))?;
        align = align.max(field_align);
    }

    // Trailing padding.
    let size = checked_align_up(offset, align)
        .filter(|&size| size <= isize::MAX as usize)
        .ok_or(Error::InvalidLayout {
            field: fields.len() - 1,
            reason: LayoutFault::Overflow,
        })?;

    Ok(StructLayout {
        size,
        align,
        offsets: offsets.into_boxed_slice(),
    })
}

/// Layouts for struct shapes that are only known at runtime, computed once per
/// distinct field list.
///
/// Failed computations are not cached.
#[derive(Default)]
pub struct LayoutCache {
    layouts: Mutex<FxHashMap<Box<[FieldSpec]>, Arc<StructLayout>>>,
}

impl LayoutCache {
    pub fn new() -> LayoutCache {
        LayoutCache::default()
    }

    pub fn get_or_compute(&self, fields: &[FieldSpec]) -> Result<Arc<StructLayout>> {
        let mut layouts = self
            .layouts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(layout) = layouts.get(fields) {
            return Ok(layout.clone());
        }

        let layout = Arc::new(compute_layout(fields)?);
        layouts.insert(fields.into(), layout.clone());
        Ok(layout)
    }

    pub fn len(&self) -> usize {
        self.layouts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
