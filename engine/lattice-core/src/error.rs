use thiserror::Error;

/// Why a field list was rejected by the layout calculator.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LayoutFault {
    /// The struct declares no fields at all.
    NoFields,
    /// The field has a size of zero bytes.
    ZeroSized,
    /// The field's alignment is zero or not a power of two.
    BadAlignment(usize),
    /// A pointer field was declared against a pointer width other than 4 or 8.
    UnknownPointerWidth(usize),
    /// Offsets or sizes do not fit in `usize`.
    Overflow,
}

impl std::fmt::Display for LayoutFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayoutFault::NoFields => write!(f, "struct declares no fields"),
            LayoutFault::ZeroSized => write!(f, "field size is zero"),
            LayoutFault::BadAlignment(align) => {
                write!(f, "alignment {align} is not a power of two")
            }
            LayoutFault::UnknownPointerWidth(width) => {
                write!(f, "unknown pointer width {width}")
            }
            LayoutFault::Overflow => write!(f, "layout size overflows"),
        }
    }
}

#[derive(Error, Clone, PartialEq, Eq, Debug)]
pub enum Error {
    /// Malformed field specification. Fatal at the point the struct is defined.
    #[error("invalid layout at field {field}: {reason}")]
    InvalidLayout { field: usize, reason: LayoutFault },

    /// The memory stack cannot satisfy the request without growing.
    #[error(
        "out of arena memory: requested {requested} bytes aligned to {align}, {available} bytes available"
    )]
    OutOfArenaMemory {
        requested: usize,
        align: usize,
        available: usize,
    },

    #[error("index {index} out of range for buffer of {count} elements")]
    IndexOutOfRange { index: usize, count: usize },

    /// An externally supplied container is smaller than the struct placed in it.
    #[error("container of {len} bytes is too small, {required} bytes required")]
    ContainerTooSmall { len: usize, required: usize },

    /// `count * stride` does not fit in `isize`.
    #[error("buffer of {count} elements with stride {stride} overflows")]
    CapacityOverflow { count: usize, stride: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
