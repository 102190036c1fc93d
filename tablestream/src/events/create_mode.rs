use bitflags::bitflags;

/// Creation disposition carried by add-member events, one byte on the
/// wire: a value in the low nibble plus option bits in the high nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateDisposition {
    /// Open an existing object
    Open = 0,
    /// Create if missing, reinitialize otherwise
    Init = 1,
    /// Create, fail if it exists
    Create = 2,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CreateOptions: u8 {
        const MD5 = 0x40;
        const PARENTS = 0x80;
    }
}

/// Decoded create-mode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateMode {
    pub disposition: CreateDisposition,
    pub options: CreateOptions,
}

const VALUE_MASK: u8 = 0x0F;

impl CreateMode {
    pub const fn new(disposition: CreateDisposition, options: CreateOptions) -> Self {
        CreateMode {
            disposition,
            options,
        }
    }

    /// The mode used for tables declared through the bare new-table event.
    pub const fn create_md5() -> Self {
        CreateMode::new(CreateDisposition::Create, CreateOptions::MD5)
    }

    /// Validates the raw wire byte. Unknown value or option bits are an
    /// error, left to the caller to classify.
    pub fn from_wire(raw: u8) -> Option<CreateMode> {
        let disposition = match raw & VALUE_MASK {
            0 => CreateDisposition::Open,
            1 => CreateDisposition::Init,
            2 => CreateDisposition::Create,
            _ => return None,
        };
        let options = CreateOptions::from_bits(raw & !VALUE_MASK)?;
        Some(CreateMode {
            disposition,
            options,
        })
    }

    pub fn to_wire(&self) -> u8 {
        self.disposition as u8 | self.options.bits()
    }
}
