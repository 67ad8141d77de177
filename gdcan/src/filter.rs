//! Acceptance filter encoding.
//!
//! Application level filter requests are turned into the raw register words
//! of one filter bank. A bank matches either in mask mode (pattern plus
//! don't-care mask) or in list mode (exact identifiers), at 32-bit scale
//! (extended identifiers, two entries per bank) or 16-bit scale (standard
//! identifiers, four list entries or two mask pairs per bank). The packing
//! rules follow the register layout: a standard identifier sits at bit 5 of
//! its 16-bit half, an extended identifier at bit 3 of the full word, and
//! the IDE/RTR discriminator bits live below the identifier field.
//!
//! Pattern words for 16-bit scale hold the first sub-filter in the upper
//! half. Mask mode filters for standard identifiers always set the IDE bit
//! in the mask so that extended traffic cannot alias into them.

use embedded_can::{ExtendedId, StandardId};
use gdcan_core::{FilterMode, FilterScale, FrameKind};

/// Identifier field position within a 16-bit sub-filter.
const STD_ID_SHIFT: u32 = 5;
/// Identifier field position within a 32-bit filter word.
const EXT_ID_SHIFT: u32 = 3;
/// IDE discriminator in a 32-bit filter word.
const IDE_32: u32 = 0x4;
/// RTR discriminator in a 32-bit filter word.
const RTR_32: u32 = 0x2;
/// IDE discriminator in a 16-bit sub-filter.
const IDE_16: u16 = 0x8;
/// RTR discriminator in a 16-bit sub-filter.
const RTR_16: u16 = 0x10;
/// Widest valid standard identifier mask.
const STD_MASK_MAX: u16 = 0x7FF;
/// Widest valid extended identifier mask.
const EXT_MASK_MAX: u32 = 0x1FFF_FFFF;

/// Errors from filter encoding and bank management.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterError {
    /// A mask value exceeds the identifier width it applies to
    MaskOutOfRange,
    /// Bank index lies outside the range owned by this controller
    BankOutOfRange {
        /// The rejected bank index
        bank: u8,
    },
    /// The bank was never programmed, there is nothing to activate
    BankNotConfigured {
        /// The rejected bank index
        bank: u8,
    },
    /// The operation needs a started controller
    NotRunning,
    /// Only the CAN1 instance may move the shared array split point
    NotSplitOwner,
}

/// Which frame kinds a mask mode filter lets through.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameFilter {
    /// Data frames only
    Data,
    /// Remote transmission requests only
    Remote,
    /// Both kinds
    Any,
}

/// Identifier types accepted by [`allow_receive_all`].
///
/// [`allow_receive_all`]: crate::bus::Can::allow_receive_all
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IdMatch {
    /// Standard 11-bit identifiers only
    Standard,
    /// Extended 29-bit identifiers only
    Extended,
    /// Everything
    Any,
}

/// One mask mode sub-filter for standard identifiers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StandardMaskEntry {
    /// Identifier pattern
    pub id: StandardId,
    /// Don't-care mask, ones must match
    pub mask: u16,
    /// Frame kinds to accept
    pub frames: FrameFilter,
}

/// One list mode entry for standard identifiers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StandardListEntry {
    /// Identifier to accept
    pub id: StandardId,
    /// Whether the entry matches a data frame or a remote request
    pub kind: FrameKind,
}

/// One list mode entry for extended identifiers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExtendedListEntry {
    /// Identifier to accept
    pub id: ExtendedId,
    /// Whether the entry matches a data frame or a remote request
    pub kind: FrameKind,
}

/// Filter requests over standard identifiers. Programmed at 16-bit scale.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StandardFilter {
    /// Accept exactly one identifier
    Exact {
        /// Identifier to accept
        id: StandardId,
        /// Frame kinds to accept
        frames: FrameFilter,
    },
    /// Identifier plus mask, applied through both sub-filters
    Classic {
        /// Identifier pattern
        id: StandardId,
        /// Don't-care mask, ones must match
        mask: u16,
        /// Frame kinds to accept
        frames: FrameFilter,
    },
    /// Two independent identifier plus mask pairs in one bank
    ClassicPair(StandardMaskEntry, StandardMaskEntry),
    /// Up to four exact identifiers in one bank
    List([StandardListEntry; 4]),
}

/// Filter requests over extended identifiers. Programmed at 32-bit scale.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExtendedFilter {
    /// Accept exactly one identifier
    Exact {
        /// Identifier to accept
        id: ExtendedId,
        /// Frame kinds to accept
        frames: FrameFilter,
    },
    /// Identifier plus mask
    Classic {
        /// Identifier pattern
        id: ExtendedId,
        /// Don't-care mask, ones must match
        mask: u32,
        /// Frame kinds to accept
        frames: FrameFilter,
    },
    /// Two exact identifiers in one bank
    Pair(ExtendedListEntry, ExtendedListEntry),
}

/// Register-ready form of a filter request, bank assignment still pending.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct EncodedFilter {
    pub mode: FilterMode,
    pub scale: FilterScale,
    pub id: u32,
    pub mask: u32,
}

fn sub16_mask(entry: &StandardMaskEntry) -> Result<(u16, u16), FilterError> {
    if entry.mask > STD_MASK_MAX {
        return Err(FilterError::MaskOutOfRange);
    }
    let mut id = entry.id.as_raw() << STD_ID_SHIFT;
    let mut mask = (entry.mask << STD_ID_SHIFT) | IDE_16;
    match entry.frames {
        FrameFilter::Any => {}
        FrameFilter::Data => mask |= RTR_16,
        FrameFilter::Remote => {
            id |= RTR_16;
            mask |= RTR_16;
        }
    }
    Ok((id, mask))
}

fn sub16_list(entry: &StandardListEntry) -> u16 {
    let rtr = match entry.kind {
        FrameKind::Data => 0,
        FrameKind::Remote => RTR_16,
    };
    (entry.id.as_raw() << STD_ID_SHIFT) | rtr
}

fn word32_list(entry: &ExtendedListEntry) -> u32 {
    let rtr = match entry.kind {
        FrameKind::Data => 0,
        FrameKind::Remote => RTR_32,
    };
    (entry.id.as_raw() << EXT_ID_SHIFT) | IDE_32 | rtr
}

fn pack(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

impl StandardFilter {
    pub(crate) fn encode(&self) -> Result<EncodedFilter, FilterError> {
        match *self {
            StandardFilter::Exact { id, frames } => StandardFilter::Classic {
                id,
                mask: STD_MASK_MAX,
                frames,
            }
            .encode(),
            StandardFilter::Classic { id, mask, frames } => {
                let entry = StandardMaskEntry { id, mask, frames };
                StandardFilter::ClassicPair(entry, entry).encode()
            }
            StandardFilter::ClassicPair(first, second) => {
                let (id_1, mask_1) = sub16_mask(&first)?;
                let (id_2, mask_2) = sub16_mask(&second)?;
                Ok(EncodedFilter {
                    mode: FilterMode::Mask,
                    scale: FilterScale::Bits16,
                    id: pack(id_1, id_2),
                    mask: pack(mask_1, mask_2),
                })
            }
            StandardFilter::List(entries) => Ok(EncodedFilter {
                mode: FilterMode::List,
                scale: FilterScale::Bits16,
                id: pack(sub16_list(&entries[0]), sub16_list(&entries[1])),
                mask: pack(sub16_list(&entries[2]), sub16_list(&entries[3])),
            }),
        }
    }
}

impl ExtendedFilter {
    pub(crate) fn encode(&self) -> Result<EncodedFilter, FilterError> {
        match *self {
            ExtendedFilter::Exact { id, frames } => ExtendedFilter::Classic {
                id,
                mask: EXT_MASK_MAX,
                frames,
            }
            .encode(),
            ExtendedFilter::Classic { id, mask, frames } => {
                if mask > EXT_MASK_MAX {
                    return Err(FilterError::MaskOutOfRange);
                }
                let mut id = (id.as_raw() << EXT_ID_SHIFT) | IDE_32;
                let mut mask = (mask << EXT_ID_SHIFT) | IDE_32;
                match frames {
                    FrameFilter::Any => {}
                    FrameFilter::Data => mask |= RTR_32,
                    FrameFilter::Remote => {
                        id |= RTR_32;
                        mask |= RTR_32;
                    }
                }
                Ok(EncodedFilter {
                    mode: FilterMode::Mask,
                    scale: FilterScale::Bits32,
                    id,
                    mask,
                })
            }
            ExtendedFilter::Pair(first, second) => Ok(EncodedFilter {
                mode: FilterMode::List,
                scale: FilterScale::Bits32,
                id: word32_list(&first),
                mask: word32_list(&second),
            }),
        }
    }
}

/// Mask mode words accepting everything of the requested identifier type.
pub(crate) fn accept_all(id_match: IdMatch) -> EncodedFilter {
    let id = match id_match {
        IdMatch::Extended => IDE_32,
        IdMatch::Standard | IdMatch::Any => 0,
    };
    let mask = match id_match {
        IdMatch::Any => 0,
        IdMatch::Standard | IdMatch::Extended => IDE_32,
    };
    EncodedFilter {
        mode: FilterMode::Mask,
        scale: FilterScale::Bits32,
        id,
        mask,
    }
}

/// Mask mode words accepting nothing, used to reset a bank.
pub(crate) fn accept_none() -> EncodedFilter {
    EncodedFilter {
        mode: FilterMode::Mask,
        scale: FilterScale::Bits32,
        id: 0,
        mask: 0,
    }
}
