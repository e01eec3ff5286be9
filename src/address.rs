//
// address.rs
// Dicom-Transform-rs
//
// Resolves numeric (group, element) coordinates to attribute addresses, binding private tags to their creator block.
//
// Thales Matheus Mendonça Santos - November 2025

use std::ops::RangeInclusive;

use dicom::core::Tag;

use crate::dicom_access::ElementAccess;

/// Elements of an odd group that may hold a private creator identifier.
pub const CREATOR_SLOTS: RangeInclusive<u16> = 0x0010..=0x00FF;

/// Highest group stored in the file meta information.
pub const META_GROUP_MAX: u16 = 0x0002;

/// Creator identifier found in a private group, with the slot that reserves its block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateCreator {
    pub slot: u16,
    pub id: String,
}

/// A requested tag, optionally bound to the private creator of its group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeAddress {
    tag: Tag,
    creator: Option<PrivateCreator>,
}

impl AttributeAddress {
    pub fn raw(tag: Tag) -> Self {
        Self { tag, creator: None }
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn creator(&self) -> Option<&PrivateCreator> {
        self.creator.as_ref()
    }

    pub fn is_meta(&self) -> bool {
        self.tag.group() <= META_GROUP_MAX
    }

    /// Tag under which the attribute is stored.
    ///
    /// Private data elements (xx00-xxFF blocks above 0x1000) of a bound address are
    /// moved into the block reserved by the creator slot. Creator slots themselves
    /// and public tags are stored as requested.
    pub fn storage_tag(&self) -> Tag {
        match &self.creator {
            Some(creator) if self.tag.element() >= 0x1000 => Tag(
                self.tag.group(),
                (creator.slot << 8) | (self.tag.element() & 0x00FF),
            ),
            _ => self.tag,
        }
    }
}

pub fn is_private_group(group: u16) -> bool {
    group % 2 == 1
}

/// Resolve a numeric address against the data set it will be applied to.
///
/// Even groups resolve to the raw tag. For odd groups the creator slots are
/// scanned in ascending order, skipping `element` itself, and the first one
/// holding a string binds the address. Without any creator the raw tag is kept.
pub fn resolve<A>(group: u16, element: u16, accessor: &A) -> AttributeAddress
where
    A: ElementAccess + ?Sized,
{
    let tag = Tag(group, element);
    if !is_private_group(group) {
        return AttributeAddress::raw(tag);
    }

    CREATOR_SLOTS
        .filter(|slot| *slot != element)
        .find_map(|slot| {
            accessor
                .element_str(Tag(group, slot))
                .map(|id| PrivateCreator { slot, id })
        })
        .map(|creator| AttributeAddress {
            tag,
            creator: Some(creator),
        })
        .unwrap_or_else(|| AttributeAddress::raw(tag))
}
