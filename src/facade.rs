//
// facade.rs
// Dicom-Transform-rs
//
// Constrained read/write/navigation surface over one DICOM file (or one of its sequence items) handed to scripts.
//
// Thales Matheus Mendonça Santos - November 2025

use std::cell::RefCell;
use std::rc::Rc;
use std::str::FromStr;

use dicom::core::dictionary::DataDictionary;
use dicom::core::value::{DataSetSequence, Value};
use dicom::core::{DataElement, Length, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::InMemDicomObject;

use crate::address::{is_private_group, resolve, META_GROUP_MAX};
use crate::dicom_access::{element_has_content, element_text, element_texts};
use crate::error::FacadeError;

pub type Dataset = InMemDicomObject<StandardDataDictionary>;

type FacadeResult<T> = Result<T, FacadeError>;

/// Data sets of one transform unit, shared by every façade derived from it.
struct Documents {
    meta: Option<Dataset>,
    dataset: Dataset,
}

/// One hop from a data set into an item of one of its sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ItemStep {
    tag: Tag,
    index: usize,
}

/// Script-facing view over a data set.
///
/// The root façade pairs the main data set with the file meta information.
/// Façades over sequence items address their item by path from the root, so
/// every façade mutates the same in-memory file and none of them carries meta
/// information. Groups up to 0x0002 route to the meta information.
#[derive(Clone)]
pub struct DatasetFacade {
    root: Rc<RefCell<Documents>>,
    path: Vec<ItemStep>,
}

impl DatasetFacade {
    pub fn new(meta: Option<Dataset>, dataset: Dataset) -> Self {
        Self {
            root: Rc::new(RefCell::new(Documents { meta, dataset })),
            path: Vec::new(),
        }
    }

    /// Whether this façade points into a sequence item.
    pub fn is_nested(&self) -> bool {
        !self.path.is_empty()
    }

    /// Give back the (possibly mutated) data sets.
    ///
    /// Façades still held elsewhere, e.g. by a script that stored one in a
    /// global, are left pointing at an empty data set.
    pub fn into_datasets(self) -> (Option<Dataset>, Dataset) {
        let docs = self.root.replace(Documents {
            meta: None,
            dataset: Dataset::new_empty(),
        });
        (docs.meta, docs.dataset)
    }

    pub fn get_string(&self, group: u16, element: u16) -> FacadeResult<Option<String>> {
        self.with_attribute(group, element, |dataset, tag| {
            Ok(dataset.element(tag).ok().and_then(element_text))
        })
    }

    pub fn get_multiple_strings(
        &self,
        group: u16,
        element: u16,
    ) -> FacadeResult<Option<Vec<String>>> {
        self.with_attribute(group, element, |dataset, tag| {
            Ok(dataset.element(tag).ok().and_then(element_texts))
        })
    }

    /// Create or replace a textual attribute. `\` separates multiple values.
    pub fn update_string(&self, group: u16, element: u16, value: &str) -> FacadeResult<()> {
        self.with_attribute(group, element, |dataset, tag| {
            let vr = dataset
                .element(tag)
                .ok()
                .map(|elem| elem.vr())
                .filter(|vr| *vr != VR::SQ)
                .unwrap_or_else(|| dictionary_vr(tag));
            let value = encode_text(tag, vr, value)?;
            dataset.put(DataElement::new(tag, vr, value));
            Ok(())
        })
    }

    pub fn delete_tag(&self, group: u16, element: u16) -> FacadeResult<()> {
        self.with_attribute(group, element, |dataset, tag| {
            dataset.remove_element(tag);
            Ok(())
        })
    }

    pub fn delete_group(&self, group: u16) -> FacadeResult<()> {
        self.with_dataset(group, 0x0000, |dataset| {
            let doomed: Vec<Tag> = dataset
                .iter()
                .map(|elem| elem.header().tag)
                .filter(|tag| tag.group() == group)
                .collect();
            for tag in doomed {
                dataset.remove_element(tag);
            }
            Ok(())
        })
    }

    pub fn contains(&self, group: u16, element: u16) -> FacadeResult<bool> {
        self.with_attribute(group, element, |dataset, tag| Ok(dataset.element(tag).is_ok()))
    }

    pub fn has_value(&self, group: u16, element: u16) -> FacadeResult<bool> {
        self.with_attribute(group, element, |dataset, tag| {
            Ok(dataset
                .element(tag)
                .map(element_has_content)
                .unwrap_or(false))
        })
    }

    pub fn count_sequence_items(&self, group: u16, element: u16) -> FacadeResult<usize> {
        self.with_attribute(group, element, |dataset, tag| {
            Ok(dataset
                .element(tag)
                .ok()
                .and_then(|elem| elem.value().items().map(|items| items.len()))
                .unwrap_or(0))
        })
    }

    /// Façade over item `index` (zero-based) of a sequence.
    pub fn get_sequence_item(
        &self,
        group: u16,
        element: u16,
        index: usize,
    ) -> FacadeResult<DatasetFacade> {
        let (tag, count) = self.sequence_len(group, element)?;
        if index >= count {
            return Err(FacadeError::ItemOutOfRange { tag, index, count });
        }
        Ok(self.child(tag, index))
    }

    pub fn get_sequence_items(&self, group: u16, element: u16) -> FacadeResult<Vec<DatasetFacade>> {
        let tag = self.with_attribute(group, element, |_, tag| Ok(tag))?;
        let count = self.count_sequence_items(group, element)?;
        Ok((0..count).map(|index| self.child(tag, index)).collect())
    }

    /// Append an empty item to a sequence, creating the sequence when absent.
    ///
    /// Fails with [`FacadeError::NotASequence`] when the attribute holds a
    /// primitive value; it is never overwritten.
    pub fn create_sequence_item(&self, group: u16, element: u16) -> FacadeResult<DatasetFacade> {
        let (tag, index) = self.with_attribute(group, element, |dataset, tag| {
            if tag.group() <= META_GROUP_MAX {
                return Err(FacadeError::MetaSequence(tag));
            }

            let (vr, mut items) = match dataset.take_element(tag) {
                Ok(elem) => {
                    let vr = elem.vr();
                    match elem.into_value() {
                        Value::Sequence(seq) => (vr, seq.into_items().into_vec()),
                        other => {
                            dataset.put(DataElement::new(tag, vr, other));
                            return Err(FacadeError::NotASequence(tag));
                        }
                    }
                }
                Err(_) => (VR::SQ, Vec::new()),
            };

            items.push(Dataset::new_empty());
            let index = items.len() - 1;
            dataset.put(DataElement::new(
                tag,
                vr,
                DataSetSequence::new(items, Length::UNDEFINED),
            ));
            Ok((tag, index))
        })?;

        Ok(self.child(tag, index))
    }

    fn sequence_len(&self, group: u16, element: u16) -> FacadeResult<(Tag, usize)> {
        self.with_attribute(group, element, |dataset, tag| {
            let count = dataset
                .element(tag)
                .ok()
                .and_then(|elem| elem.value().items().map(|items| items.len()))
                .ok_or(FacadeError::NotASequence(tag))?;
            Ok((tag, count))
        })
    }

    fn child(&self, tag: Tag, index: usize) -> DatasetFacade {
        let mut path = self.path.clone();
        path.push(ItemStep { tag, index });
        DatasetFacade {
            root: Rc::clone(&self.root),
            path,
        }
    }

    /// Run `f` on the data set `group` routes to.
    fn with_dataset<R>(
        &self,
        group: u16,
        element: u16,
        f: impl FnOnce(&mut Dataset) -> FacadeResult<R>,
    ) -> FacadeResult<R> {
        let mut docs = self.root.borrow_mut();
        let docs = &mut *docs;

        if group <= META_GROUP_MAX {
            return match docs.meta.as_mut() {
                Some(meta) if !self.is_nested() => f(meta),
                _ => Err(FacadeError::InvalidAddress { group, element }),
            };
        }

        with_item_mut(&mut docs.dataset, &self.path, f)
    }

    /// Run `f` with the routed data set and the resolved storage tag.
    fn with_attribute<R>(
        &self,
        group: u16,
        element: u16,
        f: impl FnOnce(&mut Dataset, Tag) -> FacadeResult<R>,
    ) -> FacadeResult<R> {
        self.with_dataset(group, element, |dataset| {
            let tag = resolve(group, element, &*dataset).storage_tag();
            f(dataset, tag)
        })
    }
}

/// Walk `path` down from `dataset` and run `f` on the item it ends at.
///
/// Each sequence on the way is taken out of its parent and put back once `f`
/// returns, so items are mutated in place without being copied.
fn with_item_mut<R>(
    dataset: &mut Dataset,
    path: &[ItemStep],
    f: impl FnOnce(&mut Dataset) -> FacadeResult<R>,
) -> FacadeResult<R> {
    let Some((step, rest)) = path.split_first() else {
        return f(dataset);
    };

    let elem = dataset
        .take_element(step.tag)
        .map_err(|_| FacadeError::NotASequence(step.tag))?;
    let vr = elem.vr();

    match elem.into_value() {
        Value::Sequence(seq) => {
            let mut items = seq.into_items();
            let count = items.len();
            let outcome = match items.get_mut(step.index) {
                Some(item) => with_item_mut(item, rest, f),
                None => Err(FacadeError::ItemOutOfRange {
                    tag: step.tag,
                    index: step.index,
                    count,
                }),
            };
            dataset.put(DataElement::new(
                step.tag,
                vr,
                DataSetSequence::new(items, Length::UNDEFINED),
            ));
            outcome
        }
        other => {
            dataset.put(DataElement::new(step.tag, vr, other));
            Err(FacadeError::NotASequence(step.tag))
        }
    }
}

/// VR for a new attribute: the standard dictionary's, LO for private or unknown tags.
fn dictionary_vr(tag: Tag) -> VR {
    if is_private_group(tag.group()) {
        return VR::LO;
    }
    StandardDataDictionary::default()
        .by_tag(tag)
        .map(|entry| entry.vr.relaxed())
        .filter(|vr| *vr != VR::SQ)
        .unwrap_or(VR::LO)
}

fn encode_text(tag: Tag, vr: VR, value: &str) -> FacadeResult<PrimitiveValue> {
    if value.is_empty() {
        return Ok(PrimitiveValue::Empty);
    }

    let parts: Vec<&str> = value.split('\\').collect();
    let encoded = match vr {
        VR::US => parse_all::<u16>(&parts).map(|v| PrimitiveValue::U16(v.into())),
        VR::SS => parse_all::<i16>(&parts).map(|v| PrimitiveValue::I16(v.into())),
        VR::UL => parse_all::<u32>(&parts).map(|v| PrimitiveValue::U32(v.into())),
        VR::SL => parse_all::<i32>(&parts).map(|v| PrimitiveValue::I32(v.into())),
        VR::FL => parse_all::<f32>(&parts).map(|v| PrimitiveValue::F32(v.into())),
        VR::FD => parse_all::<f64>(&parts).map(|v| PrimitiveValue::F64(v.into())),
        _ => Some(PrimitiveValue::Strs(
            parts
                .iter()
                .map(|part| part.to_string())
                .collect::<Vec<_>>()
                .into(),
        )),
    };

    encoded.ok_or_else(|| FacadeError::InvalidValue {
        tag,
        vr,
        value: value.to_string(),
    })
}

fn parse_all<T: FromStr>(parts: &[&str]) -> Option<Vec<T>> {
    parts.iter().map(|part| part.trim().parse().ok()).collect()
}
