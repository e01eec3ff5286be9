//
// dicom_access.rs
// Dicom-Transform-rs
//
// Read-only accessors used by address resolution and by the façade to turn stored values into text.
//
// Thales Matheus Mendonça Santos - November 2025

use dicom::core::value::Value;
use dicom::core::{PrimitiveValue, Tag};
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::mem::InMemElement;
use dicom::object::InMemDicomObject;

/// Small helper trait to pull string values out of a data set without mutating it.
pub trait ElementAccess {
    /// Text stored at `tag`, without padding. `None` when absent, empty or not textual.
    fn element_str(&self, tag: Tag) -> Option<String>;
    fn has_element(&self, tag: Tag) -> bool;
}

impl ElementAccess for InMemDicomObject<StandardDataDictionary> {
    fn element_str(&self, tag: Tag) -> Option<String> {
        self.element(tag)
            .ok()
            .and_then(element_text)
            .filter(|s| !s.is_empty())
    }

    fn has_element(&self, tag: Tag) -> bool {
        self.element(tag).is_ok()
    }
}

/// Value of a primitive element rendered as text, multiple values joined with `\`.
pub fn element_text(elem: &InMemElement<StandardDataDictionary>) -> Option<String> {
    match elem.value() {
        Value::Primitive(p) if p.multiplicity() > 0 => Some(trim_padding(&p.to_str()).to_string()),
        _ => None,
    }
}

/// Individual values of a primitive element, in stored order.
pub fn element_texts(elem: &InMemElement<StandardDataDictionary>) -> Option<Vec<String>> {
    match elem.value() {
        Value::Primitive(p) if p.multiplicity() > 0 => Some(primitive_texts(p)),
        _ => None,
    }
}

fn primitive_texts(value: &PrimitiveValue) -> Vec<String> {
    value
        .to_multi_str()
        .iter()
        .map(|s| trim_padding(s).to_string())
        .collect()
}

/// True when the element carries any content: value bytes, sequence items or fragments.
pub fn element_has_content(elem: &InMemElement<StandardDataDictionary>) -> bool {
    match elem.value() {
        Value::Primitive(p) => !p.to_bytes().is_empty(),
        Value::Sequence(seq) => !seq.items().is_empty(),
        Value::PixelSequence(_) => true,
    }
}

pub(crate) fn trim_padding(input: &str) -> &str {
    input.trim_end_matches(['\0', ' '])
}
