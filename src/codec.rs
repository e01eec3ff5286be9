//
// codec.rs
// Dicom-Transform-rs
//
// Opens DICOM files into transform units (meta information + data set) and writes them back in place.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs;
use std::path::{Path, PathBuf};

use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::{tags, uids};
use dicom::object::{open_file, FileMetaTable, FileMetaTableBuilder};

use crate::dicom_access::{trim_padding, ElementAccess};
use crate::error::CodecError;
use crate::facade::Dataset;

/// File name reserved for DICOM directory indexes.
pub const DICOMDIR_FILE_NAME: &str = "DICOMDIR";

/// One input file held in memory between open and save.
pub struct TransformUnit {
    pub path: PathBuf,
    pub meta: Dataset,
    pub dataset: Dataset,
}

impl TransformUnit {
    /// DICOMDIR files are never transformed.
    pub fn is_directory_index(&self) -> bool {
        let reserved_name = self
            .path
            .file_name()
            .map_or(false, |name| name == DICOMDIR_FILE_NAME);

        reserved_name
            || self.meta.element_str(tags::MEDIA_STORAGE_SOP_CLASS_UID).as_deref()
                == Some(uids::MEDIA_STORAGE_DIRECTORY_STORAGE)
    }
}

pub fn open(path: &Path) -> Result<TransformUnit, CodecError> {
    let obj = open_file(path).map_err(|e| CodecError::Open {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let meta = meta_to_dataset(obj.meta());
    Ok(TransformUnit {
        path: path.to_path_buf(),
        meta,
        dataset: obj.into_inner(),
    })
}

/// Overwrite `unit.path` with the unit's content.
///
/// The file is written next to the original and renamed over it, so a failed
/// write leaves the previous content on disk.
pub fn save(unit: TransformUnit) -> Result<(), CodecError> {
    let TransformUnit {
        path,
        meta,
        dataset,
    } = unit;

    let save_error = |message: String| CodecError::Save {
        path: path.clone(),
        message,
    };

    let table = dataset_to_meta(&meta).map_err(save_error)?;
    let file_obj = dataset.with_exact_meta(table);

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let staged = tempfile::Builder::new()
        .prefix(".dicom-transform")
        .suffix(".tmp")
        .tempfile_in(&dir)
        .map_err(|source| CodecError::Io {
            path: dir.clone(),
            source,
        })?;

    file_obj
        .write_to_file(staged.path())
        .map_err(|e| save_error(e.to_string()))?;

    // The staged file is created private; keep the mode the original had.
    let permissions = fs::metadata(&path)
        .map_err(|source| CodecError::Io {
            path: path.clone(),
            source,
        })?
        .permissions();
    fs::set_permissions(staged.path(), permissions).map_err(|source| CodecError::Io {
        path: staged.path().to_path_buf(),
        source,
    })?;

    staged
        .persist(&path)
        .map_err(|e| save_error(e.error.to_string()))?;

    Ok(())
}

/// Expose the file meta group as a plain data set so scripts address it like any other group.
pub fn meta_to_dataset(meta: &FileMetaTable) -> Dataset {
    let mut dataset = Dataset::new_empty();

    dataset.put(DataElement::new(
        tags::FILE_META_INFORMATION_VERSION,
        VR::OB,
        PrimitiveValue::from(meta.information_version.to_vec()),
    ));

    let required = [
        (
            tags::MEDIA_STORAGE_SOP_CLASS_UID,
            VR::UI,
            meta.media_storage_sop_class_uid.as_str(),
        ),
        (
            tags::MEDIA_STORAGE_SOP_INSTANCE_UID,
            VR::UI,
            meta.media_storage_sop_instance_uid.as_str(),
        ),
        (tags::TRANSFER_SYNTAX_UID, VR::UI, meta.transfer_syntax.as_str()),
        (
            tags::IMPLEMENTATION_CLASS_UID,
            VR::UI,
            meta.implementation_class_uid.as_str(),
        ),
    ];
    let optional = [
        (
            tags::IMPLEMENTATION_VERSION_NAME,
            VR::SH,
            meta.implementation_version_name.as_deref(),
        ),
        (
            tags::SOURCE_APPLICATION_ENTITY_TITLE,
            VR::AE,
            meta.source_application_entity_title.as_deref(),
        ),
        (
            tags::SENDING_APPLICATION_ENTITY_TITLE,
            VR::AE,
            meta.sending_application_entity_title.as_deref(),
        ),
        (
            tags::RECEIVING_APPLICATION_ENTITY_TITLE,
            VR::AE,
            meta.receiving_application_entity_title.as_deref(),
        ),
        (
            tags::PRIVATE_INFORMATION_CREATOR_UID,
            VR::UI,
            meta.private_information_creator_uid.as_deref(),
        ),
    ];

    let present = required
        .into_iter()
        .map(|(tag, vr, value)| (tag, vr, Some(value)))
        .chain(optional);
    for (tag, vr, value) in present {
        if let Some(value) = value.map(trim_padding).filter(|v| !v.is_empty()) {
            dataset.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
        }
    }

    if let Some(info) = &meta.private_information {
        dataset.put(DataElement::new(
            tags::PRIVATE_INFORMATION,
            VR::OB,
            PrimitiveValue::from(info.clone()),
        ));
    }

    dataset
}

/// Rebuild the file meta table from the (possibly edited) meta data set.
pub fn dataset_to_meta(meta: &Dataset) -> Result<FileMetaTable, String> {
    let text = |tag: Tag| meta.element_str(tag);
    let bytes = |tag: Tag| {
        meta.element(tag)
            .ok()
            .and_then(|e| e.to_bytes().ok())
            .map(|b| b.into_owned())
    };

    let mut builder = FileMetaTableBuilder::new()
        .media_storage_sop_class_uid(text(tags::MEDIA_STORAGE_SOP_CLASS_UID).unwrap_or_default())
        .media_storage_sop_instance_uid(
            text(tags::MEDIA_STORAGE_SOP_INSTANCE_UID).unwrap_or_default(),
        )
        .transfer_syntax(text(tags::TRANSFER_SYNTAX_UID).unwrap_or_default());

    if let Some([major, minor]) = bytes(tags::FILE_META_INFORMATION_VERSION)
        .and_then(|v| <[u8; 2]>::try_from(v.as_slice()).ok())
    {
        builder = builder.information_version([major, minor]);
    }
    if let Some(uid) = text(tags::IMPLEMENTATION_CLASS_UID) {
        builder = builder.implementation_class_uid(uid);
    }
    if let Some(name) = text(tags::IMPLEMENTATION_VERSION_NAME) {
        builder = builder.implementation_version_name(name);
    }
    if let Some(ae) = text(tags::SOURCE_APPLICATION_ENTITY_TITLE) {
        builder = builder.source_application_entity_title(ae);
    }
    if let Some(ae) = text(tags::SENDING_APPLICATION_ENTITY_TITLE) {
        builder = builder.sending_application_entity_title(ae);
    }
    if let Some(ae) = text(tags::RECEIVING_APPLICATION_ENTITY_TITLE) {
        builder = builder.receiving_application_entity_title(ae);
    }
    if let Some(uid) = text(tags::PRIVATE_INFORMATION_CREATOR_UID) {
        builder = builder.private_information_creator_uid(uid);
    }
    if let Some(info) = bytes(tags::PRIVATE_INFORMATION) {
        builder = builder.private_information(info);
    }

    builder.build().map_err(|e| e.to_string())
}
