//
// transform_workflows.rs
// Dicom-Transform-rs
//
// Integration-style tests running the whole pipeline over small DICOM files: end-to-end edits,
// private tags, meta information, failure isolation, DICOMDIR handling and cancellation.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::{uids, StandardDataDictionary};
use dicom::object::{open_file, FileDicomObject, FileMetaTableBuilder, InMemDicomObject};
use dicom::transfer_syntax::entries::EXPLICIT_VR_LITTLE_ENDIAN;
use dicom_transform::input::InputSource;
use dicom_transform::models::RunSummary;
use dicom_transform::{CancellationToken, FileTransformPipeline, TransformOptions};
use tempfile::{tempdir, TempDir};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

const SECONDARY_CAPTURE: &str = "1.2.840.10008.5.1.4.1.1.7";

const UPDATE_ACCESSION: &str = r#"
function main(d)
    d:update_string(0x0008, 0x0050, "TRANSFORMED")
end
"#;

fn write_dicom(path: &Path, sop_class: &str, index: usize) {
    // Construct a tiny instance with an accession number and a private block.
    let instance_uid = format!("1.2.826.0.1.3680043.2.1125.{}", index + 1);

    let mut obj = InMemDicomObject::new_empty_with_dict(StandardDataDictionary);
    obj.put(DataElement::new(
        Tag(0x0008, 0x0016),
        VR::UI,
        PrimitiveValue::from(sop_class),
    ));
    obj.put(DataElement::new(
        Tag(0x0008, 0x0018),
        VR::UI,
        PrimitiveValue::from(instance_uid.as_str()),
    ));
    obj.put(DataElement::new(
        Tag(0x0008, 0x0050),
        VR::SH,
        PrimitiveValue::from("OLD1234"),
    ));
    obj.put(DataElement::new(
        Tag(0x0008, 0x0060),
        VR::CS,
        PrimitiveValue::from("OT"),
    ));
    obj.put(DataElement::new(
        Tag(0x0009, 0x0010),
        VR::LO,
        PrimitiveValue::from("ACME"),
    ));
    obj.put(DataElement::new(
        Tag(0x0009, 0x1001),
        VR::LO,
        PrimitiveValue::from("vendor"),
    ));
    obj.put(DataElement::new(
        Tag(0x0010, 0x0010),
        VR::PN,
        PrimitiveValue::from("Test^Patient"),
    ));

    let meta = FileMetaTableBuilder::new()
        .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN.uid())
        .media_storage_sop_class_uid(sop_class)
        .media_storage_sop_instance_uid(instance_uid.as_str())
        .build()
        .expect("meta");

    let mut file_obj = FileDicomObject::new_empty_with_dict_and_meta(StandardDataDictionary, meta);
    for elem in obj {
        file_obj.put(elem);
    }
    file_obj.write_to_file(path).expect("write test dicom");
}

fn build_test_files(count: usize) -> (TempDir, Vec<PathBuf>) {
    let dir = tempdir().expect("tempdir");
    let paths = (0..count)
        .map(|index| {
            let path = dir.path().join(format!("IM{:04}.dcm", index + 1));
            write_dicom(&path, SECONDARY_CAPTURE, index);
            path
        })
        .collect();
    (dir, paths)
}

fn run_pipeline(
    script: &str,
    parallelism: usize,
    paths: Vec<PathBuf>,
    cancel: &CancellationToken,
) -> (RunSummary, Vec<PathBuf>) {
    let pipeline = FileTransformPipeline::new(
        script,
        TransformOptions {
            parallelism,
            ..TransformOptions::default()
        },
    );
    let transformed = Mutex::new(Vec::new());
    let summary = pipeline
        .run(&InputSource::from_paths(paths), cancel, |path| {
            transformed.lock().unwrap().push(path.to_path_buf());
        })
        .expect("pipeline run");

    let mut transformed = transformed.into_inner().unwrap();
    transformed.sort();
    (summary, transformed)
}

fn string_at(path: &Path, tag: Tag) -> String {
    open_file(path)
        .expect("open transformed")
        .element(tag)
        .expect("element")
        .to_str()
        .unwrap()
        .trim_end_matches(['\0', ' '])
        .to_string()
}

#[test]
fn script_updates_are_saved_in_place() {
    let (_dir, paths) = build_test_files(1);

    let (summary, transformed) =
        run_pipeline(UPDATE_ACCESSION, 1, paths.clone(), &CancellationToken::new());

    assert_eq!(summary.transformed, 1);
    assert_eq!(transformed, paths);
    assert_eq!(string_at(&paths[0], Tag(0x0008, 0x0050)), "TRANSFORMED");
    assert_eq!(string_at(&paths[0], Tag(0x0010, 0x0010)), "Test^Patient");
}

#[test]
fn corrupt_file_is_skipped_without_affecting_siblings() {
    let (_dir, paths) = build_test_files(10);
    let corrupt = paths[2].clone();
    fs::write(&corrupt, b"this is not a DICOM file").expect("corrupt file");

    let (summary, transformed) =
        run_pipeline(UPDATE_ACCESSION, 4, paths.clone(), &CancellationToken::new());

    assert_eq!(summary.transformed, 9);
    assert_eq!(summary.failed, 1);
    assert!(!transformed.contains(&corrupt));
    for path in paths.iter().filter(|p| **p != corrupt) {
        assert_eq!(string_at(path, Tag(0x0008, 0x0050)), "TRANSFORMED");
    }
    assert_eq!(fs::read(&corrupt).unwrap(), b"this is not a DICOM file");
}

#[test]
fn failing_script_leaves_the_file_untouched() {
    let (_dir, paths) = build_test_files(2);
    let before = fs::read(&paths[0]).unwrap();

    let script = r#"
    function main(d)
        d:update_string(0x0008, 0x0050, "HALFWAY")
        if d:get_string(0x0008, 0x0018) == "1.2.826.0.1.3680043.2.1125.1" then
            error("rejecting the first instance")
        end
    end
    "#;
    let (summary, transformed) =
        run_pipeline(script, 2, paths.clone(), &CancellationToken::new());

    assert_eq!(summary.transformed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(transformed, vec![paths[1].clone()]);
    assert_eq!(fs::read(&paths[0]).unwrap(), before);
    assert_eq!(string_at(&paths[1], Tag(0x0008, 0x0050)), "HALFWAY");
}

#[test]
fn private_attributes_are_addressed_through_their_creator() {
    let (_dir, paths) = build_test_files(1);

    let script = r#"
    function main(d)
        local old = d:get_string(0x0009, 0x1001)
        d:update_string(0x0009, 0x1001, old .. "-edited")
    end
    "#;
    let (summary, _) = run_pipeline(script, 1, paths.clone(), &CancellationToken::new());

    assert_eq!(summary.transformed, 1);
    assert_eq!(string_at(&paths[0], Tag(0x0009, 0x1001)), "vendor-edited");
    assert_eq!(string_at(&paths[0], Tag(0x0009, 0x0010)), "ACME");
}

#[test]
fn meta_information_is_readable_and_writable() {
    let (_dir, paths) = build_test_files(1);

    let script = r#"
    function main(d)
        d:update_string(0x0008, 0x0050, d:get_string(0x0002, 0x0002) == d:get_string(0x0008, 0x0016) and "MATCH" or "MISMATCH")
        d:update_string(0x0002, 0x0016, "TRANSFORMER")
    end
    "#;
    let (summary, _) = run_pipeline(script, 1, paths.clone(), &CancellationToken::new());

    assert_eq!(summary.transformed, 1);
    assert_eq!(string_at(&paths[0], Tag(0x0008, 0x0050)), "MATCH");
    let saved = open_file(&paths[0]).expect("open");
    assert_eq!(
        saved
            .meta()
            .source_application_entity_title
            .as_deref()
            .map(|ae| ae.trim_end_matches(['\0', ' '])),
        Some("TRANSFORMER")
    );
    assert_eq!(saved.meta().transfer_syntax(), EXPLICIT_VR_LITTLE_ENDIAN.uid());
}

#[test]
fn sequence_items_are_persisted() {
    let (_dir, paths) = build_test_files(1);

    let script = r#"
    function main(d)
        for i = 1, 2 do
            local item = d:create_sequence_item(0x0040, 0x0275)
            item:update_string(0x0040, 0x0009, "STEP-" .. i)
        end
    end
    "#;
    let (summary, _) = run_pipeline(script, 1, paths.clone(), &CancellationToken::new());
    assert_eq!(summary.transformed, 1);

    let saved = open_file(&paths[0]).expect("open");
    let seq = saved.element(Tag(0x0040, 0x0275)).expect("sequence");
    let items = seq.value().items().expect("items");
    assert_eq!(items.len(), 2);
    let ids: Vec<String> = items
        .iter()
        .map(|item| {
            item.element(Tag(0x0040, 0x0009))
                .expect("step id")
                .to_str()
                .unwrap()
                .trim_end()
                .to_string()
        })
        .collect();
    assert_eq!(ids, vec!["STEP-1", "STEP-2"]);
}

#[test]
fn nested_meta_access_fails_the_file_only() {
    let (_dir, paths) = build_test_files(1);
    let before = fs::read(&paths[0]).unwrap();

    let script = r#"
    function main(d)
        local item = d:create_sequence_item(0x0040, 0x0275)
        item:update_string(0x0002, 0x0016, "NOPE")
    end
    "#;
    let (summary, transformed) =
        run_pipeline(script, 1, paths.clone(), &CancellationToken::new());

    assert_eq!(summary.failed, 1);
    assert!(transformed.is_empty());
    assert_eq!(fs::read(&paths[0]).unwrap(), before);
}

#[test]
fn directory_indexes_are_deleted_without_running_the_script() {
    let (dir, mut paths) = build_test_files(1);
    let dicomdir = dir.path().join("DICOMDIR");
    write_dicom(&dicomdir, SECONDARY_CAPTURE, 7);
    let directory_storage = dir.path().join("INDEX.dcm");
    write_dicom(&directory_storage, uids::MEDIA_STORAGE_DIRECTORY_STORAGE, 8);
    paths.push(dicomdir.clone());
    paths.push(directory_storage.clone());

    let (summary, transformed) =
        run_pipeline(UPDATE_ACCESSION, 2, paths.clone(), &CancellationToken::new());

    assert_eq!(summary.deleted, 2);
    assert_eq!(summary.transformed, 1);
    assert_eq!(transformed, vec![paths[0].clone()]);
    assert!(!dicomdir.exists());
    assert!(!directory_storage.exists());
}

#[test]
fn invalid_script_stops_every_worker() {
    let (_dir, paths) = build_test_files(3);
    let before: Vec<Vec<u8>> = paths.iter().map(|p| fs::read(p).unwrap()).collect();

    let (summary, transformed) = run_pipeline(
        "function main(d) d:update_string(",
        3,
        paths.clone(),
        &CancellationToken::new(),
    );

    assert!(summary.all_workers_failed());
    assert_eq!(summary.failed_workers, 3);
    assert!(transformed.is_empty());
    let after: Vec<Vec<u8>> = paths.iter().map(|p| fs::read(p).unwrap()).collect();
    assert_eq!(before, after);
}

#[test]
fn script_without_main_is_a_load_failure() {
    let (_dir, paths) = build_test_files(1);

    let (summary, transformed) = run_pipeline(
        "function transform(d) end",
        1,
        paths,
        &CancellationToken::new(),
    );

    assert_eq!(summary.failed_workers, 1);
    assert!(transformed.is_empty());
}

#[test]
fn cancelled_run_starts_no_file() {
    let (_dir, paths) = build_test_files(3);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (summary, transformed) = run_pipeline(UPDATE_ACCESSION, 2, paths.clone(), &cancel);

    assert!(summary.cancelled);
    assert_eq!(summary.transformed, 0);
    assert!(transformed.is_empty());
    for path in &paths {
        assert_eq!(string_at(path, Tag(0x0008, 0x0050)), "OLD1234");
    }
}

#[test]
fn cancellation_lets_the_current_file_finish() {
    let (_dir, paths) = build_test_files(4);
    let cancel = CancellationToken::new();

    let pipeline = FileTransformPipeline::new(
        UPDATE_ACCESSION,
        TransformOptions {
            parallelism: 1,
            ..TransformOptions::default()
        },
    );
    let transformed = Mutex::new(Vec::new());
    let summary = pipeline
        .run(&InputSource::from_paths(paths.clone()), &cancel, |path| {
            // Interrupt arrives while the first file is being reported.
            cancel.cancel();
            transformed.lock().unwrap().push(path.to_path_buf());
        })
        .expect("pipeline run");

    assert!(summary.cancelled);
    assert_eq!(summary.transformed, 1);
    assert_eq!(transformed.into_inner().unwrap(), vec![paths[0].clone()]);
    assert_eq!(string_at(&paths[0], Tag(0x0008, 0x0050)), "TRANSFORMED");
    for path in &paths[1..] {
        assert_eq!(string_at(path, Tag(0x0008, 0x0050)), "OLD1234");
    }
}

#[test]
fn stdin_style_listing_feeds_the_pipeline() {
    let (_dir, paths) = build_test_files(2);
    let listing = format!(
        "{}\n/does/not/exist.dcm\n{}\n",
        paths[0].display(),
        paths[1].display()
    );

    let pipeline = FileTransformPipeline::new(UPDATE_ACCESSION, TransformOptions::default());
    let summary = pipeline
        .run(
            &InputSource::from_reader(std::io::Cursor::new(listing)),
            &CancellationToken::new(),
            |_| {},
        )
        .expect("pipeline run");

    assert_eq!(summary.transformed, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.workers, 8);
}

#[cfg(unix)]
#[test]
fn saved_files_keep_their_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let (_dir, paths) = build_test_files(1);
    fs::set_permissions(&paths[0], fs::Permissions::from_mode(0o640)).unwrap();

    let (summary, _) = run_pipeline(UPDATE_ACCESSION, 1, paths.clone(), &CancellationToken::new());

    assert_eq!(summary.transformed, 1);
    assert_eq!(string_at(&paths[0], Tag(0x0008, 0x0050)), "TRANSFORMED");
    let mode = fs::metadata(&paths[0]).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o640);
}

/// Cancels the run as soon as a script logs, i.e. while its file is still in flight.
struct CancelOnScriptLog {
    cancel: CancellationToken,
}

impl<S: Subscriber> Layer<S> for CancelOnScriptLog {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().target() == "script" {
            self.cancel.cancel();
        }
    }
}

#[test]
fn cancellation_during_a_transform_still_saves_that_file() {
    let (_dir, paths) = build_test_files(3);
    let cancel = CancellationToken::new();

    // The only test in this binary that installs a subscriber.
    tracing::subscriber::set_global_default(tracing_subscriber::registry().with(
        CancelOnScriptLog {
            cancel: cancel.clone(),
        },
    ))
    .expect("install subscriber");

    let script = r#"
function main(d)
    log("transforming", d:get_string(0x0008, 0x0018))
    d:update_string(0x0008, 0x0050, "TRANSFORMED")
end
"#;
    let (summary, transformed) = run_pipeline(script, 1, paths.clone(), &cancel);

    assert!(summary.cancelled);
    assert_eq!(summary.transformed, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(transformed, vec![paths[0].clone()]);
    assert_eq!(string_at(&paths[0], Tag(0x0008, 0x0050)), "TRANSFORMED");
    for path in &paths[1..] {
        assert_eq!(string_at(path, Tag(0x0008, 0x0050)), "OLD1234");
    }
}
