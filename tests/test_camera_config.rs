
use fixtures::*;

use pretty_assertions::assert_eq;
use structcodec::{
    CodecError, CodecSettings, DataStore, FieldDecodeError, FieldValue, Result,
    StructureParser, parse_structure, write_structure,
};

#[derive(Debug, Clone, PartialEq)]
struct CameraView {
    fov: f32,
    distance: f32,
    tilt: i16,
}

#[derive(Debug, Clone, PartialEq)]
struct Camera {
    id: u16,
    name: String,
    views: Vec<CameraView>,
}

struct CameraConfigFormat;

fn missing(path: &str) -> CodecError {
    CodecError::StoreKeyNotFound {
        path: path.to_owned(),
    }
}

impl StructureParser for CameraConfigFormat {
    type Output = Vec<Camera>;

    fn generate(&self, store: &DataStore) -> Result<Vec<Camera>> {
        let index = store.get_repeated_values("index");
        store
            .get_repeated_values("cameras")
            .iter()
            .zip(index)
            .map(|(camera, entry)| {
                let views = camera
                    .get_repeated_values("views")
                    .iter()
                    .map(|view| {
                        Ok(CameraView {
                            fov: view.get_float("fov").ok_or_else(|| missing("fov"))?,
                            distance: view.get_float("distance").ok_or_else(|| missing("distance"))?,
                            tilt: view
                                .get_integer("tilt")
                                .and_then(|v| i16::try_from(v).ok())
                                .ok_or_else(|| missing("tilt"))?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;

                Ok(Camera {
                    id: entry
                        .get_integer("camera_id")
                        .and_then(|v| u16::try_from(v).ok())
                        .ok_or_else(|| missing("camera_id"))?,
                    name: camera.get_text("name").ok_or_else(|| missing("name"))?.to_owned(),
                    views,
                })
            })
            .collect()
    }
}

#[test]
fn test_nested_groups_parse_into_cameras() {
    ensure_env_logger_initialized();
    let cameras = codec()
        .parse_with(&CameraConfigFormat, &camera_config(), "camera")
        .unwrap();

    assert_eq!(
        cameras,
        vec![
            Camera {
                id: 10,
                name: "near".to_owned(),
                views: vec![CameraView {
                    fov: 1.0,
                    distance: 2.5,
                    tilt: -5
                }],
            },
            Camera {
                id: 11,
                name: "far".to_owned(),
                views: vec![
                    CameraView {
                        fov: 0.5,
                        distance: 100.0,
                        tilt: 10
                    },
                    CameraView {
                        fov: 2.0,
                        distance: 10.0,
                        tilt: i16::MIN
                    },
                ],
            },
        ]
    );
}

#[test]
fn test_unmodified_config_round_trips() {
    ensure_env_logger_initialized();
    let codec = codec();
    let original = camera_config();

    let store = codec.parse(&original, "camera").unwrap();
    assert_eq!(store.get_raw_value("trailer"), Some(&b"END"[..]));
    assert_eq!(store.get_raw_value("cameras[1].padding"), Some(&[0xca, 0xfe][..]));
    assert_eq!(codec.write(&store, "camera").unwrap(), original);
}

#[test]
fn test_json_export_survives_a_round_trip() {
    let codec = codec();
    let original = camera_config();

    let store = codec.parse(&original, "camera").unwrap();
    let text = store.to_json_string(true).unwrap();
    let restored = DataStore::from_json_str(&text).unwrap();

    assert_eq!(restored, store);
    assert_eq!(codec.write(&restored, "camera").unwrap(), original);
}

#[test]
fn test_json_export_shape() {
    let spec = load_spec("sized_blob");
    let store = parse_structure(&[0, 1, 1, 2, 3, 4], &spec, &CodecSettings::default()).unwrap();

    insta::assert_json_snapshot!(store.to_json().unwrap(), @r#"
    {
      "sizeIndicator": {
        "raw": "0001",
        "value": {
          "integer": 1
        }
      },
      "blob": {
        "raw": "01020304"
      }
    }
    "#);
}

#[test]
fn test_adding_a_view_updates_the_nested_count() {
    let codec = codec();
    let mut store = codec.parse(&camera_config(), "camera").unwrap();

    let mut view = DataStore::new();
    view.add_float("fov", 3.0).unwrap();
    view.add_float("distance", 1.0).unwrap();
    view.add_integer("tilt", 0).unwrap();
    store.push_repeated("cameras[0].views", view).unwrap();

    let written = codec.write(&store, "camera").unwrap();
    assert_eq!(written.len(), camera_config().len() + 10);

    let reparsed = codec.parse(&written, "camera").unwrap();
    assert_eq!(reparsed.get_integer("cameras[0].view_count"), Some(2));
    assert_eq!(reparsed.get_float("cameras[0].views[1].fov"), Some(3.0));
    assert_eq!(reparsed.get_text("cameras[1].name"), Some("far"));
}

#[test]
fn test_renamed_camera_needs_a_matching_length() {
    let codec = codec();
    let mut store = codec.parse(&camera_config(), "camera").unwrap();

    store.add_text("cameras[1].name", "distant").unwrap();
    assert!(matches!(
        codec.write(&store, "camera"),
        Err(CodecError::FieldEncode { .. })
    ));

    store.add_integer("cameras[1].name_len", 7).unwrap();
    let reparsed = codec
        .parse(&codec.write(&store, "camera").unwrap(), "camera")
        .unwrap();
    assert_eq!(
        reparsed.get_value("cameras[1].name"),
        Some(&FieldValue::Text("distant".to_owned()))
    );
}

#[test]
fn test_mismatched_groups_sharing_a_count_are_rejected() {
    let codec = codec();
    let mut store = codec.parse(&camera_config(), "camera").unwrap();
    store.remove_repeated("cameras", 1).unwrap();

    assert!(matches!(
        codec.write(&store, "camera"),
        Err(CodecError::RepeatCountMismatch { .. })
    ));

    store.remove_repeated("index", 1).unwrap();
    assert!(codec.write(&store, "camera").is_ok());
}

#[test]
fn test_missing_field_fails_the_write() {
    let codec = codec();
    let mut store = codec.parse(&camera_config(), "camera").unwrap();
    store.remove("trailer");

    match codec.write(&store, "camera").unwrap_err() {
        CodecError::StoreKeyNotFound { path } => assert_eq!(path, "trailer"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_formula_sized_blob() {
    let spec = load_spec("sized_blob");
    let mut buffer = vec![0x01, 0xf4];
    buffer.extend(std::iter::repeat_n(0xab, 2000));

    let store = parse_structure(&buffer, &spec, &CodecSettings::default()).unwrap();
    assert_eq!(store.get_integer("sizeIndicator"), Some(500));
    assert_eq!(store.get_raw_value("blob").map(<[u8]>::len), Some(2000));
    assert_eq!(write_structure(&store, &spec, &CodecSettings::default()).unwrap(), buffer);
}

#[test]
fn test_blob_without_its_size_indicator() {
    let spec = load_spec("sized_blob");
    let mut store = DataStore::new();
    store.add_raw_value("blob", vec![0; 8]).unwrap();

    // The indicator is derived from the capture when writing.
    let written = write_structure(&store, &spec, &CodecSettings::default()).unwrap();
    assert_eq!(&written[..2], &[0, 2]);

    // A capture that is not a multiple of four cannot be described, so no indicator is
    // derived and the write stops at the missing field.
    let mut store = DataStore::new();
    store.add_raw_value("blob", vec![0; 7]).unwrap();
    match write_structure(&store, &spec, &CodecSettings::default()).unwrap_err() {
        CodecError::StoreKeyNotFound { path } => assert_eq!(path, "sizeIndicator"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_truncated_config_fails_without_partial_results() {
    let mut buffer = camera_config();
    // cuts the second camera's name short
    buffer.truncate(26);

    let err = codec().parse(&buffer, "camera").unwrap_err();
    assert!(matches!(
        err,
        CodecError::FieldDecode {
            source: FieldDecodeError::Truncated { .. },
            ..
        }
    ));
}
