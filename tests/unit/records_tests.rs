/*!
 * Tests for loading the input store from disk
 */

use outcome_classifier::app_config::RecordConfig;
use outcome_classifier::errors::RecordError;
use outcome_classifier::records::{RecordKey, RecordStore};

use crate::common;

#[test]
fn test_load_fromFile_shouldKeepRowOrder() {
    let dir = common::create_temp_dir().unwrap();
    let path = common::create_test_file(dir.path(), "in.csv", &common::outcomes_csv(5)).unwrap();

    let store = RecordStore::load(&path, &RecordConfig::default()).unwrap();
    assert_eq!(store.len(), 5);
    for (i, record) in store.records().iter().enumerate() {
        assert_eq!(record.position, i);
        assert_eq!(record.key, RecordKey::from_parts("BIO 100", &(i + 1).to_string()));
    }
}

#[test]
fn test_load_withMissingFile_shouldBeUnreadable() {
    let dir = common::create_temp_dir().unwrap();
    let result = RecordStore::load(dir.path().join("nope.csv"), &RecordConfig::default());
    assert!(matches!(result, Err(RecordError::Unreadable(_))));
}

#[test]
fn test_load_withExtraColumns_shouldPreserveThem() {
    let dir = common::create_temp_dir().unwrap();
    let csv = "college,course_name,learning_outcome_id,learning_outcome_title,learning_outcome_details\n\
        Life Sciences ,BIO 100,1,Cells,\n";
    let path = common::create_test_file(dir.path(), "in.csv", csv).unwrap();

    let store = RecordStore::load(&path, &RecordConfig::default()).unwrap();
    assert_eq!(store.headers()[0], "college");
    assert_eq!(store.get(0).unwrap().fields[0], "Life Sciences");
}

#[test]
fn test_duplicateIdentities_shouldStillLoad() {
    let csv = format!("{}\nBIO 100,1,Cells,\nBIO 100,1,Tissues,\n", common::HEADER);
    let store = RecordStore::from_reader(csv.as_bytes(), &RecordConfig::default()).unwrap();
    assert_eq!(store.len(), 2);
    assert_eq!(store.get(0).unwrap().key, store.get(1).unwrap().key);
}
