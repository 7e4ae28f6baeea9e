use tempfile::tempdir;

use mtr_core::db::{ensure_dimension, stored_dimension};
use mtr_core::domain::NewChunk;
use mtr_core::repo::chunks::{get_chunk, put_chunk};
use mtr_core::workspace::{
    create_workspace, create_workspace_connection, db_is_empty, open_workspace_connection,
};

#[test]
fn chunks_survive_reopen() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("nested").join("corpus.sqlite");

    {
        let mut conn = create_workspace_connection(&path).expect("create");
        put_chunk(&mut conn, NewChunk::new("m1", 0, "persisted text").with_id("c0")).unwrap();
        ensure_dimension(&conn, 3).unwrap();
    }

    let conn = open_workspace_connection(&path).expect("reopen");
    let chunk = get_chunk(&conn, "c0").unwrap().expect("chunk persisted");
    assert_eq!(chunk.content, "persisted text");
    assert_eq!(stored_dimension(&conn).unwrap(), Some(3));
}

#[test]
fn open_requires_existing_file_and_rejects_directories() {
    let tmp = tempdir().unwrap();
    let missing = tmp.path().join("missing.sqlite");
    let err = open_workspace_connection(&missing).unwrap_err();
    assert_eq!(err.code, "WORKSPACE_DB_NOT_FOUND");

    let err = create_workspace_connection(tmp.path()).unwrap_err();
    assert_eq!(err.code, "WORKSPACE_INVALID_PATH");
}

#[test]
fn emptiness_tracks_chunks() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("empty.sqlite");

    let meta = create_workspace(&path).expect("create");
    assert!(meta.is_empty);

    let mut conn = open_workspace_connection(&path).unwrap();
    put_chunk(&mut conn, NewChunk::new("m1", 0, "hello")).unwrap();
    assert!(!db_is_empty(&path).unwrap());
}
