// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use std::{
    sync::{
        Arc,
        Barrier,
    },
    thread,
};

use byteorder::{
    BigEndian,
    ByteOrder,
};
use rkv_txn::{
    BoundsCheck,
    DatabaseOptions,
    Environment,
    EnvironmentConfig,
    ErrorKind,
    Readable,
    StoreError,
    Writer,
};
use tempfile::Builder;

#[test]
fn test_put_then_get_round_trip() {
    let root = Builder::new().prefix("test_round_trip").tempdir().expect("tempdir");
    let env = Environment::open_at(root.path()).expect("open");
    let db = env.open_database(None, DatabaseOptions::default()).wait().expect("opened");

    let job_db = db.clone();
    env.submit_write(move |writer: &mut Writer| writer.put(&job_db, "a", [1u8, 2, 3])).wait().expect("committed");

    let reader = env.begin_read().expect("reader");
    let view = reader.get(&db, "a").expect("read").expect("value");
    assert_eq!(view, [1u8, 2, 3]);
    assert_eq!(view.len(), 3);
    drop(reader);

    env.close();
    assert!(!env.is_open());
}

#[test]
fn test_reads_run_alongside_writes() {
    let root = Builder::new().prefix("test_reads_alongside").tempdir().expect("tempdir");
    let env = Arc::new(Environment::open_at(root.path()).expect("open"));
    let db = env.open_database("s", DatabaseOptions::create()).wait().expect("created");

    let job_db = db.clone();
    env.write(move |writer: &mut Writer| writer.put(&job_db, "k", 1u32.to_be_bytes())).expect("written");

    // Every reader holds its snapshot while a write commits underneath it.
    let barrier = Arc::new(Barrier::new(5));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let env = env.clone();
            let db = db.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let reader = env.begin_read().expect("reader");
                let before = reader.get(&db, "k").expect("read").expect("value").read_u32::<BigEndian>(0);
                barrier.wait();
                barrier.wait();
                let after = reader.get(&db, "k").expect("read").expect("value").read_u32::<BigEndian>(0);
                assert_eq!(before.expect("u32"), after.expect("u32"));
            })
        })
        .collect();

    barrier.wait();
    let job_db = db.clone();
    env.write(move |writer: &mut Writer| writer.put(&job_db, "k", 2u32.to_be_bytes())).expect("written");
    barrier.wait();

    for r in readers {
        r.join().expect("reader thread");
    }

    let latest = env.read(|reader| reader.get(&db, "k")?.expect("value").read_u32::<BigEndian>(0)).expect("read");
    assert_eq!(latest, 2);
}

#[test]
fn test_snapshot_ids_advance() {
    let root = Builder::new().prefix("test_snapshot_ids").tempdir().expect("tempdir");
    let env = Environment::open_at(root.path()).expect("open");
    let db = env.open_database("s", DatabaseOptions::create()).wait().expect("created");

    let before = env.read(|reader| reader.snapshot_id()).expect("snapshot");
    let job_db = db.clone();
    let inside = env
        .write(move |writer: &mut Writer| -> Result<u64, StoreError> {
            writer.put(&job_db, "k", "v")?;
            writer.snapshot_id()
        })
        .expect("written");
    let after = env.read(|reader| reader.snapshot_id()).expect("snapshot");

    assert!(inside > before);
    assert_eq!(after, inside);
}

#[test]
fn test_bounds_checks_on_stored_values() {
    let root = Builder::new().prefix("test_bounds").tempdir().expect("tempdir");
    let env = Environment::open_at(root.path()).expect("open");
    let db = env.open_database("s", DatabaseOptions::create()).wait().expect("created");

    let job_db = db.clone();
    env.write(move |writer: &mut Writer| writer.put_value(&job_db, "pair", &[7u32, 9u32])).expect("written");

    let reader = env.begin_read().expect("reader");
    let view = reader.get(&db, "pair").expect("read").expect("value");
    assert_eq!(view.bounds_check(), BoundsCheck::Checked);
    assert_eq!(view.read::<[u32; 2]>(0).expect("pair"), [7, 9]);
    assert_eq!(view.slice(4, 4).expect("slice").read::<u32>(0).expect("u32"), 9);

    let err = view.read::<u64>(4).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BoundsViolation);

    let unchecked = view.unchecked();
    assert_eq!(unchecked.read::<u32>(4).expect("u32"), 9);
    assert_eq!(unchecked.scope(), reader.scope().expect("scope"));
}

#[test]
fn test_reserved_writes() {
    let root = Builder::new().prefix("test_reserved").tempdir().expect("tempdir");
    let env = Environment::open_at(root.path()).expect("open");
    let db = env.open_database("s", DatabaseOptions::create()).wait().expect("created");

    let job_db = db.clone();
    env.write(move |writer: &mut Writer| {
        writer.put_reserved(&job_db, "buf", 16, |buf| {
            for (i, b) in buf.iter_mut().enumerate() {
                *b = i as u8;
            }
        })
    })
    .expect("written");

    let value = env.read(|reader| Ok(reader.get(&db, "buf")?.map(|v| v.to_vec()))).expect("read");
    assert_eq!(value, Some((0..16u8).collect::<Vec<_>>()));
}

#[test]
fn test_clear_database() {
    let root = Builder::new().prefix("test_clear").tempdir().expect("tempdir");
    let env = Environment::open_at(root.path()).expect("open");
    let db = env.open_database("s", DatabaseOptions::create()).wait().expect("created");

    let job_db = db.clone();
    env.write(move |writer: &mut Writer| -> Result<(), StoreError> {
        writer.put(&job_db, "a", "1")?;
        writer.put(&job_db, "b", "2")?;
        Ok(())
    })
    .expect("written");

    let job_db = db.clone();
    env.write(move |writer: &mut Writer| writer.clear(&job_db)).expect("cleared");

    let reader = env.begin_read().expect("reader");
    assert!(reader.get(&db, "a").expect("read").is_none());
    let mut cursor = reader.open_ro_cursor(&db).expect("cursor");
    assert!(cursor.first().expect("first").is_none());
}

#[test]
fn test_too_many_databases() {
    let root = Builder::new().prefix("test_too_many_dbs").tempdir().expect("tempdir");
    let config = EnvironmentConfig {
        max_dbs: 2,
        ..Default::default()
    };
    let env = Environment::with_config(root.path(), config);
    env.open().expect("open");

    env.open_database("one", DatabaseOptions::create()).wait().expect("one");
    env.open_database("two", DatabaseOptions::create()).wait().expect("two");
    match env.open_database("three", DatabaseOptions::create()).wait() {
        Err(StoreError::Native(lmdb::Error::DbsFull)) => (),
        other => panic!("expected a full database table, got {:?}", other),
    }
}

#[test]
fn test_open_database_is_cached() {
    let root = Builder::new().prefix("test_open_cached").tempdir().expect("tempdir");
    let env = Environment::open_at(root.path()).expect("open");

    let created = env.open_database("s", DatabaseOptions::create()).wait().expect("created");
    let again = env.open_database("s", DatabaseOptions::create()).wait().expect("again");
    let existing = env.open_database("s", DatabaseOptions::default()).wait().expect("existing");
    assert_eq!(created, again);
    assert_eq!(created, existing);
    assert_eq!(env.writer_stats().expect("stats").committed, 1);
}

#[test]
fn test_database_opened_inside_a_job() {
    let root = Builder::new().prefix("test_open_in_job").tempdir().expect("tempdir");
    let env = Environment::open_at(root.path()).expect("open");

    let db = env
        .write(move |writer: &mut Writer| -> Result<_, StoreError> {
            let db = writer.open_database("s", DatabaseOptions::create().integer_key())?;
            writer.put(&db, 1u32.to_ne_bytes(), "one")?;
            Ok(db)
        })
        .expect("written");
    assert!(db.has_integer_keys());

    let cached = env.open_database("s", DatabaseOptions::default()).wait().expect("cached");
    assert_eq!(cached, db);
    let value = env.read(|reader| Ok(reader.get(&db, 1u32.to_ne_bytes())?.map(|v| v.to_vec()))).expect("read");
    assert_eq!(value, Some(b"one".to_vec()));
}

#[test]
fn test_aborted_open_is_not_published() {
    let root = Builder::new().prefix("test_aborted_open").tempdir().expect("tempdir");
    let env = Environment::open_at(root.path()).expect("open");

    let result = env.write(move |writer: &mut Writer| -> Result<(), StoreError> {
        writer.open_database("s", DatabaseOptions::create())?;
        Err(StoreError::Cancelled)
    });
    assert!(result.is_err());

    match env.open_database("s", DatabaseOptions::default()).wait() {
        Err(StoreError::Native(lmdb::Error::NotFound)) => (),
        other => panic!("expected the database to be missing, got {:?}", other),
    }
}

#[test]
fn test_reopen_with_other_flags_is_incompatible() {
    let root = Builder::new().prefix("test_reopen_flags").tempdir().expect("tempdir");
    let env = Environment::open_at(root.path()).expect("open");
    let plain = env.open_database("x", DatabaseOptions::create()).wait().expect("created");
    assert!(!plain.allows_duplicates());

    match env.open_database("x", DatabaseOptions::create().dup_sort()).wait() {
        Err(StoreError::Native(lmdb::Error::Incompatible)) => (),
        other => panic!("expected incompatible flags, got {:?}", other),
    }
    match env.open_database("x", DatabaseOptions::default().integer_key()).wait() {
        Err(StoreError::Native(lmdb::Error::Incompatible)) => (),
        other => panic!("expected incompatible flags, got {:?}", other),
    }
    let result = env.write(move |writer: &mut Writer| writer.open_database("x", DatabaseOptions::create().dup_sort()));
    match result {
        Err(StoreError::Native(lmdb::Error::Incompatible)) => (),
        other => panic!("expected incompatible flags, got {:?}", other),
    }

    // Without flags, or with the same ones, the existing database comes back.
    let again = env.open_database("x", DatabaseOptions::default()).wait().expect("any flags");
    assert_eq!(again, plain);

    let multi = env.open_database("m", DatabaseOptions::create().dup_sort()).wait().expect("created");
    let same = env.open_database("m", DatabaseOptions::default().dup_sort()).wait().expect("same flags");
    assert_eq!(same, multi);

    // A fresh environment instance goes to the engine instead of the cache.
    env.close();
    let env = Environment::open_at(root.path()).expect("reopen");
    match env.open_database("m", DatabaseOptions::default().integer_key()).wait() {
        Err(StoreError::Native(lmdb::Error::Incompatible)) => (),
        other => panic!("expected incompatible flags, got {:?}", other),
    }
    let reopened = env.open_database("m", DatabaseOptions::default()).wait().expect("opened");
    assert!(reopened.allows_duplicates());
}
