// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use rkv_txn::{
    Database,
    DatabaseOptions,
    Environment,
    Iter,
    Readable,
    StoreError,
    WriteFlags,
    Writer,
};
use tempfile::{
    Builder,
    TempDir,
};

fn open_env(prefix: &str) -> (TempDir, Environment) {
    let root = Builder::new().prefix(prefix).tempdir().expect("tempdir");
    let env = Environment::open_at(root.path()).expect("open");
    (root, env)
}

fn fill(env: &Environment, db: &Database, pairs: &[(&'static str, &'static str)]) {
    let db = db.clone();
    let pairs = pairs.to_vec();
    env.write(move |writer: &mut Writer| -> Result<(), StoreError> {
        for (k, v) in pairs {
            writer.put(&db, k, v)?;
        }
        Ok(())
    })
    .expect("filled");
}

fn keys(iter: Iter) -> Vec<String> {
    iter.map(|entry| {
        let (k, _) = entry.expect("entry");
        String::from_utf8(k.to_vec()).expect("utf8")
    })
    .collect()
}

fn values(iter: Iter) -> Vec<String> {
    iter.map(|entry| {
        let (_, v) = entry.expect("entry");
        String::from_utf8(v.to_vec()).expect("utf8")
    })
    .collect()
}

#[test]
fn test_iter_start_and_from() {
    let (_root, env) = open_env("test_iter");
    let db = env.open_database("s", DatabaseOptions::create()).wait().expect("created");
    fill(&env, &db, &[("c", "3"), ("a", "1"), ("e", "5"), ("b", "2"), ("d", "4")]);

    let reader = env.begin_read().expect("reader");
    let mut cursor = reader.open_ro_cursor(&db).expect("cursor");
    assert_eq!(keys(cursor.iter_start()), vec!["a", "b", "c", "d", "e"]);
    assert_eq!(keys(cursor.iter_from("c")), vec!["c", "d", "e"]);
    assert_eq!(keys(cursor.iter_from("bb")), vec!["c", "d", "e"]);
    assert!(keys(cursor.iter_from("z")).is_empty());

    // Still usable after the iterators are gone.
    let (k, v) = cursor.seek_exact("b").expect("seek").expect("entry");
    assert_eq!(k, b"b");
    assert_eq!(v, b"2");
}

#[test]
fn test_positioning() {
    let (_root, env) = open_env("test_positioning");
    let db = env.open_database("s", DatabaseOptions::create()).wait().expect("created");
    fill(&env, &db, &[("a", "1"), ("b", "2"), ("c", "3")]);

    let reader = env.begin_read().expect("reader");
    let mut cursor = reader.open_ro_cursor(&db).expect("cursor");

    let (first, _) = cursor.first().expect("first").expect("entry");
    let (last, _) = cursor.last().expect("last").expect("entry");
    let (prev, _) = cursor.prev().expect("prev").expect("entry");
    // Views stay readable after the cursor moves on.
    assert_eq!(first, b"a");
    assert_eq!(last, b"c");
    assert_eq!(prev, b"b");

    let (current, _) = cursor.current().expect("current").expect("entry");
    assert_eq!(current, b"b");
    assert_eq!(cursor.count().expect("count"), 1);

    assert!(cursor.next().expect("next").is_some());
    assert!(cursor.next().expect("next").is_none());
    assert!(cursor.seek_exact("bb").expect("seek").is_none());
    let (k, _) = cursor.seek("bb").expect("seek").expect("entry");
    assert_eq!(k, b"c");
    assert!(cursor.next_dup().expect("next dup").is_none());
}

#[test]
fn test_duplicates() {
    let (_root, env) = open_env("test_duplicates");
    let db = env.open_database("multi", DatabaseOptions::create().dup_sort()).wait().expect("created");
    assert!(db.allows_duplicates());
    fill(&env, &db, &[("k", "c"), ("k", "a"), ("k", "b"), ("j", "x"), ("l", "y")]);

    let reader = env.begin_read().expect("reader");
    let mut cursor = reader.open_ro_cursor(&db).expect("cursor");
    assert_eq!(values(cursor.dups("k")), vec!["a", "b", "c"]);
    // Calling again starts over.
    assert_eq!(values(cursor.dups("k")), vec!["a", "b", "c"]);
    assert_eq!(values(cursor.dups("j")), vec!["x"]);
    assert!(values(cursor.dups("missing")).is_empty());

    cursor.seek_exact("k").expect("seek").expect("entry");
    assert_eq!(cursor.count().expect("count"), 3);
    assert_eq!(keys(cursor.iter_start()).len(), 5);

    // A partial walk can be abandoned and restarted.
    assert_eq!(cursor.dups("k").take(1).count(), 1);
    assert_eq!(values(cursor.dups("k")), vec!["a", "b", "c"]);

    drop(cursor);
    drop(reader);

    let job_db = db.clone();
    env.write(move |writer: &mut Writer| writer.delete_value(&job_db, "k", "b")).expect("deleted");
    let reader = env.begin_read().expect("reader");
    let mut cursor = reader.open_ro_cursor(&db).expect("cursor");
    assert_eq!(values(cursor.dups("k")), vec!["a", "c"]);
}

#[test]
fn test_dups_outside_duplicate_databases() {
    let (_root, env) = open_env("test_dups_plain");
    let db = env.open_database("s", DatabaseOptions::create()).wait().expect("created");
    fill(&env, &db, &[("a", "1"), ("b", "2")]);

    let reader = env.begin_read().expect("reader");
    let mut cursor = reader.open_ro_cursor(&db).expect("cursor");
    assert_eq!(values(cursor.dups("a")), vec!["1"]);
}

#[test]
fn test_write_cursor() {
    let (_root, env) = open_env("test_write_cursor");
    let db = env.open_database("s", DatabaseOptions::create()).wait().expect("created");
    fill(&env, &db, &[("a", "1"), ("b", "2"), ("c", "3")]);

    let job_db = db.clone();
    env.write(move |writer: &mut Writer| -> Result<(), StoreError> {
        let mut cursor = writer.open_cursor(&job_db)?;
        assert!(cursor.seek_exact("b")?.is_some());
        cursor.delete_current()?;

        cursor.put("d", "4", WriteFlags::empty())?;
        let current = cursor.current()?.map(|(k, _)| k.to_vec());
        assert_eq!(current, Some(b"d".to_vec()));

        assert!(cursor.seek_exact("a")?.is_some());
        cursor.put("a", "one", WriteFlags::CURRENT)?;
        drop(cursor);

        // The transaction sees its own cursor writes.
        assert_eq!(writer.get(&job_db, "a")?.map(|v| v.to_vec()), Some(b"one".to_vec()));
        Ok(())
    })
    .expect("committed");

    let reader = env.begin_read().expect("reader");
    let mut cursor = reader.open_ro_cursor(&db).expect("cursor");
    assert_eq!(keys(cursor.iter_start()), vec!["a", "c", "d"]);
    assert_eq!(values(cursor.iter_start()), vec!["one", "3", "4"]);
}

#[test]
fn test_read_cursor_inside_write_job() {
    let (_root, env) = open_env("test_read_cursor_in_job");
    let db = env.open_database("s", DatabaseOptions::create()).wait().expect("created");
    fill(&env, &db, &[("a", "1"), ("b", "2")]);

    let job_db = db.clone();
    let total = env
        .write(move |writer: &mut Writer| -> Result<usize, StoreError> {
            writer.put(&job_db, "c", "3")?;
            let mut cursor = writer.open_ro_cursor(&job_db)?;
            let total = cursor.iter_start().count();
            Ok(total)
        })
        .expect("committed");
    assert_eq!(total, 3);
}

#[test]
fn test_cursors_are_renewed_between_readers() {
    let (_root, env) = open_env("test_cursor_renewal");
    let db = env.open_database("s", DatabaseOptions::create()).wait().expect("created");
    fill(&env, &db, &[("a", "1")]);

    let first_scope = {
        let reader = env.begin_read().expect("reader");
        let mut cursor = reader.open_ro_cursor(&db).expect("cursor");
        let (k, _) = cursor.first().expect("first").expect("entry");
        k.scope()
    };

    fill(&env, &db, &[("b", "2")]);

    let reader = env.begin_read().expect("reader");
    let mut cursor = reader.open_ro_cursor(&db).expect("cursor");
    let (k, _) = cursor.last().expect("last").expect("entry");
    assert_eq!(k, b"b");
    assert_ne!(k.scope(), first_scope);
    assert_eq!(k.scope(), reader.scope().expect("scope"));

    let stats = env.pool_stats().expect("stats");
    assert!(stats.renewed >= 2);
}

#[test]
fn test_unpositioned_cursor() {
    let (_root, env) = open_env("test_unpositioned");
    let plain = env.open_database("s", DatabaseOptions::create()).wait().expect("created");
    let multi = env.open_database("multi", DatabaseOptions::create().dup_sort()).wait().expect("created");
    let empty = env.open_database("empty", DatabaseOptions::create()).wait().expect("created");
    fill(&env, &plain, &[("a", "1")]);
    fill(&env, &multi, &[("k", "x"), ("k", "y")]);

    let reader = env.begin_read().expect("reader");
    for db in &[&plain, &multi, &empty] {
        let mut cursor = reader.open_ro_cursor(db).expect("cursor");
        assert_eq!(cursor.count().expect("count"), 0);
        assert!(cursor.current().expect("current").is_none());
    }

    let mut cursor = reader.open_ro_cursor(&multi).expect("cursor");
    cursor.first().expect("first").expect("entry");
    assert_eq!(cursor.count().expect("count"), 2);
    drop(cursor);
    drop(reader);

    // Pooled cursors come back unpositioned.
    let reader = env.begin_read().expect("reader");
    let mut cursor = reader.open_ro_cursor(&multi).expect("cursor");
    assert_eq!(cursor.count().expect("count"), 0);
}
