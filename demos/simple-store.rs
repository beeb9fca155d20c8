// Any copyright is dedicated to the Public Domain.
// http://creativecommons.org/publicdomain/zero/1.0/

//! A simple demo that showcases the basic usage (put/get/delete) of rkv-txn.
//!
//! You can test this out by running:
//!
//!     cargo run --example simple-store

use std::thread;

use rkv_txn::{
    DatabaseOptions,
    Environment,
    Manager,
    Readable,
    StoreError,
    Writer,
};
use tempfile::Builder;

fn main() {
    let root = Builder::new().prefix("simple-db").tempdir().unwrap();
    let p = root.path();

    // The manager enforces that each process opens the same lmdb environment at most once
    let env = Manager::singleton().write().get_or_create(p, Environment::open_at).unwrap();

    // Creates a store called "store"
    let store = env.open_database("store", DatabaseOptions::create()).wait().unwrap();
    let multi = env.open_database("multi", DatabaseOptions::create().dup_sort()).wait().unwrap();

    println!("Inserting data...");
    {
        // Every write runs as a job on the writer thread
        let (s, m) = (store.clone(), multi.clone());
        env.write(move |writer: &mut Writer| -> Result<(), StoreError> {
            writer.put_value(&s, "int", &1234i64)?;
            writer.put_value(&s, "uint", &1234u64)?;
            writer.put_value(&s, "float", &1234.0f64)?;
            writer.put(&s, "string", "héllo, yöu")?;
            writer.put(&s, "blob", b"blob")?;
            writer.put(&m, "colors", "red")?;
            writer.put(&m, "colors", "green")?;
            writer.put(&m, "colors", "blue")?;
            Ok(())
        })
        .unwrap();
    }

    println!("Looking up keys...");
    {
        // Use a read transaction to query the store
        let r = env.begin_read().unwrap();
        println!("Get int {:?}", r.get(&store, "int").unwrap().map(|v| v.read::<i64>(0)));
        println!("Get uint {:?}", r.get(&store, "uint").unwrap().map(|v| v.read::<u64>(0)));
        println!("Get float {:?}", r.get(&store, "float").unwrap().map(|v| v.read::<f64>(0)));
        println!("Get string {:?}", r.get(&store, "string").unwrap().map(|v| String::from_utf8(v.to_vec())));
        println!("Get blob {:?}", r.get(&store, "blob").unwrap());
    }

    println!("Iterating duplicates...");
    {
        let r = env.begin_read().unwrap();
        let mut cursor = r.open_ro_cursor(&multi).unwrap();
        for entry in cursor.dups("colors") {
            let (_, color) = entry.unwrap();
            println!("colors: {}", String::from_utf8_lossy(color.as_bytes()));
        }
    }

    println!("Aborting transaction...");
    {
        // Returning an error aborts the job's transaction
        let s = store.clone();
        let result = env.write(move |writer: &mut Writer| -> Result<(), StoreError> {
            writer.put(&s, "foo", "bar")?;
            Err(StoreError::Cancelled)
        });
        println!("Job failed with {:?}", result.err());

        let r = env.begin_read().unwrap();
        println!("It should be None! ({:?})", r.get(&store, "foo").unwrap());
    }

    println!("Writing from several threads...");
    {
        // Jobs from any thread are serialized on the writer thread
        let handles: Vec<_> = (0..4u8)
            .map(|i| {
                let env = env.clone();
                let s = store.clone();
                thread::spawn(move || {
                    env.write(move |writer: &mut Writer| writer.put(&s, format!("thread-{}", i), [i])).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        println!("Writer stats {:?}", env.writer_stats().unwrap());
    }

    println!("Deleting keys...");
    {
        let s = store.clone();
        env.write(move |writer: &mut Writer| -> Result<(), StoreError> {
            writer.delete(&s, "int")?;
            writer.delete(&s, "uint")?;
            Ok(())
        })
        .unwrap();

        let r = env.begin_read().unwrap();
        println!("It should be None! ({:?})", r.get(&store, "int").unwrap());
    }

    println!("Pool stats {:?}", env.pool_stats().unwrap());
    Manager::singleton().write().close(p).unwrap();
}
