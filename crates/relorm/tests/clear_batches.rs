use std::sync::{Arc, Mutex};

use relorm::prelude::*;
use relorm::{CLEAR_BATCH_SIZE, Connection, Cursor, Dialect, KEY_BATCH_SIZE, SqliteConnection};

/// Sqlite driver that logs every statement it executes.
#[derive(Debug, Default)]
struct RecordingDriver {
    inner: SqliteDriver,
    log: Arc<Mutex<Vec<String>>>,
}

struct RecordingConnection {
    inner: SqliteConnection,
    log: Arc<Mutex<Vec<String>>>,
}

impl Connection for RecordingConnection {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<Cursor> {
        self.log.lock().expect("log lock").push(sql.to_string());
        self.inner.execute(sql, params)
    }

    fn begin(&self) -> Result<()> {
        self.inner.begin()
    }

    fn commit(&self) -> Result<()> {
        self.inner.commit()
    }

    fn rollback(&self) -> Result<()> {
        self.inner.rollback()
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

impl Driver for RecordingDriver {
    type Connection = RecordingConnection;

    fn connect(&self, config: &DatabaseConfig) -> Result<RecordingConnection> {
        Ok(RecordingConnection {
            inner: self.inner.connect(config)?,
            log: Arc::clone(&self.log),
        })
    }
}

fn open() -> (Database<RecordingDriver>, Arc<Mutex<Vec<String>>>) {
    let mut registry = Registry::new();
    registry
        .register(
            Model::builder("Post")
                .field(Field::string("title"))
                .field(Field::many_to_many("readers", "Reader"))
                .build()
                .expect("build Post"),
        )
        .expect("register Post");
    registry
        .register(
            Model::builder("Comment")
                .field(Field::text("body"))
                .field(Field::many_to_one("post", "Post"))
                .build()
                .expect("build Comment"),
        )
        .expect("register Comment");
    registry
        .register(
            Model::builder("Reader")
                .field(Field::string("name"))
                .build()
                .expect("build Reader"),
        )
        .expect("register Reader");
    let driver = RecordingDriver::default();
    let log = Arc::clone(&driver.log);
    let db = Database::new(driver, DatabaseConfig::memory(), registry.prepare().expect("prepare"));
    db.create_all().expect("create tables");
    (db, log)
}

fn deletes(log: &Arc<Mutex<Vec<String>>>, table: &str) -> usize {
    let prefix = format!("DELETE FROM \"{table}\"");
    log.lock()
        .expect("log lock")
        .iter()
        .filter(|sql| sql.starts_with(&prefix))
        .count()
}

#[test]
fn one_to_many_clear_removes_in_batches() {
    let (db, log) = open();
    let post_model = db.model("Post", "").expect("Post");
    let mut post = db.new_record(&post_model);
    db.save(&mut post).expect("save post");

    let comments = db.one_to_many(&post, "comment_set").expect("comment_set proxy");
    let mut batch: Vec<Record> = (0..250)
        .map(|_| db.new_record(comments.reference()))
        .collect();
    db.run_in_transaction(|_| comments.add(&mut batch)).expect("add comments");
    assert_eq!(comments.all().expect("query").count().expect("count"), 250);

    comments.clear().expect("clear");

    assert_eq!(comments.all().expect("query").count().expect("count"), 0);
    assert_eq!(deletes(&log, "comment"), 3);
    assert_eq!(CLEAR_BATCH_SIZE, 100);
}

#[test]
fn many_to_many_clear_removes_links_in_batches() {
    let (db, log) = open();
    let post_model = db.model("Post", "").expect("Post");
    let reader_model = db.model("Reader", "").expect("Reader");
    let mut post = db.new_record(&post_model);
    db.save(&mut post).expect("save post");

    let readers: Vec<Record> = db
        .run_in_transaction(|db| {
            (0..250)
                .map(|_| -> Result<Record> {
                    let mut reader = db.new_record(&reader_model);
                    db.save(&mut reader)?;
                    Ok(reader)
                })
                .collect()
        })
        .expect("save readers");
    let linked = db.many_to_many(&post, "readers").expect("readers proxy");
    db.run_in_transaction(|_| linked.add(&readers)).expect("link readers");
    assert_eq!(linked.all().expect("query").count().expect("count"), 250);

    linked.clear().expect("clear");

    assert_eq!(linked.all().expect("query").count().expect("count"), 0);
    assert_eq!(deletes(&log, "post_readers"), 3);
    assert_eq!(db.query(&reader_model).count().expect("count readers"), 250);
}

#[test]
fn clearing_an_empty_collection_issues_no_delete() {
    let (db, log) = open();
    let post_model = db.model("Post", "").expect("Post");
    let mut post = db.new_record(&post_model);
    db.save(&mut post).expect("save post");

    db.one_to_many(&post, "comment_set").expect("proxy").clear().expect("clear");
    db.many_to_many(&post, "readers").expect("proxy").clear().expect("clear");

    assert_eq!(deletes(&log, "comment"), 0);
    assert_eq!(deletes(&log, "post_readers"), 0);
}

#[test]
fn failed_transaction_rolls_back() {
    let (db, _log) = open();
    let post_model = db.model("Post", "").expect("Post");

    let err = db
        .run_in_transaction(|db| {
            let mut post = db.new_record(&post_model);
            db.save(&mut post)?;
            db.execute("INSERT INTO \"missing\" DEFAULT VALUES", &[])?;
            Ok(())
        })
        .unwrap_err();

    assert!(matches!(err, Error::Query(_)), "{err}");
    assert!(!db.in_transaction());
    assert_eq!(db.query(&post_model).count().expect("count"), 0);
}

#[test]
fn nested_transactions_are_rejected() {
    let (db, _log) = open();
    let err = db
        .run_in_transaction(|db| db.run_in_transaction(|_| Ok(())))
        .unwrap_err();
    assert!(matches!(err, Error::Transaction(_)), "{err}");
    assert!(!db.in_transaction());
}

#[test]
fn failed_commit_rolls_back_and_ends_transaction() {
    let (db, _log) = open();
    let post_model = db.model("Post", "").expect("Post");
    let comment_model = db.model("Comment", "").expect("Comment");

    let err = db
        .run_in_transaction(|db| {
            db.execute("PRAGMA defer_foreign_keys = ON", &[])?;
            db.execute("INSERT INTO \"comment\" (\"post\") VALUES (999)", &[])?;
            Ok(())
        })
        .unwrap_err();

    assert!(err.is_constraint_violation(), "{err}");
    assert!(!db.in_transaction());
    assert_eq!(db.query(&comment_model).count().expect("count"), 0);

    db.run_in_transaction(|db| {
        let mut post = db.new_record(&post_model);
        db.save(&mut post)
    })
    .expect("later transaction commits");
    assert_eq!(db.query(&post_model).count().expect("count"), 1);
}

#[test]
fn large_many_to_many_sets_are_read_in_key_batches() {
    let (db, log) = open();
    let post_model = db.model("Post", "").expect("Post");
    let reader_model = db.model("Reader", "").expect("Reader");
    let mut post = db.new_record(&post_model);
    db.save(&mut post).expect("save post");

    let total = KEY_BATCH_SIZE + 20;
    let readers: Vec<Record> = db
        .run_in_transaction(|db| {
            (0..total)
                .map(|i| -> Result<Record> {
                    let mut reader = db.new_record(&reader_model);
                    reader.set("name", format!("reader {i}"))?;
                    db.save(&mut reader)?;
                    Ok(reader)
                })
                .collect()
        })
        .expect("save readers");
    let linked = db.many_to_many(&post, "readers").expect("readers proxy");
    db.run_in_transaction(|_| linked.add(&readers)).expect("link readers");

    log.lock().expect("log lock").clear();
    let fetched = linked.all().expect("query").fetch_all().expect("fetch");
    assert_eq!(fetched.len(), total);
    assert_eq!(fetched[0].key(), readers[0].key());
    assert_eq!(fetched[total - 1].key(), readers[total - 1].key());
    let lookups = log
        .lock()
        .expect("log lock")
        .iter()
        .filter(|sql| sql.starts_with("SELECT * FROM \"reader\""))
        .count();
    assert_eq!(lookups, 2);

    let keys: Vec<i64> = readers.iter().filter_map(Record::key).collect();
    let loaded = db.get_many(&reader_model, &keys).expect("get many");
    assert_eq!(loaded.len(), total);
    let unlinked = linked.remove(&readers).expect("unlink");
    assert_eq!(unlinked, u64::try_from(total).expect("count fits"));
    assert_eq!(linked.all().expect("query").count().expect("count"), 0);
}
