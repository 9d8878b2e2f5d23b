use std::sync::Arc;

use relorm::error::QueryErrorKind;
use relorm::prelude::*;

fn library() -> Database<SqliteDriver> {
    let mut registry = Registry::new();
    registry
        .register(
            Model::builder("Author")
                .field(Field::string("name").required(true))
                .build()
                .expect("build Author"),
        )
        .expect("register Author");
    registry
        .register(
            Model::builder("Book")
                .field(Field::string("title"))
                .field(Field::many_to_one("author", "Author"))
                .field(Field::many_to_many("tags", "Tag"))
                .build()
                .expect("build Book"),
        )
        .expect("register Book");
    registry
        .register(
            Model::builder("Chapter")
                .field(Field::string("heading"))
                .field(Field::many_to_one("book", "Book").required(true))
                .build()
                .expect("build Chapter"),
        )
        .expect("register Chapter");
    registry
        .register(
            Model::builder("Tag")
                .field(Field::string("label").unique(true))
                .build()
                .expect("build Tag"),
        )
        .expect("register Tag");
    registry
        .register(
            Model::builder("Biography")
                .field(Field::text("body"))
                .field(Field::one_to_one("author", "Author"))
                .build()
                .expect("build Biography"),
        )
        .expect("register Biography");

    let schema = registry.prepare().expect("prepare schema");
    let db = Database::new(SqliteDriver::new(), DatabaseConfig::memory(), schema);
    db.create_all().expect("create tables");
    db
}

fn model(db: &Database<SqliteDriver>, name: &str) -> Arc<Model> {
    db.model(name, "").expect("model exists")
}

fn saved(db: &Database<SqliteDriver>, model_name: &str, field: &str, value: &str) -> Record {
    let mut record = db.new_record(&model(db, model_name));
    record.set(field, value).expect("set field");
    db.save(&mut record).expect("save record");
    record
}

fn titles(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|r| r.get("title").expect("title").as_str().unwrap_or_default().to_string())
        .collect()
}

#[test]
fn one_to_many_add_links_and_saves() {
    let db = library();
    let author = saved(&db, "Author", "name", "Le Guin");
    let books = db.one_to_many(&author, "book_set").expect("book_set proxy");

    let mut new = vec![db.new_record(&model(&db, "Book")), db.new_record(&model(&db, "Book"))];
    new[0].set("title", "Earthsea").expect("set");
    new[1].set("title", "Lathe of Heaven").expect("set");
    books.add(&mut new).expect("add books");

    assert!(new.iter().all(Record::is_saved));
    assert_eq!(new[0].reference_key("author"), author.key());
    let fetched = books.all().expect("query").order("title").expect("order").fetch_all().expect("fetch");
    assert_eq!(titles(&fetched), vec!["Earthsea", "Lathe of Heaven"]);
    assert_eq!(books.all().expect("query").count().expect("count"), 2);

    let loaded = db.reference(&fetched[0], "author").expect("load author").expect("author set");
    assert_eq!(loaded.key(), author.key());
}

#[test]
fn one_to_many_add_rejects_wrong_model() {
    let db = library();
    let author = saved(&db, "Author", "name", "Herbert");
    let books = db.one_to_many(&author, "book_set").expect("book_set proxy");
    let mut wrong = vec![db.new_record(&model(&db, "Tag"))];

    let err = books.add(&mut wrong).unwrap_err();
    assert!(matches!(err, Error::Type(_)), "{err}");
    assert!(!wrong[0].is_saved());
}

#[test]
fn one_to_many_remove_deletes_records() {
    let db = library();
    let author = saved(&db, "Author", "name", "Banks");
    let books = db.one_to_many(&author, "book_set").expect("book_set proxy");
    let mut new: Vec<Record> = (0..3)
        .map(|i| {
            let mut book = db.new_record(&model(&db, "Book"));
            book.set("title", format!("Culture {i}")).expect("set");
            book
        })
        .collect();
    books.add(&mut new).expect("add");

    let removed = books.remove(&mut new[..2]).expect("remove");
    assert_eq!(removed, 2);
    assert!(!new[0].is_saved());
    assert_eq!(db.query(&model(&db, "Book")).count().expect("count"), 1);
}

#[test]
fn required_reverse_field_blocks_remove_and_clear() {
    let db = library();
    let book = saved(&db, "Book", "title", "Dune");
    let chapters = db.one_to_many(&book, "chapter_set").expect("chapter_set proxy");
    let mut chapter = db.new_record(&model(&db, "Chapter"));
    chapter.set("heading", "Arrakis").expect("set");
    chapters.add(std::slice::from_mut(&mut chapter)).expect("add");

    let err = chapters.remove(std::slice::from_mut(&mut chapter)).unwrap_err();
    assert!(matches!(err, Error::Field(ref f) if f.field == "book"), "{err}");
    assert!(matches!(chapters.clear().unwrap_err(), Error::Field(_)));
    assert_eq!(chapters.all().expect("query").count().expect("count"), 1);
}

#[test]
fn deleting_referenced_record_nulls_optional_key() {
    let db = library();
    let mut author = saved(&db, "Author", "name", "Wolfe");
    let books = db.one_to_many(&author, "book_set").expect("book_set proxy");
    let mut book = db.new_record(&model(&db, "Book"));
    book.set("title", "Shadow of the Torturer").expect("set");
    books.add(std::slice::from_mut(&mut book)).expect("add");

    assert!(db.delete_record(&mut author).expect("delete author"));
    assert!(!author.is_saved());
    let reloaded = db
        .get(&model(&db, "Book"), book.key().expect("saved"))
        .expect("get")
        .expect("book still there");
    assert_eq!(reloaded.get("author").expect("author"), &Value::Null);
}

#[test]
fn required_reference_restricts_delete() {
    let db = library();
    let mut book = saved(&db, "Book", "title", "Hyperion");
    let chapters = db.one_to_many(&book, "chapter_set").expect("chapter_set proxy");
    let mut chapter = db.new_record(&model(&db, "Chapter"));
    chapters.add(std::slice::from_mut(&mut chapter)).expect("add");

    let err = db.delete_record(&mut book).unwrap_err();
    assert!(err.is_constraint_violation(), "{err}");
}

#[test]
fn many_to_many_requires_saved_owner() {
    let db = library();
    let book = db.new_record(&model(&db, "Book"));
    let err = db.many_to_many(&book, "tags").unwrap_err();
    assert!(matches!(err, Error::Value(_)), "{err}");
}

#[test]
fn many_to_many_add_is_idempotent() {
    let db = library();
    let book = saved(&db, "Book", "title", "Neuromancer");
    let cyber = saved(&db, "Tag", "label", "cyberpunk");
    let classic = saved(&db, "Tag", "label", "classic");
    let tags = db.many_to_many(&book, "tags").expect("tags proxy");

    tags.add(&[cyber.clone(), classic.clone()]).expect("add");
    tags.add(&[cyber.clone()]).expect("add again");

    let linked = tags.all().expect("query").fetch_all().expect("fetch");
    let mut labels: Vec<&Value> = linked.iter().map(|t| t.get("label").expect("label")).collect();
    labels.sort_by_key(|v| v.as_str().map(str::to_string));
    assert_eq!(labels, vec![&Value::from("classic"), &Value::from("cyberpunk")]);
    assert!(linked.iter().all(|t| t.model().name() == "Tag"));

    let links = db.query(tags.link_model()).raw().count().expect("count links");
    assert_eq!(links, 2);
}

#[test]
fn many_to_many_add_checks_every_record_first() {
    let db = library();
    let book = saved(&db, "Book", "title", "Snow Crash");
    let saved_tag = saved(&db, "Tag", "label", "satire");
    let unsaved_tag = db.new_record(&model(&db, "Tag"));
    let tags = db.many_to_many(&book, "tags").expect("tags proxy");

    let err = tags.add(&[saved_tag.clone(), unsaved_tag]).unwrap_err();
    assert!(matches!(err, Error::Value(_)), "{err}");
    let err = tags.add(&[saved_tag, book.clone()]).unwrap_err();
    assert!(matches!(err, Error::Type(_)), "{err}");
    assert_eq!(tags.all().expect("query").count().expect("count"), 0);
}

#[test]
fn many_to_many_remove_unlinks_only() {
    let db = library();
    let book = saved(&db, "Book", "title", "Solaris");
    let other = saved(&db, "Book", "title", "Roadside Picnic");
    let tag = saved(&db, "Tag", "label", "soviet");
    db.many_to_many(&book, "tags").expect("proxy").add(&[tag.clone()]).expect("add");
    db.many_to_many(&other, "tags").expect("proxy").add(&[tag.clone()]).expect("add");

    let tags = db.many_to_many(&book, "tags").expect("tags proxy");
    assert_eq!(tags.remove(&[tag.clone()]).expect("remove"), 1);
    assert_eq!(tags.all().expect("query").count().expect("count"), 0);
    assert_eq!(
        db.many_to_many(&other, "tags").expect("proxy").all().expect("query").count().expect("count"),
        1
    );
    assert!(db.get(&model(&db, "Tag"), tag.key().expect("saved")).expect("get").is_some());
    assert_eq!(tags.remove(&[]).expect("remove nothing"), 0);
}

#[test]
fn deleting_target_cascades_to_links() {
    let db = library();
    let book = saved(&db, "Book", "title", "Blindsight");
    let mut tag = saved(&db, "Tag", "label", "hard sf");
    let tags = db.many_to_many(&book, "tags").expect("tags proxy");
    tags.add(&[tag.clone()]).expect("add");

    db.delete_record(&mut tag).expect("delete tag");
    assert_eq!(db.query(tags.link_model()).raw().count().expect("count"), 0);
}

#[test]
fn one_to_one_get_and_set() {
    let db = library();
    let author = saved(&db, "Author", "name", "Chiang");

    let err = db.one_to_one(&author, "biography").unwrap_err();
    assert!(matches!(err, Error::Query(ref q) if q.kind == QueryErrorKind::NotFound), "{err}");

    let mut bio = db.new_record(&model(&db, "Biography"));
    bio.set("body", "Writes short fiction.").expect("set");
    db.set_one_to_one(&author, "biography", &mut bio).expect("assign");
    assert!(!bio.is_saved());
    db.save(&mut bio).expect("save");

    let found = db.one_to_one(&author, "biography").expect("biography");
    assert_eq!(found.key(), bio.key());

    let mut wrong = db.new_record(&model(&db, "Tag"));
    let err = db.set_one_to_one(&author, "biography", &mut wrong).unwrap_err();
    assert!(matches!(err, Error::Type(_)), "{err}");
}

#[test]
fn one_to_one_reference_is_unique() {
    let db = library();
    let author = saved(&db, "Author", "name", "Jemisin");
    for _ in 0..2 {
        let mut bio = db.new_record(&model(&db, "Biography"));
        bio.set_reference("author", Some(&author)).expect("assign");
        if let Err(err) = db.save(&mut bio) {
            assert!(err.is_constraint_violation(), "{err}");
            return;
        }
    }
    panic!("second biography for the same author was accepted");
}

#[test]
fn stored_key_resolves_to_record() {
    let db = library();
    let author = saved(&db, "Author", "name", "Vinge");
    let book_model = model(&db, "Book");
    let bio_model = model(&db, "Biography");

    let mut book = db.new_record(&book_model);
    book.set_reference("author", Some(&author)).expect("assign author");
    let mut bio = db.new_record(&bio_model);
    bio.set_reference("author", Some(&author)).expect("assign author");

    for (owner, record) in [(&book_model, &book), (&bio_model, &bio)] {
        let stored = owner
            .require_field("author")
            .expect("author field")
            .to_database_value(record);
        assert_eq!(stored, Value::key(author.key()));
        let found = db
            .from_database_value(owner, "author", &stored)
            .expect("lookup")
            .expect("found");
        assert_eq!(found.key(), author.key());
        assert_eq!(found.get("name").expect("name"), &Value::from("Vinge"));
    }

    assert!(db.from_database_value(&book_model, "author", &Value::Null).expect("lookup").is_none());
    assert!(db.from_database_value(&book_model, "title", &Value::key(author.key())).is_err());
}

#[test]
fn unsaved_reference_target_is_rejected() {
    let db = library();
    let mut author = db.new_record(&model(&db, "Author"));
    author.set("name", "Tiptree").expect("set");
    let mut book = db.new_record(&model(&db, "Book"));
    book.set("title", "Up the Walls of the World").expect("set");

    let err = book.set_reference("author", Some(&author)).unwrap_err();
    assert!(matches!(err, Error::Value(_)), "{err}");

    db.save(&mut author).expect("save author");
    book.set_reference("author", Some(&author)).expect("assign saved author");
    db.save(&mut book).expect("save book");
    let reloaded = db
        .get(&model(&db, "Book"), book.key().expect("saved"))
        .expect("get")
        .expect("book exists");
    assert_eq!(reloaded.reference_key("author"), author.key());
}

#[test]
fn get_many_keeps_key_order_and_skips_missing() {
    let db = library();
    let tag_model = model(&db, "Tag");
    let first = saved(&db, "Tag", "label", "first");
    let second = saved(&db, "Tag", "label", "second");
    let keys = [second.key().expect("saved"), 9999, first.key().expect("saved")];

    let loaded = db.get_many(&tag_model, &keys).expect("get many");
    let labels: Vec<&Value> = loaded.iter().map(|t| t.get("label").expect("label")).collect();
    assert_eq!(labels, vec![&Value::from("second"), &Value::from("first")]);
    assert!(db.get_many(&tag_model, &[]).expect("no keys").is_empty());
}
