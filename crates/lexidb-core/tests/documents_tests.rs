use std::fs;
use std::path::Path;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Object, Stream};

use lexidb_core::documents::{load_document, load_documents, split_pages};

#[test]
fn form_feeds_split_pages() {
    assert_eq!(split_pages("uno\u{c}dos\u{c}tres"), vec!["uno", "dos", "tres"]);
    assert_eq!(split_pages("uno\u{c}dos\u{c}"), vec!["uno", "dos"]);
    assert_eq!(split_pages(""), vec![""]);
}

#[test]
fn loads_text_files_sorted_by_path() {
    let tmp = tempfile::tempdir().expect("tempdir");
    fs::write(tmp.path().join("b_gramatica.txt"), "Ñe'ẽ").expect("write");
    fs::write(tmp.path().join("a_diccionario.TXT"), "Mba'e\u{c}Tembi'u").expect("write");
    fs::write(tmp.path().join("notas.md"), "ignored").expect("write");
    fs::create_dir(tmp.path().join("sub")).expect("mkdir");
    fs::write(tmp.path().join("sub").join("c.txt"), "anidado").expect("write");

    let docs = load_documents(tmp.path()).expect("load");
    let sources: Vec<_> = docs.iter().map(|d| d.source.as_str()).collect();
    assert_eq!(sources, vec!["a_diccionario.TXT", "b_gramatica.txt", "c.txt"]);
    assert_eq!(docs[0].pages, vec!["Mba'e", "Tembi'u"]);
}

#[test]
fn order_follows_the_full_path() {
    let tmp = tempfile::tempdir().expect("tempdir");
    fs::write(tmp.path().join("b.txt"), "che").expect("write");
    fs::create_dir_all(tmp.path().join("sub")).expect("mkdir");
    fs::write(tmp.path().join("sub").join("a.txt"), "ñande").expect("write");
    let docs = load_documents(tmp.path()).expect("load");
    let sources: Vec<_> = docs.iter().map(|d| d.source.as_str()).collect();
    assert_eq!(sources, vec!["b.txt", "a.txt"]);
}

#[test]
fn empty_directory_yields_no_documents() {
    let tmp = tempfile::tempdir().expect("tempdir");
    assert!(load_documents(tmp.path()).expect("load").is_empty());
}

#[test]
fn unreadable_pdf_is_skipped() {
    let tmp = tempfile::tempdir().expect("tempdir");
    fs::write(tmp.path().join("roto.pdf"), b"not a pdf").expect("write");
    fs::write(tmp.path().join("ok.txt"), "hola").expect("write");
    let docs = load_documents(tmp.path()).expect("load");
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].source, "ok.txt");
}

#[test]
fn invalid_utf8_is_read_lossily() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let path = tmp.path().join("latin1.txt");
    fs::write(&path, [b'a', 0xff, b'b']).expect("write");
    let doc = load_document(&path).expect("load");
    assert_eq!(doc.pages, vec!["a\u{fffd}b"]);
}

/// Write a PDF with one line of Courier text per page.
fn write_pdf(path: &Path, pages: &[&str]) {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().expect("encode content")));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        kids.push(page_id.into());
    }
    let count = i64::try_from(kids.len()).expect("page count");
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).expect("save pdf");
}

#[test]
fn pdf_pages_are_kept_apart() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let path = tmp.path().join("gramatica.pdf");
    write_pdf(&path, &["Primera leccion: guata", "Segunda leccion: pira", "Tercera leccion: jagua"]);

    let doc = load_document(&path).expect("load");
    assert_eq!(doc.source, "gramatica.pdf");
    assert_eq!(doc.pages.len(), 3);
    for (page, word) in doc.pages.iter().zip(["guata", "pira", "jagua"]) {
        assert!(page.contains(word), "{word} missing from page {page:?}");
    }
    assert!(!doc.pages[0].contains("pira"));
}
