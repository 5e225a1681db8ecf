use lexidb_text::KeywordIndex;

fn corpus() -> Vec<(usize, &'static str)> {
    vec![
        (0, "Guata: caminar, andar. Che aguata kokuépe."),
        (1, "Ñe'ẽ: palabra, idioma, voz."),
        (2, "Mba'e: cosa. Mba'épa nde réra?"),
        (3, "Jeguata: el viaje, la caminata larga."),
    ]
}

#[test]
fn finds_entries_by_term() {
    let index = KeywordIndex::build(corpus()).unwrap();
    assert_eq!(index.len(), 4);
    let hits = index.search("caminar", 5).unwrap();
    assert_eq!(hits.first().map(|h| h.0), Some(0));
    assert!(hits.iter().all(|h| h.1 > 0.0));
}

#[test]
fn diacritics_and_case_are_folded() {
    let index = KeywordIndex::build(corpus()).unwrap();
    let accented = index.search("IDIOMA ñe'ẽ", 3).unwrap();
    let plain = index.search("idioma ne'e", 3).unwrap();
    assert_eq!(accented.first().map(|h| h.0), Some(1));
    assert_eq!(plain.first().map(|h| h.0), Some(1));
}

#[test]
fn stop_words_and_bad_syntax_do_not_fail() {
    let index = KeywordIndex::build(corpus()).unwrap();
    assert!(index.search("la el de", 3).unwrap().is_empty());
    assert!(index.search("caminata AND (", 3).is_ok());
    assert!(index.search("   ", 3).unwrap().is_empty());
    assert!(index.search("guata", 0).unwrap().is_empty());
}

#[test]
fn empty_index_returns_nothing() {
    let index = KeywordIndex::build(Vec::<(usize, &str)>::new()).unwrap();
    assert!(index.is_empty());
    assert!(index.search("guata", 3).unwrap().is_empty());
}
