use tantivy::schema::{IndexRecordOption, Schema, TextFieldIndexing, TextOptions, INDEXED, STORED};
use tantivy::tokenizer::{AsciiFoldingFilter, LowerCaser, RemoveLongFilter, SimpleTokenizer, StopWordFilter, TextAnalyzer};
use tantivy::Index;

pub const ANALYZER_NAME: &str = "lexidb_folded";

// Already lower-cased and ASCII-folded: the filter runs after folding.
const STOP_WORDS: &[&str] = &[
    "a", "al", "como", "con", "de", "del", "e", "el", "en", "es", "esta", "este", "la", "las", "le", "les", "lo", "los", "mas",
    "o", "para", "pero", "por", "que", "se", "sin", "su", "sus", "u", "un", "una", "uno", "y",
];

pub fn build_schema() -> Schema {
    let mut builder = Schema::builder();
    builder.add_u64_field("id", INDEXED | STORED);
    let indexing = TextFieldIndexing::default().set_tokenizer(ANALYZER_NAME).set_index_option(IndexRecordOption::WithFreqsAndPositions);
    builder.add_text_field("text", TextOptions::default().set_indexing_options(indexing));
    builder.build()
}

/// Lower-case and fold diacritics so `ñe'ẽ`, `ñe'e` and `Ñe'ẽ` share terms.
pub fn register_analyzer(index: &Index) {
    let analyzer = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(AsciiFoldingFilter)
        .filter(StopWordFilter::remove(STOP_WORDS.iter().map(|s| (*s).to_string())))
        .build();
    index.tokenizers().register(ANALYZER_NAME, analyzer);
}
