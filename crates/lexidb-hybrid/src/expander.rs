use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use lexidb_core::error::{Error, Result};
use lexidb_core::traits::Generator;
use lexidb_core::types::ChatMessage;

use crate::external::{call_with_timeout, Service};

fn instructions(n: usize) -> String {
    format!(
        "Eres un experto en lingüística guaraní. Reformula la consulta del usuario para buscar en un diccionario \
         y una gramática del guaraní. Ten en cuenta variantes ortográficas (y/j/h, tildes nasales), sinónimos en \
         español o guaraní y preguntas relacionadas de gramática o vocabulario. Escribe exactamente {n} versiones \
         alternativas, una por línea, sin numeración ni viñetas."
    )
}

/// Strip list decoration a model may add despite the instructions (`1.`, `2)`, `-`, `*`, `•`).
fn strip_marker(line: &str) -> &str {
    let line = line.trim();
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    let line = match line[digits..].strip_prefix(['.', ')', ':']) {
        Some(rest) if digits > 0 => rest,
        _ => line,
    };
    line.trim_start_matches(['-', '*', '•']).trim()
}

/// First `n` non-empty variant lines of a generator reply.
pub fn parse_variants(reply: &str, n: usize) -> Vec<String> {
    reply.lines().map(strip_marker).filter(|l| !l.is_empty()).take(n).map(str::to_string).collect()
}

/// Paraphrases a query through a text-generation collaborator.
///
/// The original query is never part of the output.
pub struct QueryExpander {
    generator: Arc<dyn Generator>,
    timeout: Duration,
}

impl QueryExpander {
    pub fn new(generator: Arc<dyn Generator>, timeout: Duration) -> Self { Self { generator, timeout } }

    /// Exactly `n` variants, or a `GenerationService` error.
    pub async fn expand(&self, query: &str, n: usize) -> Result<Vec<String>> {
        if n == 0 { return Ok(Vec::new()); }
        let system = instructions(n);
        let messages = [ChatMessage::user(query)];
        let reply = call_with_timeout(Service::Generation, self.timeout, self.generator.complete(&system, &messages)).await?;
        let variants = parse_variants(&reply, n);
        if variants.len() < n {
            return Err(Error::GenerationService(format!("expected {n} query variants, got {}", variants.len())));
        }
        debug!(?variants, "expanded query");
        Ok(variants)
    }
}
