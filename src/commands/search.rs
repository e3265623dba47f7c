use std::io::{self, Write};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::cli::{SearchArgs, SearchScope};
use crate::commands::resolve_db_path;
use crate::retrieve::{snippet, Retriever, SearchResults};
use crate::semantic::{resolve_model_config, LocalHashEncoder};
use crate::store::Store;

#[derive(Debug, Serialize)]
struct SearchResponse<'a> {
    query: &'a str,
    limit: usize,
    min_similarity: f64,
    topic: Option<&'a str>,
    timeout_ms: u64,
    duration_ms: f64,
    #[serde(flatten)]
    results: SearchResults,
}

pub fn run(args: SearchArgs) -> Result<()> {
    let db_path = resolve_db_path(&args.cache_root, args.db_path.as_ref());
    let store = Store::open_read_only(&db_path)?;
    let encoder = LocalHashEncoder::new(resolve_model_config(&args.model_id));
    let retriever =
        Retriever::new(&store, &encoder).with_timeout(Duration::from_millis(args.timeout_ms));

    let started = Instant::now();
    let results = match args.scope {
        SearchScope::Legal => {
            retriever.search_legal(&args.query, args.limit, args.min_similarity)?
        }
        SearchScope::Questions => retriever.search_questions(
            &args.query,
            args.limit,
            args.min_similarity,
            args.topic.as_deref(),
        )?,
    };
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

    info!(
        scope = results.collection,
        match_kind = results.match_kind.as_str(),
        hits = results.hits.len(),
        degraded = results.degraded,
        duration_ms,
        "search completed"
    );

    if args.json {
        let topic = match args.scope {
            SearchScope::Questions => args.topic.as_deref(),
            SearchScope::Legal => None,
        };
        write_json_response(&SearchResponse {
            query: &args.query,
            limit: args.limit,
            min_similarity: args.min_similarity,
            topic,
            timeout_ms: args.timeout_ms,
            duration_ms,
            results,
        })
    } else {
        write_text_response(&args.query, &results)
    }
}

fn write_json_response(response: &SearchResponse<'_>) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, response)
        .context("failed to serialize search json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

fn write_text_response(query: &str, results: &SearchResults) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());

    writeln!(output, "Query: {query}")?;
    writeln!(
        output,
        "Search: collection={} match={} degraded={} scanned={}",
        results.collection,
        results.match_kind.as_str(),
        results.degraded,
        results.scanned
    )?;
    for note in &results.notes {
        writeln!(output, "Note: {note}")?;
    }
    writeln!(output, "Results: {}", results.hits.len())?;

    for hit in &results.hits {
        writeln!(
            output,
            "{}.\t{}\tscore={:.4}\t{}",
            hit.rank,
            hit.item_id,
            hit.similarity,
            hit_label(&hit.payload)
        )?;
        writeln!(output, "\t{}", snippet(&hit.payload, 160))?;
    }

    output.flush()?;
    Ok(())
}

/// Page and citations for legal chunks, topic and difficulty for questions.
fn hit_label(payload: &Value) -> String {
    if let Some(page) = payload.get("page").and_then(Value::as_u64) {
        let references = payload
            .get("legal_references")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<&str>>()
                    .join(", ")
            })
            .unwrap_or_default();
        return format!("page {page}\t{references}");
    }

    let field = |key: &str| payload.get(key).and_then(Value::as_str).unwrap_or("-");
    format!("{}\t{}", field("topic"), field("difficulty"))
}
