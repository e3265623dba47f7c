use std::io::{self, Write};

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::info;

use crate::assemble::{AssembleRequest, ExamAssembler};
use crate::cli::AssembleArgs;
use crate::commands::resolve_db_path;
use crate::model::ExamQuestionView;
use crate::store::Store;

#[derive(Debug, Serialize)]
struct AssembleResponse<'a> {
    user_id: &'a str,
    requested: usize,
    exclude_seen: bool,
    seed: Option<u64>,
    questions: &'a [ExamQuestionView],
}

/// A pool too small for `--count` surfaces as `PipelineError::InsufficientQuestions`,
/// which `main` maps to its own exit status.
pub fn run(args: AssembleArgs) -> Result<()> {
    let db_path = resolve_db_path(&args.cache_root, args.db_path.as_ref());
    let store = Store::open_read_only(&db_path)?;
    let assembler = ExamAssembler::new(&store);

    let request = AssembleRequest {
        user_id: args.user_id.clone(),
        count: args.count,
        topics: (!args.topics.is_empty()).then(|| args.topics.clone()),
        exclude_seen: args.exclude_seen,
    };
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let questions = assembler.assemble(&request, &mut rng)?;
    info!(user_id = %args.user_id, count = questions.len(), "exam ready");

    if args.json {
        let response = AssembleResponse {
            user_id: &args.user_id,
            requested: args.count,
            exclude_seen: args.exclude_seen,
            seed: args.seed,
            questions: &questions,
        };
        let mut output = io::BufWriter::new(io::stdout().lock());
        serde_json::to_writer_pretty(&mut output, &response)
            .context("failed to serialize exam json output")?;
        writeln!(output)?;
        output.flush()?;
        return Ok(());
    }

    write_text_exam(&questions)
}

fn write_text_exam(questions: &[ExamQuestionView]) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());

    for (index, question) in questions.iter().enumerate() {
        writeln!(
            output,
            "{}. [{} / {}] {}",
            index + 1,
            question.topic,
            question.difficulty.as_str(),
            question.question_id
        )?;
        if !question.scenario.is_empty() {
            writeln!(output, "   {}", question.scenario)?;
        }
        for sub_scenario in &question.sub_scenarios {
            writeln!(output, "   {} {}", sub_scenario.label, sub_scenario.text)?;
        }
        writeln!(output, "   {}", question.question_stem)?;
        for (label, text) in &question.options {
            writeln!(output, "   {label}. {text}")?;
        }
        writeln!(output)?;
    }

    output.flush()?;
    Ok(())
}
