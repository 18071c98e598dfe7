//! Batch Runner
//!
//! Reads questions from JSONL, answers each through the graph and writes one
//! output record per input line, in input order. Lines that cannot be parsed
//! still produce a record, so a bad line never aborts the batch.

use std::path::Path;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::models::batch::{BatchQuestion, OutputRecord, QuestionId};
use crate::services::graph::{GraphExecutor, RunStatus};
use crate::services::output::format_record;
use crate::utils::error::{AppError, AppResult};

/// One non-blank input line: a question, or the record explaining why it
/// was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchLine {
    Question(BatchQuestion),
    Rejected(OutputRecord),
}

/// Parse JSONL content. Blank lines are skipped; line numbers are 1-based.
pub fn parse_batch(content: &str) -> Vec<BatchLine> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| parse_line(i + 1, line))
        .collect()
}

fn parse_line(line_no: usize, line: &str) -> BatchLine {
    match serde_json::from_str::<BatchQuestion>(line) {
        Ok(q) if q.question.trim().is_empty() => {
            BatchLine::Rejected(OutputRecord::rejected(q.id, "question is empty"))
        }
        Ok(q) => BatchLine::Question(q),
        Err(e) => {
            // keep the id if the line is at least a JSON object with one
            let id = serde_json::from_str::<serde_json::Value>(line)
                .ok()
                .and_then(|v| v.get("id").and_then(QuestionId::from_value))
                .unwrap_or_else(|| QuestionId::Text(format!("line-{}", line_no)));
            tracing::warn!(line = line_no, id = %id, error = %e, "rejected batch line");
            BatchLine::Rejected(OutputRecord::rejected(
                id,
                format!("invalid input line {}: {}", line_no, e),
            ))
        }
    }
}

/// Counts for the end-of-batch log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub answered: usize,
    pub failed: usize,
}

pub struct BatchRunner {
    executor: GraphExecutor,
    concurrency: usize,
    cancel: CancellationToken,
}

impl BatchRunner {
    pub fn new(executor: GraphExecutor, concurrency: usize) -> Self {
        Self {
            executor,
            concurrency: concurrency.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Token that cancels every run still in flight.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Answer every line, preserving input order.
    pub async fn run(&self, lines: Vec<BatchLine>) -> Vec<OutputRecord> {
        futures_util::stream::iter(lines)
            .map(|line| async move {
                match line {
                    BatchLine::Rejected(record) => record,
                    BatchLine::Question(q) => {
                        let state = self
                            .executor
                            .run(q.id, q.question, q.format_hint, &self.cancel)
                            .await;
                        if state.status() == RunStatus::Failed {
                            tracing::info!(id = %state.id, reason = %state.explanation, "question failed");
                        }
                        format_record(&state)
                    }
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }

    /// Read `input`, answer it and write the records to `output`.
    pub async fn run_file(&self, input: &Path, output: &Path) -> AppResult<BatchSummary> {
        if !input.exists() {
            return Err(AppError::not_found(format!("batch file {}", input.display())));
        }
        let content = tokio::fs::read_to_string(input).await?;
        let lines = parse_batch(&content);
        tracing::info!(
            input = %input.display(),
            questions = lines.len(),
            concurrency = self.concurrency,
            "starting batch"
        );

        let records = self.run(lines).await;
        write_records(output, &records).await?;

        let failed = records.iter().filter(|r| r.final_answer.is_null()).count();
        let summary = BatchSummary {
            total: records.len(),
            answered: records.len() - failed,
            failed,
        };
        tracing::info!(
            output = %output.display(),
            total = summary.total,
            answered = summary.answered,
            failed = summary.failed,
            "batch finished"
        );
        Ok(summary)
    }
}

/// Write records as JSONL, creating the parent directory if needed.
pub async fn write_records(path: &Path, records: &[OutputRecord]) -> AppResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut body = String::new();
    for record in records {
        body.push_str(&serde_json::to_string(record)?);
        body.push('\n');
    }
    tokio::fs::write(path, body).await?;
    Ok(())
}
