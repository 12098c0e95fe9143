//! CLI front ends for retrieval: `journal search`, `journal ask`, and the
//! interactive `journal chat`.

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use journal_harness_core::models::{RankedChunk, DATE_FORMAT};

use crate::chat::{Assistant, ChatSession};
use crate::query::QueryEngine;

const SNIPPET_CHARS: usize = 160;

fn snippet(text: &str) -> String {
    let mut s: String = text.chars().take(SNIPPET_CHARS).collect();
    if text.chars().count() > SNIPPET_CHARS {
        s.push('…');
    }
    s
}

fn print_results(results: &[RankedChunk]) {
    for r in results {
        println!(
            "{}. [{:.4}] {} {} ({})",
            r.rank,
            r.score,
            r.record.date.format(DATE_FORMAT),
            r.record.chunk_id,
            r.record.chunk_type
        );
        println!("    {}", snippet(&r.record.text));
    }
}

/// Print the top `k` chunks for `query`.
pub async fn run_search(engine: &QueryEngine, query: &str, k: usize) -> Result<()> {
    let results = engine.search(query, k).await?;
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    print_results(&results);
    Ok(())
}

/// Answer one question and list the sources.
pub async fn run_ask(assistant: &Assistant, question: &str) -> Result<()> {
    let answer = assistant.answer(question, &[]).await?;
    println!("{}", answer.answer.trim());
    if !answer.sources.is_empty() {
        println!();
        println!("Sources:");
        print_results(&answer.sources);
    }
    Ok(())
}

/// Interactive conversation on stdin. `exit`, `quit`, `salir`, or end of
/// input stops it.
pub async fn run_chat(assistant: Arc<Assistant>) -> Result<()> {
    chat_loop(assistant, BufReader::new(tokio::io::stdin())).await
}

async fn chat_loop<R>(assistant: Arc<Assistant>, input: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut session = ChatSession::new(assistant);
    let mut lines = input.lines();

    println!("Ask about your journal. Type 'exit' to quit.");
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question.to_lowercase().as_str(), "exit" | "quit" | "salir") {
            break;
        }

        match session.ask(question).await {
            Ok(answer) => {
                println!();
                println!("{}", answer.answer.trim());
                println!();
            }
            Err(e) => eprintln!("error: {:#}", e),
        }
    }
    Ok(())
}
