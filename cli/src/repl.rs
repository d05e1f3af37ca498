//! Line-oriented chat loop.
//!
//! Ctrl-C while a reply streams abandons that turn (nothing is committed);
//! Ctrl-C at the prompt exits.

use std::io::Write;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use threadline_engine::{SessionId, SessionOrchestrator, Temperature};

pub struct Options {
    pub session: SessionId,
    pub base_prompt: Option<String>,
    pub temperature: Temperature,
    pub stream: bool,
}

enum Input {
    Line(String),
    Eof,
    Interrupted,
}

async fn read_line(lines: &mut Lines<BufReader<Stdin>>, prompt: &str) -> Result<Input> {
    print!("{prompt}");
    std::io::stdout().flush()?;

    tokio::select! {
        line = lines.next_line() => Ok(match line? {
            Some(line) => Input::Line(line),
            None => Input::Eof,
        }),
        _ = tokio::signal::ctrl_c() => Ok(Input::Interrupted),
    }
}

pub async fn run(orchestrator: &SessionOrchestrator, options: Options) -> Result<()> {
    let session = &options.session;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Session: {session}");

    let base_prompt = match options.base_prompt {
        Some(base) => base,
        None => match read_line(&mut lines, "Base prompt (empty keeps the current one): ").await?
        {
            Input::Line(line) => line,
            Input::Eof | Input::Interrupted => return Ok(()),
        },
    };
    if orchestrator.set_base_prompt(session, base_prompt.trim())? {
        tracing::info!(session = %session, "Base prompt set from CLI");
    }

    loop {
        let message = match read_line(&mut lines, "\nUser:\n").await? {
            Input::Line(line) => line,
            Input::Eof => break,
            Input::Interrupted => {
                println!("\nExiting...");
                break;
            }
        };
        let message = message.trim();
        if message.is_empty() {
            continue;
        }
        if message == "/reset" {
            orchestrator.reset(session)?;
            println!("Session cleared.");
            continue;
        }

        println!("Reply:");
        if options.stream {
            stream_turn(orchestrator, session, message, options.temperature).await?;
        } else {
            match orchestrator.ask(session, message, options.temperature).await {
                Ok(completion) => println!("{}", completion.first_text().unwrap_or_default()),
                Err(err) => eprintln!("Error: {err}"),
            }
        }
    }

    Ok(())
}

async fn stream_turn(
    orchestrator: &SessionOrchestrator,
    session: &SessionId,
    message: &str,
    temperature: Temperature,
) -> Result<()> {
    let mut turn = match orchestrator.ask_stream(session, message, temperature).await {
        Ok(turn) => turn,
        Err(err) => {
            eprintln!("Error: {err}");
            return Ok(());
        }
    };

    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            item = turn.next() => match item {
                Some(Ok(fragment)) => {
                    stdout.write_all(fragment.as_bytes())?;
                    stdout.flush()?;
                }
                Some(Err(err)) => {
                    eprintln!("\nError: {err}");
                    break;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n[interrupted; reply discarded]");
                break;
            }
        }
    }
    println!();
    Ok(())
}
