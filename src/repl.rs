//! Interactive prompt loop.
//!
//! Input lines arrive over a channel from a dedicated stdin thread so the
//! loop can race them against Ctrl-C. A failed run is reported and the loop
//! moves on to the next prompt.

use std::future::Future;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::history::{self, RunRecord};
use crate::pipeline::{Pipeline, Progress};
use crate::script::Prompt;

const PROMPT_TEXT: &str = "Enter your prompt (or 'q' to quit): ";

#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Quit,
    Empty,
    Prompt(Prompt),
}

impl Input {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case("q") {
            return Self::Quit;
        }
        match Prompt::new(trimmed) {
            Some(prompt) => Self::Prompt(prompt),
            None => Self::Empty,
        }
    }
}

/// Read stdin lines on a plain thread. The channel closes at EOF.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel::<String>(1);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read input: {e}");
                    break;
                }
            }
        }
    });
    rx
}

/// Run the loop until quit, EOF or `shutdown` resolves.
pub async fn run(
    pipeline: &Pipeline,
    mut input: mpsc::Receiver<String>,
    history_dir: Option<PathBuf>,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);

    loop {
        print!("\n{PROMPT_TEXT}");
        let _ = std::io::stdout().flush();

        let line = tokio::select! {
            line = input.recv() => line,
            _ = &mut shutdown => {
                println!("\nExiting...");
                break;
            }
        };

        let Some(line) = line else {
            info!("Input closed");
            break;
        };

        let prompt = match Input::parse(&line) {
            Input::Quit => break,
            Input::Empty => continue,
            Input::Prompt(prompt) => prompt,
        };

        let result = tokio::select! {
            result = pipeline.run(&prompt, report_progress) => result,
            _ = &mut shutdown => {
                println!("\nExiting...");
                break;
            }
        };

        match result {
            Ok(outcome) => {
                if let Some(dir) = &history_dir {
                    history::save_record(dir, &RunRecord::new(&prompt, &outcome));
                }
            }
            Err(e) => println!("\nAn error occurred: {e}"),
        }
    }
}

fn report_progress(progress: Progress<'_>) {
    match progress {
        Progress::GeneratingScript => println!("\nGenerating script..."),
        Progress::ScriptReady(script) => {
            println!("\n--- Generated Script ---\n{script}\n------------------------")
        }
        Progress::SynthesizingAudio => println!("\nGenerating audio..."),
        Progress::AudioSaved(path) => println!("Audio saved to: {}", path.display()),
        Progress::Playing => println!("Playing audio..."),
    }
}
