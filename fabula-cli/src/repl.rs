//! Interactive story REPL.
//!
//! Each line is submitted as a user turn; `/voice <file.wav>` submits a
//! recording instead. Story events are printed by a separate task as they
//! arrive, so the narrator's text shows up before its narration and
//! illustration are ready.

use fabula_core::{
    ConversationTurn, FabulaConfig, FabulaError, IgnoreReason, ResumeOutcome, SaveStatus, Speaker,
    StoryEvent, StoryTeller, SubmitOutcome,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::assets::AssetWriter;

pub async fn run_interactive(
    config: FabulaConfig,
    out_dir: PathBuf,
    resume: bool,
) -> anyhow::Result<()> {
    println!("\x1b[1;35m");
    println!("  ~ Fabula ~");
    println!("\x1b[0m");
    println!(
        "  Language: {} | Model: {} | Assets: {}",
        config.language,
        config.gemini.chat_model,
        out_dir.display()
    );
    println!("  Type /help for commands, /quit to exit\n");

    let (tx, rx) = mpsc::channel(64);
    let teller = Arc::new(StoryTeller::with_gemini(&config)?.with_events(tx));
    let printer = tokio::spawn(print_events(rx, AssetWriter::new(out_dir)));

    if resume {
        match teller.resume_session().await? {
            ResumeOutcome::Resumed { turns } => println!("  Resumed a story of {} turns.", turns),
            ResumeOutcome::StartedFresh => println!("  No saved story found, starting a new one."),
        }
    } else {
        if teller.has_saved_story() {
            println!("  A saved story exists; start with --resume to continue it.");
        }
        teller.start_session().await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();

        if let Some(path) = input
            .strip_prefix("/voice")
            .filter(|rest| rest.is_empty() || rest.starts_with(' '))
        {
            match submit_recording(&teller, path.trim()).await? {
                Some(SubmitOutcome::Narrated(_) | SubmitOutcome::Failed(_)) => {}
                Some(SubmitOutcome::Ignored(_)) | None => prompt(),
            }
            continue;
        }

        if input.starts_with('/') {
            match input {
                "/quit" | "/exit" | "/q" => break,
                "/save" => match teller.save_story().await {
                    Ok(true) => println!("  Story saved."),
                    Ok(false) => println!("  Nothing to save yet."),
                    Err(e) => eprintln!("  Could not save the story: {}", e),
                },
                "/status" => print_status(&teller).await,
                "/help" => print_help(),
                other => println!("  Unknown command: {} (try /help)", other),
            }
            prompt();
            continue;
        }

        match teller.submit_user_text(input).await? {
            SubmitOutcome::Ignored(_) => prompt(),
            SubmitOutcome::Narrated(_) | SubmitOutcome::Failed(_) => {}
        }
    }

    // Dropping the teller closes the event channel and ends the printer.
    drop(teller);
    printer.await?;
    println!();
    Ok(())
}

/// Read a WAV recording and submit it as spoken input. Returns `None` when
/// nothing reached the story.
async fn submit_recording(
    teller: &StoryTeller,
    path: &str,
) -> anyhow::Result<Option<SubmitOutcome>> {
    if path.is_empty() {
        println!("  Usage: /voice <recording.wav>");
        return Ok(None);
    }
    let wav = match tokio::fs::read(path).await {
        Ok(wav) => wav,
        Err(e) => {
            eprintln!("  Could not read {}: {}", path, e);
            return Ok(None);
        }
    };

    match teller.submit_user_speech(&wav).await {
        Ok(SubmitOutcome::Ignored(IgnoreReason::Empty)) => {
            println!("  {}", teller.language().texts().model_response_error);
            Ok(None)
        }
        Ok(outcome) => Ok(Some(outcome)),
        Err(FabulaError::Voice(e)) => {
            tracing::warn!(path, error = %e, "Voice input failed");
            println!("  {}", teller.language().texts().model_response_error);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

async fn print_events(mut rx: mpsc::Receiver<StoryEvent>, mut writer: AssetWriter) {
    while let Some(event) = rx.recv().await {
        match event {
            StoryEvent::TurnAppended(turn) => {
                println!("{}", format_turn(&turn));
                report_assets(&mut writer, &turn);
            }
            StoryEvent::TurnUpdated(turn) => report_assets(&mut writer, &turn),
            StoryEvent::BusyChanged(false) => prompt(),
            StoryEvent::BusyChanged(true) => {}
        }
    }
}

fn report_assets(writer: &mut AssetWriter, turn: &ConversationTurn) {
    for result in writer.write_new(turn) {
        match result {
            Ok(asset) => println!("    \x1b[2m{}\x1b[0m", asset),
            Err(e) => tracing::error!(turn_id = %turn.id, error = %e, "Failed to write turn asset"),
        }
    }
}

/// One transcript line for a turn.
pub fn format_turn(turn: &ConversationTurn) -> String {
    match (turn.speaker, turn.failed) {
        (Speaker::User, _) => format!("\x1b[2myou: {}\x1b[0m", turn.text),
        (Speaker::Narrator, true) => format!("\x1b[1;31mnarrator:\x1b[0m {}", turn.text),
        (Speaker::Narrator, false) => format!("\x1b[1;35mnarrator:\x1b[0m {}", turn.text),
    }
}

async fn print_status(teller: &StoryTeller) {
    let turns = teller.turns().await;
    let save = match teller.save_status() {
        SaveStatus::Idle => "idle",
        SaveStatus::Saving => "saving",
        SaveStatus::Saved => "saved",
    };
    println!(
        "  Turns: {} | Save: {} | Saved story on disk: {} | Busy: {}",
        turns.len(),
        save,
        if teller.has_saved_story() { "yes" } else { "no" },
        teller.is_busy()
    );
    if let Some(id) = teller.last_narrator_turn_id().await {
        println!("  Latest narration: {}", id);
    }
}

fn print_help() {
    println!("  Type a line to continue the story.");
    println!("  /voice <file.wav>  Continue the story with a recording");
    println!("  /save              Save the story");
    println!("  /status            Show session status");
    println!("  /quit              Exit");
}

fn prompt() {
    print!("\x1b[1;34m> \x1b[0m");
    let _ = io::stdout().flush();
}
