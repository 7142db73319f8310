//! `taskflow run`: process the queue until it drains (or until Ctrl-C).

use console::style;
use taskflow_core::state::AppState;
use taskflow_core::workflow::RunMode;

pub async fn run(state: &AppState, watch: bool) -> Result<(), String> {
    let engine = state.engine();
    let token = engine.cancellation_token();

    // Ctrl-C asks for a cooperative stop; the step in flight still finishes.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nStopping after the current step...");
            token.cancel();
        }
    });

    let counts = state.task_store.counts().await.map_err(|e| e.to_string())?;
    let mode = if watch { RunMode::Watch } else { RunMode::Drain };
    println!(
        "Processing {} pending and {} interrupted task(s){}",
        counts.pending,
        counts.running,
        if watch { ", watching for more (Ctrl-C to stop)" } else { "" }
    );

    let summary = engine.run(mode).await.map_err(|e| e.to_string())?;

    println!();
    println!(
        "{} completed, {} failed, {} abandoned, {} interrupted",
        style(summary.completed).green(),
        style(summary.failed).red(),
        style(summary.abandoned).yellow(),
        style(summary.interrupted).cyan()
    );
    if summary.interrupted > 0 {
        println!("Interrupted tasks resume on the next `taskflow run`.");
    }
    Ok(())
}
