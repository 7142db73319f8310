//! `taskflow workflows`: inspect and validate workflow definitions.

use console::style;
use taskflow_core::state::AppState;
use taskflow_core::workflow::WorkflowDefinition;

use super::truncate;

pub fn list(state: &AppState) -> Result<(), String> {
    println!(
        "{}",
        style(format!("{:<12}  {:>5}  {:<40}  {}", "TYPE", "STEPS", "DESCRIPTION", "READY"))
            .bold()
    );
    for def in state.definitions.definitions() {
        let ready = match state.capabilities.check_definition(def) {
            Ok(()) => style("yes".to_string()).green(),
            Err(e) => style(e.to_string()).red(),
        };
        println!(
            "{:<12}  {:>5}  {:<40}  {}",
            def.task_type,
            def.steps.len(),
            truncate(def.description.as_deref().unwrap_or(""), 40),
            ready
        );
    }
    for (task_type, reason) in state.definitions.rejected() {
        println!(
            "{:<12}  {:>5}  {:<40}  {}",
            task_type,
            "-",
            "",
            style(format!("rejected: {}", reason)).red()
        );
    }
    println!();
    println!("Capabilities: {}", state.capabilities.names().join(", "));
    Ok(())
}

pub fn validate(state: &AppState, file: &str) -> Result<(), String> {
    let def = WorkflowDefinition::from_file(std::path::Path::new(file)).map_err(|e| e.to_string())?;
    state
        .capabilities
        .check_definition(&def)
        .map_err(|e| e.to_string())?;

    println!(
        "{} {} is valid: type '{}', {} step(s)",
        style("✓").green(),
        file,
        def.task_type,
        def.steps.len()
    );
    for (i, step) in def.steps.iter().enumerate() {
        println!(
            "  {}. {} ({}{})",
            i + 1,
            step.name,
            step.kind_label(),
            if step.optional { ", optional" } else { "" }
        );
    }
    Ok(())
}
