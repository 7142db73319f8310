//! `taskflow init`: write the default config and workflow files.

use std::path::Path;

use taskflow_core::workflow::write_defaults;
use taskflow_core::EngineConfig;

pub fn run(config_path: &str) -> Result<(), String> {
    let path = Path::new(config_path);
    let existed = path.exists();
    let config = EngineConfig::load_or_create(path).map_err(|e| e.to_string())?;
    if existed {
        println!("Config already present: {}", path.display());
    } else {
        println!("Created config: {}", path.display());
    }

    let written = write_defaults(&config.task_configs_dir).map_err(|e| e.to_string())?;
    for file in &written {
        println!(
            "Created workflow: {}",
            config.task_configs_dir.join(file).display()
        );
    }
    if written.is_empty() {
        println!(
            "Workflows already present in {}",
            config.task_configs_dir.display()
        );
    }

    std::fs::create_dir_all(&config.workspace_dir)
        .map_err(|e| format!("Failed to create workspace dir: {}", e))?;
    println!();
    println!("Next: taskflow add --type search \"rust async runtimes\" && taskflow run");
    Ok(())
}
