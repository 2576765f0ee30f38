//! CLI command implementations.

pub mod exec;

use anyhow::Result;

pub fn validate(path: &str) -> Result<()> {
    match cirun_config::load_runner_config(path) {
        Ok(file) => {
            println!("Configuration is valid");
            for runner in &file.runners {
                let executor = if runner.executor.is_empty() {
                    "shell"
                } else {
                    runner.executor.as_str()
                };
                println!("  runner '{}' ({})", runner.name, executor);
            }
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
