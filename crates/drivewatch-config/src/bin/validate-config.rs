//! Config validation CLI tool
//!
//! Validates a drivewatchd configuration file and reports any errors.

use drivewatch_config::ConfigError;
use drivewatch_util::default_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a drivewatchd configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match drivewatch_config::load_config(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", drivewatch_config::CURRENT_CONFIG_VERSION);
            println!(
                "  Hardware id: {}",
                config.agent.hardware_id.as_deref().unwrap_or("(generated)")
            );
            println!(
                "  Vehicle plate: {}",
                config.agent.vehicle_plate.as_deref().unwrap_or("(none)")
            );
            println!("  Cloud: {}", config.cloud.base_url);
            println!("  Data dir: {}", config.agent.data_dir.display());
            println!(
                "  Max driving: {}h",
                config.session.max_driving_hours()
            );
            println!();
            println!("Intervals:");
            for subsystem in drivewatch_util::Subsystem::ALL {
                println!(
                    "  - {}: {}s",
                    subsystem,
                    config.interval(subsystem).as_secs()
                );
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        drivewatch_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
