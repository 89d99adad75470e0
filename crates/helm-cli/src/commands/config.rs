//! Configuration commands.

use std::path::Path;

use anyhow::{Context, Result};
use helm_config::HelmConfig;

/// Show the resolved configuration.
pub fn show(project: &str, format: &str) -> Result<()> {
    let project_path = Path::new(project);
    let config =
        HelmConfig::load_from_dir(project_path).context("Failed to load configuration")?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        "toml" => {
            println!("{}", config.to_toml_string()?);
        }
        _ => {
            let threshold = config.threshold().context("Invalid governance threshold")?;

            println!("Helm Configuration");
            println!("==================\n");

            println!("Project:");
            println!("  Name: {}", config.project.name);
            println!("  Directory: {}", project_path.display());
            println!();

            println!("Governance:");
            println!(
                "  Voting period: {}",
                humanize_secs(config.governance.voting_period_secs)
            );
            println!("  Threshold: {threshold}");
            println!("  Quorum: {}", config.governance.quorum);
            println!();

            println!("Emergency:");
            println!("  Duration: {}", humanize_secs(config.emergency.duration_secs));
            println!();

            println!("Rollback:");
            println!("  Window: {} upgrades", config.rollback.window);
        }
    }

    Ok(())
}

fn humanize_secs(secs: u64) -> String {
    const DAY: u64 = 24 * 60 * 60;
    const HOUR: u64 = 60 * 60;

    if secs % DAY == 0 {
        format!("{}d", secs / DAY)
    } else if secs % HOUR == 0 {
        format!("{}h", secs / HOUR)
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::humanize_secs;

    #[test]
    fn durations_use_the_largest_whole_unit() {
        assert_eq!(humanize_secs(3 * 24 * 60 * 60), "3d");
        assert_eq!(humanize_secs(2 * 60 * 60), "2h");
        assert_eq!(humanize_secs(90), "90s");
    }
}
