use {
    anyhow::Result,
    clap::Subcommand,
    gatekeeper_config::{GatekeeperConfig, Severity, ValidationResult},
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the loaded configuration and report errors/warnings.
    Check,
    /// Print the effective configuration as TOML.
    Show,
}

pub fn handle_config(action: ConfigAction, config: &GatekeeperConfig) -> Result<()> {
    match action {
        ConfigAction::Check => {
            let result = gatekeeper_config::validate(config);
            eprint!("{}", render(&result));
            if result.has_errors() {
                std::process::exit(1);
            }
            Ok(())
        },
        ConfigAction::Show => {
            println!("{}", toml::to_string_pretty(config)?);
            Ok(())
        },
    }
}

const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn render(result: &ValidationResult) -> String {
    let mut out = String::new();
    for d in &result.diagnostics {
        let color = match d.severity {
            Severity::Error => RED,
            Severity::Warning => YELLOW,
        };
        out.push_str(&format!(
            "  {BOLD}{color}{}{RESET} {}: {}\n",
            d.severity, d.path, d.message
        ));
    }

    let count = |s: Severity| result.diagnostics.iter().filter(|d| d.severity == s).count();
    let (errors, warnings) = (count(Severity::Error), count(Severity::Warning));
    if errors == 0 && warnings == 0 {
        out.push_str("No issues found.\n");
    } else {
        out.push_str(&format!("\n{errors} error(s), {warnings} warning(s)\n"));
    }
    out
}
