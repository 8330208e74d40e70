use cs_domain::config::{Config, ConfigSeverity};

/// Print every validation issue. Returns `true` when there are no errors.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }
    println!("\n{error_count} error(s), {warning_count} warning(s) in {config_path}");

    error_count == 0
}

/// Dump the resolved config (with all defaults filled in) as TOML.
/// Plaintext keys are masked.
pub fn show(config: &Config) -> anyhow::Result<()> {
    let mut redacted = config.clone();
    for auth in [&mut redacted.llm.auth, &mut redacted.tools.web_search.auth] {
        if auth.key.is_some() {
            auth.key = Some("********".into());
        }
    }
    print!("{}", toml::to_string_pretty(&redacted)?);
    Ok(())
}
