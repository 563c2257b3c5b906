//! `tokenwise profile`: show the resolved profile for an agent type.

use tokenwise_config::AppConfig;

pub async fn run(agent: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let profile = config.profile(agent);

    if config.agents.contains_key(agent) {
        println!("# Profile for agent type \"{agent}\"");
    } else {
        println!("# No profile for \"{agent}\", showing [default_profile]");
    }
    println!(
        "# Prompt budget: {} tokens",
        profile.prompt.available_budget()
    );
    println!();
    print!("{}", toml::to_string_pretty(profile)?);

    Ok(())
}
