//! `tokenwise pricing`: list model prices.

use tokenwise_config::AppConfig;
use tokenwise_telemetry::PricingTable;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let table = PricingTable::with_overrides(&config.telemetry.custom_pricing);
    let models = table.models();

    println!("Model pricing (USD per 1M tokens)");
    println!("{:<40} {:>10} {:>10}", "Model", "Input", "Output");
    for (name, p) in &models {
        let marker = if config.telemetry.custom_pricing.contains_key(name) {
            " *"
        } else {
            ""
        };
        println!(
            "{:<40} ${:>8.3} ${:>8.3}{}",
            name, p.input_per_m, p.output_per_m, marker
        );
    }
    println!();
    println!("  {} models", models.len());
    if !config.telemetry.custom_pricing.is_empty() {
        println!("  * overridden in [telemetry.custom_pricing]");
    }

    Ok(())
}
