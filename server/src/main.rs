//! voxbridge Server – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet die Bruecke.

use anyhow::Result;
use voxbridge_observability::logging_initialisieren;
use voxbridge_server::{config::BridgeConfig, Server};

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("VOXBRIDGE_CONFIG").unwrap_or_else(|_| "voxbridge.toml".into());

    // Konfiguration laden (Standardwerte falls Datei fehlt)
    let config = BridgeConfig::laden(&config_pfad)?;

    logging_initialisieren(&config.logging.level, &config.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        legs = config.legs.len(),
        "voxbridge wird initialisiert"
    );

    Server::neu(config).starten().await
}
