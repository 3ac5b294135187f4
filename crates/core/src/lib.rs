//! voxbridge-core – Gemeinsame Typen, Medienformate und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen voxbridge-Crates gemeinsam genutzt werden: die statische
//! Medienformat-Registry, Call-Leg-IDs, Ereignisse und Fehlertypen.

pub mod error;
pub mod event;
pub mod format;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{BridgeError, FormatError, Result};
pub use event::{EventSink, MediaEvent};
pub use format::{Encoding, MediaFormat};
pub use types::{LegId, PACKET_PERIOD};
