//! validation-responder: standalone owner-side responder
//!
//! Answers entity validation requests from an in-memory set of known entities.
//! Useful for local development and for exercising a requester end to end.
//!
//! ## Architecture
//! ```text
//! [requester] --(request queue)--> [validation-responder]
//!      ^                                    |
//!      +---------(response queue)-----------+
//! ```
//!
//! ## Configuration
//! - VALIDATION_CONFIG: Path to a YAML config file (optional)
//! - VALIDATION__BROKER__HOST etc.: Per-field overrides
//! - VALIDATION__RESPONDER__KNOWN_ENTITIES: Entities answered as existing
//! - VALIDATION_LOG: Log filter (default: info)

use std::sync::Arc;

use tracing::{info, warn};

use entity_validation::config::Config;
use entity_validation::services::start_responder;
use entity_validation::storage::InMemoryEntityStore;
use entity_validation::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None)?;
    let store = Arc::new(InMemoryEntityStore::with_entities(
        config.responder.known_entities.iter().copied(),
    ));

    let handle = start_responder(&config, store).await?;
    if handle.is_consuming() {
        info!(
            queue = %config.topology.request_queue,
            known_entities = config.responder.known_entities.len(),
            "validation-responder started"
        );
    } else {
        warn!("validation-responder started without a broker; no requests will be answered");
    }

    tokio::signal::ctrl_c().await?;
    info!("validation-responder shutting down");

    Ok(())
}
