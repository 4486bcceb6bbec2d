use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use common::{DomainError, TapRequest, TapType};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::domain::IngestionHandle;

/// Configuration for the synthetic tap source
#[derive(Debug, Clone)]
pub struct TapGeneratorConfig {
    /// Interval between generated taps
    pub interval: Duration,
    pub stations: Vec<String>,
    /// Number of distinct cards to cycle through
    pub cards: usize,
}

impl Default for TapGeneratorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            stations: vec![
                "central".to_string(),
                "harbour".to_string(),
                "airport".to_string(),
            ],
            cards: 50,
        }
    }
}

/// Feed synthetic taps into the pipeline until cancelled
///
/// Cards alternate between entry and exit so the stream looks like real journeys.
pub async fn run_tap_generator(
    ctx: CancellationToken,
    config: TapGeneratorConfig,
    handle: IngestionHandle,
) -> Result<()> {
    info!(interval = ?config.interval, "tap generator started");
    let cards = config.cards.max(1);
    let mut sequence: u64 = 0;

    loop {
        tokio::select! {
            _ = ctx.cancelled() => {
                info!("received shutdown signal, stopping tap generator");
                break;
            }
            _ = tokio::time::sleep(config.interval) => {
                let request = synthetic_tap(sequence, cards, &config.stations);
                sequence += 1;

                match handle.submit(request, &ctx).await {
                    Ok(message_id) => debug!(%message_id, "generated tap"),
                    Err(DomainError::ShuttingDown | DomainError::Cancelled) => break,
                    Err(e) => error!(error = %e, "failed to submit generated tap"),
                }
            }
        }
    }

    Ok(())
}

fn synthetic_tap(sequence: u64, cards: usize, stations: &[String]) -> TapRequest {
    let card = sequence as usize % cards;
    let lap = sequence / cards as u64;
    let station = if stations.is_empty() {
        "unknown".to_string()
    } else {
        stations[(sequence as usize / 2 + card) % stations.len()].clone()
    };

    TapRequest {
        card_id: format!("card-{:05}", card),
        station_id: station,
        tap_type: if lap % 2 == 0 {
            TapType::Entry
        } else {
            TapType::Exit
        },
        timestamp: Utc::now(),
        payload: sequence.to_le_bytes().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cards_alternate_entry_and_exit() {
        let stations = vec!["a".to_string()];
        let first = synthetic_tap(0, 2, &stations);
        let second = synthetic_tap(2, 2, &stations);
        assert_eq!(first.card_id, second.card_id);
        assert_eq!(first.tap_type, TapType::Entry);
        assert_eq!(second.tap_type, TapType::Exit);
    }

    #[test]
    fn test_generated_taps_pass_validation() {
        let tap = synthetic_tap(7, 3, &[]);
        assert_eq!(tap.station_id, "unknown");
        assert!(tap.into_event().is_ok());
    }
}
