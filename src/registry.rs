use futures_util::future::join_all;
use log::{debug, error};
use rust_decimal::Decimal;

use crate::api::*;
use crate::error::ProtocolError;
use crate::ledger::ContractGateway;

/// Result of one fetch pass: the records that loaded and the indices that
/// did not, with the reason.
#[derive(Debug, Default, Clone)]
pub struct FetchReport {
    pub events: Vec<PredictionEvent>,
    pub failures: Vec<(EventId, String)>,
}
impl FetchReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Client side list of prediction events, refreshed from the ledger.
pub struct EventRegistry {
    gateway: ContractGateway,
    events: Vec<PredictionEvent>,
    failed: Vec<EventId>,
}
impl EventRegistry {
    pub fn new(gateway: ContractGateway) -> Self {
        Self {
            gateway,
            events: vec![],
            failed: vec![],
        }
    }
    pub fn events(&self) -> &[PredictionEvent] {
        &self.events
    }
    pub fn failed(&self) -> &[EventId] {
        &self.failed
    }
    pub fn get(&self, event_id: EventId) -> Option<&PredictionEvent> {
        self.events.iter().find(|event| event.id == event_id)
    }

    async fn fetch(&self, ids: Vec<EventId>) -> FetchReport {
        let results = join_all(ids.iter().map(|id| self.gateway.read_event(*id))).await;
        let mut report = FetchReport::default();
        for (id, result) in ids.into_iter().zip(results) {
            match result {
                Ok(event) => report.events.push(event),
                Err(e) => {
                    debug!("Event {} failed to load: {:#}", id, e);
                    report.failures.push((id, format!("{:#}", e)));
                }
            }
        }
        report
    }

    /// Reads the event count and then every record concurrently. If the
    /// count can't be read the previous list stays in place.
    pub async fn fetch_all(&mut self) -> Result<FetchReport, ProtocolError> {
        let count = self.gateway.read_event_count().await.map_err(|e| {
            error!("Couldn't read event count: {:#}", e);
            ProtocolError::FetchFailed(format!("{:#}", e))
        })?;
        let report = self.fetch((0..count).collect()).await;
        self.events = report.events.clone();
        self.failed = report.failures.iter().map(|(id, _)| *id).collect();
        debug!("Loaded {} of {} events", self.events.len(), count);
        Ok(report)
    }
    /// Fetches the indices that failed last time and merges what loads.
    pub async fn retry_failed(&mut self) -> FetchReport {
        let report = self.fetch(self.failed.clone()).await;
        for event in &report.events {
            self.events.retain(|known| known.id != event.id);
            self.events.push(event.clone());
        }
        self.events.sort_by_key(|event| event.id);
        self.failed = report.failures.iter().map(|(id, _)| *id).collect();
        report
    }

    /// The user's placed bets over all known events, newest event first.
    pub async fn user_bets(&self, user: Address) -> anyhow::Result<Vec<Bet>> {
        let results = join_all(
            self.events
                .iter()
                .map(|event| self.gateway.read_bet(event.id, user)),
        )
        .await;
        let mut bets = vec![];
        for result in results {
            let bet = result?;
            if bet.placed {
                bets.push(bet);
            }
        }
        bets.sort_by(|a, b| b.event_id.cmp(&a.event_id));
        Ok(bets)
    }
}

pub fn event_status(event: &PredictionEvent, now: UnixSeconds) -> EventStatus {
    EventStatus::derive(event.start_time, event.end_time, event.resolved, now)
}

/// Yes/no split in percent, known only once the totals are decrypted.
pub fn odds(event: &PredictionEvent) -> Option<(Decimal, Decimal)> {
    if !event.decryption_done {
        return None;
    }
    let total = Decimal::from(event.decrypted_yes) + Decimal::from(event.decrypted_no);
    if total.is_zero() {
        return Some((Decimal::from(50), Decimal::from(50)));
    }
    let yes = (Decimal::from(event.decrypted_yes) * Decimal::from(100) / total)
        .round_dp(2);
    Some((yes, Decimal::from(100) - yes))
}
