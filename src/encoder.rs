use log::debug;

use crate::api::*;
use crate::error::ProtocolError;
use crate::fhe::SharedBackend;

/// Shortest event the create form accepts.
pub const MIN_EVENT_DURATION_SECS: i64 = 300;

/// Collects clear values for one (contract, user) pair and encrypts them in
/// a single call, keeping their order.
pub struct EncryptedInputBuilder {
    backend: SharedBackend,
    contract: Address,
    user: Address,
    values: Vec<ClearValue>,
}
impl EncryptedInputBuilder {
    pub fn new(backend: SharedBackend, contract: Address, user: Address) -> Self {
        Self {
            backend,
            contract,
            user,
            values: vec![],
        }
    }
    pub fn add_bool(&mut self, value: bool) -> &mut Self {
        self.values.push(ClearValue::Bool(value));
        self
    }
    pub fn add32(&mut self, value: u32) -> &mut Self {
        self.values.push(ClearValue::U32(value));
        self
    }
    pub fn add64(&mut self, value: u64) -> &mut Self {
        self.values.push(ClearValue::U64(value));
        self
    }
    pub async fn encrypt(self) -> anyhow::Result<EncryptedInput> {
        if self.values.is_empty() {
            return Err(ProtocolError::InvalidInput("nothing to encrypt".to_string()).into());
        }
        let input = self
            .backend
            .encrypt(self.contract, self.user, &self.values)
            .await?;
        if input.handles.len() != self.values.len() {
            anyhow::bail!(
                "backend returned {} handles for {} values",
                input.handles.len(),
                self.values.len()
            );
        }
        Ok(input)
    }
}

/// Shares and direction of one bet, encrypted together. Consumed whole by
/// the `placeBet` request it becomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBet {
    pub shares_handle: Handle,
    pub direction_handle: Handle,
    pub input_proof: InputProof,
}
impl EncryptedBet {
    pub fn into_request(self, event_id: EventId, value: Wei) -> PlaceBetRequest {
        PlaceBetRequest {
            event_id,
            shares_handle: self.shares_handle,
            direction_handle: self.direction_handle,
            input_proof: self.input_proof,
            value,
        }
    }
}

pub async fn build_encrypted_bet(
    backend: SharedBackend,
    contract: Address,
    user: Address,
    shares: u32,
    direction: bool,
) -> anyhow::Result<EncryptedBet> {
    debug!("Encrypting bet for {} on {}", user, contract);
    let mut builder = EncryptedInputBuilder::new(backend, contract, user);
    builder.add32(shares).add_bool(direction);
    let mut input = builder.encrypt().await?;
    let direction_handle = input.handles.remove(1);
    let shares_handle = input.handles.remove(0);
    Ok(EncryptedBet {
        shares_handle,
        direction_handle,
        input_proof: input.input_proof,
    })
}

/// Payment for `shares` at the price of the chosen side.
pub fn required_payment(
    event: &PredictionEvent,
    shares: u32,
    direction: bool,
) -> Result<Wei, ProtocolError> {
    let price = if direction {
        event.price_yes
    } else {
        event.price_no
    };
    price.checked_mul(shares as Wei).ok_or(ProtocolError::InvalidInput(format!(
        "{} shares at {} wei overflows",
        shares, price
    )))
}

pub fn parse_shares(input: &str) -> Result<u32, ProtocolError> {
    input
        .trim()
        .parse::<u32>()
        .map_err(|_| ProtocolError::InvalidInput(format!("not a share count: {:?}", input)))
}

pub fn parse_direction(input: &str) -> Result<bool, ProtocolError> {
    match input.trim().to_lowercase().as_str() {
        "yes" | "true" => Ok(true),
        "no" | "false" => Ok(false),
        other => Err(ProtocolError::InvalidInput(format!(
            "direction must be yes or no, got {:?}",
            other
        ))),
    }
}

/// Checks the time window of a new event against `now`.
pub fn validate_event_dates(
    start_time: UnixSeconds,
    end_time: UnixSeconds,
    now: UnixSeconds,
) -> Result<(), ProtocolError> {
    if start_time < now {
        return Err(ProtocolError::InvalidInput(
            "start time must be in the future".to_string(),
        ));
    }
    if end_time <= start_time {
        return Err(ProtocolError::InvalidInput(
            "end time must be after start time".to_string(),
        ));
    }
    if end_time - start_time < MIN_EVENT_DURATION_SECS {
        return Err(ProtocolError::InvalidInput(
            "event must last at least 5 minutes".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::fhe::MockCoprocessor;

    #[tokio::test]
    async fn bet_is_bound_in_order() {
        let fhe = MockCoprocessor::default();
        let (contract, user) = (Address([1; 20]), Address([2; 20]));
        let bet = build_encrypted_bet(Arc::new(fhe.clone()), contract, user, 5, true)
            .await
            .unwrap();
        assert_eq!(bet.shares_handle.fhe_type(), Some(FheType::U32));
        assert_eq!(bet.direction_handle.fhe_type(), Some(FheType::Bool));
        assert_eq!(fhe.kms_decrypt(&bet.shares_handle), Some(ClearValue::U32(5)));
        let request = bet.clone().into_request(0, 500);
        assert_eq!(request.value, 500);
        fhe.verify_input(
            &bet.input_proof,
            contract,
            user,
            &[
                (bet.shares_handle, FheType::U32),
                (bet.direction_handle, FheType::Bool),
            ],
        )
        .unwrap();
    }

    #[tokio::test]
    async fn empty_input_is_rejected() {
        let builder = EncryptedInputBuilder::new(
            Arc::new(MockCoprocessor::default()),
            Address([1; 20]),
            Address([2; 20]),
        );
        let err = builder.encrypt().await.unwrap_err();
        assert!(matches!(
            crate::error::protocol_error(&err),
            Some(ProtocolError::InvalidInput(_))
        ));
    }

    #[test]
    fn payments_and_parsing() {
        let mut event = PredictionEvent {
            id: 0,
            description: String::new(),
            start_time: 0,
            end_time: 1,
            price_yes: 100,
            price_no: 40,
            resolved: false,
            outcome: false,
            total_eth_pool: 0,
            total_yes_handle: Handle::default(),
            total_no_handle: Handle::default(),
            decrypted_yes: 0,
            decrypted_no: 0,
            decryption_done: false,
        };
        assert_eq!(required_payment(&event, 5, true).unwrap(), 500);
        assert_eq!(required_payment(&event, 5, false).unwrap(), 200);
        event.price_yes = Wei::MAX;
        assert!(required_payment(&event, 2, true).is_err());

        assert_eq!(parse_shares(" 42 ").unwrap(), 42);
        assert!(parse_shares("4294967296").is_err());
        assert!(parse_shares("-1").is_err());
        assert!(parse_direction("YES").unwrap());
        assert!(!parse_direction("no").unwrap());
        assert!(parse_direction("maybe").is_err());
    }

    #[test]
    fn event_dates() {
        let now = 1_700_000_000;
        assert!(validate_event_dates(now + 60, now + 60 + 300, now).is_ok());
        assert!(validate_event_dates(now - 1, now + 3600, now).is_err());
        assert!(validate_event_dates(now + 60, now + 60, now).is_err());
        assert!(validate_event_dates(now + 60, now + 120, now).is_err());
    }
}
