use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

use crate::Config;
use crate::hydrate::ParticipantBalances;
use crate::model::{
    FulfilRequest, FundingAction, FundingRequest, LedgerEvent, Money, PrepareRequest,
};

/// Errors that can occur when reading replay rows
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open event file: {0}")]
    Open(#[source] csv::Error),

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized event type '{event_type}'")]
    UnrecognizedType { line: usize, event_type: String },

    #[error("line {line}: {event_type} missing {field}")]
    MissingField {
        line: usize,
        event_type: String,
        field: &'static str,
    },

    #[error("line {line}: {event_type} id '{id}' is not a UUID")]
    InvalidId {
        line: usize,
        event_type: String,
        id: String,
    },
}

#[derive(Debug, Deserialize)]
struct InputRow {
    r#type: String,
    id: Option<String>,
    participant: Option<String>,
    counterparty: Option<String>,
    currency: Option<String>,
    amount: Option<String>,
    data: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputRow<'a> {
    participant: &'a str,
    currency: &'a str,
    collateral: String,
    reserve: String,
    clearing: String,
    pending: String,
    settlement: String,
}

/// Read ledger events from a csv file
pub fn read_events(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<LedgerEvent, CsvError>>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(CsvError::Open)?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            row.into_event(line)
        }))
}

impl InputRow {
    fn into_event(self, line: usize) -> Result<LedgerEvent, CsvError> {
        let event_type = self.r#type.clone();
        let missing = |field| CsvError::MissingField {
            line,
            event_type: event_type.clone(),
            field,
        };
        let uuid = |id: Option<String>| {
            let id = id.ok_or_else(|| missing("id"))?;
            Uuid::parse_str(&id).map_err(|_| CsvError::InvalidId {
                line,
                event_type: event_type.clone(),
                id,
            })
        };

        let action = match event_type.as_str() {
            "onboard" => {
                return Ok(LedgerEvent::Onboard {
                    participant_id: self.participant.ok_or_else(|| missing("participant"))?,
                    currency: self.currency.ok_or_else(|| missing("currency"))?,
                });
            }
            "prepare" => {
                let amount = self.amount.ok_or_else(|| missing("amount"))?;
                return Ok(LedgerEvent::Prepare(PrepareRequest {
                    transfer_id: self.id,
                    payer_id: self.participant,
                    payee_id: self.counterparty,
                    amount: self.currency.map(|currency| Money { currency, amount }),
                    condition: self.data.unwrap_or_default(),
                    ilp_packet: String::new(),
                }));
            }
            "fulfil" => {
                return Ok(LedgerEvent::Fulfil(FulfilRequest {
                    transfer_id: uuid(self.id)?,
                    fulfilment: self.data.ok_or_else(|| missing("fulfilment"))?,
                }));
            }
            "abort" => {
                return Ok(LedgerEvent::Abort {
                    transfer_id: uuid(self.id)?,
                });
            }
            "deposit" => FundingAction::Deposit,
            "withdrawal" => FundingAction::Withdrawal,
            "allocate" => FundingAction::AllocateLiquidity,
            "release" => FundingAction::ReleaseLiquidity,
            other => {
                return Err(CsvError::UnrecognizedType {
                    line,
                    event_type: other.to_string(),
                });
            }
        };

        Ok(LedgerEvent::Fund(FundingRequest {
            transfer_id: uuid(self.id)?,
            participant_id: self.participant.ok_or_else(|| missing("participant"))?,
            currency: self.currency.ok_or_else(|| missing("currency"))?,
            amount: self.amount.ok_or_else(|| missing("amount"))?,
            action,
            reason: self.data.unwrap_or_else(|| format!("replayed {action}")),
        }))
    }
}

/// Write one row per account set: posted bucket positions plus the pending
/// clearing position, credit-heavy positions positive.
pub fn write_balances<W: io::Write>(
    writer: W,
    balances: &[ParticipantBalances],
    config: &Config,
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(writer);

    for set in balances {
        let scale = config.currency(&set.currency).map_or(0, |c| c.scale);
        let row = OutputRow {
            participant: &set.participant_id,
            currency: &set.currency,
            collateral: set.collateral.posted.display(scale).to_string(),
            reserve: set.reserve.posted.display(scale).to_string(),
            clearing: set.clearing.posted.display(scale).to_string(),
            pending: set.clearing.pending.display(scale).to_string(),
            settlement: set.settlement.posted.display(scale).to_string(),
        };
        writer.serialize(&row)?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hydrate::{AccountBalance, NetPosition};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "type,id,participant,counterparty,currency,amount,data\n";
    const ID: &str = "6f1a4c3e-2b6d-4f8e-9a51-0c2d7e4b9f10";

    fn write_csv(rows: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(HEADER.as_bytes()).unwrap();
        file.write_all(rows.as_bytes()).unwrap();
        file
    }

    fn read(rows: &str) -> Vec<Result<LedgerEvent, CsvError>> {
        let file = write_csv(rows);
        read_events(file.path()).unwrap().collect()
    }

    #[test]
    fn read_onboard() {
        let results = read("onboard,,dfsp1,,USD,,\n");
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].as_ref().unwrap(),
            &LedgerEvent::Onboard {
                participant_id: "dfsp1".into(),
                currency: "USD".into(),
            }
        );
    }

    #[test]
    fn read_funding() {
        let results = read(&format!("allocate,{ID},dfsp1,,USD,80.00,\n"));
        match results.into_iter().next().unwrap().unwrap() {
            LedgerEvent::Fund(request) => {
                assert_eq!(request.transfer_id.to_string(), ID);
                assert_eq!(request.action, FundingAction::AllocateLiquidity);
                assert_eq!(request.amount, "80.00");
                assert_eq!(request.reason, "replayed allocate");
            }
            other => panic!("expected funding, got {other:?}"),
        }
    }

    #[test]
    fn read_prepare_keeps_incomplete_fields_for_validation() {
        let results = read("prepare,not-a-uuid,dfsp1,,USD,10,abcd\n");
        match results.into_iter().next().unwrap().unwrap() {
            LedgerEvent::Prepare(request) => {
                assert_eq!(request.transfer_id.as_deref(), Some("not-a-uuid"));
                assert_eq!(request.payer_id.as_deref(), Some("dfsp1"));
                assert_eq!(request.payee_id, None);
                assert_eq!(request.amount.unwrap().amount, "10");
                assert_eq!(request.condition, "abcd");
            }
            other => panic!("expected prepare, got {other:?}"),
        }
    }

    #[test]
    fn read_fulfil_and_abort() {
        let results = read(&format!("fulfil, {ID} ,,,,,0a0b\nabort,{ID},,,,,\n"));
        assert!(matches!(
            results[0].as_ref().unwrap(),
            LedgerEvent::Fulfil(FulfilRequest { fulfilment, .. }) if fulfilment == "0a0b"
        ));
        assert!(matches!(results[1].as_ref().unwrap(), LedgerEvent::Abort { .. }));
    }

    #[test]
    fn read_returns_error_for_unknown_type() {
        let results = read("transfer,,dfsp1,,USD,1,\n");
        let err = results[0].as_ref().unwrap_err();
        assert!(matches!(err, CsvError::UnrecognizedType { line: 2, .. }));
        assert!(err.to_string().contains("unrecognized event type"));
    }

    #[test]
    fn read_returns_error_for_missing_amount() {
        let results = read(&format!("onboard,,dfsp1,,USD,,\ndeposit,{ID},dfsp1,,USD,,\n"));
        assert!(results[0].is_ok());
        let err = results[1].as_ref().unwrap_err();
        assert!(matches!(err, CsvError::MissingField { line: 3, field: "amount", .. }));
        assert!(err.to_string().contains("missing amount"));
    }

    #[test]
    fn read_returns_error_for_bad_id() {
        let results = read("abort,t1,,,,,\n");
        assert!(matches!(
            results[0].as_ref().unwrap_err(),
            CsvError::InvalidId { line: 2, .. }
        ));
    }

    #[test]
    fn open_missing_file_fails() {
        assert!(matches!(
            read_events("/nonexistent/events.csv"),
            Err(CsvError::Open(_))
        ));
    }

    #[test]
    fn write_signed_positions() {
        let balance = |debits, credits| AccountBalance {
            id: 1,
            posted: NetPosition::of(debits, credits),
            pending: NetPosition::of(0, 0),
        };
        let mut clearing = balance(1_000, 6_450);
        clearing.pending = NetPosition::of(250, 0);
        let set = ParticipantBalances {
            participant_id: "dfsp1".into(),
            currency: "USD".into(),
            collateral: balance(10_000, 0),
            reserve: balance(0, 2_000),
            clearing,
            settlement: balance(0, 0),
        };

        let mut out = Vec::new();
        write_balances(&mut out, &[set], &Config::default()).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "participant,currency,collateral,reserve,clearing,pending,settlement\n\
             dfsp1,USD,-100.00,20.00,54.50,-2.50,0.00\n"
        );
    }
}
