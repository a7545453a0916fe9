//! Core domain types for the settlement core.

use std::fmt;

use uuid::Uuid;

use crate::id::EngineId;

/// Participant (DFSP or hub) identifier.
pub type ParticipantId = String;

/// ISO 4217 alphabetic currency code.
pub type Currency = String;

/// A participant known to the switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub is_active: bool,
}

impl Participant {
    pub fn new(id: impl Into<ParticipantId>) -> Self {
        Self {
            id: id.into(),
            is_active: true,
        }
    }
}

/// Ledger bucket of a participant's account set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// Value held as security outside the scheme; debited by deposits.
    Collateral,
    /// Deposited funds not yet available for clearing.
    Reserve,
    /// Liquidity that prepares reserve against and fulfils settle into.
    Clearing,
    /// Net position owed to or by the participant at settlement.
    Settlement,
}

impl Bucket {
    pub const ALL: [Bucket; 4] = [
        Bucket::Collateral,
        Bucket::Reserve,
        Bucket::Clearing,
        Bucket::Settlement,
    ];

    /// Account code recorded on the engine account.
    pub fn code(self) -> u16 {
        match self {
            Bucket::Collateral => 10,
            Bucket::Reserve => 20,
            Bucket::Clearing => 30,
            Bucket::Settlement => 40,
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Bucket::Collateral => "collateral",
            Bucket::Reserve => "reserve",
            Bucket::Clearing => "clearing",
            Bucket::Settlement => "settlement",
        };
        f.write_str(name)
    }
}

/// Engine account ids assigned to one (participant, currency) pair.
///
/// Account ids never change once assigned; re-provisioning tombstones the
/// spec and associates a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSpec {
    pub participant_id: ParticipantId,
    pub currency: Currency,
    pub collateral: EngineId,
    pub reserve: EngineId,
    pub clearing: EngineId,
    pub settlement: EngineId,
}

impl AccountSpec {
    pub fn account_id(&self, bucket: Bucket) -> EngineId {
        match bucket {
            Bucket::Collateral => self.collateral,
            Bucket::Reserve => self.reserve,
            Bucket::Clearing => self.clearing,
            Bucket::Settlement => self.settlement,
        }
    }

    pub fn account_ids(&self) -> [EngineId; 4] {
        Bucket::ALL.map(|bucket| self.account_id(bucket))
    }
}

/// Durable metadata of one switch transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSpec {
    pub id: Uuid,
    pub currency: Currency,
    /// Decimal string exactly as received.
    pub amount: String,
    pub payer_id: ParticipantId,
    pub payee_id: ParticipantId,
    /// Hex-encoded SHA-256 of the fulfilment preimage.
    pub condition: String,
    /// Opaque ILP packet.
    pub ilp_packet: String,
    /// Attached once at fulfil time.
    pub fulfilment: Option<String>,
}

/// Fulfilment to attach to an existing [`TransferSpec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfilmentAttachment {
    pub id: Uuid,
    pub fulfilment: String,
}

/// Admin funding movement between a participant's own buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundingAction {
    /// Collateral → reserve.
    Deposit,
    /// Reserve → collateral.
    Withdrawal,
    /// Reserve → clearing, making funds available for prepares.
    AllocateLiquidity,
    /// Clearing → reserve.
    ReleaseLiquidity,
}

impl FundingAction {
    /// (debit bucket, credit bucket) of the movement.
    pub fn legs(self) -> (Bucket, Bucket) {
        match self {
            FundingAction::Deposit => (Bucket::Collateral, Bucket::Reserve),
            FundingAction::Withdrawal => (Bucket::Reserve, Bucket::Collateral),
            FundingAction::AllocateLiquidity => (Bucket::Reserve, Bucket::Clearing),
            FundingAction::ReleaseLiquidity => (Bucket::Clearing, Bucket::Reserve),
        }
    }

    /// Transfer code recorded on the engine transfer.
    pub fn code(self) -> u16 {
        match self {
            FundingAction::Deposit => 100,
            FundingAction::Withdrawal => 101,
            FundingAction::AllocateLiquidity => 102,
            FundingAction::ReleaseLiquidity => 103,
        }
    }
}

impl fmt::Display for FundingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FundingAction::Deposit => "deposit",
            FundingAction::Withdrawal => "withdrawal",
            FundingAction::AllocateLiquidity => "allocate",
            FundingAction::ReleaseLiquidity => "release",
        };
        f.write_str(name)
    }
}

/// Durable record of an applied funding movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingSpec {
    pub transfer_id: Uuid,
    pub participant_id: ParticipantId,
    pub currency: Currency,
    pub action: FundingAction,
    pub amount: String,
    pub reason: String,
}

/// Ceiling on a participant's unsettled outgoing exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetDebitCap {
    Unlimited,
    /// Limit in minor units of the currency.
    Limited(u128),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetDebitCapSpec {
    pub participant_id: ParticipantId,
    pub currency: Currency,
    pub cap: NetDebitCap,
}

/// Key of a bulk net-debit-cap lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetDebitCapQuery {
    pub participant_id: ParticipantId,
    pub currency: Currency,
}

/// Amount with its currency, as carried by prepare payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Money {
    pub currency: Currency,
    pub amount: String,
}

/// Inbound prepare payload. Mandatory fields are optional here so missing
/// ones can be reported per item instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrepareRequest {
    pub transfer_id: Option<String>,
    pub payer_id: Option<ParticipantId>,
    pub payee_id: Option<ParticipantId>,
    pub amount: Option<Money>,
    pub condition: String,
    pub ilp_packet: String,
}

/// Inbound fulfil payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfilRequest {
    pub transfer_id: Uuid,
    /// Hex-encoded 32-byte preimage of the condition.
    pub fulfilment: String,
}

/// Admin funding request; `transfer_id` makes it idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingRequest {
    pub transfer_id: Uuid,
    pub participant_id: ParticipantId,
    pub currency: Currency,
    pub amount: String,
    pub action: FundingAction,
    pub reason: String,
}

/// Input of [`Ledger::run`](crate::ledger::Ledger::run).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    Onboard {
        participant_id: ParticipantId,
        currency: Currency,
    },
    Fund(FundingRequest),
    Prepare(PrepareRequest),
    Fulfil(FulfilRequest),
    Abort { transfer_id: Uuid },
}
