//! Fake transaction construction.
//!
//! A transaction is two legs sharing a `transactionId`: the outbound leg is
//! seen from the debtor's bank, the inbound leg from the creditor's bank.
//! Historical runs produce two `paymentNRT` legs; real-time runs produce a
//! `paymentNRT` outbound and a `paymentRT` inbound with full party profiles.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use crate::config::GeneratorConfig;
use crate::context::RunContext;
use crate::model::{
    AgentChain, Amount, ClearingDetails, DataMode, DESTINATION_COUNTRY, Direction, EventHeader,
    EventPayload, EventType, HistoricalPaymentEvent, PaymentCore, RealtimePaymentInbound,
    RealtimePaymentOutbound, SCHEMA_VERSION, TransactionPair, cent_bounds,
};
use crate::seed::{Account, SeedCatalogue, Tenant, find_tenant};

const DEFAULT_CHARGE_BEARER: &str = "SLEV";
const MSG_STATUS_REASON: &str = "JNL_ACQ.responseCode";
const PAYMENT_METHOD: &str = "TRF";
const SETTLEMENT_METHOD: &str = "CLRG";
const VERIFICATION_RESULT: &str = "SUCC";
const USERCODE: &str = "0000";

const RT_MSG_STATUS: &str = "New";
const RT_MSG_TYPE: &str = "CRTRF";
const RT_TRANSACTION_TYPE: &str = "MTUP";
const RT_CLEARING_SYSTEM: &str = "RPP";
const HIST_MSG_STATUS: &str = "Settlement";

#[derive(Error, Debug, PartialEq)]
pub enum BuildError {
    #[error("tenant not found: {tenant_id} (account {account_id})")]
    TenantNotFound { tenant_id: String, account_id: String },
    #[error("seed code table '{0}' is empty")]
    EmptyTable(&'static str),
    #[error("seed catalogue has no valid accounts")]
    NoAccounts,
}

/// Everything both legs of one transaction share.
struct SharedDraw {
    amount: Amount,
    transaction_id: String,
    event_time: String,
    execution_date: String,
    reference: String,
    local_instrument: String,
    debtor_branch: String,
    creditor_branch: String,
}

/// One side's view of the transaction.
struct Parties<'s> {
    account: &'s Account,
    account_bank: &'s Tenant,
    counterparty: &'s Account,
    counterparty_bank: &'s Tenant,
}

pub struct TransactionBuilder<'a> {
    seed: &'a SeedCatalogue,
    config: &'a GeneratorConfig,
    ctx: RunContext,
    rng: StdRng,
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(seed: &'a SeedCatalogue, config: &'a GeneratorConfig, ctx: RunContext) -> Self {
        let rng = if config.deterministic_seed {
            StdRng::seed_from_u64(config.rng_seed)
        } else {
            StdRng::from_entropy()
        };
        Self { seed, config, ctx, rng }
    }

    pub fn build_transaction(&mut self) -> Result<TransactionPair, BuildError> {
        if self.config.deterministic_seed {
            self.rng = StdRng::seed_from_u64(self.config.rng_seed);
        }

        let amount = Amount::new(self.draw_amount());
        let (debtor_idx, creditor_idx) = self.draw_account_pair()?;
        let seed = self.seed;
        let debtor = &seed.accounts.good[debtor_idx];
        let creditor = &seed.accounts.good[creditor_idx];

        let pair = match self.config.data_mode {
            DataMode::Historical => {
                let stream = self.config.source_system;
                let transaction_type =
                    self.pick(seed.transaction_types.for_stream(stream), stream.as_str())?;
                let tenants = &seed.tenants.non_realtime;
                let debtor_bank = resolve_tenant(tenants, debtor)?;
                let creditor_bank = resolve_tenant(tenants, creditor)?;
                let instrument = self.pick(&seed.local_instrument.historical, "localInstrument.historical")?;
                let shared = self.shared_draw(amount, instrument.name.clone(), debtor_bank, creditor_bank);

                let outbound = Parties {
                    account: debtor,
                    account_bank: debtor_bank,
                    counterparty: creditor,
                    counterparty_bank: creditor_bank,
                };
                let inbound = Parties {
                    account: creditor,
                    account_bank: creditor_bank,
                    counterparty: debtor,
                    counterparty_bank: debtor_bank,
                };
                let hist = HistoricalFields {
                    msg_type: stream.msg_type(),
                    clearing_system: stream.as_str(),
                    transaction_type: &transaction_type.name,
                };

                TransactionPair::new(
                    EventPayload::Historical(self.historical_leg(&shared, &hist, &outbound, Direction::Outbound)),
                    EventPayload::Historical(self.historical_leg(&shared, &hist, &inbound, Direction::Inbound)),
                )
            }
            DataMode::RealTime => {
                let tenants = &seed.tenants.realtime;
                let debtor_bank = resolve_tenant(tenants, debtor)?;
                let creditor_bank = resolve_tenant(tenants, creditor)?;
                let instrument = self.pick(&seed.local_instrument.realtime, "localInstrument.real-time")?;
                let shared = self.shared_draw(amount, instrument.value.clone(), debtor_bank, creditor_bank);
                let charge_bearer = self.pick(&seed.charge_bearers, "chargeBearers")?.clone();

                let outbound = Parties {
                    account: debtor,
                    account_bank: debtor_bank,
                    counterparty: creditor,
                    counterparty_bank: creditor_bank,
                };
                let inbound = Parties {
                    account: creditor,
                    account_bank: creditor_bank,
                    counterparty: debtor,
                    counterparty_bank: debtor_bank,
                };

                TransactionPair::new(
                    EventPayload::RealtimeOutbound(self.realtime_outbound(&shared, &outbound)),
                    EventPayload::RealtimeInbound(self.realtime_inbound(&shared, &inbound, charge_bearer)),
                )
            }
        };

        debug!(
            transaction_id = %pair.transaction_id(),
            debtor = %debtor.id,
            creditor = %creditor.id,
            "Transaction built"
        );
        Ok(pair)
    }

    /// Uniform draw in whole cents within `[min, max]`.
    fn draw_amount(&mut self) -> Decimal {
        let (lo, hi) = cent_bounds(
            self.config.min_transaction_value,
            self.config.max_transaction_value,
        );
        if lo <= hi {
            Decimal::new(self.rng.gen_range(lo..=hi), 2)
        } else {
            // Settings::validate rejects this; never go below the minimum.
            Decimal::new(lo, 2)
        }
    }

    /// The creditor is redrawn once on collision, leaving a small chance that
    /// both legs use the same account. `strict_distinct_accounts` loops instead.
    fn draw_account_pair(&mut self) -> Result<(usize, usize), BuildError> {
        let n = self.seed.accounts.good.len();
        if n == 0 {
            return Err(BuildError::NoAccounts);
        }
        let debtor = self.rng.gen_range(0..n);
        let mut creditor = self.rng.gen_range(0..n);
        if creditor == debtor {
            if self.config.strict_distinct_accounts && n > 1 {
                while creditor == debtor {
                    creditor = self.rng.gen_range(0..n);
                }
            } else {
                creditor = self.rng.gen_range(0..n);
            }
        }
        Ok((debtor, creditor))
    }

    fn pick<'t, T>(&mut self, table: &'t [T], name: &'static str) -> Result<&'t T, BuildError> {
        table.choose(&mut self.rng).ok_or(BuildError::EmptyTable(name))
    }

    fn branch_id(&mut self, bank: &Tenant) -> String {
        self.rng
            .gen_range(bank.branch_range_start..=bank.branch_range_end)
            .to_string()
    }

    fn shared_draw(
        &mut self,
        amount: Amount,
        local_instrument: String,
        debtor_bank: &Tenant,
        creditor_bank: &Tenant,
    ) -> SharedDraw {
        let debtor_branch = self.branch_id(debtor_bank);
        let creditor_branch = self.branch_id(creditor_bank);
        SharedDraw {
            amount,
            transaction_id: self.ctx.id.new_id(),
            event_time: self.ctx.event_time(),
            execution_date: self.ctx.event_date(),
            reference: self.ctx.id.new_id(),
            local_instrument,
            debtor_branch,
            creditor_branch,
        }
    }

    fn header(&self, shared: &SharedDraw, event_type: EventType, direction: Direction, tenant_id: &str) -> EventHeader {
        EventHeader {
            transaction_id: shared.transaction_id.clone(),
            event_id: self.ctx.id.new_id(),
            event_time: shared.event_time.clone(),
            creation_date: self.ctx.event_time(),
            event_type,
            direction,
            tenant_id: tenant_id.to_string(),
            schema_version: SCHEMA_VERSION,
        }
    }

    fn historical_leg(
        &self,
        shared: &SharedDraw,
        hist: &HistoricalFields<'_>,
        parties: &Parties<'_>,
        direction: Direction,
    ) -> HistoricalPaymentEvent {
        // The outbound leg belongs to the debtor account's tenant, the inbound
        // leg to the creditor bank.
        let tenant_id = match direction {
            Direction::Outbound => &parties.account.tenant_id,
            Direction::Inbound => &parties.account_bank.tenant_id,
        };
        let (from_bank, to_bank) = match direction {
            Direction::Outbound => (parties.account_bank, parties.counterparty_bank),
            Direction::Inbound => (parties.counterparty_bank, parties.account_bank),
        };

        HistoricalPaymentEvent {
            core: PaymentCore {
                header: self.header(shared, EventType::PaymentNrt, direction, tenant_id),
                account_agent_id: parties.account_bank.tenant_id.clone(),
                counterparty_agent_id: parties.counterparty_bank.tenant_id.clone(),
                charge_bearer: DEFAULT_CHARGE_BEARER.to_string(),
                from_id: from_bank.tenant_id.clone(),
                to_id: to_bank.tenant_id.clone(),
                msg_status: HIST_MSG_STATUS.to_string(),
                msg_type: hist.msg_type.to_string(),
                settlement_clearing_system_code: hist.clearing_system.to_string(),
                transaction_type: hist.transaction_type.to_string(),
                ..payment_fields(shared, parties)
            },
            clearing: clearing_details(shared),
            usercode: USERCODE.to_string(),
        }
    }

    fn realtime_outbound(&self, shared: &SharedDraw, parties: &Parties<'_>) -> RealtimePaymentOutbound {
        RealtimePaymentOutbound {
            core: PaymentCore {
                header: self.header(
                    shared,
                    EventType::PaymentNrt,
                    Direction::Outbound,
                    &parties.account.tenant_id,
                ),
                account_agent_id: parties.account_bank.tenant_id.clone(),
                counterparty_agent_id: parties.counterparty_bank.tenant_id.clone(),
                charge_bearer: DEFAULT_CHARGE_BEARER.to_string(),
                from_id: parties.account_bank.tenant_id.clone(),
                to_id: parties.counterparty_bank.tenant_id.clone(),
                ..realtime_fields(shared, parties)
            },
            clearing: clearing_details(shared),
            agents: agent_chain(
                shared,
                parties.account_bank,
                parties.counterparty_bank,
                parties.account,
                parties.counterparty,
            ),
        }
    }

    fn realtime_inbound(
        &self,
        shared: &SharedDraw,
        parties: &Parties<'_>,
        charge_bearer: String,
    ) -> RealtimePaymentInbound {
        let account = parties.account;
        let counterparty = parties.counterparty;
        RealtimePaymentInbound {
            core: PaymentCore {
                header: self.header(
                    shared,
                    EventType::PaymentRt,
                    Direction::Inbound,
                    &parties.account_bank.tenant_id,
                ),
                account_agent_id: parties.account_bank.bic.clone(),
                counterparty_agent_id: parties.counterparty_bank.bic.clone(),
                charge_bearer,
                from_id: parties.counterparty_bank.tenant_id.clone(),
                to_id: parties.account_bank.tenant_id.clone(),
                ..realtime_fields(shared, parties)
            },
            // Agent roles are fixed to the debtor and creditor banks.
            agents: agent_chain(
                shared,
                parties.counterparty_bank,
                parties.account_bank,
                parties.counterparty,
                parties.account,
            ),
            account_bicfi: parties.account_bank.bic.clone(),
            account_proxy_id: account.proxy_id.clone(),
            account_proxy_type: account.proxy_type.clone(),
            account_domain: account.proxy_domain.clone(),
            account_customer_id: account.account_number.clone(),
            account_address: account.address.clone(),
            account_name: account.name.clone(),
            counterparty_bicfi: parties.counterparty_bank.bic.clone(),
            counterparty_proxy_id: counterparty.proxy_id.clone(),
            counterparty_proxy_type: counterparty.proxy_type.clone(),
            counterparty_domain: counterparty.proxy_domain.clone(),
            counterparty_customer_id: counterparty.account_number.clone(),
            counterparty_address: counterparty.address.clone(),
            counterparty_name: counterparty.name.clone(),
        }
    }
}

struct HistoricalFields<'h> {
    msg_type: &'static str,
    clearing_system: &'static str,
    transaction_type: &'h str,
}

fn resolve_tenant<'s>(tenants: &'s [Tenant], account: &Account) -> Result<&'s Tenant, BuildError> {
    find_tenant(tenants, &account.tenant_id).ok_or_else(|| BuildError::TenantNotFound {
        tenant_id: account.tenant_id.clone(),
        account_id: account.id.clone(),
    })
}

/// Fields identical in every generated leg. Callers override the
/// mode-specific ones with struct update syntax.
fn payment_fields(shared: &SharedDraw, parties: &Parties<'_>) -> PaymentCore {
    PaymentCore {
        header: EventHeader {
            transaction_id: shared.transaction_id.clone(),
            event_id: String::new(),
            event_time: shared.event_time.clone(),
            creation_date: shared.event_time.clone(),
            event_type: EventType::PaymentNrt,
            direction: Direction::Outbound,
            tenant_id: String::new(),
            schema_version: SCHEMA_VERSION,
        },
        account_agent_id: String::new(),
        account_id: parties.account.account_number.clone(),
        account_id_code: parties.account.account_id_code.clone(),
        account_number: parties.account.account_number.clone(),
        counterparty_agent_id: String::new(),
        counterparty_id: parties.counterparty.account_number.clone(),
        counterparty_id_code: parties.counterparty.account_id_code.clone(),
        counterparty_number: parties.counterparty.account_number.clone(),
        amount: shared.amount.clone(),
        charge_bearer: DEFAULT_CHARGE_BEARER.to_string(),
        destination_country: DESTINATION_COUNTRY.to_string(),
        from_id: String::new(),
        to_id: String::new(),
        local_instrument: shared.local_instrument.clone(),
        msg_status: String::new(),
        msg_type: String::new(),
        number_of_transactions: 1,
        payment_clearing_system_reference: shared.reference.clone(),
        payment_method: PAYMENT_METHOD.to_string(),
        payment_reference: shared.reference.clone(),
        request_execution_date: shared.execution_date.clone(),
        settlement_clearing_system_code: String::new(),
        settlement_date: shared.execution_date.clone(),
        settlement_method: SETTLEMENT_METHOD.to_string(),
        transaction_type: String::new(),
        verification_result: VERIFICATION_RESULT.to_string(),
    }
}

fn realtime_fields(shared: &SharedDraw, parties: &Parties<'_>) -> PaymentCore {
    PaymentCore {
        msg_status: RT_MSG_STATUS.to_string(),
        msg_type: RT_MSG_TYPE.to_string(),
        settlement_clearing_system_code: RT_CLEARING_SYSTEM.to_string(),
        transaction_type: RT_TRANSACTION_TYPE.to_string(),
        ..payment_fields(shared, parties)
    }
}

fn clearing_details(shared: &SharedDraw) -> ClearingDetails {
    ClearingDetails {
        from_fi_branch_id: shared.debtor_branch.clone(),
        to_fi_branch_id: shared.creditor_branch.clone(),
        msg_status_reason: MSG_STATUS_REASON.to_string(),
        remittance_id: shared.reference.clone(),
        total_amount: shared.amount.clone(),
    }
}

fn agent_chain(
    shared: &SharedDraw,
    debtor_bank: &Tenant,
    creditor_bank: &Tenant,
    debtor: &Account,
    creditor: &Account,
) -> AgentChain {
    AgentChain {
        instructed_agent_id: debtor_bank.bic.clone(),
        instructing_agent_id: creditor_bank.bic.clone(),
        intermediary_agent1_id: debtor_bank.bic.clone(),
        intermediary_agent2_id: creditor_bank.bic.clone(),
        ultimate_account_name: creditor.name.clone(),
        ultimate_counterparty_name: debtor.name.clone(),
        unstructured_remittance_information: shared.reference.clone(),
    }
}
