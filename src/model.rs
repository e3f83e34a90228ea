use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub const CURRENCY: &str = "zar";
pub const DESTINATION_COUNTRY: &str = "ZAF";
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DataMode {
    #[default]
    #[serde(rename = "historical", alias = "hist")]
    Historical,
    #[serde(rename = "real-time", alias = "rpp", alias = "realtime")]
    RealTime,
}

/// Historical payment stream. Each maps to its own transaction-type table and `msgType`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SourceSystem {
    #[default]
    #[serde(rename = "EFT", alias = "eft")]
    Eft,
    #[serde(rename = "ACD", alias = "acd")]
    Acd,
    #[serde(rename = "RTC", alias = "rtc")]
    Rtc,
}

impl SourceSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceSystem::Eft => "EFT",
            SourceSystem::Acd => "ACD",
            SourceSystem::Rtc => "RTC",
        }
    }

    pub fn msg_type(&self) -> &'static str {
        match self {
            SourceSystem::Eft => "EFT",
            SourceSystem::Acd => "900000",
            SourceSystem::Rtc => "RTCCT",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `eventType` of a leg. Anything other than the two payment types is an
/// addPayee-style event that only arrives through scenario files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    PaymentNrt,
    PaymentRt,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::PaymentNrt => "paymentNRT",
            EventType::PaymentRt => "paymentRT",
            EventType::Other(s) => s,
        }
    }

    pub fn is_payment(&self) -> bool {
        matches!(self, EventType::PaymentNrt | EventType::PaymentRt)
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "paymentNRT" => EventType::PaymentNrt,
            "paymentRT" => EventType::PaymentRt,
            _ => EventType::Other(s),
        }
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        EventType::from(s.to_string())
    }
}

impl From<EventType> for String {
    fn from(t: EventType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-currency amount: base and display currency are always equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Amount {
    pub base_currency: String,
    pub base_value: Decimal,
    pub currency: String,
    pub value: Decimal,
}

impl Amount {
    pub fn new(value: Decimal) -> Self {
        Self {
            base_currency: CURRENCY.to_string(),
            base_value: value,
            currency: CURRENCY.to_string(),
            value,
        }
    }
}

/// Whole-cent bounds `[ceil(min*100), floor(max*100)]`. The range is empty
/// when no two-decimal amount lies between `min` and `max`.
pub fn cent_bounds(min: f64, max: f64) -> (i64, i64) {
    // The epsilon absorbs binary representation error, e.g. 0.29 * 100.
    let lo = (min * 100.0 - 1e-6).ceil() as i64;
    let hi = (max * 100.0 + 1e-6).floor() as i64;
    (lo, hi)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonName {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub full_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub given_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name_prefix: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub surname: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostalAddress {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address_line1: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address_line2: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub town_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub country_sub_division: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub country: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub postal_code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub full_address: String,
}

// --- Event building blocks ---

/// Identifying fields present on every leg.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventHeader {
    pub transaction_id: String,
    pub event_id: String,
    pub event_time: String,
    pub creation_date: String,
    pub event_type: EventType,
    pub direction: Direction,
    pub tenant_id: String,
    pub schema_version: u32,
}

/// Payment fields shared by every generated payment leg.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCore {
    #[serde(flatten)]
    pub header: EventHeader,
    pub account_agent_id: String,
    pub account_id: String,
    pub account_id_code: String,
    pub account_number: String,
    pub counterparty_agent_id: String,
    pub counterparty_id: String,
    pub counterparty_id_code: String,
    pub counterparty_number: String,
    pub amount: Amount,
    pub charge_bearer: String,
    pub destination_country: String,
    pub from_id: String,
    pub to_id: String,
    pub local_instrument: String,
    pub msg_status: String,
    pub msg_type: String,
    pub number_of_transactions: u32,
    pub payment_clearing_system_reference: String,
    pub payment_method: String,
    pub payment_reference: String,
    pub request_execution_date: String,
    pub settlement_clearing_system_code: String,
    pub settlement_date: String,
    pub settlement_method: String,
    pub transaction_type: String,
    pub verification_result: String,
}

/// Clearing details carried by non-real-time legs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearingDetails {
    #[serde(rename = "fromFIBranchId")]
    pub from_fi_branch_id: String,
    #[serde(rename = "toFIBranchId")]
    pub to_fi_branch_id: String,
    pub msg_status_reason: String,
    pub remittance_id: String,
    pub total_amount: Amount,
}

/// Agent chain and ultimate parties carried by both real-time legs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentChain {
    pub instructed_agent_id: String,
    pub instructing_agent_id: String,
    pub intermediary_agent1_id: String,
    pub intermediary_agent2_id: String,
    pub ultimate_account_name: PersonName,
    pub ultimate_counterparty_name: PersonName,
    pub unstructured_remittance_information: String,
}

// --- Closed event variants ---

/// Both legs of a historical transaction (`paymentNRT`).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalPaymentEvent {
    #[serde(flatten)]
    pub core: PaymentCore,
    #[serde(flatten)]
    pub clearing: ClearingDetails,
    pub usercode: String,
}

/// Outbound leg of a real-time transaction, posted as `paymentNRT`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimePaymentOutbound {
    #[serde(flatten)]
    pub core: PaymentCore,
    #[serde(flatten)]
    pub clearing: ClearingDetails,
    #[serde(flatten)]
    pub agents: AgentChain,
}

/// Inbound leg of a real-time transaction (`paymentRT`), with full party profiles.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimePaymentInbound {
    #[serde(flatten)]
    pub core: PaymentCore,
    #[serde(flatten)]
    pub agents: AgentChain,
    #[serde(rename = "accountBICFI")]
    pub account_bicfi: String,
    pub account_proxy_id: String,
    pub account_proxy_type: String,
    pub account_domain: String,
    pub account_customer_id: String,
    pub account_address: PostalAddress,
    pub account_name: PersonName,
    #[serde(rename = "counterpartyBICFI")]
    pub counterparty_bicfi: String,
    pub counterparty_proxy_id: String,
    pub counterparty_proxy_type: String,
    pub counterparty_domain: String,
    pub counterparty_customer_id: String,
    pub counterparty_address: PostalAddress,
    pub counterparty_name: PersonName,
}

/// Event read from a scenario file. Fields pass through untouched except
/// for the identifiers the loader refreshes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScenarioEvent(pub Map<String, Value>);

impl ScenarioEvent {
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }
}

/// Read access to the fields the dispatcher and metrics need, regardless of shape.
pub trait EventFields {
    fn transaction_id(&self) -> &str;
    fn event_id(&self) -> &str;
    fn event_type(&self) -> EventType;
    fn tenant_id(&self) -> &str;
    fn local_instrument(&self) -> Option<&str>;
}

impl EventFields for PaymentCore {
    fn transaction_id(&self) -> &str {
        &self.header.transaction_id
    }
    fn event_id(&self) -> &str {
        &self.header.event_id
    }
    fn event_type(&self) -> EventType {
        self.header.event_type.clone()
    }
    fn tenant_id(&self) -> &str {
        &self.header.tenant_id
    }
    fn local_instrument(&self) -> Option<&str> {
        Some(&self.local_instrument)
    }
}

impl EventFields for ScenarioEvent {
    fn transaction_id(&self) -> &str {
        self.str_field("transactionId").unwrap_or_default()
    }
    fn event_id(&self) -> &str {
        self.str_field("eventId").unwrap_or_default()
    }
    fn event_type(&self) -> EventType {
        EventType::from(self.str_field("eventType").unwrap_or_default())
    }
    fn tenant_id(&self) -> &str {
        self.str_field("tenantId").unwrap_or_default()
    }
    fn local_instrument(&self) -> Option<&str> {
        self.str_field("localInstrument")
    }
}

/// One leg of a transaction pair, in any of its shapes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Historical(HistoricalPaymentEvent),
    RealtimeOutbound(RealtimePaymentOutbound),
    RealtimeInbound(RealtimePaymentInbound),
    Scenario(ScenarioEvent),
}

impl EventPayload {
    fn fields(&self) -> &dyn EventFields {
        match self {
            EventPayload::Historical(e) => &e.core,
            EventPayload::RealtimeOutbound(e) => &e.core,
            EventPayload::RealtimeInbound(e) => &e.core,
            EventPayload::Scenario(e) => e,
        }
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl EventFields for EventPayload {
    fn transaction_id(&self) -> &str {
        self.fields().transaction_id()
    }
    fn event_id(&self) -> &str {
        self.fields().event_id()
    }
    fn event_type(&self) -> EventType {
        self.fields().event_type()
    }
    fn tenant_id(&self) -> &str {
        self.fields().tenant_id()
    }
    fn local_instrument(&self) -> Option<&str> {
        self.fields().local_instrument()
    }
}

/// Two legs sharing a `transactionId`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionPair {
    pub outbound: EventPayload,
    pub inbound: EventPayload,
}

impl TransactionPair {
    pub fn new(outbound: EventPayload, inbound: EventPayload) -> Self {
        Self { outbound, inbound }
    }

    /// True when either leg is a payment event.
    pub fn is_payment(&self) -> bool {
        self.outbound.event_type().is_payment() || self.inbound.event_type().is_payment()
    }

    /// Payment pairs go inbound first: the real-time leg must be accepted
    /// synchronously before its non-real-time partner. addPayee-style pairs
    /// go outbound first.
    pub fn post_order(&self) -> [Direction; 2] {
        if self.is_payment() {
            [Direction::Inbound, Direction::Outbound]
        } else {
            [Direction::Outbound, Direction::Inbound]
        }
    }

    pub fn leg(&self, direction: Direction) -> &EventPayload {
        match direction {
            Direction::Inbound => &self.inbound,
            Direction::Outbound => &self.outbound,
        }
    }

    pub fn transaction_id(&self) -> &str {
        self.inbound.transaction_id()
    }
}
