use crate::api::{BrokerGateway, OrderRequest};
use crate::error::GatewayError;
use crate::models::OrderTicket;
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Confirmation POSTs allowed per order; the broker may keep asking forever
pub const MAX_CONFIRMATION_ROUNDS: u32 = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    InsufficientFunds(String),
    ConfirmationLimitExceeded { rounds: u32 },
    NoResponse,
    Broker(String),
    Unrecognized(String),
    AccountUnavailable(String),
    Transport(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InsufficientFunds(text) => write!(f, "insufficient funds: {}", text),
            RejectReason::ConfirmationLimitExceeded { rounds } => {
                write!(f, "still awaiting confirmation after {} rounds", rounds)
            }
            RejectReason::NoResponse => write!(f, "no response from gateway"),
            RejectReason::Broker(text) => write!(f, "broker error: {}", text),
            RejectReason::Unrecognized(body) => write!(f, "unrecognized order response: {}", body),
            RejectReason::AccountUnavailable(text) => write!(f, "account unavailable: {}", text),
            RejectReason::Transport(text) => write!(f, "transport error: {}", text),
        }
    }
}

/// Where an order attempt stands
#[derive(Debug, Clone, PartialEq)]
pub enum OrderState {
    Submitted,
    /// `rounds` counts the confirmations already sent for this attempt
    ConfirmationRequired {
        reply_id: String,
        message: String,
        rounds: u32,
    },
    Placed {
        order_id: String,
    },
    Rejected(RejectReason),
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Placed { .. } | OrderState::Rejected(_))
    }
}

/// What a single gateway answer means for the order
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerReply {
    OrderId(String),
    NeedsConfirmation { reply_id: String, message: String },
    InsufficientFunds(String),
    Error(String),
    Empty,
    Unrecognized(String),
}

fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn message_text(value: &Value) -> String {
    match value.get("message") {
        Some(Value::Array(lines)) => lines
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" "),
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}

fn is_insufficient_funds(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("available") && lower.contains("cash needed")
}

/// Classify a raw order or reply response
///
/// The gateway answers either with a list (first element is what matters)
/// or with a bare object.
pub fn classify_reply(value: &Value) -> BrokerReply {
    let entry = match value {
        Value::Null => return BrokerReply::Empty,
        Value::Array(items) => match items.first() {
            Some(first) => first,
            None => return BrokerReply::Empty,
        },
        Value::Object(map) if map.is_empty() => return BrokerReply::Empty,
        other => other,
    };

    if let Some(order_id) = string_field(entry, &["order_id", "orderId"]) {
        return BrokerReply::OrderId(order_id);
    }

    if entry.get("message").is_some() {
        if let Some(reply_id) = string_field(entry, &["id"]) {
            return BrokerReply::NeedsConfirmation {
                reply_id,
                message: message_text(entry),
            };
        }
    }

    if let Some(text) = string_field(entry, &["error"]) {
        if is_insufficient_funds(&text) {
            return BrokerReply::InsufficientFunds(text);
        }
        return BrokerReply::Error(text);
    }

    BrokerReply::Unrecognized(value.to_string())
}

/// Advance the attempt given the reply to the request made in `state`
///
/// A reply received while in `ConfirmationRequired { rounds: r }` answers
/// confirmation number `r + 1`.
pub fn transition(state: &OrderState, reply: BrokerReply) -> OrderState {
    let sent = match state {
        OrderState::Submitted => 0,
        OrderState::ConfirmationRequired { rounds, .. } => rounds + 1,
        terminal => return terminal.clone(),
    };

    match reply {
        BrokerReply::OrderId(order_id) => OrderState::Placed { order_id },
        BrokerReply::NeedsConfirmation { .. } if sent >= MAX_CONFIRMATION_ROUNDS => {
            OrderState::Rejected(RejectReason::ConfirmationLimitExceeded { rounds: sent })
        }
        BrokerReply::NeedsConfirmation { reply_id, message } => OrderState::ConfirmationRequired {
            reply_id,
            message,
            rounds: sent,
        },
        BrokerReply::InsufficientFunds(text) => {
            OrderState::Rejected(RejectReason::InsufficientFunds(text))
        }
        BrokerReply::Error(text) => OrderState::Rejected(RejectReason::Broker(text)),
        BrokerReply::Empty => OrderState::Rejected(RejectReason::NoResponse),
        BrokerReply::Unrecognized(body) => OrderState::Rejected(RejectReason::Unrecognized(body)),
    }
}

/// One `place_order` call: what was sent and every state it went through
#[derive(Debug, Clone)]
pub struct OrderAttempt {
    pub attempt_id: Uuid,
    pub account_id: Option<String>,
    pub request: OrderRequest,
    pub confirmations_sent: u32,
    pub history: Vec<OrderState>,
    /// Raw gateway bodies in the order they arrived
    pub responses: Vec<Value>,
}

impl OrderAttempt {
    fn new(ticket: &OrderTicket) -> Self {
        let attempt_id = Uuid::new_v4();
        Self {
            attempt_id,
            account_id: None,
            request: OrderRequest::from_ticket(ticket, attempt_id.to_string()),
            confirmations_sent: 0,
            history: vec![OrderState::Submitted],
            responses: Vec::new(),
        }
    }

    fn state(&self) -> &OrderState {
        self.history.last().unwrap_or(&OrderState::Submitted)
    }

    fn advance(&mut self, next: OrderState) {
        self.history.push(next);
    }

    fn record_reply(&mut self, reply: Result<Value, GatewayError>) {
        let next = match reply {
            Ok(value) => {
                let next = transition(self.state(), classify_reply(&value));
                self.responses.push(value);
                next
            }
            Err(e) => OrderState::Rejected(RejectReason::Transport(e.to_string())),
        };
        self.advance(next);
    }
}

/// Terminal outcome of an order attempt
#[derive(Debug, Clone)]
pub struct OrderResult {
    pub attempt_id: Uuid,
    pub success: bool,
    pub order_id: Option<String>,
    pub error: Option<String>,
    pub reject_reason: Option<RejectReason>,
    pub confirmations: u32,
    pub history: Vec<OrderState>,
    pub responses: Vec<Value>,
}

impl From<OrderAttempt> for OrderResult {
    fn from(attempt: OrderAttempt) -> Self {
        let confirmations = attempt.confirmations_sent;
        let (success, order_id, reject_reason) = match attempt.state() {
            OrderState::Placed { order_id } => (true, Some(order_id.clone()), None),
            OrderState::Rejected(reason) => (false, None, Some(reason.clone())),
            // The driver never stops on a non-terminal state
            _ => (false, None, Some(RejectReason::NoResponse)),
        };

        Self {
            attempt_id: attempt.attempt_id,
            success,
            order_id,
            error: reject_reason.as_ref().map(|r| r.to_string()),
            reject_reason,
            confirmations,
            history: attempt.history,
            responses: attempt.responses,
        }
    }
}

/// Places orders through the gateway and drives the confirmation rounds
#[derive(Debug, Default)]
pub struct OrderProtocol {
    account_id: Option<String>,
}

impl OrderProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a known account id, skipping the lookup
    pub fn with_account(account_id: impl Into<String>) -> Self {
        Self {
            account_id: Some(account_id.into()),
        }
    }

    pub fn account_id(&self) -> Option<&str> {
        self.account_id.as_deref()
    }

    /// Look up (once) and activate the brokerage account
    async fn ensure_account<G: BrokerGateway>(
        &mut self,
        gateway: &G,
    ) -> Result<String, RejectReason> {
        let account_id = match &self.account_id {
            Some(id) => id.clone(),
            None => {
                let id = gateway
                    .account_id()
                    .await
                    .map_err(|e| RejectReason::AccountUnavailable(e.to_string()))?;
                tracing::info!("Using brokerage account {}", id);
                self.account_id = Some(id.clone());
                id
            }
        };

        let reply = gateway
            .switch_account(&account_id)
            .await
            .map_err(|e| RejectReason::AccountUnavailable(e.to_string()))?;

        // Switching to the account that is already active comes back as an error payload
        if let Some(error) = reply.get("error").and_then(Value::as_str) {
            if !error.to_lowercase().contains("already") {
                return Err(RejectReason::AccountUnavailable(error.to_string()));
            }
        }

        Ok(account_id)
    }

    /// Submit the order and answer confirmation prompts until it is placed or rejected
    ///
    /// Never errors: transport problems become a rejected `OrderResult`.
    pub async fn place_order<G: BrokerGateway>(
        &mut self,
        gateway: &G,
        ticket: &OrderTicket,
    ) -> OrderResult {
        let mut attempt = OrderAttempt::new(ticket);

        let account_id = match self.ensure_account(gateway).await {
            Ok(id) => id,
            Err(reason) => {
                tracing::error!("❌ Order not sent: {}", reason);
                attempt.advance(OrderState::Rejected(reason));
                return attempt.into();
            }
        };
        attempt.account_id = Some(account_id.clone());

        tracing::info!(
            conid = ticket.conid,
            "📤 Submitting {} {} x{} ({})",
            ticket.side,
            ticket.order_type.code(),
            ticket.quantity,
            attempt.attempt_id
        );

        let first = gateway.submit_order(&account_id, &attempt.request).await;
        attempt.record_reply(first);

        while let OrderState::ConfirmationRequired {
            reply_id,
            message,
            rounds,
        } = attempt.state().clone()
        {
            tracing::info!(
                "🔁 Confirming order ({}/{}): {}",
                rounds + 1,
                MAX_CONFIRMATION_ROUNDS,
                message
            );

            attempt.confirmations_sent += 1;
            let reply = gateway.confirm_order(&reply_id).await;
            attempt.record_reply(reply);
        }

        match attempt.state() {
            OrderState::Placed { order_id } => {
                tracing::info!("✅ Order placed: {}", order_id)
            }
            OrderState::Rejected(reason) => tracing::warn!("❌ Order rejected: {}", reason),
            _ => {}
        }

        attempt.into()
    }
}
