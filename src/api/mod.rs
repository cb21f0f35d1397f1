// Broker gateway access
pub mod ibkr;

pub use ibkr::{AuthStatus, IbkrClient, PortfolioPosition};

use crate::error::GatewayError;
use crate::models::{OrderSide, OrderTicket, OrderType};
use serde::Serialize;
use serde_json::{Map, Value};

/// Time in force for every order we send
pub const TIME_IN_FORCE: &str = "DAY";

/// Single order as the gateway's order endpoint expects it
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub conid: i64,
    pub order_type: &'static str,
    pub side: OrderSide,
    pub tif: &'static str,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    /// Client order id, unique per attempt
    #[serde(rename = "cOID")]
    pub client_order_id: String,
}

impl OrderRequest {
    pub fn from_ticket(ticket: &OrderTicket, client_order_id: impl Into<String>) -> Self {
        let price = match ticket.order_type {
            OrderType::Limit(price) => Some(price),
            OrderType::Market => None,
        };

        Self {
            conid: ticket.conid,
            order_type: ticket.order_type.code(),
            side: ticket.side,
            tif: TIME_IN_FORCE,
            quantity: ticket.quantity,
            price,
            client_order_id: client_order_id.into(),
        }
    }
}

/// Operations the trading engine needs from the broker
///
/// Order endpoints hand back the raw JSON body, including error payloads,
/// because the order protocol classifies those itself.
#[allow(async_fn_in_trait)]
pub trait BrokerGateway {
    /// Resolve a stock symbol to its contract id
    async fn search_contract(&self, symbol: &str) -> Result<i64, GatewayError>;

    /// Market data snapshot for one contract, `None` if the gateway had nothing for it
    async fn snapshot(
        &self,
        conid: i64,
        fields: &[&str],
    ) -> Result<Option<Map<String, Value>>, GatewayError>;

    async fn account_id(&self) -> Result<String, GatewayError>;

    async fn switch_account(&self, account_id: &str) -> Result<Value, GatewayError>;

    async fn submit_order(
        &self,
        account_id: &str,
        order: &OrderRequest,
    ) -> Result<Value, GatewayError>;

    async fn confirm_order(&self, reply_id: &str) -> Result<Value, GatewayError>;
}
