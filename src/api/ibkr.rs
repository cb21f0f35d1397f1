use super::{BrokerGateway, OrderRequest};
use crate::config::AppConfig;
use crate::error::GatewayError;
use crate::models::format_pnl;
use governor::{Quota, RateLimiter};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

// The Client Portal gateway answers 429 to bursts; keep every call behind one limiter
type GatewayRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Client for the Interactive Brokers Client Portal gateway
///
/// Cloneable; clones share the HTTP connection pool and the rate limiter.
#[derive(Clone)]
pub struct IbkrClient {
    client: Client,
    base_url: String,
    rate_limiter: Arc<GatewayRateLimiter>,
}

// ============== Response Types ==============

/// `iserver/auth/status`
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthStatus {
    pub authenticated: bool,
    pub connected: bool,
    pub competing: bool,
    pub message: Option<String>,
}

/// One row of `portfolio/{account}/positions/{page}`
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PortfolioPosition {
    pub acct_id: Option<String>,
    pub conid: Option<i64>,
    pub contract_desc: Option<String>,
    pub ticker: Option<String>,
    pub position: f64,
    pub mkt_price: f64,
    pub avg_price: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub currency: Option<String>,
}

impl PortfolioPosition {
    /// `AAPL: 9 shares @ $100.00 (Now: $105.00, P/L: +$45.00)`
    pub fn summary_line(&self) -> String {
        let name = self
            .ticker
            .as_deref()
            .or(self.contract_desc.as_deref())
            .unwrap_or("N/A");

        format!(
            "{}: {} shares @ ${:.2} (Now: ${:.2}, P/L: {})",
            name,
            self.position,
            self.avg_price,
            self.mkt_price,
            format_pnl(self.unrealized_pnl)
        )
    }
}

// ============== Implementation ==============

impl IbkrClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout_secs: u64,
        requests_per_second: u32,
        accept_invalid_certs: bool,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()?;

        let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, GatewayError> {
        Self::new(
            config.gateway_url.clone(),
            config.request_timeout_secs,
            config.requests_per_second,
            config.accept_invalid_certs,
        )
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    /// GET, failing on any non-2xx status
    async fn get_json(&self, endpoint: &str, query: &[(&str, String)]) -> Result<Value, GatewayError> {
        self.rate_limiter.until_ready().await;
        tracing::debug!("GET {}", endpoint);

        let response = self
            .client
            .get(self.url(endpoint))
            .query(query)
            .send()
            .await?;
        read_json(response, false).await
    }

    /// POST a JSON body
    ///
    /// With `lenient`, a non-2xx answer that still carries a JSON body is
    /// returned as-is so the caller can inspect the broker's error text.
    async fn post_json<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
        lenient: bool,
    ) -> Result<Value, GatewayError> {
        self.rate_limiter.until_ready().await;
        tracing::debug!("POST {}", endpoint);

        let response = self
            .client
            .post(self.url(endpoint))
            .json(body)
            .send()
            .await?;
        read_json(response, lenient).await
    }

    /// Session state of the gateway
    /// Endpoint: GET /iserver/auth/status
    pub async fn auth_status(&self) -> Result<AuthStatus, GatewayError> {
        let value = self.get_json("iserver/auth/status", &[]).await?;
        serde_json::from_value(value).map_err(|e| GatewayError::Decode(e.to_string()))
    }

    /// Every position the broker holds for the account
    /// Endpoint: GET /portfolio/{account_id}/positions/0
    pub async fn portfolio_positions(
        &self,
        account_id: &str,
    ) -> Result<Vec<PortfolioPosition>, GatewayError> {
        let endpoint = format!("portfolio/{}/positions/0", account_id);
        let value = self.get_json(&endpoint, &[]).await?;

        match value {
            Value::Null => Ok(Vec::new()),
            other => serde_json::from_value(other).map_err(|e| GatewayError::Decode(e.to_string())),
        }
    }
}

async fn read_json(response: Response, lenient: bool) -> Result<Value, GatewayError> {
    let status = response.status();
    let body = response.text().await?;

    if body.trim().is_empty() {
        return if status.is_success() || lenient {
            Ok(Value::Null)
        } else {
            Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            })
        };
    }

    match serde_json::from_str::<Value>(&body) {
        Ok(value) if status.is_success() || lenient => Ok(value),
        Ok(_) => Err(GatewayError::Status {
            status: status.as_u16(),
            body,
        }),
        Err(_) if !status.is_success() => Err(GatewayError::Status {
            status: status.as_u16(),
            body,
        }),
        Err(e) => Err(GatewayError::Decode(e.to_string())),
    }
}

/// Contract ids come back as numbers from some endpoints and strings from others
fn parse_conid(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// First account id in a `portfolio/accounts` answer
fn extract_account_id(accounts: &Value) -> Option<String> {
    let account = match accounts {
        Value::Array(list) => list.first()?,
        other => other,
    };

    ["id", "accountId", "acctId"]
        .iter()
        .find_map(|key| account.get(*key).and_then(Value::as_str))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

impl BrokerGateway for IbkrClient {
    /// Endpoint: POST /iserver/secdef/search
    async fn search_contract(&self, symbol: &str) -> Result<i64, GatewayError> {
        let body = json!({
            "symbol": symbol,
            "name": false,
            "secType": "STK",
        });
        let value = self.post_json("iserver/secdef/search", &body, false).await?;

        value
            .as_array()
            .into_iter()
            .flatten()
            .find_map(|contract| contract.get("conid").and_then(parse_conid))
            .ok_or_else(|| GatewayError::ContractNotFound(symbol.to_string()))
    }

    /// Endpoint: GET /iserver/marketdata/snapshot?conids={conid}&fields={fields}
    async fn snapshot(
        &self,
        conid: i64,
        fields: &[&str],
    ) -> Result<Option<Map<String, Value>>, GatewayError> {
        let query = [
            ("conids", conid.to_string()),
            ("fields", fields.join(",")),
        ];
        let value = self.get_json("iserver/marketdata/snapshot", &query).await?;

        let Value::Array(entries) = value else {
            return Ok(None);
        };

        let mut objects = entries.into_iter().filter_map(|entry| match entry {
            Value::Object(map) => Some(map),
            _ => None,
        });

        Ok(objects.find(|map| map.get("conid").and_then(parse_conid) == Some(conid)))
    }

    /// Endpoint: GET /portfolio/accounts
    async fn account_id(&self) -> Result<String, GatewayError> {
        let accounts = self.get_json("portfolio/accounts", &[]).await?;
        extract_account_id(&accounts).ok_or(GatewayError::NoAccount)
    }

    /// Endpoint: POST /iserver/account
    async fn switch_account(&self, account_id: &str) -> Result<Value, GatewayError> {
        let body = json!({ "acctId": account_id });
        self.post_json("iserver/account", &body, true).await
    }

    /// Endpoint: POST /iserver/account/{account_id}/orders
    async fn submit_order(
        &self,
        account_id: &str,
        order: &OrderRequest,
    ) -> Result<Value, GatewayError> {
        let endpoint = format!("iserver/account/{}/orders", account_id);
        let body = json!({ "orders": [order] });
        self.post_json(&endpoint, &body, true).await
    }

    /// Endpoint: POST /iserver/reply/{reply_id}
    async fn confirm_order(&self, reply_id: &str) -> Result<Value, GatewayError> {
        let endpoint = format!("iserver/reply/{}", reply_id);
        self.post_json(&endpoint, &json!({ "confirmed": true }), true)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderSide, OrderTicket};
    use mockito::Matcher;

    fn client(url: String) -> IbkrClient {
        IbkrClient::new(url, 5, 100, false).unwrap()
    }

    #[test]
    fn test_parse_conid_number_or_string() {
        assert_eq!(parse_conid(&json!(265598)), Some(265598));
        assert_eq!(parse_conid(&json!("265598")), Some(265598));
        assert_eq!(parse_conid(&json!("n/a")), None);
        assert_eq!(parse_conid(&Value::Null), None);
    }

    #[test]
    fn test_extract_account_id_shapes() {
        assert_eq!(
            extract_account_id(&json!([{"id": "U1234567"}, {"id": "U7654321"}])),
            Some("U1234567".to_string())
        );
        assert_eq!(
            extract_account_id(&json!({"acctId": "U1"})),
            Some("U1".to_string())
        );
        assert_eq!(extract_account_id(&json!([])), None);
    }

    #[test]
    fn test_portfolio_summary_line() {
        let position = PortfolioPosition {
            ticker: Some("AAPL".to_string()),
            position: 9.0,
            avg_price: 100.0,
            mkt_price: 105.0,
            unrealized_pnl: 45.0,
            ..Default::default()
        };
        assert_eq!(
            position.summary_line(),
            "AAPL: 9 shares @ $100.00 (Now: $105.00, P/L: +$45.00)"
        );
    }

    #[tokio::test]
    async fn test_auth_status() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/iserver/auth/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"authenticated":true,"connected":true,"competing":false,"fail":""}"#)
            .create_async()
            .await;

        let status = client(server.url()).auth_status().await.unwrap();
        assert!(status.authenticated);
        assert!(status.connected);
        assert!(!status.competing);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_search_contract() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/iserver/secdef/search")
            .match_body(Matcher::PartialJson(json!({"symbol": "AAPL", "secType": "STK"})))
            .with_status(200)
            .with_body(r#"[{"conid":"265598","companyName":"APPLE INC","symbol":"AAPL"}]"#)
            .create_async()
            .await;

        let conid = client(server.url()).search_contract("AAPL").await.unwrap();
        assert_eq!(conid, 265598);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_search_contract_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/iserver/secdef/search")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let err = client(server.url()).search_contract("ZZZZ").await.unwrap_err();
        assert!(matches!(err, GatewayError::ContractNotFound(s) if s == "ZZZZ"));
    }

    #[tokio::test]
    async fn test_snapshot_returns_matching_entry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/iserver/marketdata/snapshot")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("conids".into(), "265598".into()),
                Matcher::UrlEncoded("fields".into(), "31,84,86".into()),
            ]))
            .with_status(200)
            .with_body(r#"[{"conid":265598,"31":"C150.25","84":"150.20","86":"150.30"}]"#)
            .create_async()
            .await;

        let raw = client(server.url())
            .snapshot(265598, &["31", "84", "86"])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(raw["31"], "C150.25");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_snapshot_without_entry_is_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/iserver/marketdata/snapshot")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let raw = client(server.url()).snapshot(1, &["31"]).await.unwrap();
        assert!(raw.is_none());
    }

    #[tokio::test]
    async fn test_account_id() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/portfolio/accounts")
            .with_status(200)
            .with_body(r#"[{"id":"U1234567","currency":"USD"}]"#)
            .create_async()
            .await;

        let account = client(server.url()).account_id().await.unwrap();
        assert_eq!(account, "U1234567");
    }

    #[tokio::test]
    async fn test_submit_order_posts_orders_array() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/iserver/account/U1/orders")
            .match_body(Matcher::PartialJson(json!({
                "orders": [{"conid": 265598, "orderType": "MKT", "side": "BUY", "tif": "DAY", "quantity": 9}]
            })))
            .with_status(200)
            .with_body(r#"[{"order_id":"1234","order_status":"Submitted"}]"#)
            .create_async()
            .await;

        let order = OrderRequest::from_ticket(&OrderTicket::market(265598, OrderSide::Buy, 9), "t-1");
        let reply = client(server.url()).submit_order("U1", &order).await.unwrap();
        assert_eq!(reply[0]["order_id"], "1234");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_order_error_body_is_returned_not_raised() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/iserver/account/U1/orders")
            .with_status(400)
            .with_body(r#"{"error":"Available funds are insufficient, cash needed 1000"}"#)
            .create_async()
            .await;

        let order = OrderRequest::from_ticket(&OrderTicket::market(1, OrderSide::Buy, 1), "t-2");
        let reply = client(server.url()).submit_order("U1", &order).await.unwrap();
        assert!(reply["error"].as_str().unwrap().contains("cash needed"));
    }

    #[tokio::test]
    async fn test_confirm_order_sends_confirmed_flag() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/iserver/reply/abc-123")
            .match_body(Matcher::Json(json!({"confirmed": true})))
            .with_status(200)
            .with_body(r#"[{"order_id":"42"}]"#)
            .create_async()
            .await;

        let reply = client(server.url()).confirm_order("abc-123").await.unwrap();
        assert_eq!(reply[0]["order_id"], "42");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_strict_get_surfaces_http_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/iserver/auth/status")
            .with_status(401)
            .with_body("not authenticated")
            .create_async()
            .await;

        let err = client(server.url()).auth_status().await.unwrap_err();
        assert!(matches!(err, GatewayError::Status { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_portfolio_positions() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/portfolio/U1/positions/0")
            .with_status(200)
            .with_body(
                r#"[{"acctId":"U1","conid":265598,"contractDesc":"AAPL","position":9.0,
                    "mktPrice":105.0,"avgPrice":100.0,"unrealizedPnl":45.0,"currency":"USD"}]"#,
            )
            .create_async()
            .await;

        let positions = client(server.url()).portfolio_positions("U1").await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].conid, Some(265598));
        assert_eq!(positions[0].unrealized_pnl, 45.0);
    }
}
