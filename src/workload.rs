//! The reference trading workload.
//!
//! Each iteration places a BUY limit order, pauses, places a SELL limit order
//! priced just below the BUY band so the two tend to cross, pauses again, and
//! reads the order book for the symbol.

use serde::Deserialize;
use std::collections::HashMap;
use std::ops::RangeInclusive;
use tokio::time::Duration;

use crate::scenario::{Assertion, Check, RandomValue, RequestConfig, Scenario, Step, ThinkTime};

/// Step names, also the `step` tag of request series.
pub const PLACE_BUY_ORDER: &str = "place_buy_order";
pub const PLACE_SELL_ORDER: &str = "place_sell_order";
pub const GET_ORDER_BOOK: &str = "get_order_book";

/// One side of the order flow.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OrderSide {
    pub quantity: f64,
    pub price_min: f64,
    pub price_max: f64,
    #[serde(default, deserialize_with = "crate::utils::deserialize_duration")]
    pub think_time: Duration,
}

impl OrderSide {
    fn price_band(&self) -> RangeInclusive<f64> {
        self.price_min..=self.price_max
    }
}

/// Parameters of the order workload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrderWorkload {
    pub symbol: String,
    pub buy: OrderSide,
    pub sell: OrderSide,
}

impl Default for OrderWorkload {
    fn default() -> Self {
        Self {
            symbol: "BTC/USD".to_string(),
            buy: OrderSide {
                quantity: 0.1,
                price_min: 50_000.0,
                price_max: 50_100.0,
                think_time: Duration::from_millis(500),
            },
            sell: OrderSide {
                quantity: 0.05,
                price_min: 49_900.0,
                price_max: 50_000.0,
                think_time: Duration::from_secs(1),
            },
        }
    }
}

impl OrderWorkload {
    /// Path segment of the order book endpoint, `BTC/USD` becomes `BTC_USD`.
    pub fn book_symbol(&self) -> String {
        self.symbol.replace('/', "_")
    }

    fn order_body(&self, side: &str, quantity: f64, price_var: &str) -> String {
        // serde_json quotes and escapes the symbol; the price placeholder is
        // filled per request.
        let symbol = serde_json::Value::String(self.symbol.clone()).to_string();
        format!(
            r#"{{"symbol":{},"side":"{}","orderType":"LIMIT","quantity":{},"price":${{{}}}}}"#,
            symbol, side, quantity, price_var
        )
    }

    fn order_step(&self, name: &str, side: &str, order: &OrderSide, check: &str) -> Step {
        let price_var = format!("{}_price", side.to_lowercase());
        Step {
            name: name.to_string(),
            request: RequestConfig::post_json(
                "/orders",
                self.order_body(side, order.quantity, &price_var),
            ),
            random_values: vec![RandomValue::new(&price_var, order.price_band(), 2)],
            checks: vec![Check::new(check, Assertion::StatusCode(201))],
            think_time: (!order.think_time.is_zero())
                .then_some(ThinkTime::Fixed(order.think_time)),
        }
    }

    /// Build the scenario every virtual user runs.
    pub fn scenario(&self) -> Scenario {
        let book = Step {
            name: GET_ORDER_BOOK.to_string(),
            request: RequestConfig {
                method: "GET".to_string(),
                path: format!("/orderbook/{}", self.book_symbol()),
                body: None,
                headers: HashMap::new(),
            },
            random_values: vec![],
            checks: vec![Check::new("Order book retrieved", Assertion::StatusCode(200))],
            think_time: None,
        };

        Scenario {
            name: format!("orders {}", self.symbol),
            steps: vec![
                self.order_step(PLACE_BUY_ORDER, "BUY", &self.buy, "BUY order created"),
                self.order_step(PLACE_SELL_ORDER, "SELL", &self.sell, "SELL order created"),
                book,
            ],
        }
    }
}
