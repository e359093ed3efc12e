//! Lookup HTTP endpoint
//!
//! `GET /order?id=<order_uid>&format=html|json`. HTML is the default; any
//! format other than `json` renders HTML.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use hyper::header::{HeaderValue, ALLOW};
use hyper::{Method, StatusCode, Uri};
use tracing::error;

use super::service::{Detail, LookupService, OrderView};
use crate::domain::Order;
use crate::error::Error;
use crate::server::{reply, text, Endpoint, HttpResponse};

/// Response rendering selected by the `format` query parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Html,
    Json,
}

impl Format {
    fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some(f) if f.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Html,
        }
    }

    /// JSON callers get the full order; HTML accepts a confirmation.
    fn detail(self) -> Detail {
        match self {
            Format::Json => Detail::Full,
            Format::Html => Detail::Summary,
        }
    }
}

/// First value of a query parameter, percent-decoded.
pub fn query_param(uri: &Uri, name: &str) -> Option<String> {
    uri.query()?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if key != name {
            return None;
        }
        let value = value.replace('+', " ");
        Some(
            urlencoding::decode(&value)
                .map(|v| v.into_owned())
                .unwrap_or(value),
        )
    })
}

/// Serves `/order` on top of a [`LookupService`]
pub struct LookupHandler {
    service: Arc<LookupService>,
}

impl LookupHandler {
    pub fn new(service: Arc<LookupService>) -> Self {
        Self { service }
    }

    async fn lookup(&self, uri: &Uri) -> HttpResponse {
        let id = query_param(uri, "id").unwrap_or_default();
        let format = Format::parse(query_param(uri, "format").as_deref());

        match self.service.lookup(&id, format.detail()).await {
            Ok(found) => match format {
                Format::Json => render_json(&found.view),
                Format::Html => reply(StatusCode::OK, "text/html; charset=utf-8", render_html(&found.view)),
            },
            Err(e) => error_response(&e),
        }
    }
}

#[async_trait]
impl Endpoint for LookupHandler {
    fn name(&self) -> &'static str {
        "lookup"
    }

    async fn respond(&self, method: &Method, uri: &Uri) -> HttpResponse {
        match uri.path() {
            "/order" if method == Method::GET => self.lookup(uri).await,
            "/order" => {
                let mut response = text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
                response.headers_mut().insert(ALLOW, HeaderValue::from_static("GET"));
                response
            }
            _ => text(StatusCode::NOT_FOUND, "not found"),
        }
    }
}

fn error_response(e: &Error) -> HttpResponse {
    let status = e.status_code();
    if status.is_server_error() {
        error!(error = %e, "Lookup failed");
        text(status, "internal server error")
    } else {
        text(status, e.to_string())
    }
}

fn render_json(view: &OrderView) -> HttpResponse {
    let encoded = match view {
        OrderView::Full(order) => serde_json::to_vec(order.as_ref()),
        OrderView::Confirmed(id) => serde_json::to_vec(&serde_json::json!({ "order_uid": id })),
    };
    match encoded {
        Ok(body) => reply(StatusCode::OK, "application/json", body),
        Err(e) => error_response(&Error::from(e)),
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn row(out: &mut String, label: &str, value: impl std::fmt::Display) {
    let _ = write!(
        out,
        "<tr><th>{}</th><td>{}</td></tr>",
        label,
        escape(&value.to_string())
    );
}

/// Render an order page.
pub fn render_html(view: &OrderView) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Order {id}</title></head>\
         <body><h1>Order {id}</h1>",
        id = escape(view.id().as_str())
    );

    match view {
        OrderView::Confirmed(_) => {
            out.push_str("<p>The order exists. Request <code>format=json</code> for full details.</p>");
        }
        OrderView::Full(order) => render_order(&mut out, order),
    }

    out.push_str("</body></html>");
    out
}

fn render_order(out: &mut String, order: &Order) {
    out.push_str("<table>");
    row(out, "Track number", &order.track_number);
    row(out, "Entry", &order.entry);
    row(out, "Locale", &order.locale);
    row(out, "Customer", &order.customer_id);
    row(out, "Delivery service", &order.delivery_service);
    row(out, "Shard key", &order.shardkey);
    row(out, "SM id", order.sm_id);
    row(out, "Created", order.date_created.to_rfc3339());
    row(out, "OOF shard", &order.oof_shard);
    out.push_str("</table>");

    let d = &order.delivery;
    out.push_str("<h2>Delivery</h2><table>");
    row(out, "Name", &d.name);
    row(out, "Phone", &d.phone);
    row(out, "Zip", &d.zip);
    row(out, "City", &d.city);
    row(out, "Address", &d.address);
    row(out, "Region", &d.region);
    row(out, "Email", &d.email);
    out.push_str("</table>");

    let p = &order.payment;
    out.push_str("<h2>Payment</h2><table>");
    row(out, "Transaction", &p.transaction);
    row(out, "Currency", &p.currency);
    row(out, "Provider", &p.provider);
    row(out, "Amount", p.amount);
    row(out, "Bank", &p.bank);
    row(out, "Delivery cost", p.delivery_cost);
    row(out, "Goods total", p.goods_total);
    row(out, "Custom fee", p.custom_fee);
    out.push_str("</table>");

    out.push_str("<h2>Items</h2><table><tr><th>Name</th><th>Brand</th><th>Price</th><th>Sale</th><th>Total</th></tr>");
    for item in &order.items {
        let _ = write!(
            out,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}%</td><td>{}</td></tr>",
            escape(&item.name),
            escape(&item.brand),
            item.price,
            item.sale,
            item.total_price
        );
    }
    out.push_str("</table>");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryOrderStore;
    use crate::cache::{CacheMode, FingerprintCache};
    use crate::domain::{Item, OrderId};
    use crate::lookup::LookupConfig;
    use crate::metrics::ServiceMetrics;
    use http_body_util::BodyExt;

    fn handler() -> (LookupHandler, Arc<FingerprintCache>, Arc<InMemoryOrderStore>) {
        let cache = FingerprintCache::unbounded(CacheMode::Payload);
        let store = Arc::new(InMemoryOrderStore::new());
        let service = LookupService::new(
            LookupConfig::default(),
            cache.clone(),
            store.clone(),
            ServiceMetrics::new().unwrap(),
        );
        (LookupHandler::new(service), cache, store)
    }

    async fn get(handler: &LookupHandler, uri: &str) -> (StatusCode, String) {
        let response = handler.respond(&Method::GET, &uri.parse().unwrap()).await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[test]
    fn test_query_param_decoding() {
        let uri: Uri = "/order?format=json&id=a%20b+c".parse().unwrap();
        assert_eq!(query_param(&uri, "id").as_deref(), Some("a b c"));
        assert_eq!(query_param(&uri, "format").as_deref(), Some("json"));
        assert_eq!(query_param(&uri, "missing"), None);

        let bare: Uri = "/order?id".parse().unwrap();
        assert_eq!(query_param(&bare, "id").as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_status_codes() {
        let (handler, _, store) = handler();
        store.seed(Order::new(OrderId::parse("B2").unwrap()));

        assert_eq!(get(&handler, "/order?id=B2").await.0, StatusCode::OK);
        assert_eq!(get(&handler, "/order").await.0, StatusCode::BAD_REQUEST);
        assert_eq!(get(&handler, "/order?id=").await.0, StatusCode::BAD_REQUEST);
        assert_eq!(get(&handler, "/order?id=ZZZ").await.0, StatusCode::NOT_FOUND);
        assert_eq!(get(&handler, "/elsewhere").await.0, StatusCode::NOT_FOUND);

        store.set_failing(true);
        let (status, body) = get(&handler, "/order?id=C3").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.contains("unavailable"));
    }

    #[tokio::test]
    async fn test_non_get_is_rejected() {
        let (handler, _, _) = handler();
        let response = handler
            .respond(&Method::POST, &"/order?id=A1".parse().unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[ALLOW], "GET");
    }

    #[tokio::test]
    async fn test_json_format_returns_order() {
        let (handler, _, store) = handler();
        let mut order = Order::new(OrderId::parse("B2").unwrap());
        order.items.push(Item {
            name: "Mascaras".into(),
            price: 453,
            ..Default::default()
        });
        store.seed(order.clone());

        let (status, body) = get(&handler, "/order?id=B2&format=json").await;
        assert_eq!(status, StatusCode::OK);
        let decoded: Order = serde_json::from_str(&body).unwrap();
        assert_eq!(decoded, order);
    }

    #[tokio::test]
    async fn test_html_escapes_fields() {
        let (handler, _, store) = handler();
        let mut order = Order::new(OrderId::parse("B2").unwrap());
        order.delivery.name = "<script>alert(1)</script>".into();
        store.seed(order);

        let (_, body) = get(&handler, "/order?id=B2").await;
        assert!(body.contains("&lt;script&gt;"));
        assert!(!body.contains("<script>"));
    }

    #[tokio::test]
    async fn test_html_presence_hit_renders_confirmation() {
        let cache = FingerprintCache::unbounded(CacheMode::Presence);
        let store = Arc::new(InMemoryOrderStore::new());
        let service = LookupService::new(
            LookupConfig::default(),
            cache.clone(),
            store.clone(),
            ServiceMetrics::new().unwrap(),
        );
        let handler = LookupHandler::new(service);
        cache.set("A1", None);

        let (status, body) = get(&handler, "/order?id=A1").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("The order exists"));
        assert_eq!(store.calls().fetches, 0);
    }
}
