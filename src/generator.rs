//! Sample order generator
//!
//! Produces realistic-looking orders for load testing and local runs. Used by
//! the `order-generator` binary and by tests.

use chrono::Utc;
use rand::seq::SliceRandom;
use rand::Rng;
use uuid::Uuid;

use crate::domain::{Delivery, Item, Order, OrderId, Payment};
use crate::error::Result;

const CITIES: &[&str] = &[
    "Moscow",
    "Saint Petersburg",
    "Novosibirsk",
    "Yekaterinburg",
    "Kazan",
    "Nizhny Novgorod",
    "Samara",
    "Omsk",
];
const STREETS: &[&str] = &["Lenina", "Mira", "Gagarina", "Pushkina", "Sovetskaya", "Sadovaya"];
const REGIONS: &[&str] = &["Moscow Oblast", "Leningrad Oblast", "Sverdlovsk Oblast", "Tatarstan"];
const CURRENCIES: &[&str] = &["RUB", "USD", "EUR"];
const BANKS: &[&str] = &["sber", "alpha", "tinkoff", "vtb"];
const LOCALES: &[&str] = &["ru", "en", "de"];
const DELIVERY_SERVICES: &[&str] = &["meest", "cdek", "boxberry", "dpd"];
const PRODUCTS: &[&str] = &["Mascaras", "Sneakers", "Backpack", "Headphones", "Scarf", "Mug"];
const BRANDS: &[&str] = &["Vivienne Sabo", "Nike", "Xiaomi", "Zara", "Samsung"];

fn pick<R: Rng + ?Sized>(rng: &mut R, choices: &'static [&'static str]) -> String {
    choices.choose(rng).copied().unwrap_or_default().to_string()
}

/// Generate one order with a fresh uuid v4 identifier.
pub fn random_order<R: Rng + ?Sized>(rng: &mut R) -> Result<Order> {
    let uid = Uuid::new_v4().simple().to_string();
    let mut order = Order::new(OrderId::parse(uid.clone())?);
    let track_number = format!("WBILM{}", rng.gen_range(100_000..1_000_000));

    order.track_number = track_number.clone();
    order.entry = "WBIL".to_string();
    order.delivery = Delivery {
        name: format!("Customer {}", rng.gen_range(0..1000)),
        phone: format!("+7{:09}", rng.gen_range(0..1_000_000_000u32)),
        zip: format!("{:06}", rng.gen_range(0..1_000_000u32)),
        city: pick(rng, CITIES),
        address: format!("{} st. {}", pick(rng, STREETS), rng.gen_range(1..100)),
        region: pick(rng, REGIONS),
        email: format!("user{}@example.com", rng.gen_range(0..10_000)),
    };

    order.items = (0..rng.gen_range(1..=5))
        .map(|_| random_item(rng, &track_number))
        .collect();
    let goods_total: i64 = order.items.iter().map(|i| i.total_price).sum();
    let delivery_cost = rng.gen_range(100..600);

    order.payment = Payment {
        transaction: uid,
        request_id: String::new(),
        currency: pick(rng, CURRENCIES),
        provider: "wbpay".to_string(),
        amount: goods_total + delivery_cost,
        payment_dt: Utc::now().timestamp(),
        bank: pick(rng, BANKS),
        delivery_cost,
        goods_total,
        custom_fee: 0,
    };
    order.locale = pick(rng, LOCALES);
    order.customer_id = format!("customer_{}", rng.gen_range(0..10_000));
    order.delivery_service = pick(rng, DELIVERY_SERVICES);
    order.shardkey = rng.gen_range(0..10).to_string();
    order.sm_id = rng.gen_range(0..100);
    order.date_created = Utc::now();
    order.oof_shard = rng.gen_range(0..5).to_string();
    Ok(order)
}

fn random_item<R: Rng + ?Sized>(rng: &mut R, track_number: &str) -> Item {
    let price: i64 = rng.gen_range(100..5100);
    let sale: i32 = rng.gen_range(0..50);
    Item {
        chrt_id: rng.gen_range(1_000_000..11_000_000),
        track_number: track_number.to_string(),
        price,
        rid: Uuid::new_v4().simple().to_string(),
        name: pick(rng, PRODUCTS),
        sale,
        size: rng.gen_range(0..50).to_string(),
        total_price: price * i64::from(100 - sale) / 100,
        nm_id: rng.gen_range(1_000_000..11_000_000),
        brand: pick(rng, BRANDS),
        status: rng.gen_range(100..600),
    }
}
