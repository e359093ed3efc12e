//! Order generator
//!
//! Publishes sample orders to the orders topic, keyed by `order_uid`.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use tracing::{error, info};

use ordercache::generator::random_order;

/// Publish sample orders to Kafka
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Kafka bootstrap servers
    #[arg(long, env = "BROKERS", default_value = "localhost:9092")]
    brokers: String,

    /// Destination topic
    #[arg(long, env = "TOPIC", default_value = "orders")]
    topic: String,

    /// Number of orders to generate
    #[arg(long, env = "COUNT", default_value = "10")]
    count: usize,

    /// Pause between orders in milliseconds
    #[arg(long, env = "INTERVAL", default_value = "1000")]
    interval: u64,

    /// Print orders instead of publishing them
    #[arg(long)]
    print_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();

    let producer: Option<FutureProducer> = if args.print_only {
        None
    } else {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", &args.brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .create()
            .context("failed to create Kafka producer")?;
        info!(brokers = %args.brokers, topic = %args.topic, "Connected to Kafka");
        Some(producer)
    };

    info!(count = args.count, interval_ms = args.interval, "Generating orders");
    let mut rng = rand::thread_rng();
    let interval = Duration::from_millis(args.interval);

    for n in 1..=args.count {
        let order = random_order(&mut rng)?;
        let payload = order.encode()?;

        match &producer {
            None => println!("{}", String::from_utf8_lossy(&payload)),
            Some(producer) => {
                let record = FutureRecord::to(&args.topic)
                    .key(order.id().as_str())
                    .payload(payload.as_ref());
                match producer.send(record, Duration::from_secs(5)).await {
                    Ok(_) => info!(n, order_uid = %order.id(), "Order sent"),
                    Err((e, _)) => error!(n, order_uid = %order.id(), error = %e, "Failed to send order"),
                }
            }
        }

        if n < args.count && !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }

    info!("Order generation completed");
    Ok(())
}
