use clap::Parser;
use exchange::bus::messages::AdmissionMessage;
use exchange::bus::{topics, BusMessage, EventBus, MemoryBus};
use exchange::config::{RuntimeConfig, SagaConfig};
use exchange::engine::entry::{Order, OrderDirection, OrderStatus, OrderType, Symbol};
use exchange::engine::matchlogic::MatchingEngine;
use exchange::gateway::{MemoryLedger, MemoryOrderStore};
use exchange::lock::MemoryLockStore;
use exchange::server::{Adapters, Server};
use hdrhistogram::Histogram;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, Instant};

const SYMBOL: &str = "BTC/USDT";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of orders to submit
    #[arg(short, long, default_value = "10000")]
    orders: usize,

    /// Number of distinct users placing orders
    #[arg(short, long, default_value = "50")]
    users: u64,

    /// Seed for the order generator
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Share of market orders, in percent
    #[arg(short, long, default_value = "10")]
    market_pct: u32,

    /// Time the matching engine alone instead of the whole pipeline
    #[arg(long)]
    engine_only: bool,
}

struct OrderGen {
    rng: StdRng,
    users: u64,
    market_pct: u32,
}

impl OrderGen {
    /// Returns the order and the amount its admission must freeze
    fn next(&mut self, id: usize) -> (Order, Decimal) {
        let user = self.rng.gen_range(1..=self.users);
        let direction = if self.rng.gen_bool(0.5) {
            OrderDirection::Buy
        } else {
            OrderDirection::Sell
        };
        let price = Decimal::new(self.rng.gen_range(9_500..=10_500), 2);
        let amount = Decimal::new(self.rng.gen_range(1..=100), 2);
        let market = self.rng.gen_range(0..100) < self.market_pct;
        let order = if market {
            let requested = match direction {
                OrderDirection::Buy => price * amount,
                OrderDirection::Sell => amount,
            };
            Order::new(
                format!("B{id}"),
                user,
                SYMBOL,
                OrderType::Market,
                direction,
                Decimal::ZERO,
                requested,
            )
        } else {
            Order::new(format!("B{id}"), user, SYMBOL, OrderType::Limit, direction, price, amount)
        };
        let freeze = match (direction, market) {
            (OrderDirection::Buy, false) => price * amount,
            _ => order.requested_amount,
        };
        (order, freeze)
    }
}

fn print_results(total: usize, elapsed: Duration, hist: &Histogram<u64>) {
    println!("\nBenchmark Results:");
    println!("Total Orders: {}", total);
    println!("Average TPS: {:.2}", total as f64 / elapsed.as_secs_f64());
    println!("\nLatency Distribution (microseconds):");
    println!("p50: {}", hist.value_at_percentile(50.0));
    println!("p90: {}", hist.value_at_percentile(90.0));
    println!("p95: {}", hist.value_at_percentile(95.0));
    println!("p99: {}", hist.value_at_percentile(99.0));
    println!("p99.9: {}", hist.value_at_percentile(99.9));
}

fn run_engine(args: &Args, gen: &mut OrderGen) -> anyhow::Result<()> {
    let engine = MatchingEngine::new(SYMBOL, 100);
    let mut hist = Histogram::<u64>::new(3)?;
    let mut trades = 0;
    let started = Instant::now();
    for id in 0..args.orders {
        let (mut order, _) = gen.next(id);
        order.status = OrderStatus::Trading;
        let start = Instant::now();
        let outcome = engine.trade(order)?;
        hist.record(start.elapsed().as_micros() as u64)?;
        trades += outcome.trades.len();
    }
    print_results(args.orders, started.elapsed(), &hist);
    println!("Trades: {}", trades);
    Ok(())
}

async fn run_pipeline(args: &Args, gen: &mut OrderGen) -> anyhow::Result<()> {
    let bus = Arc::new(MemoryBus::new());
    let store = Arc::new(MemoryOrderStore::new());
    let ledger = Arc::new(MemoryLedger::new());
    for user in 1..=args.users {
        ledger.deposit(user, "USDT", Decimal::new(1_000_000_000, 0));
        ledger.deposit(user, "BTC", Decimal::new(1_000_000, 0));
    }
    let config = RuntimeConfig {
        metrics_addr: String::new(),
        symbols: vec![SYMBOL.to_string()],
        saga: SagaConfig {
            publish_backoff_ms: 1,
            requeue_backoff_ms: 1,
            ..SagaConfig::default()
        },
        ..RuntimeConfig::default()
    };
    let adapters = Adapters {
        bus: bus.clone(),
        store: store.clone(),
        ledger: ledger.clone(),
        locks: Arc::new(MemoryLockStore::new()),
    };
    let mut server = Server::builder(config, adapters);
    server.start().await?;
    let engine = server
        .registry()
        .get(SYMBOL)
        .ok_or_else(|| anyhow::anyhow!("no engine for {}", SYMBOL))?;
    let symbol = Symbol::new(SYMBOL, "BTC", "USDT");

    let mut hist = Histogram::<u64>::new(3)?;
    let started = Instant::now();
    for id in 0..args.orders {
        let (order, freeze) = gen.next(id);
        let order_id = order.order_id.clone();
        let admission = AdmissionMessage::new(
            order.user_id,
            &order_id,
            freeze,
            &symbol,
            order.direction,
        );
        store.insert(order);

        let start = Instant::now();
        bus.send_sync(BusMessage::json(topics::ORDER_ADD, &order_id, &admission)?)
            .await?;
        // live in the book, or finished and persisted
        loop {
            let status = store.get(&order_id).map(|o| o.status);
            let settled = matches!(status, Some(OrderStatus::Completed | OrderStatus::Canceled));
            if settled || engine.get_order(&order_id).is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        hist.record(start.elapsed().as_micros() as u64)?;
    }
    let elapsed = started.elapsed();
    server.stop().await;

    print_results(args.orders, elapsed, &hist);
    println!(
        "Completed: {}, Canceled: {}, Resting: {}",
        store.count_status(OrderStatus::Completed),
        store.count_status(OrderStatus::Canceled),
        store.count_status(OrderStatus::Trading)
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::try_init().unwrap_or_default();
    let args = Args::parse();
    let mut gen = OrderGen {
        rng: StdRng::seed_from_u64(args.seed),
        users: args.users.max(1),
        market_pct: args.market_pct.min(100),
    };

    println!(
        "Starting benchmark with {} orders from {} users, {}% market",
        args.orders, args.users, args.market_pct
    );
    if args.engine_only {
        run_engine(&args, &mut gen)
    } else {
        run_pipeline(&args, &mut gen).await
    }
}
