//! End-to-end smoke test over the full SG -> SQ -> OE pipeline, wired with
//! `PaperGateway` and the in-memory SQ/PM stores so the test needs neither a
//! live Redis nor SQLite instance.

use rust_decimal_macros::dec;
use std::sync::Arc;
use tradecore::application::order_executor::{OrderExecutor, ProcessOutcome};
use tradecore::application::position_manager::PositionManager;
use tradecore::application::position_manager::store::InMemoryPositionStore;
use tradecore::application::signal_generator::SignalGenerator;
use tradecore::application::signal_generator::soft_exit::{self, SoftExitEngine};
use tradecore::application::signal_queue::SignalQueue;
use tradecore::application::signal_queue::store::InMemorySortedSetStore;
use tradecore::application::strategies::StrategyRegistry;
use tradecore::config::{BackupOrderEnvConfig, ExecutionEnvConfig, QueueEnvConfig, RegimeEnvConfig, SignalGeneratorEnvConfig, SoftExitEnvConfig};
use tradecore::domain::types::{Signal, SignalSide, SignalType};
use tradecore::infrastructure::paper_gateway::PaperGateway;

fn queue_config() -> QueueEnvConfig {
    QueueEnvConfig {
        redis_url: String::new(),
        queue_key: "trading:signals".into(),
        processing_key: "trading:signals:processing".into(),
        failed_key: "trading:signals:failed".into(),
        max_retries: 5,
        backoff_base_secs: 30,
        backoff_cap_secs: 3600,
        zombie_timeout: std::time::Duration::from_secs(300),
    }
}

fn regime_config() -> RegimeEnvConfig {
    RegimeEnvConfig {
        index_symbols: vec![],
        inverse_symbols: vec![],
        ma_period: 200,
        exit_score_adjustment_enabled: true,
        gradual_exit_enabled: true,
        gradual_exit_threshold_25: 40,
        gradual_exit_threshold_50: 50,
        add_position_enabled: true,
        add_position_min_profit_pct: dec!(2),
        add_position_min_signal_score: 60,
        add_position_pct: dec!(5),
        add_position_cooldown_minutes: 60,
        realtime_rotation_enabled: true,
        realtime_rotation_min_signal_score: 75,
        realtime_rotation_min_score_diff: 20,
    }
}

fn execution_config() -> ExecutionEnvConfig {
    ExecutionEnvConfig {
        price_deviation_pct: dec!(5),
        min_usable_funds: dec!(1000),
        fee_pct: dec!(0.1),
        kelly_min_trades: 15,
        kelly_min_winrate: dec!(60),
        kelly_conservative_factor: dec!(0.4),
        kelly_hard_cap_pct: dec!(20),
        same_side_same_day_cap: 1,
        external_call_timeout_secs: 10,
    }
}

fn backup_config() -> BackupOrderEnvConfig {
    BackupOrderEnvConfig {
        atr_weight: 40,
        atr_ratio_high: dec!(0.03),
        atr_ratio_medium: dec!(0.02),
        atr_ratio_low: dec!(0.015),
        price_weight: 20,
        signal_weight: 20,
        weak_signal_threshold: 60,
        stop_loss_weight: 20,
        wide_stop_loss_pct: dec!(0.05),
        risk_threshold: 60,
        high_value_threshold: dec!(50_000),
    }
}

fn signal_generator_config() -> SignalGeneratorEnvConfig {
    SignalGeneratorEnvConfig {
        poll_interval_secs: 60,
        use_db_klines: false,
        db_klines_history_days: 90,
        api_klines_latest_days: 90,
        rotation_check_interval_secs: 30,
        failed_salvage_interval_secs: 300,
        failed_salvage_max_age_secs: 86_400,
    }
}

fn soft_exit_config() -> SoftExitEnvConfig {
    SoftExitEnvConfig {
        enabled: true,
        atr_period: 22,
        chandelier_k: 3.0,
        donchian_n: 20,
        poll_interval_secs: 60,
        signal_cooldown_secs: 900,
    }
}

/// A freshly published BUY signal is picked up by the executor, which either
/// submits it against the paper gateway or defers it until the market
/// reopens — the same "accept either" shape the rest of this crate uses for
/// any gate whose outcome depends on wall-clock market hours.
#[tokio::test]
async fn a_published_buy_signal_is_submitted_or_deferred_by_the_executor() {
    let gateway = Arc::new(PaperGateway::new(dec!(100_000)));
    let queue = Arc::new(SignalQueue::new(Arc::new(InMemorySortedSetStore::new()), queue_config(), "acct-1"));
    let positions = Arc::new(PositionManager::new(Arc::new(InMemoryPositionStore::new()), "acct-1", true));

    let executor = OrderExecutor::new(
        gateway.clone(),
        gateway.clone(),
        queue.clone(),
        positions.clone(),
        execution_config(),
        regime_config(),
        backup_config(),
    );

    let signal = Signal::new("AAPL.US", SignalSide::Buy, SignalType::Buy, 70, dec!(100), "rubric", "acct-1");
    assert!(queue.publish(signal, None).await.unwrap());

    match executor.process_one().await.unwrap() {
        ProcessOutcome::Submitted { symbol, .. } => {
            assert_eq!(symbol, "AAPL.US");
            let held = positions.has("AAPL.US").await.unwrap();
            assert!(held, "a submitted BUY must be reflected in the position manager");
        }
        ProcessOutcome::Deferred { symbol, .. } => assert_eq!(symbol, "AAPL.US"),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

/// The signal generator scans a symbol with ample synthetic history and
/// never errors; when a strategy clears its threshold the resulting signal
/// names the symbol it was scored for.
#[tokio::test]
async fn scan_entry_against_the_paper_gateway_never_errors() {
    let gateway = Arc::new(PaperGateway::new(dec!(100_000)));
    let queue = Arc::new(SignalQueue::new(Arc::new(InMemorySortedSetStore::new()), queue_config(), "acct-1"));
    let positions = Arc::new(PositionManager::new(Arc::new(InMemoryPositionStore::new()), "acct-1", true));

    let generator = SignalGenerator::new(
        gateway.clone(),
        None::<Arc<tradecore::infrastructure::persistence::SqliteHistoryStore>>,
        queue.clone(),
        positions,
        StrategyRegistry::default(),
        signal_generator_config(),
        regime_config(),
    );

    let regime = generator.classify_regime().await;
    let result = generator.scan_entry("AAPL.US", &regime).await.unwrap();
    if let Some(signal) = result {
        assert_eq!(signal.symbol, "AAPL.US");
        assert_eq!(signal.side, SignalSide::Buy);
    }
}

/// A hand-built series with a sharp final-bar drop trips the Chandelier
/// stop (the pure detector also covered in `soft_exit.rs`'s own unit tests,
/// exercised here against a full `Candle` series for good measure).
#[test]
fn a_sharp_drop_trips_the_chandelier_stop() {
    use tradecore::domain::ports::Candle;
    use chrono::Utc;

    let config = soft_exit_config();
    let mut candles = Vec::new();
    let mut price = dec!(100);
    for i in 0..30 {
        candles.push(Candle {
            symbol: "AAPL.US".into(),
            open: price,
            high: price + dec!(1),
            low: price - dec!(1),
            close: price,
            volume: dec!(1_000_000),
            trade_date: Utc::now() - chrono::Duration::days(30 - i),
        });
        price += dec!(0.2);
    }
    candles.push(Candle {
        symbol: "AAPL.US".into(),
        open: price,
        high: price,
        low: price - dec!(20),
        close: price - dec!(20),
        volume: dec!(1_000_000),
        trade_date: Utc::now(),
    });

    let trigger = soft_exit::evaluate(&candles, &config);
    assert!(trigger.is_some(), "a sharp drop below the trailing stop should trigger a soft exit");
}

/// The engine's `scan_once` drives its own candle fetch through the paper
/// gateway end to end (rather than a hand-built series) and must never error
/// or double-count a held symbol within a single pass.
#[tokio::test]
async fn soft_exit_engine_scan_once_is_idempotent_and_never_errors() {
    let gateway = Arc::new(PaperGateway::new(dec!(100_000)));
    let queue = Arc::new(SignalQueue::new(Arc::new(InMemorySortedSetStore::new()), queue_config(), "acct-1"));
    let positions = Arc::new(PositionManager::new(Arc::new(InMemoryPositionStore::new()), "acct-1", true));
    positions.add("AAPL.US", dec!(10), dec!(90), "ord-0").await.unwrap();

    let engine = SoftExitEngine::new(
        gateway,
        None::<Arc<tradecore::infrastructure::persistence::SqliteHistoryStore>>,
        queue,
        positions,
        signal_generator_config(),
        soft_exit_config(),
    );

    let first = engine.scan_once().await.unwrap();
    let second = engine.scan_once().await.unwrap();
    assert!(first <= 1);
    assert!(second <= 1);
}
