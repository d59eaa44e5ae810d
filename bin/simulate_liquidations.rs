//! Run a deterministic liquidation cascade against an in-memory system.
//!
//! Usage:
//!   cargo run --bin simulate_liquidations
//!
//! Optional .env / environment:
//!   CDP_CONFIG=/path/to/config.json   protocol parameters (defaults otherwise)
//!   RUST_LOG=debug                    log filter

use odra::casper_types::account::AccountHash;
use odra::casper_types::U256;
use odra::prelude::*;
use tracing_subscriber::EnvFilter;

use trove_cdp_protocol::hints;
use trove_cdp_protocol::interfaces::{BalanceLedger, Externals, FixedPriceFeed, TokenLedger};
use trove_cdp_protocol::math::to_fixed;
use trove_cdp_protocol::{CdpSystem, HaltReason, ProtocolConfig, SystemAccounts};

const BORROWERS: u8 = 12;

fn account(byte: u8) -> Address {
    Address::Account(AccountHash::new([byte; 32]))
}

fn load_config() -> ProtocolConfig {
    match std::env::var("CDP_CONFIG") {
        Ok(path) => {
            let json = std::fs::read_to_string(&path).expect("Failed to read CDP_CONFIG");
            ProtocolConfig::from_json_str(&json).expect("Invalid protocol config")
        }
        Err(_) => ProtocolConfig::default(),
    }
}

fn main() {
    // Load environment from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Trove CDP Liquidation Simulation ===");
    println!();

    let config = load_config();
    let accounts = SystemAccounts { protocol: account(200), fee_recipient: account(201) };
    let mut system = CdpSystem::new(config, accounts).expect("Failed to create system");
    let mut feed = FixedPriceFeed::new(to_fixed(200));
    let mut stable = BalanceLedger::new();
    let mut coll = BalanceLedger::new();
    let liquidator = account(99);

    // ========== Open troves ==========
    println!("--- Opening {} troves at price 200 ---", BORROWERS);
    // Safest first so the system never dips below the CCR while opening
    for byte in (1..=BORROWERS).rev() {
        let owner = account(byte);
        let deposit = to_fixed(12 + 2 * byte as u64);
        let borrow = to_fixed(2_000);
        coll.mint(&owner, deposit).expect("mint collateral");

        let debt = borrow + system.borrowing_fee(borrow, 0).expect("fee") + system.config().gas_compensation();
        let nicr = trove_cdp_protocol::math::compute_nominal_cr(deposit, debt).expect("nicr");
        let insert = hints::insert_hints(system.troves(), nicr, 15, byte as u64).expect("hints");

        let mut ext = Externals::new(&feed, &mut stable, &mut coll);
        system
            .open_trove(&mut ext, owner, deposit, borrow, insert)
            .expect("Failed to open trove");
    }

    // ========== Fill the stability pool ==========
    let mut ext = Externals::new(&feed, &mut stable, &mut coll);
    for byte in (BORROWERS - 3)..=BORROWERS {
        system
            .provide_to_stability_pool(&mut ext, account(byte), to_fixed(1_500))
            .expect("Failed to deposit");
    }
    print_status(&system, to_fixed(200));

    // ========== Price drops ==========
    let batch = system.config().max_liquidation_batch;
    for price in [170u64, 150, 130] {
        feed.set_price(to_fixed(price));
        println!();
        println!("--- Price drops to {} ---", price);

        let mut ext = Externals::new(&feed, &mut stable, &mut coll);
        match system.liquidate_troves(&mut ext, liquidator, batch) {
            Ok(summary) => {
                println!(
                    "Liquidated {} troves: {} offset, {} redistributed",
                    summary.liquidated().count(),
                    summary.totals.debt_to_offset,
                    summary.totals.debt_to_redistribute
                );
                if !summary.totals.coll_surplus.is_zero() {
                    println!("Collateral surplus left for owners: {}", summary.totals.coll_surplus);
                }
                if let HaltReason::Failed { owner, error } = &summary.halt {
                    println!("Halted at {:?}: {}", owner, error);
                }
            }
            Err(error) => println!("Nothing liquidated: {}", error),
        }
        print_status(&system, to_fixed(price));
    }

    // ========== Books ==========
    let report = system.audit(&stable, &coll).expect("audit");
    println!();
    println!("Liquidator collateral: {}", coll.balance_of(&liquidator));
    println!("Liquidator stablecoin: {}", stable.balance_of(&liquidator));
    println!("Books consistent: {}", report.is_consistent(U256::from(1_000_000_000_000u64)));
}

fn print_status(system: &CdpSystem, price: U256) {
    let status = system.get_status();
    let tcr = system.tcr(price).unwrap_or_default();
    let recovery = system.is_recovery_mode(price).unwrap_or(false);
    println!(
        "troves={} coll={} debt={} pool={} tcr={} recovery={}",
        status.trove_count, status.entire_coll, status.entire_debt, status.stability_pool_deposits, tcr, recovery
    );
}
