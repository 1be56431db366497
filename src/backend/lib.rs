// src/backend/lib.rs

pub mod adapter;
pub mod api;
pub mod error;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod testing;

use crate::models::config::EngineConfig;
use crate::models::init::InitArgs;
use crate::services::timers;
use crate::utils::rng::seed_from_raw_rand;
use crate::utils::time::{get_current_time_ns, secs_to_ns};
use std::io;
use std::time::Duration;
use validator::Validate;

// The engine draws from its own seeded pool; nothing may fall back to an
// OS source that does not exist on the IC.
#[cfg(all(target_arch = "wasm32", target_os = "unknown"))]
fn refuse_getrandom(_dest: &mut [u8]) -> Result<(), getrandom::Error> {
    Err(getrandom::Error::UNSUPPORTED)
}

#[cfg(all(target_arch = "wasm32", target_os = "unknown"))]
getrandom::register_custom_getrandom!(refuse_getrandom);

/// Routes `tracing` output to the canister log.
struct CanisterLogWriter;

impl io::Write for CanisterLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let line = String::from_utf8_lossy(buf);
        ic_cdk::api::print(line.trim_end());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn init_logging() {
    let installed = tracing_subscriber::fmt()
        .with_writer(|| CanisterLogWriter)
        .with_ansi(false)
        .without_time()
        .with_max_level(tracing::Level::INFO)
        .try_init();
    if installed.is_err() {
        ic_cdk::println!("Tracing subscriber already installed.");
    }
}

/// Seeds the shared entropy pool once the install/upgrade message has
/// committed; `raw_rand` cannot be awaited from `init` itself.
fn schedule_entropy_seed() {
    ic_cdk_timers::set_timer(Duration::ZERO, || {
        ic_cdk::spawn(async {
            match seed_from_raw_rand(&state::entropy()).await {
                Ok(()) => ic_cdk::println!("Entropy pool seeded."),
                Err(e) => ic_cdk::println!("ERROR: Failed to seed entropy pool: {}", e),
            }
        });
    });
}

fn start_engine(config: EngineConfig) {
    let interval = config.maintenance_interval_secs;
    state::install_engine(config);
    schedule_entropy_seed();
    timers::start_maintenance(interval);
}

/// Timers live on the heap, so running countdowns are rebuilt from the
/// deadlines kept in the media registry. Deadlines already in the past fire
/// on the first maintenance tick.
fn rearm_media_timers() {
    let now = get_current_time_ns();
    let mut rearmed = 0usize;
    for item in storage::media::media_with_deadline() {
        let (Some(ttl_secs), Some(deadline)) = (item.ttl_secs, item.expires_at) else {
            continue;
        };
        let armed_at = deadline.saturating_sub(secs_to_ns(ttl_secs));
        let armed = state::with_engine(|engine| engine.arm_media_timer(&item.media_id, ttl_secs, armed_at));
        match armed {
            Ok(Ok(timer)) => {
                timers::schedule_media_expiry(&timer, now);
                rearmed += 1;
            }
            Ok(Err(e)) | Err(e) => ic_cdk::println!("WARN: Could not re-arm timer for media {}: {}", item.media_id, e),
        }
    }
    ic_cdk::println!("Re-armed {} media timers.", rearmed);
}

#[ic_cdk::init]
fn init(args: InitArgs) {
    init_logging();
    if let Err(e) = storage::config::init_config(args.admin_principal, args.relay_principal, args.min_cycles_threshold) {
        ic_cdk::trap(&format!("Failed to initialize configuration: {}", e));
    }

    let config = args.config.unwrap_or_default();
    if let Err(e) = config.validate() {
        ic_cdk::trap(&format!("Invalid engine configuration: {}", e));
    }
    if let Err(e) = storage::config::set_engine_config(config.clone()) {
        ic_cdk::trap(&format!("Failed to store engine configuration: {}", e));
    }

    start_engine(config);
    ic_cdk::println!("Creator access canister initialized.");
}

#[ic_cdk::post_upgrade]
fn post_upgrade() {
    init_logging();
    start_engine(storage::config::get_engine_config());
    rearm_media_timers();
    ic_cdk::println!("Creator access canister upgraded.");
}

#[ic_cdk::pre_upgrade]
fn pre_upgrade() {
    state::persist_metrics();
}

// Export Candid interface. The macro expands here, so every type named in an
// endpoint signature has to be in scope.
#[allow(unused_imports)]
use crate::{
    api::*,
    error::AccessError,
    models::{common::*, *},
    services::MaintenanceReport,
    storage::OutboundCode,
};

ic_cdk::export_candid!();
