// src/backend/api.rs
// Candid endpoints. Every owner-bound call acts on `caller()`.

use crate::{
    error::AccessError,
    metrics::MetricsSnapshot,
    models::{
        common::*, CodePurpose, CodeStatus, CodeTicket, EngineConfig, GateDecision, LedgerReceipt, LockState,
        MediaItem, MediaTimer, PendingAction, PendingActionKind, ResumedAction, TimerStatus, VerifiedCode,
    },
    services::{timers, MaintenanceReport},
    state::{persist_metrics, with_engine},
    storage::{
        self,
        config::set_engine_config,
        media::{get_media, insert_media, list_media_by_owner, remove_media, update_media},
        OutboundCode,
    },
    utils::{
        guards::{admin_guard, authenticated_caller, check_cycles, relay_guard},
        rate_limit::rate_guard,
        time::get_current_time_ns,
    },
};
use candid::{CandidType, Deserialize, Principal};
use ic_cdk::api::canister_balance128;
use ic_cdk_macros::{query, update};
use validator::{Validate, ValidationError};

const MAX_PAGE: u32 = 100;

// --- Validation Helper ---
fn validate_request<T: Validate>(req: &T) -> Result<(), AccessError> {
    req.validate().map_err(|e| AccessError::invalid_input(e.to_string()))
}

fn validate_media_id(media_id: &str) -> Result<(), ValidationError> {
    if media_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        Ok(())
    } else {
        Err(ValidationError::new("media_id_charset"))
    }
}

/// Journals an applied movement. The balance has already changed by the time
/// this runs, so a journal failure is logged rather than surfaced.
fn journal(receipt: &LedgerReceipt) {
    if let Err(e) = storage::append_ledger_entry(receipt.clone()) {
        ic_cdk::println!("WARN: Ledger journal append failed for {}: {}", receipt.principal, e);
    }
}

/// Flattens the engine slot error into the call's own result.
fn engine_call<T>(f: impl FnOnce(&crate::services::AccessEngine) -> Result<T, AccessError>) -> Result<T, AccessError> {
    with_engine(f)?
}

fn owned_media(owner: Principal, media_id: &str) -> Result<MediaItem, AccessError> {
    let item = get_media(media_id).ok_or_else(|| AccessError::NotFound(format!("media {}", media_id)))?;
    if item.owner != owner {
        return Err(AccessError::NotAuthorized("Caller does not own this media item.".to_string()));
    }
    Ok(item)
}

// --- Request/Response Structs ---

#[derive(CandidType, Deserialize, Clone, Debug, Validate)]
pub struct SetSecretRequest {
    #[validate(length(min = 1, max = 128))]
    pub secret: String,
    #[validate(length(min = 1, max = 128))]
    pub confirm: String,
}

#[derive(CandidType, Deserialize, Clone, Debug, Validate)]
pub struct ChangeSecretRequest {
    #[validate(length(min = 1, max = 128))]
    pub current: String,
    #[validate(length(min = 1, max = 128))]
    pub secret: String,
    #[validate(length(min = 1, max = 128))]
    pub confirm: String,
    #[validate(range(max = 86_400))]
    pub auto_lock_secs: Option<u32>,
}

#[derive(CandidType, Deserialize, Clone, Debug, Validate)]
pub struct RecoverSecretRequest {
    #[validate(length(min = 3, max = 254))]
    pub target: String,
    #[validate(length(min = 1, max = 16))]
    pub code: String,
    #[validate(length(min = 1, max = 128))]
    pub secret: String,
    #[validate(length(min = 1, max = 128))]
    pub confirm: String,
}

#[derive(CandidType, Deserialize, Clone, Debug, Validate)]
pub struct RecoveryAddressRequest {
    #[validate(length(min = 3, max = 254))]
    pub target: String,
    #[validate(length(min = 1, max = 16))]
    pub code: String,
}

#[derive(CandidType, Deserialize, Clone, Debug, Validate)]
pub struct CodeRequest {
    pub purpose: CodePurpose,
    #[validate(length(min = 3, max = 254))]
    pub target: String,
}

#[derive(CandidType, Deserialize, Clone, Debug, Validate)]
pub struct VerifyCodeRequest {
    pub purpose: CodePurpose,
    #[validate(length(min = 3, max = 254))]
    pub target: String,
    #[validate(length(min = 1, max = 16))]
    pub code: String,
}

#[derive(CandidType, Deserialize, Clone, Debug, Validate)]
pub struct RegisterMediaRequest {
    #[validate(length(min = 1, max = 64), custom(function = "validate_media_id"))]
    pub media_id: MediaId,
    #[validate(length(max = 200))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub mime_type: String,
    #[validate(length(min = 1, max = 512))]
    pub storage_key: String,
    #[validate(range(min = 1, max = 31_536_000))]
    pub ttl_secs: Option<u64>,
}

#[derive(CandidType, Deserialize, Clone, Debug, Validate)]
pub struct ResetMediaTimerRequest {
    #[validate(length(min = 1, max = 64), custom(function = "validate_media_id"))]
    pub media_id: MediaId,
    #[validate(range(min = 1, max = 31_536_000))]
    pub ttl_secs: u64,
}

#[derive(CandidType, Deserialize, Clone, Debug, Validate)]
pub struct CreditRequest {
    pub principal: Principal,
    #[validate(range(min = 1))]
    pub amount: Credits,
    #[validate(length(min = 1, max = 200))]
    pub reason: String,
}

#[derive(CandidType, Deserialize, Clone, Debug, Validate)]
pub struct DebitRequest {
    #[validate(range(min = 1))]
    pub amount: Credits,
    #[validate(length(min = 1, max = 200))]
    pub reason: String,
}

#[derive(CandidType, Deserialize, Clone, Debug, Validate)]
pub struct AuthorizeWithCodeRequest {
    pub kind: PendingActionKind,
    pub purpose: CodePurpose,
    #[validate(length(min = 3, max = 254))]
    pub target: String,
}

#[derive(CandidType, Deserialize, Validate)]
pub struct ListRequest {
    pub offset: Option<u32>,
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<u32>,
}

#[derive(CandidType, Deserialize, Clone, Debug)]
pub struct GetMetricsResponse {
    pub metrics: MetricsSnapshot,
    pub cycle_balance: u128,
    pub outbox_len: u64,
    pub secrets_stored: u64,
    pub open_sessions: u64,
    pub active_media_timers: u64,
    pub next_media_deadline: Option<TimestampNs>,
}

// --- Password Gate Endpoints ---

#[update]
fn set_secret(req: SetSecretRequest) -> Result<LockState, AccessError> {
    let caller = authenticated_caller()?;
    validate_request(&req)?;
    check_cycles()?;
    let now = get_current_time_ns();
    let state = engine_call(|engine| engine.set_secret(caller, &req.secret, &req.confirm, now))?;
    timers::sync_auto_lock(caller, now);
    Ok(state)
}

#[update]
fn verify_secret(secret: String) -> Result<LockState, AccessError> {
    let caller = authenticated_caller()?;
    check_cycles()?;
    let now = get_current_time_ns();
    let state = engine_call(|engine| engine.verify_secret(caller, &secret, now))?;
    timers::sync_auto_lock(caller, now);
    Ok(state)
}

#[update]
fn change_secret(req: ChangeSecretRequest) -> Result<LockState, AccessError> {
    let caller = authenticated_caller()?;
    validate_request(&req)?;
    check_cycles()?;
    let now = get_current_time_ns();
    let state = engine_call(|engine| {
        engine.change_secret(caller, &req.current, &req.secret, &req.confirm, req.auto_lock_secs, now)
    })?;
    timers::sync_auto_lock(caller, now);
    Ok(state)
}

#[update]
fn set_auto_lock(secs: u32) -> Result<LockState, AccessError> {
    let caller = authenticated_caller()?;
    check_cycles()?;
    let now = get_current_time_ns();
    let state = engine_call(|engine| engine.set_auto_lock(caller, secs, now))?;
    timers::sync_auto_lock(caller, now);
    Ok(state)
}

#[update]
fn remove_secret(current: String) -> Result<LockState, AccessError> {
    let caller = authenticated_caller()?;
    check_cycles()?;
    let now = get_current_time_ns();
    let state = engine_call(|engine| engine.remove_secret(caller, &current, now))?;
    timers::sync_auto_lock(caller, now);
    Ok(state)
}

#[update]
fn lock() -> Result<LockState, AccessError> {
    let caller = authenticated_caller()?;
    let now = get_current_time_ns();
    let state = engine_call(|engine| engine.lock(caller, now))?;
    timers::sync_auto_lock(caller, now);
    Ok(state)
}

#[update]
fn touch_activity() -> Result<LockState, AccessError> {
    let caller = authenticated_caller()?;
    let now = get_current_time_ns();
    let state = engine_call(|engine| engine.touch_activity(caller, now))?;
    timers::sync_auto_lock(caller, now);
    Ok(state)
}

/// Drops the in-memory session. The stored secret is kept, so the next
/// session starts locked.
#[update]
fn sign_out() -> Result<bool, AccessError> {
    let caller = authenticated_caller()?;
    let ended = with_engine(|engine| engine.end_session(caller))?;
    timers::sync_auto_lock(caller, get_current_time_ns());
    Ok(ended)
}

#[query(guard = "admin_guard")]
fn list_active_media_timers() -> Result<Vec<MediaTimer>, AccessError> {
    with_engine(|engine| engine.active_media_timers())
}

#[query]
fn get_lock_state() -> Result<LockState, AccessError> {
    let caller = authenticated_caller()?;
    engine_call(|engine| engine.lock_status(caller, get_current_time_ns()))
}

#[update]
fn recover_secret(req: RecoverSecretRequest) -> Result<LockState, AccessError> {
    let caller = authenticated_caller()?;
    validate_request(&req)?;
    check_cycles()?;
    let now = get_current_time_ns();
    let state = engine_call(|engine| {
        engine.recover_secret(caller, &req.target, &req.code, &req.secret, &req.confirm, now)
    })?;
    timers::sync_auto_lock(caller, now);
    Ok(state)
}

/// Binds the address future recovery codes must go to. Needs an unlocked
/// gate and a confirmed `EmailValidate` code for that address.
#[update]
fn register_recovery_address(req: RecoveryAddressRequest) -> Result<LockState, AccessError> {
    let caller = authenticated_caller()?;
    validate_request(&req)?;
    check_cycles()?;
    let now = get_current_time_ns();
    let state = engine_call(|engine| engine.register_recovery_address(caller, &req.target, &req.code, now))?;
    timers::sync_auto_lock(caller, now);
    Ok(state)
}

// --- Verification Code Endpoints ---

#[update]
fn issue_code(req: CodeRequest) -> Result<CodeTicket, AccessError> {
    let caller = authenticated_caller()?;
    validate_request(&req)?;
    check_cycles()?;
    let now = get_current_time_ns();
    rate_guard(caller, now)?;
    engine_call(|engine| engine.issue_code(caller, req.purpose, &req.target, now))
}

#[update]
fn resend_code(req: CodeRequest) -> Result<CodeTicket, AccessError> {
    let caller = authenticated_caller()?;
    validate_request(&req)?;
    check_cycles()?;
    let now = get_current_time_ns();
    rate_guard(caller, now)?;
    engine_call(|engine| engine.resend_code(caller, req.purpose, &req.target, now))
}

#[update]
fn verify_code(req: VerifyCodeRequest) -> Result<VerifiedCode, AccessError> {
    let caller = authenticated_caller()?;
    validate_request(&req)?;
    check_cycles()?;
    engine_call(|engine| engine.verify_code(caller, req.purpose, &req.target, &req.code, get_current_time_ns()))
}

#[update]
fn cancel_code(req: CodeRequest) -> Result<bool, AccessError> {
    let caller = authenticated_caller()?;
    validate_request(&req)?;
    engine_call(|engine| engine.cancel_code(caller, req.purpose, &req.target))
}

#[query]
fn code_status(req: CodeRequest) -> Result<CodeStatus, AccessError> {
    let caller = authenticated_caller()?;
    validate_request(&req)?;
    engine_call(|engine| engine.code_status(caller, req.purpose, &req.target, get_current_time_ns()))
}

// --- Media Endpoints ---

#[update]
fn register_media(req: RegisterMediaRequest) -> Result<MediaItem, AccessError> {
    let caller = authenticated_caller()?;
    validate_request(&req)?;
    check_cycles()?;
    let now = get_current_time_ns();
    engine_call(|engine| engine.ensure_unlocked(caller, now))?;

    let mut item = MediaItem {
        media_id: req.media_id,
        owner: caller,
        title: req.title,
        mime_type: req.mime_type,
        storage_key: req.storage_key,
        ttl_secs: req.ttl_secs,
        expires_at: None,
        created_at: now,
    };
    insert_media(item.clone())?;

    if let Some(ttl_secs) = item.ttl_secs {
        let armed = engine_call(|engine| engine.arm_media_timer(&item.media_id, ttl_secs, now));
        let timer = match armed {
            Ok(timer) => timer,
            Err(e) => {
                remove_media(&item.media_id);
                return Err(e);
            }
        };
        item.expires_at = Some(timer.deadline);
        update_media(item.clone())?;
        timers::schedule_media_expiry(&timer, now);
    }
    timers::sync_auto_lock(caller, now);
    Ok(item)
}

#[update]
fn reset_media_timer(req: ResetMediaTimerRequest) -> Result<MediaTimer, AccessError> {
    let caller = authenticated_caller()?;
    validate_request(&req)?;
    check_cycles()?;
    let now = get_current_time_ns();
    let mut item = owned_media(caller, &req.media_id)?;
    engine_call(|engine| engine.ensure_unlocked(caller, now))?;

    let timer = engine_call(|engine| engine.reset_media_timer(&req.media_id, req.ttl_secs, now))?;
    item.ttl_secs = Some(timer.ttl_secs);
    item.expires_at = Some(timer.deadline);
    update_media(item)?;
    timers::schedule_media_expiry(&timer, now);
    timers::sync_auto_lock(caller, now);
    Ok(timer)
}

#[update]
fn cancel_media_timer(media_id: MediaId) -> Result<bool, AccessError> {
    let caller = authenticated_caller()?;
    let now = get_current_time_ns();
    let mut item = owned_media(caller, &media_id)?;
    engine_call(|engine| engine.ensure_unlocked(caller, now))?;

    let cancelled = with_engine(|engine| engine.cancel_media_timer(&media_id))?;
    timers::clear_media_expiry(&media_id);
    if item.expires_at.take().is_some() {
        update_media(item)?;
    }
    timers::sync_auto_lock(caller, now);
    Ok(cancelled)
}

/// Out-of-band delete: the countdown is cancelled so it never fires for a
/// vanished item.
#[update]
fn delete_media(media_id: MediaId) -> Result<(), AccessError> {
    let caller = authenticated_caller()?;
    let now = get_current_time_ns();
    owned_media(caller, &media_id)?;
    engine_call(|engine| engine.ensure_unlocked(caller, now))?;

    with_engine(|engine| engine.cancel_media_timer(&media_id))?;
    timers::clear_media_expiry(&media_id);
    remove_media(&media_id);
    timers::sync_auto_lock(caller, now);
    Ok(())
}

#[query]
fn list_media() -> Result<Vec<MediaItem>, AccessError> {
    let caller = authenticated_caller()?;
    Ok(list_media_by_owner(caller))
}

#[query]
fn media_timer_status(media_id: MediaId) -> Result<TimerStatus, AccessError> {
    let caller = authenticated_caller()?;
    owned_media(caller, &media_id)?;
    with_engine(|engine| engine.media_timer_status(&media_id, get_current_time_ns()))
}

// --- Credit Endpoints ---

#[query]
fn get_balance() -> Result<Credits, AccessError> {
    let caller = authenticated_caller()?;
    engine_call(|engine| engine.balance(caller))
}

#[update(guard = "admin_guard")]
fn credit(req: CreditRequest) -> Result<LedgerReceipt, AccessError> {
    validate_request(&req)?;
    check_cycles()?;
    let receipt = engine_call(|engine| engine.credit(req.principal, req.amount, &req.reason, get_current_time_ns()))?;
    journal(&receipt);
    Ok(receipt)
}

#[update]
fn try_debit(req: DebitRequest) -> Result<LedgerReceipt, AccessError> {
    let caller = authenticated_caller()?;
    validate_request(&req)?;
    check_cycles()?;
    let receipt = engine_call(|engine| engine.try_debit(caller, req.amount, &req.reason, get_current_time_ns()))?;
    journal(&receipt);
    Ok(receipt)
}

#[query]
fn list_ledger_entries(req: ListRequest) -> Result<Vec<LedgerReceipt>, AccessError> {
    let caller = authenticated_caller()?;
    validate_request(&req)?;
    let offset = req.offset.unwrap_or(0) as usize;
    let limit = req.limit.unwrap_or(20).min(MAX_PAGE) as usize;
    Ok(storage::list_ledger_entries(caller, offset, limit))
}

// --- Pending Action Endpoints ---

#[update]
fn authorize(kind: PendingActionKind) -> Result<GateDecision, AccessError> {
    let caller = authenticated_caller()?;
    check_cycles()?;
    let now = get_current_time_ns();
    let decision = engine_call(|engine| engine.authorize(caller, kind, now))?;
    timers::sync_auto_lock(caller, now);
    Ok(decision)
}

#[update]
fn authorize_with_code(req: AuthorizeWithCodeRequest) -> Result<GateDecision, AccessError> {
    let caller = authenticated_caller()?;
    validate_request(&req)?;
    check_cycles()?;
    let now = get_current_time_ns();
    rate_guard(caller, now)?;
    let decision = engine_call(|engine| engine.authorize_with_code(caller, req.kind, req.purpose, &req.target, now))?;
    timers::sync_auto_lock(caller, now);
    Ok(decision)
}

#[update]
fn resume(token: PendingToken) -> Result<ResumedAction, AccessError> {
    let caller = authenticated_caller()?;
    check_cycles()?;
    let now = get_current_time_ns();
    let resumed = engine_call(|engine| engine.resume(caller, token, now))?;
    if let Some(receipt) = &resumed.receipt {
        journal(receipt);
    }
    timers::sync_auto_lock(caller, now);
    Ok(resumed)
}

#[update]
fn discard_pending(token: PendingToken) -> Result<bool, AccessError> {
    let caller = authenticated_caller()?;
    with_engine(|engine| engine.discard_pending(caller, token))
}

#[query]
fn list_pending() -> Result<Vec<PendingAction>, AccessError> {
    let caller = authenticated_caller()?;
    with_engine(|engine| engine.pending_actions(caller, get_current_time_ns()))
}

// --- Admin & Relay Endpoints ---

#[query(guard = "admin_guard")]
fn get_config() -> Result<EngineConfig, AccessError> {
    with_engine(|engine| engine.config())
}

#[update(guard = "admin_guard")]
fn update_config(config: EngineConfig) -> Result<(), AccessError> {
    check_cycles()?;
    let interval = config.maintenance_interval_secs;
    engine_call(|engine| engine.update_config(config.clone()))?;
    set_engine_config(config)?;
    timers::start_maintenance(interval);
    ic_cdk::println!("Engine configuration updated by {}", ic_cdk::caller());
    Ok(())
}

#[update(guard = "admin_guard")]
fn run_maintenance() -> Result<MaintenanceReport, AccessError> {
    check_cycles()?;
    let report = with_engine(|engine| engine.run_maintenance(get_current_time_ns()))?;
    persist_metrics();
    Ok(report)
}

#[query(guard = "admin_guard")]
fn get_metrics() -> Result<GetMetricsResponse, AccessError> {
    let (metrics, sessions, active, next_deadline) = with_engine(|engine| {
        (
            engine.metrics().snapshot(),
            engine.session_count(),
            engine.active_media_timers().len(),
            engine.next_media_deadline(),
        )
    })?;
    Ok(GetMetricsResponse {
        metrics,
        cycle_balance: canister_balance128(),
        outbox_len: storage::outbox::outbox_len(),
        secrets_stored: storage::credentials::credential_count(),
        open_sessions: sessions as u64,
        active_media_timers: active as u64,
        next_media_deadline: next_deadline,
    })
}

/// Hands queued codes to the mail relay. Drained messages are gone for good.
#[update(guard = "relay_guard")]
fn drain_outbox(limit: u32) -> Result<Vec<OutboundCode>, AccessError> {
    if limit == 0 || limit > MAX_PAGE {
        return Err(AccessError::invalid_input(format!("limit must be between 1 and {}", MAX_PAGE)));
    }
    Ok(storage::drain_outbox(limit as usize))
}
