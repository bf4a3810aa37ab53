pub mod analytics;
pub mod api;
pub mod auth;
pub mod config;
pub mod confirmation;
pub mod error;
pub mod events;
pub mod ledger;
pub mod lending;
pub mod logging;
pub mod scoring;
pub mod users;

use std::sync::Arc;

use crate::api::ratelimit::RateLimiter;
use crate::auth::JwtKeys;
use crate::config::Settings;
use crate::confirmation::ConfirmationWatcher;
use crate::events::EventHub;
use crate::ledger::CreditLedger;
use crate::scoring::EsgScorer;
use crate::users::UserStore;

/// Shared handles passed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub users: Arc<dyn UserStore>,
    pub ledger: Arc<dyn CreditLedger>,
    pub scorer: Arc<dyn EsgScorer>,
    pub jwt: Arc<JwtKeys>,
    pub events: EventHub,
    pub watcher: ConfirmationWatcher,
    pub limiter: RateLimiter,
}

impl AppState {
    pub fn new(
        settings: Settings,
        users: Arc<dyn UserStore>,
        ledger: Arc<dyn CreditLedger>,
        scorer: Arc<dyn EsgScorer>,
    ) -> Self {
        let events = EventHub::default();
        let watcher = ConfirmationWatcher::new(
            ledger.clone(),
            events.clone(),
            settings.confirmation_poll,
            settings.confirmation_max_attempts,
        );
        let jwt = Arc::new(JwtKeys::new(&settings.jwt_secret, settings.jwt_ttl));
        let limiter = RateLimiter::new(settings.rate_limit_max, settings.rate_limit_window)
            .trust_proxy(settings.trust_proxy);
        Self {
            settings: Arc::new(settings),
            users,
            ledger,
            scorer,
            jwt,
            events,
            watcher,
            limiter,
        }
    }
}
