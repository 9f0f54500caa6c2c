// audible-converter - AAX conversion and activation bytes discovery
// Copyright (C) 2025 audible-converter contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Strategy orchestration
//!
//! [`KeyDiscovery`] walks its strategies in order and stops at the first
//! result carrying a key. Nothing a strategy does (error, panic) stops the
//! walk. The winning key is saved to the [`KeyStore`] when one is attached.

use super::{
    panic_message, AttemptRecord, DiscoveryContext, DiscoveryFailure, DiscoveryReport, DiscoveryResult, FailureKind,
    KeyStrategy, Method, SUGGESTIONS,
};
use crate::storage::KeyStore;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::{error, info, warn};

pub struct KeyDiscovery {
    strategies: Vec<Box<dyn KeyStrategy>>,
    store: Option<KeyStore>,
}

impl KeyDiscovery {
    /// `strategies` in priority order
    pub fn new(strategies: Vec<Box<dyn KeyStrategy>>) -> Self {
        Self {
            strategies,
            store: None,
        }
    }

    /// Persist whatever key a run ends with
    pub fn with_store(mut self, store: KeyStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn methods(&self) -> Vec<Method> {
        self.strategies.iter().map(|s| s.method()).collect()
    }

    /// Run every strategy (`Method::Auto`) or only the selected one
    pub async fn run(&self, ctx: &DiscoveryContext, method: Method) -> DiscoveryReport {
        let explicit = method != Method::Auto;
        let mut attempts = Vec::new();
        let mut last_failure: Option<DiscoveryFailure> = None;

        let selected: Vec<&dyn KeyStrategy> = self
            .strategies
            .iter()
            .map(|s| s.as_ref())
            .filter(|s| !explicit || s.method() == method)
            .collect();

        if selected.is_empty() {
            return finish_without_key(
                DiscoveryFailure::new(
                    FailureKind::Unavailable,
                    format!("Extraction method '{}' is not available", method),
                ),
                attempts,
            );
        }

        for strategy in selected {
            let name = strategy.method();

            if strategy.requires_credentials() && ctx.credentials.is_none() {
                info!(method = %name, "skipped: no credentials");
                attempts.push(AttemptRecord::skipped(name, "requires email and password"));
                if explicit {
                    last_failure = Some(DiscoveryFailure::new(
                        FailureKind::Authentication,
                        format!("Email and password required for the {} method", name),
                    ));
                }
                continue;
            }

            info!(method = %name, "trying extraction method");
            let result = match AssertUnwindSafe(strategy.discover(ctx)).catch_unwind().await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    warn!(method = %name, "method failed with error: {}", e);
                    DiscoveryResult::Failure(DiscoveryFailure::from_error(&e))
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(method = %name, "method panicked: {}", message);
                    DiscoveryResult::failure(FailureKind::Error, format!("{} method crashed: {}", name, message))
                }
            };

            let record = AttemptRecord::from_result(name, &result);
            info!(method = %name, status = ?record.status, "{}", record.detail);
            attempts.push(record);

            match result {
                DiscoveryResult::Failure(failure) => last_failure = Some(failure),
                found => {
                    self.persist(&found);
                    return DiscoveryReport {
                        result: found,
                        attempts,
                        suggestions: Vec::new(),
                    };
                }
            }
        }

        let failure = match (explicit, last_failure) {
            (true, Some(failure)) => failure,
            _ => DiscoveryFailure::new(
                FailureKind::NoCandidate,
                "Could not extract activation bytes using any available method",
            ),
        };
        finish_without_key(failure, attempts)
    }

    fn persist(&self, result: &DiscoveryResult) {
        let (Some(store), Some(key)) = (&self.store, result.key()) else {
            return;
        };
        if let Err(e) = store.save(key) {
            warn!(path = %store.path().display(), "could not save activation bytes: {}", e);
        }
    }
}

fn finish_without_key(failure: DiscoveryFailure, attempts: Vec<AttemptRecord>) -> DiscoveryReport {
    warn!("{}", failure);
    DiscoveryReport {
        result: DiscoveryResult::Failure(failure),
        attempts,
        suggestions: SUGGESTIONS.iter().map(|s| s.to_string()).collect(),
    }
}
