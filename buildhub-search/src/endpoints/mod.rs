//! Search API endpoints

mod health;
mod records;
mod search;

pub(crate) use health::health_handler;
pub(crate) use records::records_handler;
pub(crate) use search::{list_handler, search_handler};

use crate::query::{LimitGuard, SearchLimits};
use crate::store::{SearchExecutor, SearchStore};
use std::sync::Arc;

/// State shared by the search handlers
#[derive(Clone)]
pub struct SearchState {
    pub executor: SearchExecutor,
    pub guard: LimitGuard,
}

impl SearchState {
    pub fn new(store: Arc<dyn SearchStore>, limits: SearchLimits) -> Self {
        Self {
            executor: SearchExecutor::new(store),
            guard: LimitGuard::new(limits),
        }
    }
}
