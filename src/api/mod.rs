pub mod handlers;
pub mod routes;

pub use routes::create_router;

use crate::services::ServiceContext;
use std::sync::Arc;

#[derive(Clone)]
pub struct ApiState {
    pub context: Arc<ServiceContext>,
}

impl ApiState {
    pub fn new(context: Arc<ServiceContext>) -> Self {
        Self { context }
    }
}
