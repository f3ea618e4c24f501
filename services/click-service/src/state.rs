use std::sync::Arc;

use crate::warehouse::Warehouse;

#[derive(Clone)]
pub struct AppState {
    pub warehouse: Arc<dyn Warehouse>,
    pub dataset: String,
    pub table: String,
}

impl AppState {
    pub fn new(warehouse: Arc<dyn Warehouse>, dataset: String, table: String) -> Self {
        Self {
            warehouse,
            dataset,
            table,
        }
    }
}
