use std::io::Read;
use std::sync::Arc;

use arkiv_offer::OfferStore;
use arkiv_types::{DataCategory, OfferLogEntry, Order, Result, Tenant};

use crate::traits::OfferSource;

/// Replay source over a local offer store copy.
pub struct LocalOfferSource {
    store: Arc<OfferStore>,
}

impl LocalOfferSource {
    pub fn new(store: Arc<OfferStore>) -> Self {
        Self { store }
    }
}

impl OfferSource for LocalOfferSource {
    fn listing(
        &self,
        category: DataCategory,
        tenant: Tenant,
        offset: u64,
        limit: usize,
        order: Order,
    ) -> Result<Vec<OfferLogEntry>> {
        self.store
            .get_listing(&category.container_name(tenant), offset, limit, order)
    }

    fn load(&self, category: DataCategory, tenant: Tenant, object_id: &str) -> Result<Vec<u8>> {
        let (mut reader, size) = self
            .store
            .get_object(&category.container_name(tenant), object_id)?;
        let mut bytes = Vec::with_capacity(size as usize);
        reader.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}
