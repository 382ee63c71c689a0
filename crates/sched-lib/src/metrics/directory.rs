//! Node enumeration from metrics instance labels

use super::matcher::host_part;
use super::{queries, MetricsSource};
use async_trait::async_trait;
use crate::cache::{CacheError, NodeDirectory};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Lists the nodes that report a CPU core count to the metrics source.
///
/// Used when no cluster API is available: instance labels have their
/// port stripped and are treated as node names.
pub struct MetricsNodeDirectory {
    source: Arc<dyn MetricsSource>,
}

impl MetricsNodeDirectory {
    pub fn new(source: Arc<dyn MetricsSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl NodeDirectory for MetricsNodeDirectory {
    async fn list_nodes(&self) -> Result<Vec<String>, CacheError> {
        let samples = self
            .source
            .query(queries::CPU_CORES)
            .await
            .map_err(|e| CacheError::Directory(e.to_string()))?;

        let names: BTreeSet<String> = samples
            .keys()
            .map(|label| host_part(label).to_string())
            .filter(|name| !name.is_empty())
            .collect();

        Ok(names.into_iter().collect())
    }
}
