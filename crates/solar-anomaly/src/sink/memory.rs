use super::{ResultSink, SinkLocation};
use crate::error::Result;
use parking_lot::Mutex;
use polars::prelude::DataFrame;
use std::collections::BTreeMap;

/// Keeps written tables in memory, keyed by device id.
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: Mutex<BTreeMap<String, DataFrame>>,
}

static_assertions::assert_impl_all!(MemorySink: Send, Sync);

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the table last written for a device.
    pub fn get(&self, device_id: &str) -> Option<DataFrame> {
        self.tables.lock().get(device_id).cloned()
    }

    /// Device ids with a stored table, in sorted order.
    pub fn device_ids(&self) -> Vec<String> {
        self.tables.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tables.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.lock().is_empty()
    }

    /// Remove and return every stored table.
    pub fn take_all(&self) -> BTreeMap<String, DataFrame> {
        std::mem::take(&mut *self.tables.lock())
    }
}

impl ResultSink for MemorySink {
    fn write(&self, device_id: &str, df: &mut DataFrame) -> Result<SinkLocation> {
        self.tables.lock().insert(device_id.to_string(), df.clone());
        Ok(SinkLocation::Memory(device_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    #[test]
    fn test_write_and_read_back() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());

        let mut df = df!["DC_POWER" => [1.0, 2.0]].unwrap();
        let location = sink.write("A2_df", &mut df).unwrap();

        assert_eq!(location, SinkLocation::Memory("A2_df".to_string()));
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.get("A2_df").unwrap().height(), 2);
        assert!(sink.get("A3_df").is_none());
    }

    #[test]
    fn test_take_all_drains() {
        let sink = MemorySink::new();
        let mut df = df!["DC_POWER" => [1.0]].unwrap();
        sink.write("B6_df", &mut df).unwrap();
        sink.write("A1_df", &mut df).unwrap();

        assert_eq!(sink.device_ids(), vec!["A1_df", "B6_df"]);
        let tables = sink.take_all();
        assert_eq!(tables.len(), 2);
        assert!(sink.is_empty());
    }
}
