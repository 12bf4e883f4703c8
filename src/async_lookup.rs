//! Awaitable lookups.

use std::thread;

use crate::common::Id;
use crate::lookup::{Lookup, LookupResult};
use crate::table::SharedRoutingTable;
use crate::{Error, Result};

impl Lookup {
    /// Return an async version of the lookup engine.
    pub fn as_async(self) -> AsyncLookup {
        AsyncLookup(self)
    }
}

#[derive(Debug, Clone)]
/// Async version of the [Lookup] engine.
///
/// Each lookup runs on its own thread, the returned future only awaits its result.
pub struct AsyncLookup(Lookup);

impl AsyncLookup {
    // === Getters ===

    pub fn table(&self) -> &SharedRoutingTable {
        self.0.table()
    }

    // === Public Methods ===

    /// See [Lookup::find_node].
    pub async fn find_node(&self, target: Id) -> Result<LookupResult> {
        let (sender, receiver) = flume::bounded::<Result<LookupResult>>(1);

        let lookup = self.0.clone();

        thread::Builder::new()
            .name("kadcore-async-lookup".to_string())
            .spawn(move || {
                let _ = sender.send(lookup.find_node(target));
            })
            .map_err(|_| Error::LookupAborted)?;

        receiver
            .recv_async()
            .await
            .map_err(|_| Error::LookupAborted)?
    }

    /// See [Lookup::refresh_bucket].
    pub async fn refresh_bucket(&self, index: u8) -> Result<LookupResult> {
        let target = self.table().id().random_in_bucket(index);

        self.find_node(target).await
    }

    /// Return the blocking version of the lookup engine.
    pub fn as_blocking(self) -> Lookup {
        self.0
    }
}
