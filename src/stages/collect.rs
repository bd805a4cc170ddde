//! The collect stage: pulls files from the target into the report tree.

use super::{
    decode_section, resolve_against, resolve_transfer_protocol, BusObserver, StageState,
    TransferItem, TransferSection,
};
use crate::config::TestDefinition;
use crate::error::Result;
use crate::events::Events;
use crate::logging::Logger;
use crate::remote::{DataItem, Registry, TransportDescriptor, Transports};
use crate::report::ReportDirectory;
use log::debug;
use std::path::PathBuf;

pub struct CollectStage {
    state: StageState<TransferItem>,
    protocol: Option<TransportDescriptor>,
    log: Logger,
}

impl CollectStage {
    /// Reads the `collect` section.
    ///
    /// Relative destinations land under the report's remote staging
    /// directory.
    pub fn read(
        definition: &TestDefinition,
        report_dir: &ReportDirectory,
        registry: &Registry,
        events: &Events,
        log: Logger,
    ) -> Result<Self> {
        let section = match &definition.collect {
            Some(section) => section,
            None => {
                debug!(target: log.target(), "'collect' stage is not defined");
                return Ok(Self {
                    state: StageState::skipped(),
                    protocol: None,
                    log,
                });
            }
        };

        events.collect_read_started.fire();

        let decoded: TransferSection = decode_section(section, "collect")?;
        debug!(target: log.target(), "default collect protocol={}", decoded.protocol);
        let protocol = resolve_transfer_protocol(registry, &decoded.protocol, "collect")?;

        let items = decoded
            .transfer
            .into_iter()
            .map(|entry| TransferItem {
                source: PathBuf::from(entry.source),
                destination: resolve_against(&report_dir.remote_staging, &entry.dest),
                item_type: entry.item_type,
            })
            .collect::<Vec<_>>();
        debug!(target: log.target(), "transfer={:?}", items);

        events.collect_read_completed.emit(section);

        Ok(Self {
            state: StageState::defined(items),
            protocol: Some(protocol),
            log,
        })
    }

    pub fn is_defined(&self) -> bool {
        self.state.defined
    }

    pub fn items(&self) -> &[TransferItem] {
        &self.state.items
    }

    /// Pulls every item in one batch.
    pub fn run(&self, events: &Events, transports: &dyn Transports) -> Result<()> {
        let protocol = match (&self.protocol, self.state.defined) {
            (Some(protocol), true) => protocol,
            _ => {
                debug!(target: self.log.target(), "collect is not defined. Skipping run");
                return Ok(());
            }
        };

        events.collect_started.fire();

        let items = self
            .state
            .items
            .iter()
            .map(TransferItem::to_pull)
            .collect::<Result<Vec<DataItem>>>()?;

        debug!(target: self.log.target(), "transfer data using {}", protocol);
        transports
            .file_transfer(protocol)?
            .transfer(&items, &mut BusObserver { events })?;

        events.collect_completed.fire();
        Ok(())
    }
}
