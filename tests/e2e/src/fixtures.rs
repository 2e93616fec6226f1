//! Payload types and services shared by the scenarios

use parking_lot::Mutex;
use port_actors::ServicePort;
use port_types::{BlockError, BlockReader, BlockWriter, PayloadType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sum request; `delay_ms` holds the answer back to shuffle arrival order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Add {
    pub a: i64,
    pub b: i64,
    pub delay_ms: u32,
}

impl PayloadType for Add {
    const TYPE_NAME: &'static str = "Add";
    const BLOCK_TYPE: Option<u16> = Some(0x0500);

    fn write_block(&self, w: &mut BlockWriter) -> Result<(), BlockError> {
        w.write_i64(self.a);
        w.write_i64(self.b);
        w.write_u32(self.delay_ms);
        Ok(())
    }

    fn read_block(r: &mut BlockReader<'_>) -> Result<Self, BlockError> {
        Ok(Self {
            a: r.read_i64("a")?,
            b: r.read_i64("b")?,
            delay_ms: r.read_u32("delay_ms")?,
        })
    }
}

/// Handler that sleeps for `ms`, tagged so its run can be traced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Work {
    pub tag: u32,
    pub ms: u32,
}

impl PayloadType for Work {
    const TYPE_NAME: &'static str = "Work";
    const BLOCK_TYPE: Option<u16> = Some(0x0501);

    fn write_block(&self, w: &mut BlockWriter) -> Result<(), BlockError> {
        w.write_u32(self.tag);
        w.write_u32(self.ms);
        Ok(())
    }

    fn read_block(r: &mut BlockReader<'_>) -> Result<Self, BlockError> {
        Ok(Self {
            tag: r.read_u32("tag")?,
            ms: r.read_u32("ms")?,
        })
    }
}

/// Structured payload for round-trip checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u64,
    pub label: String,
    pub note: Option<String>,
    pub tags: Vec<String>,
    pub ratio: f64,
}

impl PayloadType for Envelope {
    const TYPE_NAME: &'static str = "Envelope";
    const BLOCK_TYPE: Option<u16> = Some(0x0502);

    fn write_block(&self, w: &mut BlockWriter) -> Result<(), BlockError> {
        w.write_u64(self.id);
        w.write_str("label", &self.label)?;
        w.write_opt_str("note", self.note.as_deref())?;
        w.write_str_list("tags", &self.tags)?;
        w.write_f64(self.ratio);
        Ok(())
    }

    fn read_block(r: &mut BlockReader<'_>) -> Result<Self, BlockError> {
        Ok(Self {
            id: r.read_u64("id")?,
            label: r.read_str("label")?,
            note: r.read_opt_str("note")?,
            tags: r.read_str_list("tags")?,
            ratio: r.read_f64("ratio")?,
        })
    }
}

/// One handler execution
#[derive(Debug, Clone, Copy)]
pub struct HandlerRun {
    pub tag: u32,
    pub started: Instant,
    pub finished: Instant,
}

/// Shared record of handler executions
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    runs: Arc<Mutex<Vec<HandlerRun>>>,
}

impl RunLog {
    pub fn record(&self, run: HandlerRun) {
        self.runs.lock().push(run);
    }

    pub fn runs(&self) -> Vec<HandlerRun> {
        self.runs.lock().clone()
    }

    /// True if any two runs were in progress at the same time
    pub fn overlapped(&self) -> bool {
        let mut runs = self.runs();
        runs.sort_by_key(|run| run.started);
        runs.windows(2).any(|pair| pair[1].started < pair[0].finished)
    }
}

/// Service answering `Add`, `Work` and the `echo` method
pub fn calculator(name: &str, multithreaded: bool, log: RunLog) -> anyhow::Result<ServicePort> {
    let service = ServicePort::builder(name)
        .multithreaded(multithreaded)
        .on(|add: Add, _ctx| async move {
            if add.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(u64::from(add.delay_ms))).await;
            }
            Ok(add.a + add.b)
        })
        .on(move |work: Work, _ctx| {
            let log = log.clone();
            async move {
                let started = Instant::now();
                tokio::time::sleep(Duration::from_millis(u64::from(work.ms))).await;
                log.record(HandlerRun {
                    tag: work.tag,
                    started,
                    finished: Instant::now(),
                });
                Ok(work.tag)
            }
        })
        .on_method("echo", |value: Envelope, _ctx| async move { Ok(value) })
        .build()?;
    Ok(service)
}
