//! Consumer worker loop

use super::{WorkerContext, WorkerReport};
use crate::core::{Result, SlotEvent};

/// Removes widgets from the buffer until stopped
pub struct Consumer {
    ctx: WorkerContext,
}

impl Consumer {
    /// Wrap a context
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    /// Mirror of [`Producer::run`](super::Producer::run) on the filled side
    pub fn run(self) -> Result<WorkerReport> {
        let ctx = &self.ctx;
        let mut report = WorkerReport::new(ctx.id);
        if !ctx.signal.wait_until_open() {
            return Ok(report);
        }

        let mut rng = rand::rng();
        loop {
            if ctx.signal.pause(ctx.pacing.sample(&mut rng)) {
                break;
            }

            let slot = match ctx.buffer.try_reserve_slot_for_remove() {
                Ok(slot) => slot,
                Err(err) if err.is_closed() => break,
                Err(err) => return Err(ctx.halt(err)),
            };
            if ctx.signal.is_stopping() {
                drop(slot);
                break;
            }

            let (widget, receipt) = slot.remove().map_err(|err| ctx.halt(err))?;
            ctx.sink.record(&SlotEvent::new(ctx.id, receipt, widget.serial));
            report.items += 1;
        }

        tracing::debug!(worker = %ctx.id, items = report.items, "consumer exiting");
        Ok(report)
    }
}
