//! Producer worker loop

use super::{WorkerContext, WorkerReport};
use crate::core::{Result, SlotEvent, Widget};
use rand::Rng;

/// Fabricates widgets and inserts them into the buffer until stopped
pub struct Producer {
    ctx: WorkerContext,
}

impl Producer {
    /// Wrap a context
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    /// Run until the run signal stops or the buffer closes.
    ///
    /// A reservation granted after the stop was issued is handed back unused.
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

            let slot = match ctx.buffer.try_reserve_slot_for_insert() {
                Ok(slot) => slot,
                Err(err) if err.is_closed() => break,
                Err(err) => return Err(ctx.halt(err)),
            };
            if ctx.signal.is_stopping() {
                drop(slot);
                break;
            }

            let widget = Widget {
                serial: ctx.serials.next(),
                value: rng.random(),
            };
            let receipt = slot.insert(widget).map_err(|err| ctx.halt(err))?;
            ctx.sink.record(&SlotEvent::new(ctx.id, receipt, widget.serial));
            report.items += 1;
        }

        tracing::debug!(worker = %ctx.id, items = report.items, "producer exiting");
        Ok(report)
    }
}
