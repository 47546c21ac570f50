//! The example object
//!
//! Exists to exercise the invocation path end to end: printing, a ping
//! that reports where it ran, and moving its home to another place.

use crate::invocation::Invocation;
use crate::object::{submit, write_debug_info, Storage};
use kinv_core::protocol::example::{Method, MoveHome, Ping, PrintMessage};
use kinv_core::protocol::{kernel_object, ProtocolId};
use kinv_core::{kdebug, kinfo};
use kinv_core::{Error, Job, KResult};
use kinv_runtime::{current_place_id, MonitorCtx, Monitor, Places};
use std::sync::Arc;

/// Mutable part, reachable only from a running handler
#[derive(Debug, Default)]
pub struct ExampleState {
    pub printed: u64,
    pub pings: u64,
    pub moves: u64,
}

pub struct ExampleObject {
    monitor: Arc<Monitor<ExampleState>>,
    places: Arc<Places>,
    storage: Storage,
}

impl ExampleObject {
    pub fn new(storage: Storage, places: Arc<Places>) -> Self {
        ExampleObject { monitor: Arc::new(Monitor::new(ExampleState::default())), places, storage }
    }

    pub fn home_id(&self) -> Option<usize> {
        self.monitor.home_id()
    }

    pub fn invoke(self: &Arc<Self>, inv: Invocation) {
        let this = Arc::clone(self);
        submit(&self.monitor, inv, move |state, ctx, inv| this.dispatch_request(state, ctx, inv));
    }

    fn dispatch_request(
        &self,
        state: &mut ExampleState,
        ctx: &MonitorCtx<'_, ExampleState>,
        inv: &Invocation,
    ) -> Error {
        match ProtocolId::from_u8(inv.protocol()) {
            Some(ProtocolId::KernelObject) => match kernel_object::Method::from_u8(inv.method()) {
                Some(kernel_object::Method::GetDebugInfo) => {
                    let text = format!(
                        "example: {} printed, {} pings, {} moves, home {:?}",
                        state.printed,
                        state.pings,
                        state.moves,
                        ctx.home_id()
                    );
                    write_debug_info(inv, &text)
                }
                _ => Error::NotImplemented,
            },
            Some(ProtocolId::Example) => match Method::from_u8(inv.method()) {
                Some(Method::PrintMessage) => self.print_message(state, inv).into(),
                Some(Method::Ping) => self.ping(state, inv).into(),
                Some(Method::MoveHome) => self.move_home(state, ctx, inv).into(),
                None => Error::NotImplemented,
            },
            _ => Error::NotImplemented,
        }
    }

    fn print_message(&self, state: &mut ExampleState, inv: &Invocation) -> KResult<()> {
        let msg: PrintMessage = inv.read()?;
        kinfo!(target: "example", "{}", msg.text());
        state.printed += 1;
        Ok(())
    }

    fn ping(&self, state: &mut ExampleState, inv: &Invocation) -> KResult<()> {
        let mut msg: Ping = inv.read()?;
        for _ in 0..msg.wait_cycles {
            std::hint::spin_loop();
        }
        msg.place = current_place_id().map_or(Ping::CALLER_THREAD, |id| id as u64);
        inv.write(&msg);
        state.pings += 1;
        Ok(())
    }

    fn move_home(&self, state: &mut ExampleState, ctx: &MonitorCtx<'_, ExampleState>, inv: &Invocation) -> KResult<()> {
        let msg: MoveHome = inv.read()?;
        let place = self.places.get(msg.location as usize).ok_or(Error::InvalidArgument)?;
        kdebug!(target: "example", "moving home to place {}", msg.location);
        ctx.set_home(Some(place));
        state.moves += 1;
        Ok(())
    }

    pub fn delete(self: &Arc<Self>, done: Job) {
        let this = Arc::clone(self);
        self.monitor.when_released(Box::new(move || this.storage.release(done)));
    }
}

impl std::fmt::Debug for ExampleObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExampleObject")
            .field("storage", &self.storage)
            .field("home", &self.home_id())
            .finish()
    }
}
