//! An offline bus: no endpoints, no workers.
//!
//! Every send to a worker lands in the offline queue, which is what the
//! command layer sees while the controller is still starting.

use bus_core::bus::{self, BusHandle, BusParts, BusSettings};
use bus_core::codec::Codec;
use bus_core::supervisor::TokioLauncher;
use bus_core::ui;

use common::SharedSecret;

use std::sync::Arc;

pub fn offline_bus() -> BusHandle {
    let secret = SharedSecret::generate().unwrap();
    bus::start(BusParts {
        settings: BusSettings::default(),
        codec: Codec::new(&secret),
        endpoints: vec![],
        launcher: Arc::new(TokioLauncher),
        specs: vec![],
        ui: ui::channel().0,
    })
}
