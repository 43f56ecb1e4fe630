use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod channel;
mod cli;
mod controller;
mod listener;
mod proto;
mod sim;
mod state;

use channel::TcpServerChannel;
use controller::Controller;
use sim::SimulatedDevice;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log).context("parsing log filter")?)
        .init();

    let device = Arc::new(SimulatedDevice::new(
        Duration::from_millis(args.sim_load_ms),
        Duration::from_millis(args.sim_settle_ms),
    ));
    let channel = Arc::new(TcpServerChannel::bind(args.port)?);
    let controller = Arc::new(Controller::new(device.clone(), channel.clone()));
    device.attach(&controller);
    {
        let controller = controller.clone();
        channel.subscribe(move |message| controller.handle_message(message));
    }

    tracing::info!("blobctl ready on port {}", channel.port());
    loop {
        std::thread::park();
    }
}
