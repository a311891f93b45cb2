//! Drive a [`SoundCallback`] from the JACK process callback.
use jack;
use log::{debug, error, info, warn};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::sleep,
    time::Duration,
};

use super::SoundCallback;
use crate::common::box_error::BoxError;

pub const CLIENT_NAME: &str = "jamsync";

/// Run `engine` under JACK until `running` goes false.  Deactivating waits for the callback
/// in flight, so the engine is never dropped mid block.
pub fn run<C>(mut engine: C, running: Arc<AtomicBool>, auto_connect: bool) -> Result<(), BoxError>
where
    C: SoundCallback + Send + 'static,
{
    let (client, _status) = jack::Client::new(CLIENT_NAME, jack::ClientOptions::NO_START_SERVER)?;
    info!(
        "jack client up: {} Hz, {} frames per period",
        client.sample_rate(),
        client.buffer_size()
    );

    let in_a = client.register_port("jam_in_1", jack::AudioIn::default())?;
    let in_b = client.register_port("jam_in_2", jack::AudioIn::default())?;
    let mut out_a = client.register_port("jam_out_l", jack::AudioOut::default())?;
    let mut out_b = client.register_port("jam_out_r", jack::AudioOut::default())?;

    let mut failed = false;
    let process_callback = move |_: &jack::Client, ps: &jack::ProcessScope| -> jack::Control {
        let in_a_p = in_a.as_slice(ps);
        let in_b_p = in_b.as_slice(ps);
        let out_a_p = out_a.as_mut_slice(ps);
        let out_b_p = out_b.as_mut_slice(ps);
        match engine.process(in_a_p, in_b_p, out_a_p, out_b_p) {
            Ok(()) => failed = false,
            Err(e) => {
                if !failed {
                    error!("engine process failed: {}", e);
                }
                failed = true;
                out_a_p.fill(0.0);
                out_b_p.fill(0.0);
            }
        }
        jack::Control::Continue
    };
    let process = jack::ClosureProcessHandler::new(process_callback);
    let active_client = client.activate_async(Notifications, process)?;

    if auto_connect {
        let connections = [
            ("system:capture_1", "jamsync:jam_in_1"),
            ("system:capture_2", "jamsync:jam_in_2"),
            ("jamsync:jam_out_l", "system:playback_1"),
            ("jamsync:jam_out_r", "system:playback_2"),
        ];
        for (from, to) in connections {
            if let Err(e) = active_client.as_client().connect_ports_by_name(from, to) {
                warn!("could not connect {} to {}: {}", from, to, e);
            }
        }
    }

    while running.load(Ordering::Relaxed) {
        sleep(Duration::from_millis(100));
    }
    active_client.deactivate()?;
    debug!("jack client deactivated");
    Ok(())
}

struct Notifications;

impl jack::NotificationHandler for Notifications {
    fn thread_init(&self, _: &jack::Client) {
        debug!("JACK: thread init");
    }

    fn shutdown(&mut self, status: jack::ClientStatus, reason: &str) {
        warn!(
            "JACK: shutdown with status {:?} because \"{}\"",
            status, reason
        );
    }

    fn sample_rate(&mut self, _: &jack::Client, srate: jack::Frames) -> jack::Control {
        info!("JACK: sample rate changed to {}", srate);
        jack::Control::Continue
    }

    fn xrun(&mut self, _: &jack::Client) -> jack::Control {
        debug!("JACK: xrun occurred");
        jack::Control::Continue
    }
}
