//! Render the metronome of an offline session into a wave file, with a tempo change.
//!
//! The first interval plays at `--bpm`.  The change to `--new-bpm` is scheduled right after
//! the start and lands on the first boundary.
use clap::Parser;
use jamsync::{
    common::{box_error::BoxError, config::SessionConfig},
    session::{build_session, transport::OfflineTransport, vote::VoteField},
    sound::{
        events::SessionEvent,
        offline_driver::{join_render, OfflineDriver, StereoBuffer},
    },
};
use log::info;

/// Render a metronome to a wav file
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Filename for the output
    #[arg(short, long, default_value_t = String::from("metronome.wav"))]
    out_file: String,

    #[arg(long, default_value_t = 48000)]
    sample_rate: i64,

    #[arg(long, default_value_t = 128)]
    block_size: i64,

    #[arg(long, default_value_t = 4)]
    bpi: i64,

    #[arg(long, default_value_t = 120)]
    bpm: i64,

    /// Tempo after the first interval
    #[arg(long, default_value_t = 90)]
    new_bpm: u32,

    /// How many intervals to render
    #[arg(short, long, default_value_t = 3)]
    intervals: usize,
}

fn main() -> Result<(), BoxError> {
    env_logger::init();
    let args = Args::parse();
    let config = SessionConfig::from_values(
        args.sample_rate,
        args.block_size,
        args.bpi,
        args.bpm,
        args.bpi,
    )?;
    let sample_rate = config.sample_rate;
    let block = config.block_size as usize;
    let first = config.frames_per_interval();

    let (mut handle, engine, events) = build_session(config, Box::new(OfflineTransport))?;
    handle.start_session()?;
    // parked until the first boundary
    handle.schedule_tempo_change(VoteField::Bpm, args.new_bpm)?;

    let later = SessionConfig::from_values(
        args.sample_rate,
        args.block_size,
        args.bpi,
        args.new_bpm as i64,
        args.bpi,
    )?
    .frames_per_interval();
    let frames = first + later * args.intervals.saturating_sub(1);
    let render = OfflineDriver::new(block).spawn_render(engine, StereoBuffer::default(), frames)?;
    let (_engine, out) = join_render(render)?;

    for ev in events.try_iter() {
        match ev {
            SessionEvent::IntervalBeatChanged { .. } => (),
            other => info!("{}", other.as_json()),
        }
    }
    println!(
        "bpi {} bpm {} at the end, {} frames",
        handle.current_bpi(),
        handle.current_bpm(),
        out.frames()
    );
    out.write_wav(&args.out_file, sample_rate)?;
    Ok(())
}
