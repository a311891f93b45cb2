//! Run a session under JACK and drive it from stdin.
//!
//! Lines on stdin stand in for the network and the UI:
//!
//! ```text
//! bob: some chat             chat line from bob (votes from the relay come in this way)
//! /join bob guitar           a remote channel shows up
//! /leave 10                  remote track 10 goes away
//! /vote bpm 120              cast a vote
//! /tempo bpi 8               the server announces a new bpi for the next interval
//! /status                    print the session status
//! {"param": 3, ...}          a ParamMessage
//! /quit
//! ```
use clap::Parser;
use jamsync::{
    common::{
        box_error::BoxError,
        config::{default_settings, SessionConfig, SettingsFile, DEFAULT_SETTINGS_FILE},
    },
    session::{
        build_session,
        handle::{ChannelDescriptor, SessionHandle},
        param_message::{session_status, ParamMessage},
        transport::ChatTransport,
        vote::VoteField,
    },
    sound::jack_thread,
};
use log::{error, info, warn};
use std::{io::BufRead, thread};

/// Jam along to the interval grid under JACK
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Settings file
    #[arg(short, long, default_value_t = String::from(DEFAULT_SETTINGS_FILE))]
    settings: String,

    /// Who we are on the server
    #[arg(short, long)]
    identity: Option<String>,

    /// Beats per interval to start with
    #[arg(long)]
    bpi: Option<i64>,

    /// Beats per minute to start with
    #[arg(long)]
    bpm: Option<i64>,

    /// Don't monitor the local input
    #[arg(long, default_value_t = false)]
    no_loopback: bool,

    /// Leave the JACK ports unconnected
    #[arg(long, default_value_t = false)]
    no_connect: bool,
}

fn load_config(args: &Args) -> Result<SessionConfig, BoxError> {
    let settings = SettingsFile::build(&args.settings, default_settings())?;
    let mut config = SessionConfig::from_settings(&settings)?;
    if let Some(identity) = &args.identity {
        config.local_identity = identity.clone();
    }
    if let Some(bpi) = args.bpi {
        config.bpi = jamsync::common::config::positive("bpi", bpi)?;
    }
    if let Some(bpm) = args.bpm {
        config.bpm = jamsync::common::config::positive("bpm", bpm)?;
    }
    config.no_loopback |= args.no_loopback;
    config.validate()?;
    Ok(config)
}

fn field_and_value(words: &[&str]) -> Result<(VoteField, u32), BoxError> {
    if words.len() < 3 {
        simple_error::bail!("need a field and a value");
    }
    Ok((words[1].parse()?, words[2].parse()?))
}

// returns false when it's time to go
fn handle_line(handle: &mut SessionHandle, line: &str) -> Result<bool, BoxError> {
    let line = line.trim();
    if line.starts_with('{') {
        let msg = ParamMessage::from_string(line)?;
        info!("param message: {}", msg);
        if let Some(status) = msg.apply(handle)? {
            println!("{}", status);
        }
        return Ok(true);
    }
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.first() {
        Some(&"/quit") => return Ok(false),
        Some(&"/join") => {
            let who = words.get(1).unwrap_or(&"somebody");
            let name = words.get(2).unwrap_or(&"channel");
            let id = handle.on_channel_added(who, &ChannelDescriptor::new(name, 0))?;
            println!("{} is on track {}", who, id);
        }
        Some(&"/leave") => {
            let id = words.get(1).unwrap_or(&"0").parse()?;
            handle.on_channel_removed(id);
        }
        Some(&"/vote") => {
            let (field, value) = field_and_value(&words)?;
            handle.propose_vote(field, value)?;
        }
        Some(&"/tempo") => {
            let (field, value) = field_and_value(&words)?;
            handle.schedule_tempo_change(field, value)?;
        }
        Some(&"/status") => println!("{}", session_status(handle)),
        Some(_) => {
            let (sender, text) = line.split_once(": ").unwrap_or(("", line));
            if let Some(proposal) = handle.on_chat_message(sender, text) {
                println!(
                    "vote for {} {}?  type /vote {} {} to agree",
                    proposal.field, proposal.value, proposal.field, proposal.value
                );
            }
        }
        None => (),
    }
    Ok(true)
}

fn main() -> Result<(), BoxError> {
    env_logger::init();
    let args = Args::parse();
    let config = load_config(&args)?;

    let transport = ChatTransport::new(|text: &str| -> Result<(), BoxError> {
        println!("> {}", text);
        Ok(())
    });
    let (mut handle, engine, events) = build_session(config, Box::new(transport))?;

    let running = handle.running_flag();
    let auto_connect = !args.no_connect;
    let audio = thread::spawn(move || match jack_thread::run(engine, running, auto_connect) {
        Ok(()) => info!("jack thread done"),
        Err(e) => error!("Jack thread exited with error {}", e),
    });
    thread::spawn(move || {
        for ev in events {
            println!("{}", ev.as_json());
        }
    });

    handle.start_session()?;
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        match handle_line(&mut handle, &line) {
            Ok(true) => (),
            Ok(false) => break,
            Err(e) => warn!("{}: {}", line, e),
        }
        handle.collect_retired();
    }

    handle.shutdown();
    if audio.join().is_err() {
        error!("jack thread panicked");
    }
    handle.collect_retired();
    Ok(())
}
