//! light-panel
//!
//! Command line control panel for an Ai-Thinker RGBW light: follows the
//! device state and firmware updates, and sends the same commands the web
//! interface does.

use clap::{Parser, Subcommand};
use lightlink::link::proto::{keys, Frame, OtaEvent, Rgb, TelemetryEvent};
use lightlink::link::{Channel, Inbound, LinkEvent};
use lightlink::panel::session::Step;
use lightlink::panel::{settings, Confirmation, Outcome, Panel, ViewModel};
use lightlink_tools::{parse_assignment, PanelOpts, Profile};
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(
    name = "light-panel",
    version,
    about = "Control panel for the Ai-Thinker RGBW light"
)]
struct Cli {
    #[command(flatten)]
    opts: PanelOpts,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Follow state changes and firmware updates
    Monitor,
    /// Flip a switch (state, gamma)
    Toggle {
        /// State key of the switch
        key: String,
    },
    /// Set a level (brightness, color_temp, white_value, r, g, b)
    Set {
        /// State key of the level
        key: String,
        /// New value
        value: i64,
    },
    /// Set the color
    Color { r: i64, g: i64, b: i64 },
    /// Change device settings
    Save {
        /// Fields to change, as field=value
        #[arg(value_name = "FIELD=VALUE", required = true)]
        fields: Vec<String>,
    },
    /// Restart the device
    Restart,
    /// Reset the device to factory defaults
    Reset,
    /// Print a new random API key
    ApiKey,
}

type LivePanel = Panel<ViewModel>;

fn stamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f ").to_string()
}

fn describe(frame: &Frame) -> String {
    frame
        .entries()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ")
}

fn ask(prompt: &str) -> bool {
    print!("{} [y/N] ", prompt);
    let _ = io::stdout().flush();
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn open(opts: &PanelOpts, profile: &Profile) -> Result<LivePanel, ()> {
    let yes = opts.yes;
    let mut panel = Panel::new(ViewModel::new(), opts.connection(profile))
        .with_confirm(move |prompt: &str| yes || ask(prompt));
    let url = panel.link().command_endpoint().url();
    if let Err(err) = panel.connect() {
        eprintln!("{}: {}", url, err);
        return Err(());
    }
    Ok(panel)
}

/// Processes inbound items until `done` holds or `wait` runs out.
fn settle(panel: &mut LivePanel, wait: Duration, done: impl Fn(&LivePanel, &Inbound) -> bool) -> Result<(), ()> {
    let deadline = Instant::now() + wait;
    loop {
        let now = Instant::now();
        if now >= deadline {
            eprintln!("no answer from the device");
            return Err(());
        }
        match panel.step(deadline - now) {
            Ok(Step::Processed(inbound)) => {
                if let Inbound::Link(LinkEvent::Error(Channel::Command, err)) = &inbound {
                    eprintln!("{}", err);
                    return Err(());
                }
                if done(&*panel, &inbound) {
                    return Ok(());
                }
            }
            Ok(_) => {}
            Err(err) => {
                eprintln!("{}", err);
                return Err(());
            }
        }
    }
}

fn command_open(panel: &LivePanel, _: &Inbound) -> bool {
    panel.link().is_open()
}

fn has_key(key: &'static str) -> impl Fn(&LivePanel, &Inbound) -> bool {
    move |_, inbound| match inbound {
        Inbound::Frame(frame) => frame.get(key).is_some(),
        _ => false,
    }
}

fn has_settings(_: &LivePanel, inbound: &Inbound) -> bool {
    match inbound {
        Inbound::Frame(frame) => {
            frame.get(keys::SETTINGS).is_some() || frame.get(keys::SETTINGS_LEGACY).is_some()
        }
        _ => false,
    }
}

/// Gives the port thread a moment to put queued frames on the wire.
fn linger(panel: &mut LivePanel) -> Result<(), ()> {
    let deadline = Instant::now() + Duration::from_millis(300);
    while Instant::now() < deadline {
        if let Err(err) = panel.step(Duration::from_millis(50)) {
            eprintln!("{}", err);
            return Err(());
        }
    }
    Ok(())
}

fn report(outcome: Outcome) -> Result<(), ()> {
    match outcome {
        Outcome::Sent | Outcome::Applied => Ok(()),
        Outcome::Invalid(report) => {
            eprintln!("{}", report);
            Err(())
        }
        Outcome::Declined => {
            eprintln!("cancelled");
            Err(())
        }
        Outcome::Unknown(key) => {
            eprintln!("no control named {}", key);
            Err(())
        }
    }
}

fn monitor(opts: &PanelOpts, profile: &Profile) -> Result<(), ()> {
    let mut panel = open(opts, profile)?;
    loop {
        match panel.step(Duration::from_secs(1)) {
            Ok(Step::Processed(Inbound::Frame(frame))) => {
                println!("{}{}", stamp(), describe(&frame));
            }
            Ok(Step::Processed(Inbound::Telemetry(TelemetryEvent::Ota(event)))) => {
                match event {
                    OtaEvent::Start => println!("{}firmware update started", stamp()),
                    OtaEvent::Progress(p) => println!("{}firmware update {}%", stamp(), p),
                    OtaEvent::Unrecognized(data) => log::debug!("ota {}", data),
                }
                for msg in panel.view().progress_messages() {
                    log::info!("{}", msg);
                }
            }
            Ok(Step::Processed(Inbound::Link(event))) => {
                println!("{}{:?}", stamp(), event);
            }
            Ok(Step::Reloaded) => {
                println!("{}reloaded", stamp());
            }
            Ok(_) => {}
            Err(err) => {
                eprintln!("{}", err);
                return Err(());
            }
        }
    }
}

fn toggle(opts: &PanelOpts, profile: &Profile, key: &str) -> Result<(), ()> {
    let mut panel = open(opts, profile)?;
    let key: &'static str = match key {
        keys::STATE => keys::STATE,
        keys::GAMMA => keys::GAMMA,
        other => {
            eprintln!("{} is not a device switch", other);
            return Err(());
        }
    };
    settle(&mut panel, opts.wait(profile), has_key(key))?;
    let outcome = panel.toggle(key);
    linger(&mut panel)?;
    report(outcome)
}

fn set(opts: &PanelOpts, profile: &Profile, key: &str, value: i64) -> Result<(), ()> {
    let mut panel = open(opts, profile)?;
    // Other channels keep their values in the composite color.
    if lightlink::panel::compose::is_color_channel(key) {
        settle(&mut panel, opts.wait(profile), has_key(keys::COLOR))?;
    } else {
        settle(&mut panel, opts.wait(profile), command_open)?;
    }
    let outcome = panel.commit_range(key, value);
    linger(&mut panel)?;
    report(outcome)
}

fn color(opts: &PanelOpts, profile: &Profile, r: i64, g: i64, b: i64) -> Result<(), ()> {
    let mut panel = open(opts, profile)?;
    settle(&mut panel, opts.wait(profile), command_open)?;
    let outcome = panel.commit_color(Rgb { r, g, b });
    linger(&mut panel)?;
    report(outcome)
}

fn save(opts: &PanelOpts, profile: &Profile, fields: &[String]) -> Result<(), ()> {
    let mut assignments = Vec::new();
    for arg in fields {
        match parse_assignment(arg) {
            Some(pair) => assignments.push(pair),
            None => {
                eprintln!("expected FIELD=VALUE, got {}", arg);
                return Err(());
            }
        }
    }
    let mut panel = open(opts, profile)?;
    settle(&mut panel, opts.wait(profile), has_settings)?;
    for (field, value) in assignments {
        if !panel.view_mut().input(field, value) {
            eprintln!("no settings field named {}", field);
            return Err(());
        }
    }
    if let Err(report) = panel.save() {
        eprintln!("{}", report);
        return Err(());
    }
    linger(&mut panel)
}

fn destructive(opts: &PanelOpts, profile: &Profile, reset: bool) -> Result<(), ()> {
    let mut panel = open(opts, profile)?;
    settle(&mut panel, opts.wait(profile), command_open)?;
    let now = Instant::now();
    let confirmation = if reset {
        panel.reset(now)
    } else {
        panel.restart(now)
    };
    if confirmation == Confirmation::Declined {
        return report(Outcome::Declined);
    }
    println!("Please wait for the device to restart...");
    linger(&mut panel)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    cli.opts.init_logging();

    let profile = match cli.opts.profile() {
        Ok(profile) => profile,
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::FAILURE;
        }
    };

    let opts = &cli.opts;
    let result = match cli.command {
        Commands::Monitor => monitor(opts, &profile),
        Commands::Toggle { key } => toggle(opts, &profile, &key),
        Commands::Set { key, value } => set(opts, &profile, &key, value),
        Commands::Color { r, g, b } => color(opts, &profile, r, g, b),
        Commands::Save { fields } => save(opts, &profile, &fields),
        Commands::Restart => destructive(opts, &profile, false),
        Commands::Reset => destructive(opts, &profile, true),
        Commands::ApiKey => {
            println!("{}", settings::generate_api_key());
            Ok(())
        }
    };

    if result.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
